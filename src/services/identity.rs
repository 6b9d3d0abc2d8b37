use std::sync::Arc;

use sea_orm::EntityTrait;
use tracing::{error, instrument};

use crate::{
    db::DbPool,
    entities::user::{self, Entity as User},
    errors::ServiceError,
};

/// Account profile lookups. Profiles only back-fill invoice customer details,
/// so a missing user is `Ok(None)` rather than an error.
#[derive(Clone)]
pub struct IdentityService {
    db_pool: Arc<DbPool>,
}

impl IdentityService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &str) -> Result<Option<user::Model>, ServiceError> {
        User::find_by_id(id.to_string())
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(user_id = %id, error = %e, "Database error when fetching user");
                ServiceError::DatabaseError(e)
            })
    }
}

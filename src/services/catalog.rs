use std::sync::Arc;

use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{error, instrument, warn};

use crate::{
    db::DbPool,
    entities::product::{self, Column as ProductColumn, Entity as Product},
    errors::ServiceError,
};

/// Read and stock-mutation access to the product catalog.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: &str) -> Result<Option<product::Model>, ServiceError> {
        Product::find_by_id(id.to_string())
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(product_id = %id, error = %e, "Database error when fetching product");
                ServiceError::DatabaseError(e)
            })
    }

    /// Loads several products through `conn`, which may be an open transaction.
    pub async fn get_products<C: ConnectionTrait>(
        &self,
        conn: &C,
        ids: &[String],
    ) -> Result<Vec<product::Model>, ServiceError> {
        Ok(Product::find()
            .filter(ProductColumn::Id.is_in(ids.iter().cloned()))
            .all(conn)
            .await?)
    }

    /// Applies `delta` to a product's stock as a single conditional update.
    ///
    /// Negative deltas only apply to active products holding at least
    /// `-delta` units, so concurrent checkouts can never oversell.
    #[instrument(skip(self, conn))]
    pub async fn adjust_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: &str,
        delta: i32,
    ) -> Result<(), ServiceError> {
        if delta == 0 {
            return Ok(());
        }

        let update = Product::update_many().filter(ProductColumn::Id.eq(id));
        let result = if delta < 0 {
            let quantity = delta.saturating_neg();
            update
                .col_expr(ProductColumn::Stock, Expr::col(ProductColumn::Stock).sub(quantity))
                .filter(ProductColumn::IsActive.eq(true))
                .filter(ProductColumn::Stock.gte(quantity))
                .exec(conn)
                .await?
        } else {
            update
                .col_expr(ProductColumn::Stock, Expr::col(ProductColumn::Stock).add(delta))
                .exec(conn)
                .await?
        };

        if result.rows_affected == 1 {
            return Ok(());
        }

        if delta < 0 {
            warn!(product_id = %id, delta, "stock decrement rejected");
            Err(ServiceError::InsufficientStock(format!(
                "product {} does not have {} units available",
                id,
                delta.saturating_neg()
            )))
        } else {
            Err(ServiceError::NotFound(format!("product {} not found", id)))
        }
    }
}

use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

use storefront_payments::{config, db, migrator::Migrator};

/// Applies the schema, or rolls back the last migration with `down`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    info!("Starting database migration");
    let pool = db::establish_connection_from_app_config(&cfg).await?;

    match std::env::args().nth(1).as_deref() {
        Some("down") => {
            info!("Rolling back the most recent migration");
            Migrator::down(&pool, Some(1)).await.map_err(|e| {
                error!("Rollback failed: {}", e);
                e
            })?;
        }
        Some("status") => {
            Migrator::status(&pool).await?;
        }
        _ => db::run_migrations(&pool).await?,
    }

    info!("Migration completed successfully");
    Ok(())
}

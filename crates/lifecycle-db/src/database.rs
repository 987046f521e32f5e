use lifecycle_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::repository::ProductRepository;

/// Connection pool with the schema brought up to date.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and apply every pending migration before handing out the pool.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;

        tracing::debug!(max_connections = config.max_connections, "Database ready");
        Ok(Self { pool })
    }

    pub fn product_repo(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }
}

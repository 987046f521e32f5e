use chrono::{DateTime, Utc};
use lifecycle_core::error::AppError;
use lifecycle_core::models::{
    CrawlJob, ProductData, StatusChange, Target, compute_hash, detect_status_change,
};
use lifecycle_core::traits::ProductCatalog;
use serde::Serialize;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// One stored observation of a product page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSnapshot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_code: String,
    pub description: String,
    pub status: Option<String>,
    pub replacement_code: Option<String>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Repository for products and their snapshots in PostgreSQL.
#[derive(Clone)]
pub struct ProductRepository {
    pool: Pool<Postgres>,
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One target per distinct code, using the oldest row for that code.
    pub async fn list_targets(&self) -> Result<Vec<Target>, AppError> {
        let rows = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT DISTINCT ON (code) id, code, url
            FROM products
            ORDER BY code, created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// The oldest product row for `code`, if any.
    pub async fn find_target(&self, code: &str) -> Result<Option<Target>, AppError> {
        let row = sqlx::query_as::<_, TargetRow>(
            r#"
            SELECT id, code, url
            FROM products
            WHERE code = $1
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(Into::into))
    }

    /// Return the existing target for `code`, registering it first if unknown.
    pub async fn ensure_target(&self, code: &str, url: &str) -> Result<Target, AppError> {
        if let Some(target) = self.find_target(code).await? {
            return Ok(target);
        }

        let row = sqlx::query_as::<_, TargetRow>(
            r#"
            INSERT INTO products (code, url)
            VALUES ($1, $2)
            RETURNING id, code, url
            "#,
        )
        .bind(code)
        .bind(url)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::info!(%code, "Product registered");
        Ok(row.into())
    }

    /// Store a snapshot and update the product's lifecycle fields.
    ///
    /// The previous status is read under a row lock in the same transaction
    /// as the update, so concurrent saves for one code cannot both miss a
    /// change.
    pub async fn save_observation(
        &self,
        job: &CrawlJob,
        data: &ProductData,
    ) -> Result<Option<StatusChange>, AppError> {
        let status = non_blank(data.status.as_deref());
        let replacement = non_blank(data.replacement_code.as_deref());
        let raw_html = non_blank(Some(data.raw_html.as_str()));

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO product_snapshots
                (product_id, description, status, replacement_code, raw_html, content_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.product_id)
        .bind(&data.description)
        .bind(status)
        .bind(replacement)
        .bind(raw_html)
        .bind(compute_hash(&data.raw_html))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if status.is_none() && replacement.is_none() {
            tx.commit().await.map_err(db_error)?;
            return Ok(None);
        }

        let current: Vec<(Option<String>,)> = sqlx::query_as(
            r#"
            SELECT lifecycle_status
            FROM products
            WHERE code = $1
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(&job.product_code)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;
        let old_status = current.into_iter().next().and_then(|(s,)| s);

        sqlx::query(
            r#"
            UPDATE products
            SET lifecycle_status = COALESCE($2, lifecycle_status),
                replacement_code = COALESCE($3, replacement_code),
                updated_at = NOW()
            WHERE code = $1
            "#,
        )
        .bind(&job.product_code)
        .bind(status)
        .bind(replacement)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(detect_status_change(
            &job.product_code,
            old_status.as_deref(),
            status,
        ))
    }

    /// Snapshots across every row sharing `code`, newest first.
    pub async fn snapshot_history(
        &self,
        code: &str,
        limit: usize,
    ) -> Result<Vec<ProductSnapshot>, AppError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT s.id, s.product_id, p.code, s.description, s.status,
                   s.replacement_code, s.content_hash, s.created_at
            FROM product_snapshots s
            JOIN products p ON p.id = s.product_id
            WHERE p.code = $1
            ORDER BY s.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(code)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct TargetRow {
    id: Uuid,
    code: String,
    url: String,
}

impl From<TargetRow> for Target {
    fn from(row: TargetRow) -> Self {
        Target {
            id: row.id,
            code: row.code,
            url: row.url,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    product_id: Uuid,
    code: String,
    description: String,
    status: Option<String>,
    replacement_code: Option<String>,
    content_hash: String,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for ProductSnapshot {
    fn from(row: SnapshotRow) -> Self {
        ProductSnapshot {
            id: row.id,
            product_id: row.product_id,
            product_code: row.code,
            description: row.description,
            status: row.status,
            replacement_code: row.replacement_code,
            content_hash: row.content_hash,
            created_at: row.created_at,
        }
    }
}

// -- Trait implementation --

impl ProductCatalog for ProductRepository {
    async fn list_targets(&self) -> Result<Vec<Target>, AppError> {
        ProductRepository::list_targets(self).await
    }

    async fn save_observation(
        &self,
        job: &CrawlJob,
        data: &ProductData,
    ) -> Result<Option<StatusChange>, AppError> {
        ProductRepository::save_observation(self, job, data).await
    }
}

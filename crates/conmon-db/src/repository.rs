use conmon_core::error::AppError;
use conmon_core::mapper::{FieldSet, FieldValue};
use conmon_core::models::{Record, Source};
use sqlx::PgPool;

use crate::dao::Dao;

/// Repository for monitored sources.
#[derive(Clone)]
pub struct SourceRepository {
    pool: PgPool,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All sources, ordered by id.
    pub async fn list(&self) -> Result<Vec<Source>, AppError> {
        let mut sources: Vec<Source> = Dao::list(&self.pool, &FieldSet::new()).await?;
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    /// Enabled sources, ordered by id.
    pub async fn list_enabled(&self) -> Result<Vec<Source>, AppError> {
        let mut sources: Vec<Source> =
            Dao::list(&self.pool, &FieldSet::new().with("enabled", true)).await?;
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Source>, AppError> {
        let sources: Vec<Source> = Dao::list(&self.pool, &FieldSet::new().with("id", id)).await?;
        Ok(sources.into_iter().next())
    }

    pub async fn insert(&self, source: &Source) -> Result<(), AppError> {
        Dao::insert(&self.pool, source).await?;
        Ok(())
    }

    /// Returns false when no source has this id.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, AppError> {
        let fields = FieldSet::new().with("id", id).with("enabled", enabled);
        Ok(Dao::update::<Source, _>(&self.pool, &fields).await? > 0)
    }

    /// Set or clear the watermark. Returns false when no source has this id.
    pub async fn set_watermark(&self, id: &str, watermark: Option<&str>) -> Result<bool, AppError> {
        let fields = FieldSet::new()
            .with("id", id)
            .with("watermark_url", FieldValue::text_opt(watermark));
        Ok(Dao::update::<Source, _>(&self.pool, &fields).await? > 0)
    }

    /// Delete a source and, through the foreign key, its records.
    pub async fn remove(&self, id: &str) -> Result<bool, AppError> {
        Ok(Dao::delete::<Source, _>(&self.pool, &FieldSet::new().with("id", id)).await? > 0)
    }
}

/// Repository for persisted records.
#[derive(Clone)]
pub struct RecordRepository {
    pool: PgPool,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &Record) -> Result<(), AppError> {
        Dao::insert(&self.pool, record).await?;
        Ok(())
    }

    /// Most recently stored records of a source, newest first.
    pub async fn recent(&self, source_id: &str, limit: usize) -> Result<Vec<Record>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM records
            WHERE source_id = $1
            ORDER BY created_at DESC, pub_time DESC NULLS LAST
            LIMIT $2
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.iter().map(Dao::from_row).collect()
    }

    pub async fn count(&self, source_id: &str) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE source_id = $1")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }
}

use conmon_core::AppError;
use conmon_core::mapper::FieldSet;
use conmon_core::models::{Record, Source};
use conmon_core::traits::RecordStore;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::dao::Dao;
use crate::repository::{RecordRepository, SourceRepository};

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn sources(&self) -> SourceRepository {
        SourceRepository::new(self.pool.clone())
    }

    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl RecordStore for Database {
    async fn enabled_sources(&self) -> Result<Vec<Source>, AppError> {
        self.sources().list_enabled().await
    }

    /// Inserts the unseen records and moves the watermark in one transaction.
    async fn commit_batch(
        &self,
        source_id: &str,
        records: &[Record],
        watermark: &str,
    ) -> Result<Vec<Record>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            if Dao::insert_new(&mut *tx, record).await? {
                inserted.push(record.clone());
            } else {
                tracing::debug!(%source_id, url = %record.url, "Already stored, skipping");
            }
        }

        let fields = FieldSet::new()
            .with("id", source_id)
            .with("watermark_url", watermark);
        let updated = Dao::update::<Source, _>(&mut *tx, &fields).await?;
        if updated == 0 {
            return Err(AppError::DatabaseError(format!(
                "source '{source_id}' does not exist"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        tracing::debug!(%source_id, records = inserted.len(), %watermark, "Batch committed");
        Ok(inserted)
    }
}

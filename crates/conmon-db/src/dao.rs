//! Executes mapper statements against PostgreSQL.
//!
//! Every function takes any [`PgExecutor`], so the same calls work on the
//! pool and inside a transaction (`&mut *tx`).

use chrono::{DateTime, Utc};
use conmon_core::error::AppError;
use conmon_core::mapper::{self, Entity, FieldKind, FieldSet, FieldValue, Statement, StatementKind};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgExecutor, Postgres, Row};
use uuid::Uuid;

/// Generic data access for [`Entity`] types.
pub struct Dao;

impl Dao {
    /// Insert every field of `entity`.
    pub async fn insert<'e, T, E>(executor: E, entity: &T) -> Result<u64, AppError>
    where
        T: Entity,
        E: PgExecutor<'e>,
    {
        let statement = Statement::build::<T>(StatementKind::Insert, &entity.to_fields())?;
        Self::execute(executor, &statement).await
    }

    /// Insert `entity` unless it collides with a stored row's unique key.
    /// Returns whether a row was written.
    pub async fn insert_new<'e, T, E>(executor: E, entity: &T) -> Result<bool, AppError>
    where
        T: Entity,
        E: PgExecutor<'e>,
    {
        let statement = Statement::build::<T>(StatementKind::InsertNew, &entity.to_fields())?;
        Ok(Self::execute(executor, &statement).await? > 0)
    }

    /// All rows matching every field of `filter` (all rows when empty).
    pub async fn list<'e, T, E>(executor: E, filter: &FieldSet) -> Result<Vec<T>, AppError>
    where
        T: Entity,
        E: PgExecutor<'e>,
    {
        let statement = Statement::build::<T>(StatementKind::Select, filter)?;
        Self::fetch_all(executor, &statement).await
    }

    /// Update by the first field, assigning the rest. Returns rows affected.
    pub async fn update<'e, T, E>(executor: E, fields: &FieldSet) -> Result<u64, AppError>
    where
        T: Entity,
        E: PgExecutor<'e>,
    {
        let statement = Statement::build::<T>(StatementKind::Update, fields)?;
        Self::execute(executor, &statement).await
    }

    /// Delete by the first field. Returns rows affected.
    pub async fn delete<'e, T, E>(executor: E, key: &FieldSet) -> Result<u64, AppError>
    where
        T: Entity,
        E: PgExecutor<'e>,
    {
        let statement = Statement::build::<T>(StatementKind::Delete, key)?;
        Self::execute(executor, &statement).await
    }

    pub async fn execute<'e, E>(executor: E, statement: &Statement) -> Result<u64, AppError>
    where
        E: PgExecutor<'e>,
    {
        tracing::trace!(sql = %statement.sql, params = statement.params.len(), "Executing");
        let result = bind(&statement.sql, &statement.params)
            .execute(executor)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(result.rows_affected())
    }

    pub async fn fetch_all<'e, T, E>(executor: E, statement: &Statement) -> Result<Vec<T>, AppError>
    where
        T: Entity,
        E: PgExecutor<'e>,
    {
        tracing::trace!(sql = %statement.sql, params = statement.params.len(), "Querying");
        let rows = bind(&statement.sql, &statement.params)
            .fetch_all(executor)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        rows.iter().map(Self::from_row).collect()
    }

    /// Populate an entity from a row. Undeclared columns and NULLs are
    /// skipped.
    pub fn from_row<T: Entity>(row: &PgRow) -> Result<T, AppError> {
        let mut values = Vec::with_capacity(row.len());
        for column in row.columns() {
            let name = column.name();
            let Some(descriptor) = T::descriptor(name) else {
                continue;
            };
            values.push((name.to_string(), decode(row, name, descriptor.kind, T::TABLE)?));
        }
        mapper::populate(values)
    }
}

fn bind<'q>(sql: &'q str, params: &'q [FieldValue]) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = match param {
            FieldValue::Null(FieldKind::Text) => query.bind(None::<String>),
            FieldValue::Null(FieldKind::Bool) => query.bind(None::<bool>),
            FieldValue::Null(FieldKind::Uuid) => query.bind(None::<Uuid>),
            FieldValue::Null(FieldKind::Timestamp) => query.bind(None::<DateTime<Utc>>),
            FieldValue::Text(value) => query.bind(value.as_str()),
            FieldValue::Bool(value) => query.bind(*value),
            FieldValue::Uuid(value) => query.bind(*value),
            FieldValue::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

fn decode(row: &PgRow, column: &str, kind: FieldKind, table: &str) -> Result<FieldValue, AppError> {
    let decoded = match kind {
        FieldKind::Text => row
            .try_get::<Option<String>, _>(column)
            .map(|v| v.map(FieldValue::Text)),
        FieldKind::Bool => row
            .try_get::<Option<bool>, _>(column)
            .map(|v| v.map(FieldValue::Bool)),
        FieldKind::Uuid => row
            .try_get::<Option<Uuid>, _>(column)
            .map(|v| v.map(FieldValue::Uuid)),
        FieldKind::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(column)
            .map(|v| v.map(FieldValue::Timestamp)),
    };
    decoded
        .map(|value| value.unwrap_or(FieldValue::Null(kind)))
        .map_err(|e| AppError::MappingError(format!("{table}.{column}: {e}")))
}

//! Convention-based mapping between entities and SQL statements.
//!
//! Every entity publishes an explicit descriptor table (column name + kind).
//! Statements are generated from an ordered [`FieldSet`]:
//!
//! | Kind   | Shape                                                   |
//! |--------|---------------------------------------------------------|
//! | select | `SELECT * FROM t WHERE c1 = $1 AND c2 = $2`             |
//! | insert | `INSERT INTO t (c1, c2) VALUES ($1, $2)`                |
//! | update | `UPDATE t SET c2 = $1, c3 = $2 WHERE c1 = $3`           |
//! | delete | `DELETE FROM t WHERE c1 = $1`                           |
//!
//! For update and delete the **first** field is the identifying predicate.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bool,
    Uuid,
    Timestamp,
}

/// One entry of an entity's descriptor table.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub column: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn new(column: &'static str, kind: FieldKind) -> Self {
        Self { column, kind }
    }
}

/// A single column value. `Null` carries its kind so it can be bound typed.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null(FieldKind),
    Text(String),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null(_))
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Null(kind) => *kind,
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Uuid(_) => FieldKind::Uuid,
            FieldValue::Timestamp(_) => FieldKind::Timestamp,
        }
    }

    /// Optional text, mapping `None` to a typed NULL.
    pub fn text_opt(value: Option<&str>) -> Self {
        match value {
            Some(v) => FieldValue::Text(v.to_string()),
            None => FieldValue::Null(FieldKind::Text),
        }
    }

    pub fn timestamp_opt(value: Option<DateTime<Utc>>) -> Self {
        match value {
            Some(v) => FieldValue::Timestamp(v),
            None => FieldValue::Null(FieldKind::Timestamp),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

/// Ordered `(column, value)` pairs. Order is significant for update/delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<(String, FieldValue)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((column.into(), value.into()));
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.push((column.into(), value.into()));
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }
}

/// A row as read back from storage, in column order.
pub type Row = Vec<(String, FieldValue)>;

/// A type with a fixed table and descriptor table.
pub trait Entity: Default {
    const TABLE: &'static str;
    const FIELDS: &'static [FieldDescriptor];

    /// All fields of this entity, identifying column first.
    fn to_fields(&self) -> FieldSet;

    /// Store a non-null value read from `column`.
    fn assign(&mut self, column: &str, value: FieldValue) -> Result<(), AppError>;

    fn descriptor(column: &str) -> Option<&'static FieldDescriptor> {
        Self::FIELDS.iter().find(|d| d.column == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    /// Insert, skipping rows that collide with a unique key.
    InsertNew,
    Update,
    Delete,
}

/// SQL text plus positional parameters (`$1`, `$2`, …).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

impl Statement {
    pub fn build<T: Entity>(kind: StatementKind, fields: &FieldSet) -> Result<Self, AppError> {
        for (column, value) in fields.iter() {
            let descriptor = T::descriptor(column).ok_or_else(|| {
                AppError::MappingError(format!("{} has no column '{column}'", T::TABLE))
            })?;
            if descriptor.kind != value.kind() {
                return Err(AppError::MappingError(format!(
                    "{}.{column} expects {:?}, got {:?}",
                    T::TABLE,
                    descriptor.kind,
                    value.kind()
                )));
            }
        }

        match kind {
            StatementKind::Select => Ok(Self::select(T::TABLE, fields)),
            StatementKind::Insert => Self::insert(T::TABLE, fields),
            StatementKind::InsertNew => {
                let mut statement = Self::insert(T::TABLE, fields)?;
                statement.sql.push_str(" ON CONFLICT DO NOTHING");
                Ok(statement)
            }
            StatementKind::Update => Self::update(T::TABLE, fields),
            StatementKind::Delete => Self::delete(T::TABLE, fields),
        }
    }

    fn select(table: &str, fields: &FieldSet) -> Self {
        let mut sql = format!("SELECT * FROM {table}");
        let predicates: Vec<String> = fields
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
            .collect();
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        Self {
            sql,
            params: fields.iter().map(|(_, v)| v.clone()).collect(),
        }
    }

    fn insert(table: &str, fields: &FieldSet) -> Result<Self, AppError> {
        if fields.is_empty() {
            return Err(AppError::MappingError(format!(
                "insert into {table} needs at least one field"
            )));
        }
        let columns: Vec<&str> = fields.iter().map(|(c, _)| c).collect();
        let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("${i}")).collect();
        Ok(Self {
            sql: format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ),
            params: fields.iter().map(|(_, v)| v.clone()).collect(),
        })
    }

    fn update(table: &str, fields: &FieldSet) -> Result<Self, AppError> {
        let mut iter = fields.iter();
        let (key_column, key_value) = iter.next().ok_or_else(|| {
            AppError::MappingError(format!("update of {table} needs an identifying field"))
        })?;
        let assignments: Vec<(&str, &FieldValue)> = iter.collect();
        if assignments.is_empty() {
            return Err(AppError::MappingError(format!(
                "update of {table} has nothing to assign"
            )));
        }

        let set_clause: Vec<String> = assignments
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
            .collect();
        let mut params: Vec<FieldValue> = assignments.iter().map(|(_, v)| (*v).clone()).collect();
        params.push(key_value.clone());

        Ok(Self {
            sql: format!(
                "UPDATE {table} SET {} WHERE {key_column} = ${}",
                set_clause.join(", "),
                params.len()
            ),
            params,
        })
    }

    fn delete(table: &str, fields: &FieldSet) -> Result<Self, AppError> {
        let (key_column, key_value) = fields.iter().next().ok_or_else(|| {
            AppError::MappingError(format!("delete from {table} needs an identifying field"))
        })?;
        Ok(Self {
            sql: format!("DELETE FROM {table} WHERE {key_column} = $1"),
            params: vec![key_value.clone()],
        })
    }
}

/// Build an entity from a storage row.
///
/// Columns without a declared field and NULL values are skipped, leaving the
/// field at its default.
pub fn populate<T: Entity>(row: Row) -> Result<T, AppError> {
    let mut entity = T::default();
    for (column, value) in row {
        if value.is_null() || T::descriptor(&column).is_none() {
            continue;
        }
        entity.assign(&column, value)?;
    }
    Ok(entity)
}

/// Error for an `assign` call whose value does not fit the column.
pub fn type_mismatch(table: &str, column: &str, value: &FieldValue) -> AppError {
    AppError::MappingError(format!(
        "{table}.{column} cannot hold a {:?} value",
        value.kind()
    ))
}

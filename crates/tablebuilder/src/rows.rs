//! Generic row access.
//!
//! Inserts and lists rows of any registered table by addressing its columns by
//! name. Values arrive and leave as JSON and are coerced against the field
//! types the [`EntityRegistry`] currently lists.

use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Row as _, Sqlite, ValueRef};
use tracing::debug;
use uuid::Uuid;

use crate::dialect::{SchemaDialect, SqliteDialect};
use crate::error::{Result, TableBuilderError};
use crate::registry::EntityRegistry;
use crate::schema::{FieldDefinition, FieldType, IDENTITY_FIELD};
use crate::type_map::TypeMapper;

/// A row as a mapping from field name to value.
pub type Row = Map<String, Value>;

/// A value ready to be bound to a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// SQL NULL.
    Null,
    /// Boolean, stored as 0/1.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Text.
    Text(String),
}

/// Untyped insert/select over registered tables.
#[derive(Debug, Clone)]
pub struct RowAccessor {
    pool: SqlitePool,
    registry: Arc<EntityRegistry>,
    mapper: TypeMapper,
    dialect: SqliteDialect,
}

impl RowAccessor {
    /// Creates a new accessor.
    #[must_use]
    pub fn new(pool: SqlitePool, registry: Arc<EntityRegistry>, mapper: TypeMapper) -> Self {
        Self {
            pool,
            registry,
            mapper,
            dialect: SqliteDialect::new(),
        }
    }

    /// Inserts `row` into `table` and returns the generated identity.
    ///
    /// Every key must be a registered field; missing fields take the column
    /// default. Nothing is written unless every value coerces.
    pub async fn insert(&self, table: &str, row: &Row) -> Result<Uuid> {
        let fields = self
            .registry
            .lookup(table)
            .ok_or_else(|| TableBuilderError::TableNotFound(table.to_string()))?;

        let mut columns = vec![IDENTITY_FIELD.to_string()];
        let mut values = Vec::with_capacity(row.len());
        for (key, value) in row {
            let field = fields.iter().find(|f| f.name == *key).ok_or_else(|| {
                TableBuilderError::UnknownField {
                    table: table.to_string(),
                    field: key.clone(),
                }
            })?;
            values.push(self.coerce(&field.name, field.field_type, value)?);
            columns.push(field.name.clone());
        }

        let id = Uuid::new_v4();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.dialect.quote_identifier(table),
            self.column_list(columns.iter().map(String::as_str)),
            vec!["?"; columns.len()].join(", ")
        );
        debug!(sql = %sql, "Inserting row");

        let mut query = sqlx::query(&sql).bind(id.to_string());
        for value in values {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await?;

        Ok(id)
    }

    /// Returns every row of `table` in insertion order.
    ///
    /// Each row carries the identity and every registered field, with nulls
    /// as JSON null.
    pub async fn list_all(&self, table: &str) -> Result<Vec<Row>> {
        let fields = self
            .registry
            .lookup(table)
            .ok_or_else(|| TableBuilderError::TableNotFound(table.to_string()))?;

        let mut columns = vec![FieldDefinition::new(IDENTITY_FIELD, FieldType::Identifier)];
        columns.extend(fields);

        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            self.column_list(columns.iter().map(|c| c.name.as_str())),
            self.dialect.quote_identifier(table)
        );
        debug!(sql = %sql, "Listing rows");

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(|row| decode_row(row, &columns)).collect()
    }

    /// Coerces a JSON value to the storage form of a field.
    pub fn coerce(&self, field: &str, field_type: FieldType, value: &Value) -> Result<ColumnValue> {
        let mismatch = || TableBuilderError::TypeMismatch {
            field: field.to_string(),
            expected: field_type,
        };

        match (field_type, value) {
            (FieldType::String | FieldType::Number, Value::Null) => Ok(ColumnValue::Null),
            (FieldType::String, Value::String(s))
                if s.chars().count() <= self.mapper.string_length() =>
            {
                Ok(ColumnValue::Text(s.clone()))
            }
            (FieldType::Number, Value::Number(n)) => {
                n.as_i64().map(ColumnValue::Int).ok_or_else(mismatch)
            }
            (FieldType::Number, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(ColumnValue::Int)
                .map_err(|_| mismatch()),
            (FieldType::Boolean, Value::Bool(b)) => Ok(ColumnValue::Bool(*b)),
            (FieldType::Boolean, Value::Number(n)) => match n.as_i64() {
                Some(0) => Ok(ColumnValue::Bool(false)),
                Some(1) => Ok(ColumnValue::Bool(true)),
                _ => Err(mismatch()),
            },
            (FieldType::Boolean, Value::String(s)) => parse_bool(s)
                .map(ColumnValue::Bool)
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        }
    }

    fn column_list<'a>(&self, names: impl Iterator<Item = &'a str>) -> String {
        names
            .map(|name| self.dialect.quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "t" | "on" => Some(true),
        "false" | "0" | "no" | "f" | "off" => Some(false),
        _ => None,
    }
}

/// Binds a column value to a query.
fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: ColumnValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        ColumnValue::Null => query.bind(Option::<i64>::None),
        ColumnValue::Bool(b) => query.bind(b),
        ColumnValue::Int(i) => query.bind(i),
        ColumnValue::Text(s) => query.bind(s),
    }
}

fn decode_row(row: &SqliteRow, columns: &[FieldDefinition]) -> Result<Row> {
    let mut decoded = Row::new();
    for (index, column) in columns.iter().enumerate() {
        let value = if row.try_get_raw(index)?.is_null() {
            Value::Null
        } else {
            match column.field_type {
                FieldType::String | FieldType::Identifier => {
                    Value::String(row.try_get::<String, _>(index)?)
                }
                FieldType::Number => Value::from(row.try_get::<i64, _>(index)?),
                FieldType::Boolean => Value::Bool(row.try_get::<i64, _>(index)? != 0),
            }
        };
        decoded.insert(column.name.clone(), value);
    }
    Ok(decoded)
}

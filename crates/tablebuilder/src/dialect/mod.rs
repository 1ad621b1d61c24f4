//! Database dialect implementations.
//!
//! A dialect knows how to spell column definitions and schema changes for
//! one database system, and how to read its declared column types back.

mod sqlite;

pub use sqlite::SqliteDialect;

use crate::schema::{ColumnSchema, FieldType, SqlType};

/// Trait for database-specific SQL generation.
pub trait SchemaDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the declared type name for the given type.
    fn type_name(&self, sql_type: &SqlType) -> String;

    /// Maps a declared column type read from the catalog back to a logical type.
    ///
    /// A declared length is not part of the logical type and is ignored.
    fn field_type_of(&self, declared: &str) -> Option<FieldType>;

    /// Generates `CREATE TABLE` for a table holding only `identity`.
    fn create_table_sql(&self, table: &str, identity: &ColumnSchema) -> String;

    /// Generates SQL for adding a column.
    fn add_column_sql(&self, table: &str, column: &ColumnSchema) -> String;

    /// Generates SQL for dropping a column.
    fn drop_column_sql(&self, table: &str, column: &str) -> String;

    /// Generates SQL for renaming a column.
    fn rename_column_sql(&self, table: &str, old_name: &str, new_name: &str) -> String;

    /// Generates the statements that convert `column` in place to a new type.
    ///
    /// `column.name` is the existing column; its values are converted.
    fn retype_column_sql(&self, table: &str, column: &ColumnSchema) -> Vec<String>;

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnSchema) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.type_name(&column.sql_type),
        ];

        if column.primary_key {
            parts.push("PRIMARY KEY".to_string());
        }

        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if let Some(default_sql) = column.default.to_sql() {
            parts.push(format!("DEFAULT {default_sql}"));
        }

        parts.join(" ")
    }

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

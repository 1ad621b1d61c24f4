//! SQLite dialect.
//!
//! SQLite has no `ALTER COLUMN`, so a type change is spelled as: add a
//! scratch column of the new type, copy converted values, drop the old
//! column, rename the scratch column. Requires SQLite 3.35.0+ for
//! `DROP COLUMN`.

use crate::schema::{ColumnSchema, FieldType, SqlType};

use super::SchemaDialect;

/// Prefix of the scratch column used while retyping.
const RETYPE_PREFIX: &str = "__retype_";

/// SQLite schema dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Expression converting the current value of `column` to `target`.
    fn convert_expression(&self, column: &str, target: &SqlType) -> String {
        let quoted = self.quote_identifier(column);
        match target {
            SqlType::Varchar(len) => format!("SUBSTR(CAST({quoted} AS TEXT), 1, {len})"),
            SqlType::Integer => format!("CAST({quoted} AS INTEGER)"),
            SqlType::Boolean => format!(
                "CASE WHEN {quoted} IS NULL THEN 0 \
                 WHEN typeof({quoted}) = 'integer' THEN {quoted} <> 0 \
                 ELSE LOWER(CAST({quoted} AS TEXT)) IN ('1', 'true', 't', 'yes', 'on') END"
            ),
            SqlType::Uuid => format!("CAST({quoted} AS TEXT)"),
        }
    }
}

impl SchemaDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn type_name(&self, sql_type: &SqlType) -> String {
        // Declared names are kept distinct so pragma_table_info can be mapped back.
        match sql_type {
            SqlType::Uuid => "UUID".to_string(),
            SqlType::Varchar(len) => format!("VARCHAR({len})"),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
        }
    }

    fn field_type_of(&self, declared: &str) -> Option<FieldType> {
        let declared = declared.trim().to_ascii_uppercase();
        let base = declared
            .split_once('(')
            .map_or(declared.as_str(), |(base, _)| base)
            .trim();
        match base {
            "UUID" => Some(FieldType::Identifier),
            "VARCHAR" | "CHAR" | "TEXT" => Some(FieldType::String),
            "INTEGER" | "INT" | "BIGINT" => Some(FieldType::Number),
            "BOOLEAN" | "BOOL" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    fn create_table_sql(&self, table: &str, identity: &ColumnSchema) -> String {
        format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            self.column_definition(identity)
        )
    }

    fn add_column_sql(&self, table: &str, column: &ColumnSchema) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column)
        )
    }

    fn drop_column_sql(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    fn rename_column_sql(&self, table: &str, old_name: &str, new_name: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(old_name),
            self.quote_identifier(new_name)
        )
    }

    fn retype_column_sql(&self, table: &str, column: &ColumnSchema) -> Vec<String> {
        let scratch_name = format!("{RETYPE_PREFIX}{}", column.name);
        let scratch = ColumnSchema {
            name: scratch_name.clone(),
            ..column.clone()
        };
        vec![
            self.add_column_sql(table, &scratch),
            format!(
                "UPDATE {} SET {} = {}",
                self.quote_identifier(table),
                self.quote_identifier(&scratch_name),
                self.convert_expression(&column.name, &column.sql_type)
            ),
            self.drop_column_sql(table, &column.name),
            self.rename_column_sql(table, &scratch_name, &column.name),
        ]
    }
}

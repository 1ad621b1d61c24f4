//! Logical field type to physical column mapping.

use crate::error::{Result, TableBuilderError};
use crate::schema::{
    ColumnSchema, DefaultValue, FieldType, SqlType, DEFAULT_STRING_LENGTH, IDENTITY_FIELD,
};

/// Maps logical field types to physical column specifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMapper {
    string_length: usize,
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(DEFAULT_STRING_LENGTH)
    }
}

impl TypeMapper {
    /// Creates a mapper bounding `string` columns to `string_length` characters.
    #[must_use]
    pub fn new(string_length: usize) -> Self {
        Self { string_length }
    }

    /// Returns the bound applied to `string` columns.
    #[must_use]
    pub fn string_length(&self) -> usize {
        self.string_length
    }

    /// Resolves the physical column for a field.
    ///
    /// The identity field always maps to the identity column, whatever type
    /// was requested for it.
    pub fn resolve(&self, field_name: &str, field_type: FieldType) -> Result<ColumnSchema> {
        if field_name == IDENTITY_FIELD {
            return Ok(Self::identity_column());
        }
        match field_type {
            FieldType::String => Ok(ColumnSchema::new(
                field_name,
                SqlType::Varchar(self.string_length),
            )),
            FieldType::Number => Ok(ColumnSchema::new(field_name, SqlType::Integer)),
            FieldType::Boolean => Ok(ColumnSchema::new(field_name, SqlType::Boolean)
                .not_null()
                .default(DefaultValue::Bool(false))),
            FieldType::Identifier => Err(TableBuilderError::UnsupportedType {
                field: field_name.to_string(),
                field_type: field_type.to_string(),
            }),
        }
    }

    /// The system identity column.
    #[must_use]
    pub fn identity_column() -> ColumnSchema {
        ColumnSchema::new(IDENTITY_FIELD, SqlType::Uuid).primary_key()
    }
}

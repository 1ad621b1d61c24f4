//! Error types for the table builder.

use std::fmt;

use crate::schema::FieldType;

/// A single problem found while validating a request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path of the offending input (e.g. `fields[2].type`).
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors raised while applying physical schema operations.
///
/// Whenever one of these is returned the surrounding transaction has
/// already been rolled back.
#[derive(Debug, thiserror::Error)]
pub enum DdlError {
    /// The operation cannot be expressed against the store.
    #[error("Unsupported operation on table `{table}`: {message}")]
    OperationUnsupported {
        /// Table the operation targeted.
        table: String,
        /// What was wrong with it.
        message: String,
    },

    /// A rename, retype or drop referenced a column that is not there.
    #[error("Column `{column}` not found on table `{table}`")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Missing column.
        column: String,
    },

    /// An add or rename targeted a column name that is already taken.
    #[error("Column `{column}` already exists on table `{table}`")]
    ColumnAlreadyExists {
        /// Table name.
        table: String,
        /// Conflicting column.
        column: String,
    },

    /// The physical table does not exist.
    #[error("Table `{0}` does not exist in the store")]
    TableMissing(String),

    /// Transport or transaction failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}

/// Errors raised by a metadata store.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Another table definition already uses this name.
    #[error("Table `{0}` is already recorded in the metadata store")]
    Conflict(String),

    /// A stored record could not be decoded.
    #[error("Corrupt metadata record for `{table}`: {message}")]
    Corrupt {
        /// Table the record belongs to.
        table: String,
        /// Decoding failure.
        message: String,
    },

    /// Database error while reading or writing metadata.
    #[error("Metadata store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Errors surfaced by the table builder engine.
#[derive(Debug, thiserror::Error)]
pub enum TableBuilderError {
    /// Malformed input.
    #[error("Validation failed:\n{}", .0.iter().map(|e| format!("  - {e}")).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<ValidationError>),

    /// A table with this name is already declared.
    #[error("Table `{0}` already exists")]
    TableAlreadyExists(String),

    /// No table with this name (or id) is registered.
    #[error("Table `{0}` not found")]
    TableNotFound(String),

    /// A row referenced a field the table does not have.
    #[error("Table `{table}` has no field `{field}`")]
    UnknownField {
        /// Table name.
        table: String,
        /// Offending key.
        field: String,
    },

    /// A row value could not be coerced to the column type.
    #[error("Field `{field}` expects a value of type {expected}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Logical type of the column.
        expected: FieldType,
    },

    /// A logical type has no physical mapping.
    #[error("Field `{field}` has unsupported type `{field_type}`")]
    UnsupportedType {
        /// Field name.
        field: String,
        /// Requested type.
        field_type: String,
    },

    /// Physical schema change failed and was rolled back.
    #[error(transparent)]
    Ddl(#[from] DdlError),

    /// Metadata store failure.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// DDL committed but the metadata record could not be updated.
    #[error("Schema of `{table}` was changed but its metadata could not be saved; manual reconciliation required: {source}")]
    ReconciliationRequired {
        /// Table name.
        table: String,
        /// The metadata failure.
        #[source]
        source: MetadataError,
    },

    /// Database error during row access.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl TableBuilderError {
    /// Returns true when the caller sent something wrong, false for server-side failures.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::TableAlreadyExists(_)
                | Self::TableNotFound(_)
                | Self::UnknownField { .. }
                | Self::TypeMismatch { .. }
        )
    }
}

/// Result type for table builder operations.
pub type Result<T> = std::result::Result<T, TableBuilderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_lists_every_problem() {
        let err = TableBuilderError::Validation(vec![
            ValidationError::new("name", "must not be empty"),
            ValidationError::new("fields[0].type", "`integer` is not a valid choice"),
        ]);
        let message = err.to_string();
        assert!(message.contains("  - name: must not be empty"));
        assert!(message.contains("  - fields[0].type: `integer` is not a valid choice"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(TableBuilderError::TableAlreadyExists("users".into()).is_client_error());
        assert!(
            TableBuilderError::TypeMismatch {
                field: "age".into(),
                expected: FieldType::Number,
            }
            .is_client_error()
        );
        assert!(
            !TableBuilderError::Ddl(DdlError::TableMissing("users".into())).is_client_error()
        );
        assert!(
            !TableBuilderError::UnsupportedType {
                field: "x".into(),
                field_type: "identifier".into(),
            }
            .is_client_error()
        );
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err = TableBuilderError::UnknownField {
            table: "users".into(),
            field: "nonexistent".into(),
        };
        assert_eq!(err.to_string(), "Table `users` has no field `nonexistent`");

        let err = TableBuilderError::TypeMismatch {
            field: "subscriber".into(),
            expected: FieldType::Boolean,
        };
        assert_eq!(
            err.to_string(),
            "Field `subscriber` expects a value of type boolean"
        );
    }
}

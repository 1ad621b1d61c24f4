//! Schema operations.
//!
//! The vocabulary of physical changes the differ emits and the executor
//! applies. Operations never mention the table they apply to; the executor
//! receives the table name alongside the batch.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::FieldType;

/// A single physical schema operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    /// Rename a column, converting it to `field_type` if its type differs.
    RenameColumn {
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
        /// Type the column must have afterwards.
        field_type: FieldType,
    },

    /// Add a column.
    AddColumn {
        /// Column name.
        name: String,
        /// Column type.
        field_type: FieldType,
    },

    /// Change the type of a column in place.
    AlterColumnType {
        /// Column name.
        name: String,
        /// New column type.
        field_type: FieldType,
    },

    /// Drop a column.
    DropColumn {
        /// Column name.
        name: String,
    },
}

impl SchemaOperation {
    /// Creates a RenameColumn operation.
    #[must_use]
    pub fn rename(from: impl Into<String>, to: impl Into<String>, field_type: FieldType) -> Self {
        Self::RenameColumn {
            from: from.into(),
            to: to.into(),
            field_type,
        }
    }

    /// Creates an AddColumn operation.
    #[must_use]
    pub fn add(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::AddColumn {
            name: name.into(),
            field_type,
        }
    }

    /// Creates an AlterColumnType operation.
    #[must_use]
    pub fn alter_type(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::AlterColumnType {
            name: name.into(),
            field_type,
        }
    }

    /// Creates a DropColumn operation.
    #[must_use]
    pub fn drop(name: impl Into<String>) -> Self {
        Self::DropColumn { name: name.into() }
    }

    /// Position of this operation's class in a batch: renames, adds, alters, drops.
    #[must_use]
    pub fn order_class(&self) -> u8 {
        match self {
            Self::RenameColumn { .. } => 0,
            Self::AddColumn { .. } => 1,
            Self::AlterColumnType { .. } => 2,
            Self::DropColumn { .. } => 3,
        }
    }

    /// The existing column this operation reads, if any.
    #[must_use]
    pub fn source_column(&self) -> Option<&str> {
        match self {
            Self::RenameColumn { from, .. } => Some(from),
            Self::AddColumn { .. } => None,
            Self::AlterColumnType { name, .. } | Self::DropColumn { name } => Some(name),
        }
    }

    /// The column name this operation introduces, if any.
    #[must_use]
    pub fn target_column(&self) -> Option<&str> {
        match self {
            Self::RenameColumn { to, .. } => Some(to),
            Self::AddColumn { name, .. } => Some(name),
            Self::AlterColumnType { .. } | Self::DropColumn { .. } => None,
        }
    }
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RenameColumn {
                from,
                to,
                field_type,
            } => write!(f, "rename {from} -> {to} ({field_type})"),
            Self::AddColumn { name, field_type } => write!(f, "add {name} ({field_type})"),
            Self::AlterColumnType { name, field_type } => {
                write!(f, "retype {name} -> {field_type}")
            }
            Self::DropColumn { name } => write!(f, "drop {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_classes() {
        let ops = [
            SchemaOperation::drop("b"),
            SchemaOperation::alter_type("a", FieldType::Number),
            SchemaOperation::add("d", FieldType::String),
            SchemaOperation::rename("b", "c", FieldType::Number),
        ];
        let classes: Vec<u8> = ops.iter().map(SchemaOperation::order_class).collect();
        assert_eq!(classes, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_source_and_target_columns() {
        let op = SchemaOperation::rename("b", "c", FieldType::Number);
        assert_eq!(op.source_column(), Some("b"));
        assert_eq!(op.target_column(), Some("c"));

        let op = SchemaOperation::add("d", FieldType::Boolean);
        assert_eq!(op.source_column(), None);
        assert_eq!(op.target_column(), Some("d"));

        let op = SchemaOperation::drop("e");
        assert_eq!(op.source_column(), Some("e"));
        assert_eq!(op.target_column(), None);
    }

    #[test]
    fn test_serialized_form() {
        let json = serde_json::to_value(SchemaOperation::rename("b", "c", FieldType::Number))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"op": "rename_column", "from": "b", "to": "c", "field_type": "number"})
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SchemaOperation::rename("b", "c", FieldType::Number).to_string(),
            "rename b -> c (number)"
        );
        assert_eq!(SchemaOperation::drop("b").to_string(), "drop b");
    }
}

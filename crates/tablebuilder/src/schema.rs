//! Schema representation types.
//!
//! [`TableDefinition`] and [`FieldDefinition`] describe what a caller declared.
//! [`PhysicalColumnSet`] describes what the store actually holds for one table.
//! [`ColumnSchema`] is the physical column specification handed to the dialect.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TableBuilderError;

/// Name of the system-managed identity column present on every table.
pub const IDENTITY_FIELD: &str = "id";

/// Maximum length of a table name (also the physical identifier).
pub const TABLE_NAME_MAX_LENGTH: usize = 63;

/// Maximum length of a field name.
pub const FIELD_NAME_MAX_LENGTH: usize = 100;

/// Default bound for `string` columns.
pub const DEFAULT_STRING_LENGTH: usize = 100;

/// Logical type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Bounded text.
    String,
    /// Signed integer.
    Number,
    /// Boolean, defaults to false.
    Boolean,
    /// System-generated unique identifier. Only the identity column has it.
    Identifier,
}

impl FieldType {
    /// Returns the wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Identifier => "identifier",
        }
    }

    /// Returns true for the types a client may declare.
    #[must_use]
    pub fn is_client_declarable(&self) -> bool {
        !matches!(self, Self::Identifier)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = TableBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "identifier" => Ok(Self::Identifier),
            other => Err(TableBuilderError::UnsupportedType {
                field: String::new(),
                field_type: other.to_string(),
            }),
        }
    }
}

/// One named, typed attribute of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name, unique within its table.
    pub name: String,
    /// Logical type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Name this field had before the current update request.
    #[serde(
        default,
        rename = "priorName",
        alias = "old_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub prior_name: Option<String>,
}

impl FieldDefinition {
    /// Creates a new field definition.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            prior_name: None,
        }
    }

    /// Marks this field as the new name of `prior_name`.
    #[must_use]
    pub fn renamed_from(mut self, prior_name: impl Into<String>) -> Self {
        self.prior_name = Some(prior_name.into());
        self
    }

    /// Returns the prior name if it actually differs from the current one.
    #[must_use]
    pub fn effective_prior_name(&self) -> Option<&str> {
        self.prior_name
            .as_deref()
            .filter(|prior| *prior != self.name)
    }

    /// Drops the rename hint, which is only meaningful during one update.
    #[must_use]
    pub fn settled(mut self) -> Self {
        self.prior_name = None;
        self
    }
}

/// Logical declaration of a dynamically created table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Stable identifier, used by the API shapes.
    pub id: Uuid,
    /// Table name, also the physical table identifier.
    pub name: String,
    /// Declared fields. Never includes the identity field.
    pub fields: Vec<FieldDefinition>,
}

impl TableDefinition {
    /// Creates a new table definition with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            fields,
        }
    }

    /// Gets a field by name.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

}

/// The column layout of one table as it exists (or is mirrored) in the store.
///
/// Always contains the identity column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalColumnSet {
    columns: BTreeMap<String, FieldType>,
}

impl Default for PhysicalColumnSet {
    fn default() -> Self {
        Self::identity_only()
    }
}

impl PhysicalColumnSet {
    /// A table holding only the identity column.
    #[must_use]
    pub fn identity_only() -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(IDENTITY_FIELD.to_string(), FieldType::Identifier);
        Self { columns }
    }

    /// Mirrors a declared field set.
    #[must_use]
    pub fn from_fields(fields: &[FieldDefinition]) -> Self {
        let mut set = Self::identity_only();
        for field in fields {
            set.insert(field.name.clone(), field.field_type);
        }
        set
    }

    /// Adds or replaces a column.
    pub fn insert(&mut self, name: impl Into<String>, field_type: FieldType) {
        self.columns.insert(name.into(), field_type);
    }

    /// Returns the type of a column.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.columns.get(name).copied()
    }

    /// Returns true if the column exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Returns all column names (sorted), identity included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Returns the non-identity columns (sorted by name).
    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.columns
            .iter()
            .filter(|(name, _)| name.as_str() != IDENTITY_FIELD)
            .map(|(name, ty)| (name.as_str(), *ty))
    }
}

impl FromIterator<(String, FieldType)> for PhysicalColumnSet {
    fn from_iter<I: IntoIterator<Item = (String, FieldType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Storage types used by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// UUID stored as text.
    Uuid,
    /// Variable-length character string with a maximum length.
    Varchar(usize),
    /// Signed 64-bit integer.
    Integer,
    /// Boolean stored as 0/1.
    Boolean,
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// No default value.
    None,
    /// Boolean default.
    Bool(bool),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        }
    }
}

/// Physical specification of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub sql_type: SqlType,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Default value.
    pub default: DefaultValue,
    /// Whether this column is the primary key.
    pub primary_key: bool,
}

impl ColumnSchema {
    /// Creates a new nullable column without default.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            default: DefaultValue::None,
            primary_key: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = value;
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false; // Primary keys are always NOT NULL
        self
    }
}

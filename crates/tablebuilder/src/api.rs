//! Request and response shapes, and validation at the boundary.
//!
//! [`TableBuilderService`] is what a transport (HTTP handler, CLI) calls. It
//! validates payloads, resolves table ids to names and delegates to the
//! [`TableManager`]. Malformed input never reaches the engine.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TableBuilderError, ValidationError};
use crate::manager::TableManager;
use crate::metadata::MetadataStore;
use crate::operations::SchemaOperation;
use crate::rows::Row;
use crate::schema::{
    FieldDefinition, FieldType, FIELD_NAME_MAX_LENGTH, IDENTITY_FIELD, TABLE_NAME_MAX_LENGTH,
};

/// Table names starting with these are reserved for the store and for bookkeeping.
const RESERVED_PREFIXES: &[&str] = &["sqlite_", "tablebuilder_"];

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("Invalid identifier regex"));

/// One field of a create or update payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPayload {
    /// Field name.
    pub name: String,
    /// Logical type, validated against the closed set of declarable types.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Previous name of the field, for renames.
    #[serde(
        default,
        rename = "priorName",
        alias = "old_name",
        skip_serializing_if = "Option::is_none"
    )]
    pub prior_name: Option<String>,
}

/// Payload of `CreateTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTableRequest {
    /// Table name.
    pub name: String,
    /// Declared fields.
    #[serde(default, alias = "field_definitions", alias = "columns")]
    pub fields: Vec<FieldPayload>,
}

/// Payload of `UpdateTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTableRequest {
    /// The complete desired field list.
    #[serde(default, alias = "field_definitions", alias = "columns")]
    pub fields: Vec<FieldPayload>,
}

/// Response carrying a table id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIdResponse {
    /// Table id.
    pub id: Uuid,
}

/// Response carrying the id of an inserted row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIdResponse {
    /// Row id.
    #[serde(rename = "rowId")]
    pub row_id: Uuid,
}

/// Error body for transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Stable error code.
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Whether the caller is at fault.
    pub client_error: bool,
    /// Per-input problems, for validation errors.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
}

/// One validation problem in an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// Input path.
    pub field: String,
    /// Problem.
    pub message: String,
}

impl From<&TableBuilderError> for ErrorResponse {
    fn from(err: &TableBuilderError) -> Self {
        let error = match err {
            TableBuilderError::Validation(_) => "validation_error",
            TableBuilderError::TableAlreadyExists(_) => "table_already_exists",
            TableBuilderError::TableNotFound(_) => "table_not_found",
            TableBuilderError::UnknownField { .. } => "unknown_field",
            TableBuilderError::TypeMismatch { .. } => "type_mismatch",
            TableBuilderError::UnsupportedType { .. } => "unsupported_type",
            TableBuilderError::Ddl(_) => "ddl_error",
            TableBuilderError::Metadata(_) => "metadata_error",
            TableBuilderError::ReconciliationRequired { .. } => "reconciliation_required",
            TableBuilderError::Database(_) => "database_error",
        };
        let details = match err {
            TableBuilderError::Validation(errors) => errors
                .iter()
                .map(|e| ErrorDetail {
                    field: e.field.clone(),
                    message: e.message.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Self {
            error,
            message: err.to_string(),
            client_error: err.is_client_error(),
            details,
        }
    }
}

/// Validates a table name, appending problems to `errors`.
pub fn validate_table_name(name: &str, errors: &mut Vec<ValidationError>) {
    if name.is_empty() {
        errors.push(ValidationError::new("name", "must not be empty"));
        return;
    }
    if name.chars().count() > TABLE_NAME_MAX_LENGTH {
        errors.push(ValidationError::new(
            "name",
            format!("must be at most {TABLE_NAME_MAX_LENGTH} characters"),
        ));
    }
    if !IDENTIFIER.is_match(name) {
        errors.push(ValidationError::new(
            "name",
            format!("`{name}` must start with a lowercase letter and contain only a-z, 0-9 and _"),
        ));
    }
    if let Some(prefix) = RESERVED_PREFIXES.iter().find(|p| name.starts_with(**p)) {
        errors.push(ValidationError::new(
            "name",
            format!("names starting with `{prefix}` are reserved"),
        ));
    }
}

/// Validates a field list and converts it to definitions.
///
/// Collects every problem before failing.
pub fn validate_fields(fields: &[FieldPayload]) -> Result<Vec<FieldDefinition>> {
    let mut errors = Vec::new();
    let definitions = check_fields(fields, &mut errors);
    if errors.is_empty() {
        Ok(definitions)
    } else {
        Err(TableBuilderError::Validation(errors))
    }
}

fn check_fields(fields: &[FieldPayload], errors: &mut Vec<ValidationError>) -> Vec<FieldDefinition> {
    let mut names = HashSet::new();
    let mut prior_names = HashSet::new();
    let mut definitions = Vec::with_capacity(fields.len());

    for (index, field) in fields.iter().enumerate() {
        let path = format!("fields[{index}]");
        check_field_name(&field.name, &format!("{path}.name"), errors);
        if field.name == IDENTITY_FIELD {
            errors.push(ValidationError::new(
                format!("{path}.name"),
                format!("`{IDENTITY_FIELD}` is reserved for the system identity"),
            ));
        }
        if !names.insert(field.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{path}.name"),
                format!("duplicate field name `{}`", field.name),
            ));
        }

        let field_type = match field.field_type.parse::<FieldType>() {
            Ok(ty) if ty.is_client_declarable() => Some(ty),
            _ => {
                errors.push(ValidationError::new(
                    format!("{path}.type"),
                    format!(
                        "`{}` is not one of string, number, boolean",
                        field.field_type
                    ),
                ));
                None
            }
        };

        if let Some(prior) = &field.prior_name {
            check_field_name(prior, &format!("{path}.priorName"), errors);
            if *prior != field.name && !prior_names.insert(prior.as_str()) {
                errors.push(ValidationError::new(
                    format!("{path}.priorName"),
                    format!("`{prior}` is claimed by more than one field"),
                ));
            }
        }

        if let Some(field_type) = field_type {
            let mut definition = FieldDefinition::new(field.name.clone(), field_type);
            definition.prior_name.clone_from(&field.prior_name);
            definitions.push(definition);
        }
    }

    definitions
}

fn check_field_name(name: &str, path: &str, errors: &mut Vec<ValidationError>) {
    if name.is_empty() {
        errors.push(ValidationError::new(path, "must not be empty"));
        return;
    }
    if name.chars().count() > FIELD_NAME_MAX_LENGTH {
        errors.push(ValidationError::new(
            path,
            format!("must be at most {FIELD_NAME_MAX_LENGTH} characters"),
        ));
    }
    if !IDENTIFIER.is_match(name) {
        errors.push(ValidationError::new(
            path,
            format!("`{name}` must start with a lowercase letter and contain only a-z, 0-9 and _"),
        ));
    }
}

/// Boundary service over a [`TableManager`].
#[derive(Debug)]
pub struct TableBuilderService<M: MetadataStore> {
    manager: Arc<TableManager<M>>,
}

impl<M: MetadataStore> Clone for TableBuilderService<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<M: MetadataStore> TableBuilderService<M> {
    /// Creates a service over `manager`.
    pub fn new(manager: Arc<TableManager<M>>) -> Self {
        Self { manager }
    }

    /// Returns the underlying manager.
    #[must_use]
    pub fn manager(&self) -> &TableManager<M> {
        &self.manager
    }

    /// `CreateTable(name, fields) -> {id}`.
    pub async fn create_table(&self, request: CreateTableRequest) -> Result<TableIdResponse> {
        let mut errors = Vec::new();
        validate_table_name(&request.name, &mut errors);
        let fields = check_fields(&request.fields, &mut errors);
        if let Some(index) = request.fields.iter().position(|f| f.prior_name.is_some()) {
            errors.push(ValidationError::new(
                format!("fields[{index}].priorName"),
                "only allowed when updating a table",
            ));
        }
        if !errors.is_empty() {
            return Err(TableBuilderError::Validation(errors));
        }

        let definition = self.manager.create_table(&request.name, fields).await?;
        Ok(TableIdResponse { id: definition.id })
    }

    /// `UpdateTable(id, fields) -> {id}`.
    pub async fn update_table(
        &self,
        id: Uuid,
        request: UpdateTableRequest,
    ) -> Result<TableIdResponse> {
        let fields = validate_fields(&request.fields)?;
        let name = self.manager.table_name(id)?;
        self.manager.update_table(&name, fields).await?;
        Ok(TableIdResponse { id })
    }

    /// Dry run of [`update_table`](Self::update_table).
    pub async fn plan_update(
        &self,
        id: Uuid,
        request: UpdateTableRequest,
    ) -> Result<Vec<SchemaOperation>> {
        let fields = validate_fields(&request.fields)?;
        let name = self.manager.table_name(id)?;
        self.manager.plan_update(&name, &fields).await
    }

    /// `InsertRow(tableId, row) -> {rowId}`.
    pub async fn insert_row(&self, table_id: Uuid, row: &Row) -> Result<RowIdResponse> {
        let name = self.manager.table_name(table_id)?;
        let row_id = self.manager.insert_row(&name, row).await?;
        Ok(RowIdResponse { row_id })
    }

    /// `ListRows(tableId) -> [object]`.
    pub async fn list_rows(&self, table_id: Uuid) -> Result<Vec<Row>> {
        let name = self.manager.table_name(table_id)?;
        self.manager.list_rows(&name).await
    }
}

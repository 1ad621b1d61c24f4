//! Runtime-defined relational tables for SQLite.
//!
//! `tablebuilder` lets a caller declare tables and their typed fields at
//! runtime and keeps the physical schema in step with those declarations:
//!
//! - Tables are created and evolved from declarative field lists
//! - Renames are explicit (`priorName`), never guessed from add/drop pairs
//! - Every schema change runs in one transaction and rolls back as a whole
//! - Rows are read and written generically, as JSON objects
//!
//! # Architecture
//!
//! - **Type mapper** - Logical field types to physical columns
//! - **Differ** - Current columns + desired fields to ordered operations
//! - **Executor** - Applies an operation batch transactionally
//! - **Registry** - The in-memory shape of every table, with per-table locks
//! - **Metadata store** - Durable record of the declared tables
//! - **Row accessor** - Untyped insert/select with value coercion
//! - **Manager** - The facade composing all of the above
//! - **API** - Payload validation and the id-based request shapes
//!
//! # Example
//!
//! ```rust,ignore
//! use tablebuilder::prelude::*;
//!
//! let manager = EngineConfig::new("sqlite:app.sqlite3").open().await?;
//! manager.bootstrap_from_metadata().await?;
//!
//! manager
//!     .create_table("users", vec![FieldDefinition::new("first_name", FieldType::String)])
//!     .await?;
//!
//! let row = serde_json::json!({"first_name": "Mite"});
//! manager.insert_row("users", row.as_object().unwrap()).await?;
//! let rows = manager.list_rows("users").await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! tablebuilder create-table '{"name": "users", "fields": [{"name": "first_name", "type": "string"}]}'
//! tablebuilder insert-row <table-id> '{"first_name": "Mite"}'
//! tablebuilder list-rows <table-id>
//! tablebuilder update-table <table-id> '{"fields": [...]}' --dry-run
//! ```

pub mod api;
pub mod config;
pub mod dialect;
pub mod differ;
pub mod error;
pub mod executor;
pub mod manager;
pub mod metadata;
pub mod operations;
pub mod registry;
pub mod rows;
pub mod schema;
pub mod type_map;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::api::{
        CreateTableRequest, ErrorResponse, FieldPayload, RowIdResponse, TableBuilderService,
        TableIdResponse, UpdateTableRequest,
    };
    pub use crate::config::EngineConfig;
    pub use crate::dialect::{SchemaDialect, SqliteDialect};
    pub use crate::differ::SchemaDiffer;
    pub use crate::error::{
        DdlError, MetadataError, Result, TableBuilderError, ValidationError,
    };
    pub use crate::executor::DdlExecutor;
    pub use crate::manager::{BootstrapReport, EnsureOutcome, TableManager};
    pub use crate::metadata::{
        InMemoryMetadataStore, LoadedDefinitions, MetadataStore, SqliteMetadataStore,
    };
    pub use crate::operations::SchemaOperation;
    pub use crate::registry::EntityRegistry;
    pub use crate::rows::{Row, RowAccessor};
    pub use crate::schema::{FieldDefinition, FieldType, PhysicalColumnSet, TableDefinition};
    pub use crate::type_map::TypeMapper;
}

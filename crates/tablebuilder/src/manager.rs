//! Table lifecycle manager.
//!
//! The facade external callers use. It composes the differ, the DDL executor,
//! the metadata store, the entity registry and the row accessor, and keeps
//! them consistent:
//!
//! - metadata is written before the physical table is created, and deleted
//!   again if creation fails;
//! - the registry only changes after a DDL transaction has committed;
//! - every schema change holds the table's lock exclusively, row access holds
//!   it shared.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::sqlite::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::differ::SchemaDiffer;
use crate::error::{MetadataError, Result, TableBuilderError, ValidationError};
use crate::executor::DdlExecutor;
use crate::metadata::{MetadataStore, SqliteMetadataStore};
use crate::operations::SchemaOperation;
use crate::registry::{EntityRegistry, TableLocks};
use crate::rows::{Row, RowAccessor};
use crate::schema::{FieldDefinition, PhysicalColumnSet, TableDefinition, IDENTITY_FIELD};
use crate::type_map::TypeMapper;

/// What [`TableManager::ensure_table`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The physical table was missing and has been created.
    Created,
    /// The physical table already had the declared shape. No DDL was issued.
    Unchanged,
    /// The physical table differed and these operations were applied.
    Reconciled(Vec<SchemaOperation>),
}

/// Result of [`TableManager::bootstrap_from_metadata`].
#[derive(Debug, Default)]
pub struct BootstrapReport {
    /// Tables that were brought up, with what it took.
    pub outcomes: Vec<(String, EnsureOutcome)>,
    /// Tables that could not be brought up. They are not registered.
    pub failures: Vec<(String, TableBuilderError)>,
}

impl BootstrapReport {
    /// Returns true if every table was brought up.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of tables for which DDL was issued.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome != EnsureOutcome::Unchanged)
            .count()
    }
}

/// Orchestrates table creation, schema updates and row access.
#[derive(Debug)]
pub struct TableManager<M: MetadataStore> {
    metadata: M,
    registry: Arc<EntityRegistry>,
    locks: TableLocks,
    differ: SchemaDiffer,
    executor: DdlExecutor,
    rows: RowAccessor,
}

impl TableManager<SqliteMetadataStore> {
    /// Creates a manager keeping its metadata in the same SQLite database.
    pub async fn sqlite(pool: SqlitePool, mapper: TypeMapper) -> Result<Self> {
        let metadata = SqliteMetadataStore::new(pool.clone());
        metadata.ensure_tables().await?;
        Ok(Self::new(pool, metadata, mapper))
    }
}

impl<M: MetadataStore> TableManager<M> {
    /// Creates a new manager with an empty registry.
    ///
    /// Call [`bootstrap_from_metadata`](Self::bootstrap_from_metadata) before
    /// serving any table traffic.
    pub fn new(pool: SqlitePool, metadata: M, mapper: TypeMapper) -> Self {
        let registry = Arc::new(EntityRegistry::new());
        Self {
            metadata,
            registry: Arc::clone(&registry),
            locks: TableLocks::new(),
            differ: SchemaDiffer::new(),
            executor: DdlExecutor::sqlite(pool.clone(), mapper),
            rows: RowAccessor::new(pool, registry, mapper),
        }
    }

    /// Returns the entity registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Returns the metadata store.
    #[must_use]
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// Returns the DDL executor.
    #[must_use]
    pub fn executor(&self) -> &DdlExecutor {
        &self.executor
    }

    /// Brings every table recorded in the metadata store up to its declared
    /// shape and registers it.
    ///
    /// A table that fails is logged and reported, and does not stop the rest.
    /// That includes a record the store cannot decode. Only a failure to read
    /// the metadata store itself is returned as an error.
    pub async fn bootstrap_from_metadata(&self) -> Result<BootstrapReport> {
        let loaded = self.metadata.load_all().await?;
        info!(
            tables = loaded.definitions.len() + loaded.corrupt.len(),
            "Bootstrapping from metadata"
        );

        let mut report = BootstrapReport::default();
        for (table, err) in loaded.corrupt {
            error!(table = %table, error = %err, "Unreadable metadata record, table skipped");
            report.failures.push((table, err.into()));
        }
        for definition in loaded.definitions {
            match self.ensure_table(&definition).await {
                Ok(outcome) => report.outcomes.push((definition.name, outcome)),
                Err(err) => {
                    error!(table = %definition.name, error = %err, "Failed to bootstrap table");
                    report.failures.push((definition.name, err));
                }
            }
        }

        info!(
            registered = self.registry.len(),
            changed = report.changed(),
            failed = report.failures.len(),
            "Bootstrap complete"
        );
        Ok(report)
    }

    /// Makes the physical table match `definition` and registers it.
    ///
    /// Issues no DDL when the physical table already has the declared shape.
    pub async fn ensure_table(&self, definition: &TableDefinition) -> Result<EnsureOutcome> {
        let _guard = self.locks.write(&definition.name).await;
        check_fields(&definition.fields)?;

        let outcome = match self.executor.columns(&definition.name).await? {
            None => {
                let operations = self
                    .differ
                    .diff(&PhysicalColumnSet::identity_only(), &definition.fields);
                self.executor
                    .create_table(&definition.name, &operations)
                    .await?;
                EnsureOutcome::Created
            }
            Some(physical) => {
                let operations = self.differ.diff(&physical, &definition.fields);
                if operations.is_empty() {
                    EnsureOutcome::Unchanged
                } else {
                    warn!(
                        table = %definition.name,
                        operations = operations.len(),
                        "Physical table differs from its metadata, reconciling"
                    );
                    self.executor.apply(&definition.name, &operations).await?;
                    EnsureOutcome::Reconciled(operations)
                }
            }
        };

        self.registry.register(definition.clone());
        Ok(outcome)
    }

    /// Declares a new table and creates it.
    ///
    /// Fails with `TableAlreadyExists` before any DDL when the name is taken.
    pub async fn create_table(
        &self,
        name: &str,
        fields: Vec<FieldDefinition>,
    ) -> Result<TableDefinition> {
        let _guard = self.locks.write(name).await;
        check_fields(&fields)?;

        if self.registry.contains(name) || self.metadata.get_by_name(name).await?.is_some() {
            return Err(TableBuilderError::TableAlreadyExists(name.to_string()));
        }

        let definition = TableDefinition::new(
            name,
            fields.into_iter().map(FieldDefinition::settled).collect(),
        );
        self.metadata
            .save(&definition)
            .await
            .map_err(|err| match err {
                MetadataError::Conflict(name) => TableBuilderError::TableAlreadyExists(name),
                other => other.into(),
            })?;

        let operations = self
            .differ
            .diff(&PhysicalColumnSet::identity_only(), &definition.fields);
        if let Err(err) = self.executor.create_table(name, &operations).await {
            if let Err(delete_err) = self.metadata.delete(name).await {
                error!(
                    table = %name,
                    error = %delete_err,
                    "Failed to remove metadata after table creation failed"
                );
            }
            return Err(err.into());
        }

        self.registry.register(definition.clone());
        info!(table = %name, id = %definition.id, fields = definition.fields.len(), "Table created");
        Ok(definition)
    }

    /// Computes the operations [`update_table`](Self::update_table) would
    /// apply, without applying them.
    pub async fn plan_update(
        &self,
        name: &str,
        fields: &[FieldDefinition],
    ) -> Result<Vec<SchemaOperation>> {
        let _guard = self.locks.read(name).await;
        let current = self.registry.get(name)?;
        self.plan(&current, fields)
    }

    /// Reconciles an existing table to a new field list.
    ///
    /// On a DDL failure nothing changes. If the DDL commits but the metadata
    /// record cannot be saved, the registry still follows the physical table
    /// and `ReconciliationRequired` is returned.
    pub async fn update_table(
        &self,
        name: &str,
        fields: Vec<FieldDefinition>,
    ) -> Result<TableDefinition> {
        let _guard = self.locks.write(name).await;
        let current = self.registry.get(name)?;
        let operations = self.plan(&current, &fields)?;

        let updated = TableDefinition {
            id: current.id,
            name: current.name.clone(),
            fields: fields.into_iter().map(FieldDefinition::settled).collect(),
        };
        if operations.is_empty() && updated == current {
            info!(table = %name, "Table already up to date");
            return Ok(current);
        }

        if !operations.is_empty() {
            self.executor.apply(name, &operations).await?;
        }

        let saved = self.metadata.save(&updated).await;
        self.registry.update(name, updated.fields.clone())?;

        if let Err(source) = saved {
            error!(
                table = %name,
                error = %source,
                "Schema changed but metadata could not be saved, manual reconciliation required"
            );
            return Err(TableBuilderError::ReconciliationRequired {
                table: name.to_string(),
                source,
            });
        }

        info!(table = %name, operations = operations.len(), "Table updated");
        Ok(updated)
    }

    /// Inserts a row into `table`, returning the generated identity.
    pub async fn insert_row(&self, table: &str, row: &Row) -> Result<Uuid> {
        let _guard = self.locks.read(table).await;
        self.rows.insert(table, row).await
    }

    /// Lists every row of `table`.
    pub async fn list_rows(&self, table: &str) -> Result<Vec<Row>> {
        let _guard = self.locks.read(table).await;
        self.rows.list_all(table).await
    }

    /// Resolves a table id to its name.
    pub fn table_name(&self, id: Uuid) -> Result<String> {
        self.registry
            .find_by_id(id)
            .map(|definition| definition.name)
            .ok_or_else(|| TableBuilderError::TableNotFound(id.to_string()))
    }

    /// Returns every registered table, sorted by name.
    #[must_use]
    pub fn tables(&self) -> Vec<TableDefinition> {
        self.registry.tables()
    }

    /// Validates an update against the current definition and diffs it.
    fn plan(
        &self,
        current: &TableDefinition,
        fields: &[FieldDefinition],
    ) -> Result<Vec<SchemaOperation>> {
        check_fields(fields)?;

        let mut errors = Vec::new();
        let mut claimed = HashSet::new();
        for (index, field) in fields.iter().enumerate() {
            let Some(prior) = field.effective_prior_name() else {
                continue;
            };
            let path = format!("fields[{index}].priorName");
            if current.get_field(prior).is_none() {
                errors.push(ValidationError::new(
                    path,
                    format!("`{prior}` is not a field of table `{}`", current.name),
                ));
            } else if !claimed.insert(prior) {
                errors.push(ValidationError::new(
                    path,
                    format!("`{prior}` is renamed more than once"),
                ));
            } else if current.get_field(&field.name).is_some() {
                errors.push(ValidationError::new(
                    format!("fields[{index}].name"),
                    format!("cannot rename `{prior}` to existing field `{}`", field.name),
                ));
            }
        }
        if !errors.is_empty() {
            return Err(TableBuilderError::Validation(errors));
        }

        let physical = PhysicalColumnSet::from_fields(&current.fields);
        Ok(self.differ.diff(&physical, fields))
    }
}

/// Rejects field lists the engine cannot hold, whoever built them.
fn check_fields(fields: &[FieldDefinition]) -> Result<()> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, field) in fields.iter().enumerate() {
        if !field.field_type.is_client_declarable() {
            return Err(TableBuilderError::UnsupportedType {
                field: field.name.clone(),
                field_type: field.field_type.to_string(),
            });
        }
        if field.name == IDENTITY_FIELD {
            errors.push(ValidationError::new(
                format!("fields[{index}].name"),
                format!("`{IDENTITY_FIELD}` is reserved"),
            ));
        } else if !seen.insert(field.name.as_str()) {
            errors.push(ValidationError::new(
                format!("fields[{index}].name"),
                format!("duplicate field `{}`", field.name),
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TableBuilderError::Validation(errors))
    }
}

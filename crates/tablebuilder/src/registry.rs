//! Entity registry.
//!
//! The in-memory view of every registered table's current shape. Row access
//! validates against it, so it is only written after a schema change has
//! committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock as TableLock};
use uuid::Uuid;

use crate::error::{Result, TableBuilderError};
use crate::schema::{FieldDefinition, TableDefinition};

/// Process-wide mapping from table name to its current definition.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    tables: RwLock<HashMap<String, TableDefinition>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current fields of `table`, if registered.
    #[must_use]
    pub fn lookup(&self, table: &str) -> Option<Vec<FieldDefinition>> {
        self.read(|tables| tables.get(table).map(|t| t.fields.clone()))
    }

    /// Returns the definition of `table`, or `TableNotFound`.
    pub fn get(&self, table: &str) -> Result<TableDefinition> {
        self.read(|tables| tables.get(table).cloned())
            .ok_or_else(|| TableBuilderError::TableNotFound(table.to_string()))
    }

    /// Finds a table by its stable id.
    #[must_use]
    pub fn find_by_id(&self, id: Uuid) -> Option<TableDefinition> {
        self.read(|tables| tables.values().find(|t| t.id == id).cloned())
    }

    /// Returns true if `table` is registered.
    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.read(|tables| tables.contains_key(table))
    }

    /// Registers (or replaces) a table definition.
    pub fn register(&self, definition: TableDefinition) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.insert(definition.name.clone(), definition);
    }

    /// Replaces the fields of an already registered table.
    pub fn update(&self, table: &str, fields: Vec<FieldDefinition>) -> Result<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| TableBuilderError::TableNotFound(table.to_string()))?;
        entry.fields = fields;
        Ok(())
    }

    /// Returns every registered definition, sorted by name.
    #[must_use]
    pub fn tables(&self) -> Vec<TableDefinition> {
        let mut tables: Vec<TableDefinition> = self.read(|tables| tables.values().cloned().collect());
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(HashMap::len)
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, TableDefinition>) -> T) -> T {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f(&tables)
    }
}

/// Named per-table locks.
///
/// Schema changes hold a table's lock exclusively for the whole
/// load, diff, apply, register sequence. Row operations hold it shared.
/// Entries nobody holds or waits on are dropped, so names that never
/// resolve to a table do not accumulate.
#[derive(Debug, Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<String, Arc<TableLock<()>>>>,
}

impl TableLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires exclusive access to `table`.
    pub async fn write(&self, table: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(table).write_owned().await
    }

    /// Acquires shared access to `table`.
    pub async fn read(&self, table: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(table).read_owned().await
    }

    fn lock_for(&self, table: &str) -> Arc<TableLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds an idle lock; every guard and waiter owns a clone.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(table.to_string()).or_default())
    }
}

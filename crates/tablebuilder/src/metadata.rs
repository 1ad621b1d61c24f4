//! Metadata store.
//!
//! Durable record of every declared table and its fields. The engine reads it
//! once at startup and writes it after each successful schema change.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::MetadataError;
use crate::schema::{FieldDefinition, FieldType, TableDefinition};

/// SQL creating the table record table (SQLite).
pub const CREATE_TABLE_STRUCTURE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tablebuilder_tablestructure (
    id TEXT PRIMARY KEY NOT NULL,
    name VARCHAR(63) NOT NULL UNIQUE,
    created TEXT NOT NULL DEFAULT (datetime('now')),
    modified TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL creating the field record table (SQLite).
pub const CREATE_FIELD_DEFINITION_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tablebuilder_fielddefinition (
    table_id TEXT NOT NULL REFERENCES tablebuilder_tablestructure (id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name VARCHAR(100) NOT NULL,
    type VARCHAR(16) NOT NULL,
    PRIMARY KEY (table_id, position)
)
";

/// Everything read from the store in one pass.
///
/// A record that cannot be decoded is reported in `corrupt` under its table
/// name and does not hide the other records.
#[derive(Debug, Default)]
pub struct LoadedDefinitions {
    /// Decoded definitions, ordered by table name.
    pub definitions: Vec<TableDefinition>,
    /// Records that could not be decoded, by table name.
    pub corrupt: Vec<(String, MetadataError)>,
}

/// Durable storage for table definitions.
///
/// Stored definitions never carry rename hints; `prior_name` only has a
/// meaning during the update that introduced it.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Loads every stored definition, ordered by table name.
    ///
    /// Only a failure to read the store is an error. Undecodable records are
    /// returned in [`LoadedDefinitions::corrupt`].
    async fn load_all(&self) -> Result<LoadedDefinitions, MetadataError>;

    /// Loads one definition by table name.
    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, MetadataError>;

    /// Inserts or replaces a definition, keyed by its id.
    ///
    /// Fails with [`MetadataError::Conflict`] when another id already uses the
    /// same name.
    async fn save(&self, definition: &TableDefinition) -> Result<(), MetadataError>;

    /// Removes the definition for `name`. Removing a missing record is not an error.
    async fn delete(&self, name: &str) -> Result<(), MetadataError>;
}

#[async_trait]
impl<M: MetadataStore + ?Sized> MetadataStore for Arc<M> {
    async fn load_all(&self) -> Result<LoadedDefinitions, MetadataError> {
        (**self).load_all().await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, MetadataError> {
        (**self).get_by_name(name).await
    }

    async fn save(&self, definition: &TableDefinition) -> Result<(), MetadataError> {
        (**self).save(definition).await
    }

    async fn delete(&self, name: &str) -> Result<(), MetadataError> {
        (**self).delete(name).await
    }
}

/// Metadata store kept in bookkeeping tables of the same SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

/// One row of the load query: table id, table name, field name, field type.
type StoredRow = (String, String, Option<String>, Option<String>);

impl SqliteMetadataStore {
    /// Creates a new store over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensures the bookkeeping tables exist.
    pub async fn ensure_tables(&self) -> Result<(), MetadataError> {
        sqlx::query(CREATE_TABLE_STRUCTURE_SQL)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_FIELD_DEFINITION_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load(&self, name: Option<&str>) -> Result<LoadedDefinitions, MetadataError> {
        let rows: Vec<StoredRow> = sqlx::query_as(
            "SELECT s.id, s.name, f.name, f.type \
             FROM tablebuilder_tablestructure s \
             LEFT JOIN tablebuilder_fielddefinition f ON f.table_id = s.id \
             WHERE ?1 IS NULL OR s.name = ?1 \
             ORDER BY s.name, f.position",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows(rows))
    }
}

/// Groups joined rows (already ordered by table) into definitions.
///
/// Decoding failures are kept per table.
fn decode_rows(rows: Vec<StoredRow>) -> LoadedDefinitions {
    let mut tables: Vec<(String, Result<TableDefinition, MetadataError>)> = Vec::new();

    for (id, table, field_name, field_type) in rows {
        if tables.last().is_none_or(|(name, _)| *name != table) {
            let decoded = Uuid::parse_str(&id)
                .map(|id| TableDefinition {
                    id,
                    name: table.clone(),
                    fields: Vec::new(),
                })
                .map_err(|e| MetadataError::Corrupt {
                    table: table.clone(),
                    message: format!("invalid id `{id}`: {e}"),
                });
            tables.push((table.clone(), decoded));
        }

        let (Some(field_name), Some(field_type)) = (field_name, field_type) else {
            continue;
        };
        let Some((_, Ok(definition))) = tables.last_mut() else {
            continue;
        };
        match decode_field_type(&table, &field_name, &field_type) {
            Ok(field_type) => definition
                .fields
                .push(FieldDefinition::new(field_name, field_type)),
            Err(err) => {
                if let Some(last) = tables.last_mut() {
                    last.1 = Err(err);
                }
            }
        }
    }

    let mut loaded = LoadedDefinitions::default();
    for (table, decoded) in tables {
        match decoded {
            Ok(definition) => loaded.definitions.push(definition),
            Err(err) => loaded.corrupt.push((table, err)),
        }
    }
    loaded
}

fn decode_field_type(
    table: &str,
    field_name: &str,
    field_type: &str,
) -> Result<FieldType, MetadataError> {
    field_type
        .parse::<FieldType>()
        .ok()
        .filter(FieldType::is_client_declarable)
        .ok_or_else(|| MetadataError::Corrupt {
            table: table.to_string(),
            message: format!("field `{field_name}` has unknown type `{field_type}`"),
        })
}

fn map_unique_violation(err: sqlx::Error, name: &str) -> MetadataError {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            MetadataError::Conflict(name.to_string())
        }
        other => MetadataError::Store(other),
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn load_all(&self) -> Result<LoadedDefinitions, MetadataError> {
        self.load(None).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, MetadataError> {
        let mut loaded = self.load(Some(name)).await?;
        if let Some((_, err)) = loaded.corrupt.pop() {
            return Err(err);
        }
        Ok(loaded.definitions.pop())
    }

    async fn save(&self, definition: &TableDefinition) -> Result<(), MetadataError> {
        let id = definition.id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO tablebuilder_tablestructure (id, name) VALUES (?1, ?2) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, modified = datetime('now')",
        )
        .bind(&id)
        .bind(&definition.name)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, &definition.name))?;

        sqlx::query("DELETE FROM tablebuilder_fielddefinition WHERE table_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for (position, field) in (0_i64..).zip(&definition.fields) {
            sqlx::query(
                "INSERT INTO tablebuilder_fielddefinition (table_id, position, name, type) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&id)
            .bind(position)
            .bind(&field.name)
            .bind(field.field_type.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(table = %definition.name, fields = definition.fields.len(), "Metadata saved");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), MetadataError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM tablebuilder_fielddefinition WHERE table_id IN \
             (SELECT id FROM tablebuilder_tablestructure WHERE name = ?1)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM tablebuilder_tablestructure WHERE name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(table = %name, "Metadata deleted");
        Ok(())
    }
}

/// In-memory metadata store (not durable).
///
/// Suitable for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    tables: Mutex<BTreeMap<String, TableDefinition>>,
}

impl InMemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load_all(&self) -> Result<LoadedDefinitions, MetadataError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(LoadedDefinitions {
            definitions: tables.values().cloned().collect(),
            corrupt: Vec::new(),
        })
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<TableDefinition>, MetadataError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(name).cloned())
    }

    async fn save(&self, definition: &TableDefinition) -> Result<(), MetadataError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if tables
            .get(&definition.name)
            .is_some_and(|existing| existing.id != definition.id)
        {
            return Err(MetadataError::Conflict(definition.name.clone()));
        }

        tables.retain(|_, existing| existing.id != definition.id);
        let stored = TableDefinition {
            fields: definition
                .fields
                .iter()
                .cloned()
                .map(FieldDefinition::settled)
                .collect(),
            ..definition.clone()
        };
        tables.insert(stored.name.clone(), stored);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), MetadataError> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool")
    }

    async fn sqlite_store() -> SqliteMetadataStore {
        let store = SqliteMetadataStore::new(create_test_pool().await);
        store.ensure_tables().await.unwrap();
        store
    }

    fn users() -> TableDefinition {
        TableDefinition::new(
            "users",
            vec![
                FieldDefinition::new("first_name", FieldType::String),
                FieldDefinition::new("phone_number", FieldType::Number),
                FieldDefinition::new("subscriber", FieldType::Boolean),
            ],
        )
    }

    #[tokio::test]
    async fn test_ensure_tables_is_idempotent() {
        let store = sqlite_store().await;
        store.ensure_tables().await.unwrap();
        assert!(store.load_all().await.unwrap().definitions.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_field_order() {
        let store = sqlite_store().await;
        let definition = users();
        store.save(&definition).await.unwrap();

        let loaded = store.get_by_name("users").await.unwrap().unwrap();
        assert_eq!(loaded, definition);
        assert!(store.get_by_name("posts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_fields_and_drops_rename_hints() {
        let store = sqlite_store().await;
        let mut definition = users();
        store.save(&definition).await.unwrap();

        definition.fields = vec![
            FieldDefinition::new("given_name", FieldType::String).renamed_from("first_name"),
        ];
        store.save(&definition).await.unwrap();

        let all = store.load_all().await.unwrap().definitions;
        assert_eq!(all.len(), 1);
        assert_eq!(
            all[0].fields,
            vec![FieldDefinition::new("given_name", FieldType::String)]
        );
    }

    #[tokio::test]
    async fn test_name_collision_is_a_conflict() {
        let store = sqlite_store().await;
        store.save(&users()).await.unwrap();

        let err = store.save(&users()).await.unwrap_err();
        assert!(matches!(err, MetadataError::Conflict(name) if name == "users"));
    }

    #[tokio::test]
    async fn test_table_without_fields_is_loaded() {
        let store = sqlite_store().await;
        store
            .save(&TableDefinition::new("empty", Vec::new()))
            .await
            .unwrap();

        let all = store.load_all().await.unwrap().definitions;
        assert_eq!(all.len(), 1);
        assert!(all[0].fields.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = sqlite_store().await;
        store.save(&users()).await.unwrap();
        store.delete("users").await.unwrap();
        store.delete("users").await.unwrap();

        assert!(store.load_all().await.unwrap().definitions.is_empty());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tablebuilder_fielddefinition")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_corrupt_record_does_not_hide_the_others() {
        let store = sqlite_store().await;
        store.save(&users()).await.unwrap();
        let posts = TableDefinition::new(
            "posts",
            vec![FieldDefinition::new("title", FieldType::String)],
        );
        store.save(&posts).await.unwrap();
        sqlx::query(
            "UPDATE tablebuilder_fielddefinition SET type = 'blob' \
             WHERE position = 1 AND table_id = \
             (SELECT id FROM tablebuilder_tablestructure WHERE name = 'users')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.definitions, vec![posts]);
        assert_eq!(loaded.corrupt.len(), 1);
        assert_eq!(loaded.corrupt[0].0, "users");
        assert!(matches!(
            &loaded.corrupt[0].1,
            MetadataError::Corrupt { message, .. } if message.contains("`phone_number`")
        ));

        assert!(matches!(
            store.get_by_name("users").await,
            Err(MetadataError::Corrupt { table, .. }) if table == "users"
        ));
        assert!(store.get_by_name("posts").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_id_is_reported_per_table() {
        let store = sqlite_store().await;
        store.save(&users()).await.unwrap();
        sqlx::query("UPDATE tablebuilder_tablestructure SET id = 'not-a-uuid'")
            .execute(&store.pool)
            .await
            .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert!(loaded.definitions.is_empty());
        assert_eq!(loaded.corrupt.len(), 1);
        assert_eq!(loaded.corrupt[0].0, "users");
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryMetadataStore::new();
        let definition = users();
        store.save(&definition).await.unwrap();

        assert!(matches!(
            store.save(&users()).await,
            Err(MetadataError::Conflict(_))
        ));
        assert_eq!(store.load_all().await.unwrap().definitions, vec![definition]);

        store.delete("users").await.unwrap();
        assert!(store.get_by_name("users").await.unwrap().is_none());
    }
}

//! End-to-end tests for the table lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use tablebuilder::prelude::*;

async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

async fn sqlite_manager(pool: SqlitePool) -> TableManager<SqliteMetadataStore> {
    TableManager::sqlite(pool, TypeMapper::default())
        .await
        .expect("Failed to create manager")
}

fn field(name: &str, ty: FieldType) -> FieldDefinition {
    FieldDefinition::new(name, ty)
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

async fn physical_tables(pool: &SqlitePool, name: &str) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap();
    count
}

/// Metadata store whose saves can be made to fail.
#[derive(Debug, Default)]
struct FlakyMetadataStore {
    inner: InMemoryMetadataStore,
    fail_saves: AtomicBool,
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn load_all(&self) -> std::result::Result<LoadedDefinitions, MetadataError> {
        self.inner.load_all().await
    }

    async fn get_by_name(
        &self,
        name: &str,
    ) -> std::result::Result<Option<TableDefinition>, MetadataError> {
        self.inner.get_by_name(name).await
    }

    async fn save(&self, definition: &TableDefinition) -> std::result::Result<(), MetadataError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MetadataError::Store(sqlx::Error::PoolTimedOut));
        }
        self.inner.save(definition).await
    }

    async fn delete(&self, name: &str) -> std::result::Result<(), MetadataError> {
        self.inner.delete(name).await
    }
}

#[tokio::test]
async fn test_round_trip() {
    let manager = sqlite_manager(create_test_pool().await).await;
    manager
        .create_table("users", vec![field("first_name", FieldType::String)])
        .await
        .unwrap();

    manager
        .insert_row("users", &row(json!({"first_name": "Mite"})))
        .await
        .unwrap();

    let rows = manager.list_rows("users").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["first_name"], json!("Mite"));
    let id = rows[0]["id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn test_second_create_is_rejected() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;
    let first = manager
        .create_table("users", vec![field("first_name", FieldType::String)])
        .await
        .unwrap();

    let err = manager
        .create_table("users", vec![field("age", FieldType::Number)])
        .await
        .unwrap_err();
    assert!(matches!(err, TableBuilderError::TableAlreadyExists(ref name) if name == "users"));
    assert_eq!(physical_tables(&pool, "users").await, 1);
    assert_eq!(manager.registry().get("users").unwrap(), first);
}

#[tokio::test]
async fn test_unknown_field_performs_no_write() {
    let manager = sqlite_manager(create_test_pool().await).await;
    manager
        .create_table("users", vec![field("first_name", FieldType::String)])
        .await
        .unwrap();

    let err = manager
        .insert_row("users", &row(json!({"nonexistent": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, TableBuilderError::UnknownField { .. }));
    assert!(manager.list_rows("users").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;
    manager
        .create_table(
            "users",
            vec![
                field("first_name", FieldType::String),
                field("subscriber", FieldType::Boolean),
            ],
        )
        .await
        .unwrap();
    manager
        .create_table("posts", vec![field("title", FieldType::String)])
        .await
        .unwrap();

    // A fresh process over the same store.
    let restarted = sqlite_manager(pool).await;
    assert!(restarted.tables().is_empty());

    let report = restarted.bootstrap_from_metadata().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.changed(), 0);
    assert_eq!(
        report.outcomes,
        vec![
            ("posts".to_string(), EnsureOutcome::Unchanged),
            ("users".to_string(), EnsureOutcome::Unchanged),
        ]
    );
    assert_eq!(restarted.tables(), manager.tables());
}

#[tokio::test]
async fn test_bootstrap_recreates_missing_table_and_tolerates_bad_ones() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;
    manager
        .create_table("users", vec![field("first_name", FieldType::String)])
        .await
        .unwrap();
    manager
        .create_table("broken", vec![field("title", FieldType::String)])
        .await
        .unwrap();

    sqlx::query("DROP TABLE users").execute(&pool).await.unwrap();
    sqlx::query("ALTER TABLE broken ADD COLUMN payload BLOB")
        .execute(&pool)
        .await
        .unwrap();

    let restarted = sqlite_manager(pool.clone()).await;
    let report = restarted.bootstrap_from_metadata().await.unwrap();

    assert_eq!(
        report.outcomes,
        vec![("users".to_string(), EnsureOutcome::Created)]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "broken");
    assert!(restarted.registry().contains("users"));
    assert!(!restarted.registry().contains("broken"));
    assert_eq!(physical_tables(&pool, "users").await, 1);
}

#[tokio::test]
async fn test_bootstrap_skips_unreadable_record() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;
    manager
        .create_table("good", vec![field("a", FieldType::String)])
        .await
        .unwrap();
    manager
        .create_table("bad", vec![field("b", FieldType::Number)])
        .await
        .unwrap();

    sqlx::query(
        "UPDATE tablebuilder_fielddefinition SET type = 'blob' WHERE table_id = \
         (SELECT id FROM tablebuilder_tablestructure WHERE name = 'bad')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let restarted = sqlite_manager(pool).await;
    let report = restarted.bootstrap_from_metadata().await.unwrap();

    assert_eq!(
        report.outcomes,
        vec![("good".to_string(), EnsureOutcome::Unchanged)]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "bad");
    assert!(matches!(
        report.failures[0].1,
        TableBuilderError::Metadata(MetadataError::Corrupt { .. })
    ));
    assert!(restarted.registry().contains("good"));
    assert!(!restarted.registry().contains("bad"));

    restarted
        .insert_row("good", &row(json!({"a": "still served"})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_string_bound_follows_configuration_not_declaration() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;
    manager
        .create_table("users", vec![field("name", FieldType::String)])
        .await
        .unwrap();
    let long = "x".repeat(50);
    manager
        .insert_row("users", &row(json!({ "name": &long })))
        .await
        .unwrap();

    let restarted = TableManager::sqlite(pool, TypeMapper::new(20)).await.unwrap();
    let report = restarted.bootstrap_from_metadata().await.unwrap();
    assert_eq!(
        report.outcomes,
        vec![("users".to_string(), EnsureOutcome::Unchanged)]
    );

    // Stored values are left as they are.
    let rows = restarted.list_rows("users").await.unwrap();
    assert_eq!(rows[0]["name"], json!(long));

    let err = restarted
        .insert_row("users", &row(json!({ "name": "y".repeat(21) })))
        .await
        .unwrap_err();
    assert!(matches!(err, TableBuilderError::TypeMismatch { .. }));
    restarted
        .insert_row("users", &row(json!({ "name": "y".repeat(20) })))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failed_update_changes_nothing() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;
    manager
        .create_table(
            "users",
            vec![
                field("a", FieldType::String),
                field("b", FieldType::String),
                field("c", FieldType::String),
            ],
        )
        .await
        .unwrap();

    // Make the registry stale so the second of three operations fails.
    sqlx::query("ALTER TABLE users DROP COLUMN b")
        .execute(&pool)
        .await
        .unwrap();
    let before_physical = manager.executor().columns("users").await.unwrap();
    let before_registry = manager.registry().get("users").unwrap();

    let desired = vec![field("a", FieldType::String), field("x", FieldType::Number)];
    assert_eq!(
        manager.plan_update("users", &desired).await.unwrap(),
        vec![
            SchemaOperation::add("x", FieldType::Number),
            SchemaOperation::drop("b"),
            SchemaOperation::drop("c"),
        ]
    );

    let err = manager.update_table("users", desired).await.unwrap_err();
    assert!(matches!(
        err,
        TableBuilderError::Ddl(DdlError::ColumnNotFound { ref column, .. }) if column == "b"
    ));
    assert_eq!(manager.executor().columns("users").await.unwrap(), before_physical);
    assert_eq!(manager.registry().get("users").unwrap(), before_registry);
    assert_eq!(
        manager.metadata().get_by_name("users").await.unwrap(),
        Some(before_registry)
    );
}

#[tokio::test]
async fn test_failed_create_removes_metadata() {
    let pool = create_test_pool().await;
    let manager = sqlite_manager(pool.clone()).await;

    // A physical table nobody declared.
    sqlx::query("CREATE TABLE orphan (x INTEGER)")
        .execute(&pool)
        .await
        .unwrap();

    let err = manager
        .create_table("orphan", vec![field("title", FieldType::String)])
        .await
        .unwrap_err();
    assert!(matches!(err, TableBuilderError::Ddl(_)));
    assert!(!err.is_client_error());
    assert!(manager.metadata().get_by_name("orphan").await.unwrap().is_none());
    assert!(!manager.registry().contains("orphan"));
}

#[tokio::test]
async fn test_metadata_failure_after_ddl_requires_reconciliation() {
    let pool = create_test_pool().await;
    let metadata = Arc::new(FlakyMetadataStore::default());
    let manager = TableManager::new(pool, Arc::clone(&metadata), TypeMapper::default());
    manager
        .create_table("users", vec![field("a", FieldType::String)])
        .await
        .unwrap();

    metadata.fail_saves.store(true, Ordering::SeqCst);
    let err = manager
        .update_table(
            "users",
            vec![field("a", FieldType::String), field("b", FieldType::Boolean)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TableBuilderError::ReconciliationRequired { ref table, .. } if table == "users"
    ));

    // The registry follows the committed physical schema, the record is stale.
    let physical = manager.executor().columns("users").await.unwrap().unwrap();
    assert_eq!(physical.get("b"), Some(FieldType::Boolean));
    assert_eq!(
        manager.registry().lookup("users").unwrap(),
        vec![field("a", FieldType::String), field("b", FieldType::Boolean)]
    );
    let recorded = metadata.get_by_name("users").await.unwrap().unwrap();
    assert_eq!(recorded.fields, vec![field("a", FieldType::String)]);

    manager
        .insert_row("users", &row(json!({"a": "x", "b": true})))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_updates_are_serialized() {
    let manager = Arc::new(sqlite_manager(create_test_pool().await).await);
    manager
        .create_table("users", vec![field("a", FieldType::String)])
        .await
        .unwrap();

    let with_b = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .update_table(
                    "users",
                    vec![field("a", FieldType::String), field("b", FieldType::Number)],
                )
                .await
        })
    };
    let with_c = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .update_table(
                    "users",
                    vec![field("a", FieldType::String), field("c", FieldType::Boolean)],
                )
                .await
        })
    };
    with_b.await.unwrap().unwrap();
    with_c.await.unwrap().unwrap();

    let registered = PhysicalColumnSet::from_fields(&manager.registry().lookup("users").unwrap());
    let physical = manager.executor().columns("users").await.unwrap().unwrap();
    assert_eq!(registered, physical);
}

#[tokio::test]
async fn test_rows_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        max_connections: 1,
        ..EngineConfig::new(format!("sqlite:{}", dir.path().join("app.sqlite3").display()))
    };

    let table_id = {
        let manager = config.open().await.unwrap();
        manager.bootstrap_from_metadata().await.unwrap();
        let service = TableBuilderService::new(Arc::new(manager));
        let table = service
            .create_table(CreateTableRequest {
                name: "users".into(),
                fields: vec![FieldPayload {
                    name: "first_name".into(),
                    field_type: "string".into(),
                    prior_name: None,
                }],
            })
            .await
            .unwrap();
        service
            .insert_row(table.id, &row(json!({"first_name": "Mite"})))
            .await
            .unwrap();
        table.id
    };

    let manager = config.open().await.unwrap();
    let report = manager.bootstrap_from_metadata().await.unwrap();
    assert_eq!(
        report.outcomes,
        vec![("users".to_string(), EnsureOutcome::Unchanged)]
    );

    let service = TableBuilderService::new(Arc::new(manager));
    let rows = service.list_rows(table_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["first_name"], json!("Mite"));
}

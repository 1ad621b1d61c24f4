//! DDL executor.
//!
//! Applies batches of [`SchemaOperation`]s against the store. Every batch runs
//! inside one transaction: either all of it commits or none of it does.

use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::dialect::{SchemaDialect, SqliteDialect};
use crate::error::DdlError;
use crate::operations::SchemaOperation;
use crate::schema::{ColumnSchema, FieldType, PhysicalColumnSet, IDENTITY_FIELD};
use crate::type_map::TypeMapper;

/// Executes schema operations against a database.
#[derive(Debug, Clone)]
pub struct DdlExecutor<D: SchemaDialect = SqliteDialect> {
    pool: SqlitePool,
    dialect: D,
    mapper: TypeMapper,
}

impl DdlExecutor<SqliteDialect> {
    /// Creates an executor using the SQLite dialect.
    #[must_use]
    pub fn sqlite(pool: SqlitePool, mapper: TypeMapper) -> Self {
        Self::new(pool, SqliteDialect::new(), mapper)
    }
}

impl<D: SchemaDialect> DdlExecutor<D> {
    /// Creates a new executor.
    pub fn new(pool: SqlitePool, dialect: D, mapper: TypeMapper) -> Self {
        Self {
            pool,
            dialect,
            mapper,
        }
    }

    /// Reads the physical columns of `table`, or `None` if the table is missing.
    pub async fn columns(&self, table: &str) -> Result<Option<PhysicalColumnSet>, DdlError> {
        let mut conn = self.pool.acquire().await?;
        self.introspect(&mut conn, table).await
    }

    /// Applies `operations` to an existing table in one transaction.
    pub async fn apply(&self, table: &str, operations: &[SchemaOperation]) -> Result<(), DdlError> {
        let mut tx = self.pool.begin().await?;

        let result = match self.introspect(&mut tx, table).await {
            Ok(Some(_)) => self.apply_in(&mut tx, table, operations).await,
            Ok(None) => Err(DdlError::TableMissing(table.to_string())),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                tx.commit().await?;
                info!(
                    table = %table,
                    dialect = self.dialect.name(),
                    operations = operations.len(),
                    "Schema operations applied"
                );
                Ok(())
            }
            Err(err) => {
                warn!(table = %table, error = %err, "Schema operations failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(table = %table, error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Creates `table` with its identity column and applies `operations`
    /// (normally all adds) in the same transaction.
    pub async fn create_table(
        &self,
        table: &str,
        operations: &[SchemaOperation],
    ) -> Result<(), DdlError> {
        let mut tx = self.pool.begin().await?;

        let sql = self
            .dialect
            .create_table_sql(table, &TypeMapper::identity_column());
        debug!(sql = %sql, "Executing DDL");
        let result = match sqlx::query(&sql).execute(&mut *tx).await {
            Ok(_) => self.apply_in(&mut tx, table, operations).await,
            Err(err) => Err(DdlError::from(err)),
        };

        match result {
            Ok(()) => {
                tx.commit().await?;
                info!(
                    table = %table,
                    dialect = self.dialect.name(),
                    operations = operations.len(),
                    "Table created"
                );
                Ok(())
            }
            Err(err) => {
                warn!(table = %table, error = %err, "Table creation failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(table = %table, error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Generates the SQL for one operation given the table's current columns.
    ///
    /// Fails when the operation does not fit `current`, which means the
    /// caller's view of the table is stale.
    pub fn statements_for(
        &self,
        table: &str,
        operation: &SchemaOperation,
        current: &PhysicalColumnSet,
    ) -> Result<Vec<String>, DdlError> {
        if operation.source_column() == Some(IDENTITY_FIELD)
            || operation.target_column() == Some(IDENTITY_FIELD)
        {
            return Err(DdlError::OperationUnsupported {
                table: table.to_string(),
                message: format!("`{operation}` touches the identity column"),
            });
        }

        let require = |column: &str| {
            current.get(column).ok_or_else(|| DdlError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
        };
        let reject_existing = |column: &str| {
            if current.contains(column) {
                Err(DdlError::ColumnAlreadyExists {
                    table: table.to_string(),
                    column: column.to_string(),
                })
            } else {
                Ok(())
            }
        };

        match operation {
            SchemaOperation::RenameColumn {
                from,
                to,
                field_type,
            } => {
                let existing = require(from.as_str())?;
                reject_existing(to.as_str())?;
                let mut statements = vec![self.dialect.rename_column_sql(table, from, to)];
                if existing != *field_type {
                    statements.extend(self.retype(table, to, *field_type)?);
                }
                Ok(statements)
            }
            SchemaOperation::AddColumn { name, field_type } => {
                reject_existing(name.as_str())?;
                let column = self.resolve(table, name, *field_type)?;
                Ok(vec![self.dialect.add_column_sql(table, &column)])
            }
            SchemaOperation::AlterColumnType { name, field_type } => {
                if require(name.as_str())? == *field_type {
                    return Ok(Vec::new());
                }
                self.retype(table, name, *field_type)
            }
            SchemaOperation::DropColumn { name } => {
                require(name.as_str())?;
                Ok(vec![self.dialect.drop_column_sql(table, name)])
            }
        }
    }

    async fn apply_in(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
        operations: &[SchemaOperation],
    ) -> Result<(), DdlError> {
        for operation in operations {
            // Re-read inside the transaction so each step sees the previous ones.
            let current = self
                .introspect(conn, table)
                .await?
                .ok_or_else(|| DdlError::TableMissing(table.to_string()))?;

            for sql in self.statements_for(table, operation, &current)? {
                debug!(sql = %sql, "Executing DDL");
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
        }
        Ok(())
    }

    async fn introspect(
        &self,
        conn: &mut SqliteConnection,
        table: &str,
    ) -> Result<Option<PhysicalColumnSet>, DdlError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, type FROM pragma_table_info(?1)")
                .bind(table)
                .fetch_all(&mut *conn)
                .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        rows.into_iter()
            .map(|(name, declared)| match self.dialect.field_type_of(&declared) {
                Some(field_type) => Ok((name, field_type)),
                None => Err(DdlError::OperationUnsupported {
                    table: table.to_string(),
                    message: format!("column `{name}` has unrecognized type `{declared}`"),
                }),
            })
            .collect::<Result<PhysicalColumnSet, _>>()
            .map(Some)
    }

    fn resolve(
        &self,
        table: &str,
        name: &str,
        field_type: FieldType,
    ) -> Result<ColumnSchema, DdlError> {
        self.mapper
            .resolve(name, field_type)
            .map_err(|err| DdlError::OperationUnsupported {
                table: table.to_string(),
                message: err.to_string(),
            })
    }

    fn retype(
        &self,
        table: &str,
        name: &str,
        field_type: FieldType,
    ) -> Result<Vec<String>, DdlError> {
        let column = self.resolve(table, name, field_type)?;
        Ok(self.dialect.retype_column_sql(table, &column))
    }
}

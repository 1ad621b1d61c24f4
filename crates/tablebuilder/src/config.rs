//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;
use crate::manager::TableManager;
use crate::metadata::SqliteMetadataStore;
use crate::schema::DEFAULT_STRING_LENGTH;
use crate::type_map::TypeMapper;

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:tablebuilder.sqlite3";

/// Settings for connecting the engine to its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// SQLite URL or path. The file is created if missing.
    pub database_url: String,
    /// Maximum pool connections.
    pub max_connections: u32,
    /// Bound of `string` columns, in characters.
    pub string_length: usize,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            string_length: DEFAULT_STRING_LENGTH,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for `database_url` with default settings.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Returns the type mapper these settings describe.
    #[must_use]
    pub fn mapper(&self) -> TypeMapper {
        TypeMapper::new(self.string_length)
    }

    /// Opens a connection pool.
    pub async fn connect(&self) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&self.database_url)?
            .create_if_missing(true)
            .busy_timeout(self.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await?;

        info!(url = %self.database_url, max_connections = self.max_connections, "Connected");
        Ok(pool)
    }

    /// Connects and builds a manager keeping its metadata in the same database.
    ///
    /// The registry is empty until the caller runs the bootstrap.
    pub async fn open(&self) -> Result<TableManager<SqliteMetadataStore>> {
        let pool = self.connect().await?;
        TableManager::sqlite(pool, self.mapper()).await
    }
}

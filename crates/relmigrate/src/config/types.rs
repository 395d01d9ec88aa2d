//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default rows per page/chunk.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Store rows are read from.
    pub source: StoreConfig,

    /// Store rows are written to.
    pub destination: StoreConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Override the batch size (CLI `--batch-size`).
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        if let Some(size) = batch_size {
            self.migration.batch_size = size;
        }
        self
    }
}

/// Connection settings for one side of the migration, tagged by `type`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// PostgreSQL server.
    Postgres(PostgresConfig),

    /// SQLite database file.
    Sqlite(SqliteConfig),
}

impl StoreConfig {
    /// Engine name as used in config files and logs.
    pub fn engine(&self) -> &'static str {
        match self {
            StoreConfig::Postgres(_) => "postgres",
            StoreConfig::Sqlite(_) => "sqlite",
        }
    }

    /// Human-readable location, safe to log.
    pub fn location(&self) -> String {
        match self {
            StoreConfig::Postgres(pg) => {
                format!("{}:{}/{}", pg.host, pg.port, pg.database)
            }
            StoreConfig::Sqlite(sqlite) => sqlite.path.display().to_string(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::Postgres(pg) => pg.fmt(f),
            StoreConfig::Sqlite(sqlite) => sqlite.fmt(f),
        }
    }
}

/// PostgreSQL connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the migrated tables (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,

    /// Pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// SQLite connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file path, or `:memory:`.
    pub path: PathBuf,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per page and per insert chunk (default: 500).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Tables to include (glob patterns). Empty means all.
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude (glob patterns).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Catalog file (YAML or JSON). Introspected from the source when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_file: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            catalog_file: None,
        }
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

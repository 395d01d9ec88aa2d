//! Store implementations of the core traits.
//!
//! - [`postgres`]: PostgreSQL via deadpool-postgres
//! - [`sqlite`]: SQLite via rusqlite (feature `sqlite`)
//! - [`memory`]: in-process store for tests and embedding
//! - [`common`]: shared utilities (TLS)
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `RelationalStore` and `CatalogSource` for its store type
//! 3. Add a variant to `StoreConfig` and a branch to [`open_store`]
//! 4. Gate the driver with a feature flag in `Cargo.toml`

pub mod common;
pub mod memory;
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use common::{SslMode, TlsBuilder};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::catalog::FileCatalog;
use crate::config::{MigrationConfig, StoreConfig};
use crate::core::{CatalogSource, RelationalStore};
use crate::error::Result;

/// A store opened from configuration, usable both for rows and for
/// introspecting its own catalog.
#[derive(Clone)]
pub struct OpenStore {
    /// Row access.
    pub store: Arc<dyn RelationalStore>,
    /// Catalog introspection against the same connection.
    pub catalog: Arc<dyn CatalogSource>,
}

impl OpenStore {
    /// Wrap a store that implements both traits.
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: RelationalStore + CatalogSource + 'static,
    {
        Self {
            store: store.clone(),
            catalog: store,
        }
    }
}

/// Open the store described by `config`.
///
/// PostgreSQL pools connect lazily; SQLite opens its file immediately.
pub fn open_store(config: &StoreConfig) -> Result<OpenStore> {
    match config {
        StoreConfig::Postgres(pg) => Ok(OpenStore::new(Arc::new(PostgresStore::connect(pg)?))),
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite(sqlite) => Ok(OpenStore::new(Arc::new(SqliteStore::open(
            sqlite.path.clone(),
        )?))),
        #[cfg(not(feature = "sqlite"))]
        StoreConfig::Sqlite(_) => Err(crate::error::MigrateError::Config(
            "this build has no SQLite support (enable the `sqlite` feature)".into(),
        )),
    }
}

/// Pick the catalog for a run: the configured catalog file when set,
/// otherwise introspection of the source store.
pub fn open_catalog_source(
    migration: &MigrationConfig,
    source: &OpenStore,
) -> Arc<dyn CatalogSource> {
    match &migration.catalog_file {
        Some(path) => Arc::new(FileCatalog::new(path.clone())),
        None => source.catalog.clone(),
    }
}

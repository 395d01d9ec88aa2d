//! # relmigrate
//!
//! Cross-store relational data migration library.
//!
//! Copies every row of a source store into a structurally compatible
//! destination store:
//!
//! - **Dependency order** derived from foreign keys in the schema catalog
//! - **Self-referential tables** inserted parent-before-child
//! - **Bounded memory** through keyset pagination and fixed-size chunks
//! - **Re-runnable**: rows whose primary key already exists are skipped
//!
//! Stores: PostgreSQL, SQLite (feature `sqlite`) and an in-memory store.
//!
//! ## Example
//!
//! ```rust,no_run
//! use relmigrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> relmigrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!     let report = orchestrator.migrate(&CancellationToken::new()).await?;
//!     println!("Inserted {} rows", report.rows_inserted());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod transfer;

// Re-exports for convenient access
pub use catalog::{FileCatalog, SchemaCatalog};
pub use config::{Config, MigrationConfig, PostgresConfig, SqliteConfig, StoreConfig};
pub use core::{
    CatalogSource, FieldDescriptor, FieldKind, RelationalStore, Row, RowId, TableDescriptor,
    Value,
};
pub use drivers::{open_store, MemoryStore, OpenStore, PostgresStore};
#[cfg(feature = "sqlite")]
pub use drivers::SqliteStore;
pub use error::{MigrateError, Result};
pub use graph::{sort_rows, sort_tables, DependencyGraph, RowOrder, TableOrder};
pub use orchestrator::{
    HealthCheckResult, MigrationPlan, Orchestrator, RunReport, TableReport, TableStatus,
};
pub use transfer::{ProgressUpdate, TransferConfig, TransferEngine, TransferMode, TransferStats};

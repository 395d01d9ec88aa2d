//! Configuration validation.

use super::{Config, PostgresConfig, StoreConfig};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store("source", &config.source)?;
    validate_store("destination", &config.destination)?;

    // Cannot migrate to the same database
    if same_database(&config.source, &config.destination) {
        return Err(MigrateError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }

    for pattern in config
        .migration
        .include_tables
        .iter()
        .chain(&config.migration.exclude_tables)
    {
        glob::Pattern::new(pattern).map_err(|e| {
            MigrateError::Config(format!("invalid table pattern '{}': {}", pattern, e))
        })?;
    }

    Ok(())
}

fn validate_store(side: &str, store: &StoreConfig) -> Result<()> {
    match store {
        StoreConfig::Postgres(pg) => validate_postgres(side, pg),
        StoreConfig::Sqlite(sqlite) => {
            if sqlite.path.as_os_str().is_empty() {
                return Err(MigrateError::Config(format!("{}.path is required", side)));
            }
            Ok(())
        }
    }
}

fn validate_postgres(side: &str, pg: &PostgresConfig) -> Result<()> {
    if pg.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if pg.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", side)));
    }
    if pg.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    if pg.max_connections == 0 {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }
    SslMode::parse(&pg.ssl_mode)?;
    Ok(())
}

fn same_database(a: &StoreConfig, b: &StoreConfig) -> bool {
    match (a, b) {
        (StoreConfig::Postgres(a), StoreConfig::Postgres(b)) => {
            a.host == b.host && a.port == b.port && a.database == b.database
        }
        // Two in-memory SQLite databases are distinct connections.
        (StoreConfig::Sqlite(a), StoreConfig::Sqlite(b)) => {
            a.path == b.path && a.path.as_os_str() != ":memory:"
        }
        _ => false,
    }
}

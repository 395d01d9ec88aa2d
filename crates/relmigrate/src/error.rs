//! Error types for the migration library.

use thiserror::Error;

/// Process exit code: success.
pub const EXIT_SUCCESS: u8 = 0;
/// Process exit code: invalid or missing configuration.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code: a store could not be reached or the connection was lost.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Process exit code: the run finished but one or more tables failed.
pub const EXIT_TRANSFER_ERROR: u8 = 3;
/// Process exit code: the run was cancelled.
pub const EXIT_CANCELLED: u8 = 4;
/// Process exit code: file system error.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pre-flight liveness probe against the destination failed.
    #[error("Destination unreachable: {0}")]
    DestinationUnreachable(String),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Store(#[from] tokio_postgres::Error),

    /// Error reported by another store driver
    #[error("{engine} error: {message}")]
    Driver {
        engine: &'static str,
        message: String,
    },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Schema catalog could not be loaded
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// A cataloged table has no accessor on one side
    #[error("Schema drift: table {table} is missing on the {side}")]
    SchemaDrift { table: String, side: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a driver error for a non-PostgreSQL engine.
    pub fn driver(engine: &'static str, message: impl ToString) -> Self {
        MigrateError::Driver {
            engine,
            message: message.to_string(),
        }
    }

    /// Whether this error must abort the remaining tables of a run.
    ///
    /// Everything else only fails the table it happened on.
    pub fn is_fatal(&self) -> bool {
        match self {
            MigrateError::DestinationUnreachable(_)
            | MigrateError::Pool { .. }
            | MigrateError::Cancelled => true,
            MigrateError::Store(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Map the error to a stable process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::Catalog(_) => EXIT_CONFIG_ERROR,
            MigrateError::DestinationUnreachable(_)
            | MigrateError::Pool { .. }
            | MigrateError::Store(_)
            | MigrateError::Driver { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::SchemaDrift { .. } | MigrateError::Transfer { .. } => {
                EXIT_TRANSFER_ERROR
            }
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

//! Run reports, dry-run plans and health check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{
    Result, EXIT_CANCELLED, EXIT_CONNECTION_ERROR, EXIT_SUCCESS, EXIT_TRANSFER_ERROR,
};
use crate::transfer::{FailedBatch, TransferMode, TransferStats};

/// Outcome of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Completed,
    Skipped,
    Failed,
    NotAttempted,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TableStatus::Completed => "completed",
            TableStatus::Skipped => "skipped",
            TableStatus::Failed => "failed",
            TableStatus::NotAttempted => "not_attempted",
        };
        f.write_str(s)
    }
}

/// Per-table entry of a [`RunReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// Table name.
    pub table: String,

    /// Final status.
    pub status: TableStatus,

    /// How rows were read; unset for tables that never started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TransferMode>,

    /// Source rows counted at the start of the table.
    pub total_source: u64,

    /// Rows inserted into the destination.
    pub inserted: u64,

    /// Rows already present in the destination.
    pub skipped_existing: u64,

    /// Table-level plus row-level ordering problems.
    pub cycle_warnings: usize,

    /// Human-readable warnings (skip reasons, cycles, ignored self-references).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Error that failed the table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Chunk the destination rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_batch: Option<FailedBatch>,

    /// Wall time spent on the table.
    pub duration_seconds: f64,
}

impl TableReport {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::NotAttempted,
            mode: None,
            total_source: 0,
            inserted: 0,
            skipped_existing: 0,
            cycle_warnings: 0,
            warnings: Vec::new(),
            error: None,
            failed_batch: None,
            duration_seconds: 0.0,
        }
    }

    pub(crate) fn record(&mut self, stats: &TransferStats) {
        self.total_source = stats.total_source;
        self.inserted = stats.inserted;
        self.skipped_existing = stats.skipped_existing;
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// No table failed and nothing aborted the run.
    pub success: bool,

    /// The run was stopped by a cancellation request.
    pub cancelled: bool,

    /// Error that aborted the remaining tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,

    /// Resolved insertion order.
    pub table_order: Vec<String>,

    /// Tables placed by the cycle fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cyclic_tables: Vec<String>,

    /// One entry per table, in insertion order.
    pub tables: Vec<TableReport>,
}

impl RunReport {
    /// Total rows inserted across all tables.
    pub fn rows_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    /// Total rows that were already present.
    pub fn rows_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped_existing).sum()
    }

    /// Tables with the given status.
    pub fn tables_with(&self, status: TableStatus) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(move |t| t.status == status)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.fatal_error.is_some() {
            EXIT_CONNECTION_ERROR
        } else if self.tables_with(TableStatus::Failed).next().is_some() {
            EXIT_TRANSFER_ERROR
        } else {
            EXIT_SUCCESS
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What a run would do with one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTable {
    /// Table name.
    pub table: String,

    /// Read mode, unless the table would be skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TransferMode>,

    /// Self-reference column used for row ordering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_column: Option<String>,

    /// Why the table would be skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Placed by the cycle fallback.
    pub cyclic: bool,

    /// Warnings the run would record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Dry-run output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Tables in insertion order.
    pub tables: Vec<PlannedTable>,

    /// Tables placed by the cycle fallback.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cyclic_tables: Vec<String>,
}

impl MigrationPlan {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Liveness of one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    /// Engine identifier.
    pub engine: String,
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of pinging both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source: StoreHealth,
    pub destination: StoreHealth,
}

/// Row counts of one table on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCount {
    pub table: String,
    /// `None` when the table is missing on the source.
    pub source_rows: Option<i64>,
    /// `None` when the table is missing on the destination.
    pub destination_rows: Option<i64>,
}

impl TableCount {
    /// Both sides have the table with the same number of rows.
    pub fn matches(&self) -> bool {
        self.source_rows.is_some() && self.source_rows == self.destination_rows
    }
}

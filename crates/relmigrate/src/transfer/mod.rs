//! Batch transfer engine.
//!
//! Moves the rows of one table from source to destination in fixed-size
//! chunks, either by keyset pagination over the primary key or by slicing a
//! pre-ordered row list. Every chunk is written with skip-existing semantics,
//! so re-running a table only inserts what is still missing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::core::{RelationalStore, Row, RowId, TableDescriptor};
use crate::error::{MigrateError, Result};

/// How a table's rows are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Cursor pagination by primary key.
    Paginated,
    /// A full, already ordered row list written in chunks.
    PreOrdered,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Paginated => f.write_str("paginated"),
            TransferMode::PreOrdered => f.write_str("pre_ordered"),
        }
    }
}

/// Where the rows of a transfer come from.
#[derive(Debug)]
pub enum RowSource {
    /// Page through the source store.
    Paginated,
    /// Write these rows in order.
    PreOrdered(Vec<Row>),
}

impl RowSource {
    /// Mode reported for this source.
    pub fn mode(&self) -> TransferMode {
        match self {
            RowSource::Paginated => TransferMode::Paginated,
            RowSource::PreOrdered(_) => TransferMode::PreOrdered,
        }
    }
}

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Rows per page and per insert chunk.
    pub batch_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Progress after a chunk was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Table being transferred.
    pub table: String,
    /// Rows processed so far (inserted plus already present).
    pub migrated: u64,
    /// Source row count at the start of the table.
    pub total: u64,
}

/// Boundaries of a chunk the destination rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    /// Position of the chunk's first row within the table's transfer.
    pub offset: u64,
    /// Rows in the chunk.
    pub len: usize,
    /// Key of the first row.
    pub first_id: Option<String>,
    /// Key of the last row.
    pub last_id: Option<String>,
}

/// Counts for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Source rows counted before the transfer.
    pub total_source: u64,
    /// Rows the destination accepted.
    pub inserted: u64,
    /// Rows skipped because their key already existed.
    pub skipped_existing: u64,
    /// Chunks written.
    pub chunks: usize,
}

impl TransferStats {
    /// Rows processed so far.
    pub fn migrated(&self) -> u64 {
        self.inserted + self.skipped_existing
    }
}

/// A transfer that stopped early, with the counts reached before it did.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct TransferFailure {
    /// What went wrong.
    #[source]
    pub error: MigrateError,
    /// Counts up to the failure.
    pub stats: TransferStats,
    /// The rejected chunk, for write failures.
    pub batch: Option<FailedBatch>,
}

impl TransferFailure {
    fn new(error: MigrateError, stats: &TransferStats) -> Self {
        Self {
            error,
            stats: stats.clone(),
            batch: None,
        }
    }
}

/// Transfer engine for moving one table at a time between two stores.
pub struct TransferEngine {
    source: Arc<dyn RelationalStore>,
    destination: Arc<dyn RelationalStore>,
    config: TransferConfig,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl TransferEngine {
    /// Create a new transfer engine. A zero batch size is rejected.
    pub fn new(
        source: Arc<dyn RelationalStore>,
        destination: Arc<dyn RelationalStore>,
        config: TransferConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(MigrateError::Config("batch_size must be at least 1".into()));
        }
        Ok(Self {
            source,
            destination,
            config,
            progress_tx: None,
        })
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Send progress update if channel is configured.
    async fn send_progress(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update).await;
        }
    }

    /// Transfer one table.
    ///
    /// A table with no source rows returns immediately without touching the
    /// destination. Cancellation is checked before every chunk; a chunk
    /// already handed to the destination always completes or fails as a unit.
    pub async fn transfer(
        &self,
        table: &TableDescriptor,
        rows: RowSource,
        cancel: &CancellationToken,
    ) -> std::result::Result<TransferStats, TransferFailure> {
        let mut stats = TransferStats::default();

        match rows {
            RowSource::Paginated => {
                let total = self
                    .source
                    .count(table)
                    .await
                    .map_err(|e| TransferFailure::new(e, &stats))?;
                stats.total_source = u64::try_from(total).unwrap_or(0);
                if stats.total_source == 0 {
                    info!("{}: 0 rows, nothing to transfer", table.name);
                    return Ok(stats);
                }
                info!(
                    "{}: transferring {} rows (paginated, batch {})",
                    table.name, stats.total_source, self.config.batch_size
                );
                self.transfer_paginated(table, &mut stats, cancel).await?;
            }
            RowSource::PreOrdered(rows) => {
                stats.total_source = rows.len() as u64;
                if rows.is_empty() {
                    info!("{}: 0 rows, nothing to transfer", table.name);
                    return Ok(stats);
                }
                info!(
                    "{}: transferring {} rows (pre-ordered, batch {})",
                    table.name, stats.total_source, self.config.batch_size
                );
                for chunk in rows.chunks(self.config.batch_size) {
                    check_cancelled(cancel, &stats)?;
                    self.write_chunk(table, chunk, &mut stats).await?;
                }
            }
        }

        info!(
            "{}: done, {} inserted, {} already present",
            table.name, stats.inserted, stats.skipped_existing
        );
        Ok(stats)
    }

    async fn transfer_paginated(
        &self,
        table: &TableDescriptor,
        stats: &mut TransferStats,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), TransferFailure> {
        let page_size = self.config.batch_size;
        let mut cursor: Option<RowId> = None;

        loop {
            check_cancelled(cancel, stats)?;

            let page = self
                .source
                .find_page(table, page_size, cursor.as_ref())
                .await
                .map_err(|e| TransferFailure::new(e, stats))?;
            if page.is_empty() {
                break;
            }

            let last = page.last().and_then(|r| r.id(&table.primary_key));
            let Some(last) = last else {
                return Err(TransferFailure::new(
                    MigrateError::transfer(
                        &table.name,
                        format!("row without a usable {} value", table.primary_key),
                    ),
                    stats,
                ));
            };

            self.write_chunk(table, &page, stats).await?;

            if page.len() < page_size {
                break;
            }
            debug!("{}: next page after {}", table.name, last);
            cursor = Some(last);
        }
        Ok(())
    }

    async fn write_chunk(
        &self,
        table: &TableDescriptor,
        chunk: &[Row],
        stats: &mut TransferStats,
    ) -> std::result::Result<(), TransferFailure> {
        let offset = stats.migrated();
        let inserted = match self.destination.bulk_insert(table, chunk, true).await {
            Ok(n) => n,
            Err(error) => {
                let key = |row: Option<&Row>| {
                    row.and_then(|r| r.id(&table.primary_key))
                        .map(|id| id.to_string())
                };
                let batch = FailedBatch {
                    offset,
                    len: chunk.len(),
                    first_id: key(chunk.first()),
                    last_id: key(chunk.last()),
                };
                return Err(TransferFailure {
                    error,
                    stats: stats.clone(),
                    batch: Some(batch),
                });
            }
        };

        let len = chunk.len() as u64;
        let inserted = inserted.min(len);
        stats.inserted += inserted;
        stats.skipped_existing += len - inserted;
        stats.chunks += 1;

        info!("{}: {}/{}", table.name, stats.migrated(), stats.total_source);
        self.send_progress(ProgressUpdate {
            table: table.name.clone(),
            migrated: stats.migrated(),
            total: stats.total_source,
        })
        .await;
        Ok(())
    }
}

fn check_cancelled(
    cancel: &CancellationToken,
    stats: &TransferStats,
) -> std::result::Result<(), TransferFailure> {
    if cancel.is_cancelled() {
        return Err(TransferFailure::new(MigrateError::Cancelled, stats));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDescriptor, Value};
    use crate::drivers::MemoryStore;

    fn rows(n: i64) -> Vec<Row> {
        (1..=n)
            .map(|id| Row::from_pairs([("id", Value::Int(id)), ("v", Value::Int(id * 10))]))
            .collect()
    }

    fn item() -> TableDescriptor {
        TableDescriptor::new(
            "Item",
            vec![FieldDescriptor::scalar("id"), FieldDescriptor::scalar("v")],
        )
    }

    fn engine(
        source: &Arc<MemoryStore>,
        destination: &Arc<MemoryStore>,
        batch_size: usize,
    ) -> TransferEngine {
        TransferEngine::new(
            source.clone(),
            destination.clone(),
            TransferConfig { batch_size },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_paginated_1200_rows_in_three_batches() {
        let source = Arc::new(MemoryStore::new().with_table("Item", rows(1200)));
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));

        let stats = engine(&source, &destination, 500)
            .transfer(&item(), RowSource::Paginated, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.find_page_calls("Item"), 3);
        assert_eq!(destination.bulk_insert_calls("Item"), 3);
        assert_eq!(stats.inserted, 1200);
        assert_eq!(stats.chunks, 3);
        assert_eq!(destination.row_count("Item"), 1200);
    }

    #[tokio::test]
    async fn test_empty_table_never_writes() {
        let source = Arc::new(MemoryStore::new().with_table("Item", vec![]));
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));

        let stats = engine(&source, &destination, 500)
            .transfer(&item(), RowSource::Paginated, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stats.inserted, 0);
        assert_eq!(destination.bulk_insert_calls("Item"), 0);
        assert_eq!(source.find_page_calls("Item"), 0);
    }

    #[tokio::test]
    async fn test_empty_pre_ordered_list_never_writes() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));

        let stats = engine(&source, &destination, 500)
            .transfer(
                &item(),
                RowSource::PreOrdered(vec![]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.total_source, 0);
        assert_eq!(stats.chunks, 0);
        assert_eq!(destination.bulk_insert_calls("Item"), 0);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let source: Arc<dyn RelationalStore> = Arc::new(MemoryStore::new());
        let destination: Arc<dyn RelationalStore> = Arc::new(MemoryStore::new());

        let err = TransferEngine::new(source, destination, TransferConfig { batch_size: 0 })
            .err()
            .unwrap();

        assert!(matches!(err, MigrateError::Config(_)));
        assert!(err.to_string().contains("batch_size"));
    }

    #[tokio::test]
    async fn test_rerun_skips_existing_rows() {
        let source = Arc::new(MemoryStore::new().with_table("Item", rows(30)));
        let destination = Arc::new(MemoryStore::new().with_table("Item", rows(12)));
        let engine = engine(&source, &destination, 10);

        let first = engine
            .transfer(&item(), RowSource::Paginated, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.inserted, 18);
        assert_eq!(first.skipped_existing, 12);

        let second = engine
            .transfer(&item(), RowSource::Paginated, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, 30);
        assert_eq!(destination.row_count("Item"), 30);
    }

    #[tokio::test]
    async fn test_pre_ordered_chunks() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));

        let stats = engine(&source, &destination, 4)
            .transfer(
                &item(),
                RowSource::PreOrdered(rows(10)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.chunks, 3);
        assert_eq!(destination.bulk_insert_calls("Item"), 3);
        assert_eq!(stats.total_source, 10);
    }

    #[tokio::test]
    async fn test_write_failure_reports_batch() {
        let source = Arc::new(MemoryStore::new().with_table("Item", rows(25)));
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));
        destination.fail_inserts("Item");

        let failure = engine(&source, &destination, 10)
            .transfer(&item(), RowSource::Paginated, &CancellationToken::new())
            .await
            .unwrap_err();

        let batch = failure.batch.unwrap();
        assert_eq!(batch.offset, 0);
        assert_eq!(batch.len, 10);
        assert_eq!(batch.first_id.as_deref(), Some("1"));
        assert_eq!(batch.last_id.as_deref(), Some("10"));
        assert_eq!(source.find_page_calls("Item"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_chunk() {
        let source = Arc::new(MemoryStore::new().with_table("Item", rows(5)));
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = engine(&source, &destination, 2)
            .transfer(&item(), RowSource::Paginated, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(failure.error, MigrateError::Cancelled));
        assert_eq!(destination.bulk_insert_calls("Item"), 0);
    }

    #[tokio::test]
    async fn test_progress_after_every_chunk() {
        let source = Arc::new(MemoryStore::new().with_table("Item", rows(5)));
        let destination = Arc::new(MemoryStore::new().with_table("Item", vec![]));
        let (tx, mut rx) = mpsc::channel(16);

        engine(&source, &destination, 2)
            .with_progress(tx)
            .transfer(&item(), RowSource::Paginated, &CancellationToken::new())
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push((update.migrated, update.total));
        }
        assert_eq!(seen, vec![(2, 5), (4, 5), (5, 5)]);
    }
}

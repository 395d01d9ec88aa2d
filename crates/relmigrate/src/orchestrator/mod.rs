//! Migration orchestrator - main workflow coordinator.
//!
//! Resolves the insertion order once, then moves tables strictly one after
//! another. Per-table problems (schema drift, rejected chunks) are recorded
//! and the run continues; fatal problems (lost connection, cancellation)
//! stop the remaining tables.

mod report;

pub use report::{
    HealthCheckResult, MigrationPlan, PlannedTable, RunReport, StoreHealth, TableCount,
    TableReport, TableStatus,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::SchemaCatalog;
use crate::config::{Config, MigrationConfig};
use crate::core::{CatalogSource, RelationalStore, TableDescriptor};
use crate::drivers::{open_catalog_source, open_store};
use crate::error::{MigrateError, Result};
use crate::graph::{sort_rows, sort_tables, DependencyGraph, TableOrder};
use crate::transfer::{
    ProgressUpdate, RowSource, TransferConfig, TransferEngine, TransferFailure, TransferMode,
};

/// Migration orchestrator.
pub struct Orchestrator {
    source: Arc<dyn RelationalStore>,
    destination: Arc<dyn RelationalStore>,
    catalog: Arc<dyn CatalogSource>,
    migration: MigrationConfig,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

/// How a table will be read, decided before any of its rows move.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Strategy {
    Skip(String),
    Paginated { warning: Option<String> },
    PreOrdered { parent_column: String },
}

impl Orchestrator {
    /// Open both stores described by `config`.
    pub fn new(config: Config) -> Result<Self> {
        let source = open_store(&config.source)?;
        let destination = open_store(&config.destination)?;
        let catalog = open_catalog_source(&config.migration, &source);

        info!(
            "Source: {} ({}), destination: {} ({})",
            config.source.engine(),
            config.source.location(),
            config.destination.engine(),
            config.destination.location()
        );

        Ok(Self::with_stores(
            source.store,
            destination.store,
            catalog,
            config.migration,
        ))
    }

    /// Build an orchestrator over already opened stores.
    pub fn with_stores(
        source: Arc<dyn RelationalStore>,
        destination: Arc<dyn RelationalStore>,
        catalog: Arc<dyn CatalogSource>,
        migration: MigrationConfig,
    ) -> Self {
        Self {
            source,
            destination,
            catalog,
            migration,
            progress_tx: None,
        }
    }

    /// Set progress channel for per-chunk updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Load the catalog and apply the include/exclude filters.
    pub async fn load_catalog(&self) -> Result<Vec<TableDescriptor>> {
        let tables = self.catalog.load_catalog().await?;
        let catalog = SchemaCatalog::new(tables).filter(
            &self.migration.include_tables,
            &self.migration.exclude_tables,
        )?;
        info!("Catalog: {} tables selected", catalog.tables.len());
        Ok(catalog.into_tables())
    }

    /// Load the catalog, run, and release both stores whatever the outcome.
    pub async fn migrate(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let result = match self.load_catalog().await {
            Ok(tables) => self.run(&tables, cancel).await,
            Err(e) => Err(e),
        };
        self.close().await;
        result
    }

    /// Migrate `tables`.
    ///
    /// Fails up front only on a zero batch size or when the destination
    /// does not answer a ping.
    /// Every other problem ends up in the returned report.
    pub async fn run(
        &self,
        tables: &[TableDescriptor],
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let mut engine = TransferEngine::new(
            self.source.clone(),
            self.destination.clone(),
            TransferConfig {
                batch_size: self.migration.batch_size,
            },
        )?;
        if let Some(tx) = &self.progress_tx {
            engine = engine.with_progress(tx.clone());
        }

        self.destination
            .ping()
            .await
            .map_err(|e| MigrateError::DestinationUnreachable(e.to_string()))?;

        let order = resolve_order(tables);
        let by_name: HashMap<&str, &TableDescriptor> =
            tables.iter().map(|t| (t.name.as_str(), t)).collect();

        let mut reports = Vec::with_capacity(order.tables.len());
        let mut fatal: Option<MigrateError> = None;

        for name in &order.tables {
            let Some(table) = by_name.get(name.as_str()) else {
                continue;
            };
            if fatal.is_none() && cancel.is_cancelled() {
                fatal = Some(MigrateError::Cancelled);
            }
            if fatal.is_some() {
                reports.push(TableReport::new(name.as_str()));
                continue;
            }

            let (report, table_fatal) = self.migrate_table(&engine, table, &order, cancel).await;
            reports.push(report);
            fatal = table_fatal;
        }

        let cancelled = matches!(fatal, Some(MigrateError::Cancelled));
        if let Some(e) = &fatal {
            error!("Migration aborted: {}", e);
        }
        let report = RunReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: timer.elapsed().as_secs_f64(),
            success: fatal.is_none() && !reports.iter().any(|r| r.status == TableStatus::Failed),
            cancelled,
            fatal_error: fatal.map(|e| e.to_string()),
            table_order: order.tables,
            cyclic_tables: order.cyclic,
            tables: reports,
        };

        info!(
            "Migration {}: {} rows inserted, {} already present, {} failed tables in {:.1}s",
            if report.success { "completed" } else { "finished with errors" },
            report.rows_inserted(),
            report.rows_skipped(),
            report.tables_with(TableStatus::Failed).count(),
            report.duration_seconds
        );
        Ok(report)
    }

    /// Move one table. The second value is set when the failure must stop
    /// the remaining tables.
    async fn migrate_table(
        &self,
        engine: &TransferEngine,
        table: &TableDescriptor,
        order: &TableOrder,
        cancel: &CancellationToken,
    ) -> (TableReport, Option<MigrateError>) {
        let timer = Instant::now();
        let mut report = TableReport::new(table.name.as_str());

        if order.is_cyclic(&table.name) {
            report.cycle_warnings += 1;
            report
                .warnings
                .push("placed by cycle fallback; foreign key order not guaranteed".into());
        }

        let rows = match self.strategy(table).await {
            Ok(Strategy::Skip(reason)) => {
                warn!("{}: skipped, {}", table.name, reason);
                report.status = TableStatus::Skipped;
                report.warnings.push(reason);
                return (report, None);
            }
            Ok(Strategy::Paginated { warning }) => {
                if let Some(warning) = warning {
                    warn!("{}: {}", table.name, warning);
                    report.warnings.push(warning);
                }
                RowSource::Paginated
            }
            Ok(Strategy::PreOrdered { parent_column }) => {
                match self.source.find_all(table).await {
                    Ok(rows) => {
                        let sorted = sort_rows(rows, &parent_column, &table.primary_key);
                        if sorted.has_cycle {
                            let ids: Vec<String> =
                                sorted.unresolved.iter().map(|id| id.to_string()).collect();
                            warn!(
                                "{}: {} rows could not be ordered by {} and may fail to insert: {}",
                                table.name,
                                ids.len(),
                                parent_column,
                                ids.join(", ")
                            );
                            report.cycle_warnings += ids.len();
                            report.warnings.push(format!(
                                "unordered rows (cycle through {}): {}",
                                parent_column,
                                ids.join(", ")
                            ));
                        }
                        RowSource::PreOrdered(sorted.rows)
                    }
                    Err(e) => {
                        let failure = TransferFailure {
                            error: e,
                            stats: Default::default(),
                            batch: None,
                        };
                        return fail_table(report, failure, timer);
                    }
                }
            }
            Err(e) => {
                let failure = TransferFailure {
                    error: e,
                    stats: Default::default(),
                    batch: None,
                };
                return fail_table(report, failure, timer);
            }
        };

        report.mode = Some(rows.mode());
        match engine.transfer(table, rows, cancel).await {
            Ok(stats) => {
                report.record(&stats);
                report.status = TableStatus::Completed;
                report.duration_seconds = timer.elapsed().as_secs_f64();
                (report, None)
            }
            Err(failure) => fail_table(report, failure, timer),
        }
    }

    async fn strategy(&self, table: &TableDescriptor) -> Result<Strategy> {
        if !table.single_column_key {
            return Ok(Strategy::Skip("no single-column primary key".into()));
        }
        if !self.source.has_table(&table.name).await? {
            return Ok(Strategy::Skip("schema drift: missing on the source".into()));
        }
        if !self.destination.has_table(&table.name).await? {
            return Ok(Strategy::Skip(
                "schema drift: missing on the destination".into(),
            ));
        }
        Ok(self_reference_strategy(table))
    }

    /// Describe what [`run`](Self::run) would do, without moving data.
    pub async fn plan(&self, tables: &[TableDescriptor]) -> Result<MigrationPlan> {
        let order = resolve_order(tables);
        let by_name: HashMap<&str, &TableDescriptor> =
            tables.iter().map(|t| (t.name.as_str(), t)).collect();

        let mut planned = Vec::with_capacity(order.tables.len());
        for name in &order.tables {
            let Some(table) = by_name.get(name.as_str()) else {
                continue;
            };
            let mut entry = PlannedTable {
                table: name.clone(),
                mode: None,
                parent_column: None,
                skip_reason: None,
                cyclic: order.is_cyclic(name),
                warnings: Vec::new(),
            };
            match self.strategy(table).await? {
                Strategy::Skip(reason) => entry.skip_reason = Some(reason),
                Strategy::Paginated { warning } => {
                    entry.mode = Some(TransferMode::Paginated);
                    entry.warnings.extend(warning);
                }
                Strategy::PreOrdered { parent_column } => {
                    entry.mode = Some(TransferMode::PreOrdered);
                    entry.parent_column = Some(parent_column);
                }
            }
            planned.push(entry);
        }

        Ok(MigrationPlan {
            tables: planned,
            cyclic_tables: order.cyclic,
        })
    }

    /// Ping both stores and measure latency.
    pub async fn health_check(&self) -> HealthCheckResult {
        let source = probe(self.source.as_ref()).await;
        let destination = probe(self.destination.as_ref()).await;
        HealthCheckResult {
            healthy: source.connected && destination.connected,
            source,
            destination,
        }
    }

    /// Compare per-table row counts between source and destination.
    pub async fn validate(&self, tables: &[TableDescriptor]) -> Result<Vec<TableCount>> {
        info!("Validating row counts");
        let mut counts = Vec::with_capacity(tables.len());

        for table in tables {
            let source_rows = count_if_present(self.source.as_ref(), table).await?;
            let destination_rows = count_if_present(self.destination.as_ref(), table).await?;
            let count = TableCount {
                table: table.name.clone(),
                source_rows,
                destination_rows,
            };

            if count.matches() {
                info!("{}: {:?} rows (match)", table.name, source_rows);
            } else {
                warn!(
                    "{}: source={:?}, destination={:?} (MISMATCH)",
                    table.name, source_rows, destination_rows
                );
            }
            counts.push(count);
        }
        Ok(counts)
    }

    /// Release both stores.
    pub async fn close(&self) {
        self.source.close().await;
        self.destination.close().await;
    }
}

fn resolve_order(tables: &[TableDescriptor]) -> TableOrder {
    let graph = DependencyGraph::build(tables);
    let order = sort_tables(tables, &graph);
    info!(
        "Resolved insertion order for {} tables ({} dependencies)",
        order.tables.len(),
        graph.edge_count()
    );
    if order.has_cycle() {
        warn!(
            "Dependency cycle: {} appended in catalog order",
            order.cyclic.join(", ")
        );
    }
    order
}

fn self_reference_strategy(table: &TableDescriptor) -> Strategy {
    let columns = table.self_reference_columns();
    match columns.as_slice() {
        [] => Strategy::Paginated { warning: None },
        [column] => Strategy::PreOrdered {
            parent_column: column.to_string(),
        },
        many => Strategy::Paginated {
            warning: Some(format!(
                "{} self-referencing columns ({}); rows are not ordered",
                many.len(),
                many.join(", ")
            )),
        },
    }
}

fn fail_table(
    mut report: TableReport,
    failure: TransferFailure,
    timer: Instant,
) -> (TableReport, Option<MigrateError>) {
    report.record(&failure.stats);
    report.status = TableStatus::Failed;
    report.error = Some(failure.error.to_string());
    report.duration_seconds = timer.elapsed().as_secs_f64();

    match &failure.batch {
        Some(batch) => error!(
            "{}: chunk at offset {} ({} rows, keys {}..{}) failed: {}",
            report.table,
            batch.offset,
            batch.len,
            batch.first_id.as_deref().unwrap_or("?"),
            batch.last_id.as_deref().unwrap_or("?"),
            failure.error
        ),
        None => error!("{}: failed: {}", report.table, failure.error),
    }
    report.failed_batch = failure.batch;

    let fatal = failure.error.is_fatal().then_some(failure.error);
    (report, fatal)
}

async fn probe(store: &dyn RelationalStore) -> StoreHealth {
    let start = Instant::now();
    let result = store.ping().await;
    StoreHealth {
        engine: store.engine().to_string(),
        connected: result.is_ok(),
        latency_ms: start.elapsed().as_millis() as u64,
        error: result.err().map(|e| e.to_string()),
    }
}

async fn count_if_present(
    store: &dyn RelationalStore,
    table: &TableDescriptor,
) -> Result<Option<i64>> {
    if !store.has_table(&table.name).await? {
        return Ok(None);
    }
    Ok(Some(store.count(table).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldDescriptor;

    #[test]
    fn test_self_reference_strategy() {
        let plain = TableDescriptor::new("User", vec![FieldDescriptor::scalar("id")]);
        assert_eq!(
            self_reference_strategy(&plain),
            Strategy::Paginated { warning: None }
        );

        let tree = TableDescriptor::new(
            "Task",
            vec![FieldDescriptor::relation("parent", "Task", ["parentId"])],
        );
        assert_eq!(
            self_reference_strategy(&tree),
            Strategy::PreOrdered {
                parent_column: "parentId".into()
            }
        );

        let ambiguous = TableDescriptor::new(
            "Node",
            vec![
                FieldDescriptor::relation("left", "Node", ["leftId"]),
                FieldDescriptor::relation("right", "Node", ["rightId"]),
            ],
        );
        match self_reference_strategy(&ambiguous) {
            Strategy::Paginated { warning: Some(w) } => assert!(w.contains("leftId, rightId")),
            other => panic!("unexpected strategy {:?}", other),
        }
    }

    #[test]
    fn test_fatal_failure_is_propagated() {
        let failure = TransferFailure {
            error: MigrateError::pool("connection reset", "writing chunk"),
            stats: Default::default(),
            batch: None,
        };
        let (report, fatal) = fail_table(TableReport::new("User"), failure, Instant::now());
        assert_eq!(report.status, TableStatus::Failed);
        assert!(fatal.is_some());

        let failure = TransferFailure {
            error: MigrateError::transfer("User", "check constraint"),
            stats: Default::default(),
            batch: None,
        };
        let (_, fatal) = fail_table(TableReport::new("User"), failure, Instant::now());
        assert!(fatal.is_none());
    }
}

//! relmigrate CLI - copy a relational database into another, in foreign-key order.

use clap::{Parser, Subcommand};
use relmigrate::{
    Config, MigrateError, MigrationPlan, Orchestrator, ProgressUpdate, RunReport, TableStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "relmigrate")]
#[command(about = "Foreign-key aware, re-runnable data migration between relational stores")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every cataloged table
    Run {
        /// Override rows per page and per insert chunk
        #[arg(long)]
        batch_size: Option<usize>,

        /// Dry run: resolve and show the plan without transferring data
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare row counts between source and destination
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            batch_size,
            dry_run,
        } => {
            let config = config.with_batch_size(batch_size);
            config.validate()?;

            if dry_run {
                let orchestrator = Orchestrator::new(config)?;
                let plan = async {
                    let tables = orchestrator.load_catalog().await?;
                    orchestrator.plan(&tables).await
                }
                .await;
                orchestrator.close().await;
                let plan = plan?;

                if cli.output_json {
                    println!("{}", plan.to_json()?);
                } else {
                    print_plan(&plan);
                }
                return Ok(relmigrate::error::EXIT_SUCCESS);
            }

            let cancel_token = setup_signal_handler()?;
            let mut orchestrator = Orchestrator::new(config)?;
            let mut printer: Option<JoinHandle<()>> = None;
            if cli.progress {
                let (tx, rx) = mpsc::channel(256);
                orchestrator = orchestrator.with_progress(tx);
                printer = Some(tokio::spawn(print_progress(rx)));
            }

            let result = orchestrator.migrate(&cancel_token).await;
            // Closes the progress channel so the printer drains and exits.
            drop(orchestrator);
            if let Some(printer) = printer {
                let _ = printer.await;
            }
            let report = result?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }
            Ok(report.exit_code())
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config)?;
            let counts = async {
                let tables = orchestrator.load_catalog().await?;
                orchestrator.validate(&tables).await
            }
            .await;
            orchestrator.close().await;
            let counts = counts?;

            let mismatched = counts.iter().filter(|c| !c.matches()).count();
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("Row counts:");
                for count in &counts {
                    println!(
                        "  {} {:<32} source={:<10} destination={}",
                        if count.matches() { "OK      " } else { "MISMATCH" },
                        count.table,
                        display_count(count.source_rows),
                        display_count(count.destination_rows)
                    );
                }
                println!(
                    "\n  {}/{} tables match",
                    counts.len() - mismatched,
                    counts.len()
                );
            }

            if mismatched > 0 {
                return Ok(relmigrate::error::EXIT_TRANSFER_ERROR);
            }
            Ok(relmigrate::error::EXIT_SUCCESS)
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config)?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                let sides = [
                    ("Source", &result.source),
                    ("Destination", &result.destination),
                ];
                for (side, health) in sides {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        side,
                        health.engine,
                        if health.connected { "OK" } else { "FAILED" },
                        health.latency_ms
                    );
                    if let Some(ref err) = health.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Ok(relmigrate::error::EXIT_CONNECTION_ERROR);
            }
            Ok(relmigrate::error::EXIT_SUCCESS)
        }
    }
}

fn display_count(count: Option<i64>) -> String {
    count.map_or_else(|| "missing".to_string(), |n| n.to_string())
}

fn print_plan(plan: &MigrationPlan) {
    println!("Migration plan ({} tables):", plan.tables.len());
    for (i, table) in plan.tables.iter().enumerate() {
        let action = match (&table.mode, &table.skip_reason) {
            (_, Some(reason)) => format!("skip ({})", reason),
            (Some(mode), None) => match &table.parent_column {
                Some(parent) => format!("{} by {}", mode, parent),
                None => mode.to_string(),
            },
            (None, None) => "skip".to_string(),
        };
        println!(
            "  {:>3}. {:<32} {}{}",
            i + 1,
            table.table,
            action,
            if table.cyclic { " [cycle]" } else { "" }
        );
        for warning in &table.warnings {
            println!("       warning: {}", warning);
        }
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!(
        "{:<32} {:<14} {:>10} {:>10} {:>10} {:>7}",
        "TABLE", "STATUS", "SOURCE", "INSERTED", "EXISTING", "CYCLES"
    );
    for table in &report.tables {
        println!(
            "{:<32} {:<14} {:>10} {:>10} {:>10} {:>7}",
            table.table,
            table.status.to_string(),
            table.total_source,
            table.inserted,
            table.skipped_existing,
            table.cycle_warnings
        );
        for warning in &table.warnings {
            println!("    warning: {}", warning);
        }
        if let Some(ref err) = table.error {
            println!("    error: {}", err);
        }
    }

    let status_msg = if report.cancelled {
        "Migration cancelled"
    } else if report.success {
        "Migration completed!"
    } else {
        "Migration finished with errors"
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {} completed, {} skipped, {} failed, {} not attempted",
        report.tables_with(TableStatus::Completed).count(),
        report.tables_with(TableStatus::Skipped).count(),
        report.tables_with(TableStatus::Failed).count(),
        report.tables_with(TableStatus::NotAttempted).count()
    );
    println!(
        "  Rows: {} inserted, {} already present",
        report.rows_inserted(),
        report.rows_skipped()
    );
    if let Some(ref err) = report.fatal_error {
        println!("  Aborted: {}", err);
    }
}

async fn print_progress(mut rx: mpsc::Receiver<ProgressUpdate>) {
    while let Some(update) = rx.recv().await {
        if let Ok(line) = serde_json::to_string(&update) {
            eprintln!("{}", line);
        }
    }
}

/// `RUST_LOG`, when set, takes precedence over `--verbosity`.
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the run on SIGINT or SIGTERM. The chunk being written finishes
/// first; remaining tables are reported as not attempted.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping after the current chunk...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current chunk...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}

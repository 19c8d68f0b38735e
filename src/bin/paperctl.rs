//! PaperDesk admin CLI
//!
//! Works directly on the data directory; run it while the daemon is stopped.
//!
//! Usage:
//!   paperctl reset-active [--backup]
//!   paperctl reset-ledger [--backup]
//!   paperctl ingest signals.json
//!   paperctl summary
//!   paperctl export-ledger ledger.csv

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use paperdesk::config::AppConfig;
use paperdesk::inbox::parse_signals;
use paperdesk::market_data::HttpPriceGateway;
use paperdesk::notifications::LogSink;
use paperdesk::persistence::{export_ledger_csv, JsonFileStore, Slot, StateStore};
use paperdesk::LifecycleCoordinator;

#[derive(Parser)]
#[command(name = "paperctl", about = "PaperDesk admin commands")]
struct Cli {
    /// Data directory (defaults to persistence.data_dir from config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clear all active trades and pending signals.
    ResetActive {
        /// Copy the affected slots to _backups/ first.
        #[arg(long, default_value_t = false)]
        backup: bool,
    },
    /// Clear the completed-trade ledger.
    ResetLedger {
        /// Copy the ledger slot to _backups/ first.
        #[arg(long, default_value_t = false)]
        backup: bool,
    },
    /// Queue signals from a JSON file (one object or an array).
    Ingest { file: PathBuf },
    /// Print the ledger performance summary.
    Summary,
    /// Write the ledger as CSV.
    ExportLedger { output: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    paperdesk::init_tracing(&config.logging.level, false);

    let data_dir = cli.data_dir.unwrap_or_else(|| config.data_dir());
    let files = Arc::new(JsonFileStore::new(&data_dir)?);
    let store: Arc<dyn StateStore> = files.clone();
    // Admin commands never tick, so the gateway is never called.
    let gateway = Arc::new(HttpPriceGateway::new(
        &config.market_data.base_url,
        config.market_data_timeout(),
    )?);
    let coordinator =
        LifecycleCoordinator::bootstrap(config.engine_config(), store, gateway, Arc::new(LogSink))?;

    match cli.command {
        Commands::ResetActive { backup } => {
            if backup {
                files.backup_slots(&[Slot::PendingSignals, Slot::ActiveTrades])?;
            }
            coordinator.reset_active().await?;
        }
        Commands::ResetLedger { backup } => {
            if backup {
                files.backup_slots(&[Slot::CompletedTrades])?;
            }
            coordinator.reset_ledger().await?;
        }
        Commands::Ingest { file } => {
            let body = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = coordinator.ingest_signals(parse_signals(&body)?).await?;
            println!(
                "accepted {} signal(s), skipped {} duplicate(s), rejected {}",
                report.accepted, report.duplicates, report.rejected
            );
        }
        Commands::Summary => {
            let summary = coordinator.performance().await;
            println!("{}", summary.summary_string());
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::ExportLedger { output } => {
            let rows = export_ledger_csv(&coordinator.completed_trades().await, &output)?;
            info!(rows, path = %output.display(), "Ledger exported");
        }
    }

    Ok(())
}

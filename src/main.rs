//! PaperDesk daemon
//!
//! Loads configuration, bootstraps the lifecycle from the data directory and
//! runs the trigger and monitor loops until Ctrl+C.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use paperdesk::config::AppConfig;
use paperdesk::inbox::SignalInbox;
use paperdesk::market_data::HttpPriceGateway;
use paperdesk::notifications::{BroadcastSink, FanoutSink, NotificationLog, NotificationSink};
use paperdesk::persistence::{JsonFileStore, StateStore};
use paperdesk::LifecycleCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    paperdesk::init_tracing(&config.logging.level, config.logging.json);

    info!("🚀 PaperDesk v{} starting", env!("CARGO_PKG_VERSION"));
    info!(config = %config.digest(), "Configuration loaded");

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(config.data_dir())?);
    let gateway = Arc::new(HttpPriceGateway::new(
        &config.market_data.base_url,
        config.market_data_timeout(),
    )?);

    let log = Arc::new(
        NotificationLog::load(store.clone(), config.notifications.log_capacity)
            .context("Failed to load notification log")?,
    );
    let broadcast = BroadcastSink::new(config.notifications.broadcast_capacity);
    // The log already traces every event it records.
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![log.clone(), Arc::new(broadcast)];
    let sink = Arc::new(FanoutSink::new(sinks));

    let coordinator = Arc::new(
        LifecycleCoordinator::bootstrap(config.engine_config(), store, gateway, sink)
            .context("Failed to bootstrap lifecycle")?,
    );

    let pending = coordinator.pending_signals().await.len();
    let active = coordinator.active_trades().await.len();
    let ledger = coordinator.completed_trades().await.len();
    info!(
        pending,
        active,
        ledger,
        unread_notifications = log.unread_count(),
        "💾 [STORE] State loaded"
    );

    let mut handles = coordinator.clone().start().await;

    if config.persistence.inbox_enabled {
        let inbox = Arc::new(SignalInbox::new(config.inbox_dir())?);
        info!(dir = %inbox.dir().display(), "📥 [INBOX] Watching for signal files");
        let coordinator = coordinator.clone();
        handles.spawn_periodic("inbox", config.engine_config().trigger_interval, move || {
            let inbox = inbox.clone();
            let coordinator = coordinator.clone();
            async move { drain_inbox(&inbox, &coordinator).await }
        });
    }

    if config.engine.summary_interval_secs > 0 {
        let coordinator = coordinator.clone();
        handles.spawn_periodic(
            "summary",
            Duration::from_secs(config.engine.summary_interval_secs),
            move || {
                let coordinator = coordinator.clone();
                async move {
                    let summary = coordinator.performance().await;
                    let open = coordinator.active_trades().await.len();
                    info!(
                        open,
                        at = %Utc::now().format("%H:%M:%S"),
                        "{}",
                        summary.summary_string()
                    );
                }
            },
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("🛑 Shutdown requested");
    handles.shutdown().await;

    info!("{}", coordinator.performance().await.summary_string());
    Ok(())
}

async fn drain_inbox(inbox: &SignalInbox, coordinator: &LifecycleCoordinator) {
    let batches = match inbox.read_batches() {
        Ok(batches) => batches,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "[INBOX] Failed to scan inbox");
            return;
        }
    };

    for batch in batches {
        match coordinator.ingest_signals(batch.signals.clone()).await {
            Ok(_) => {
                if let Err(e) = batch.acknowledge() {
                    warn!(error = %format!("{:#}", e), "[INBOX] Failed to remove ingested file");
                }
            }
            // The file stays in place and is retried next scan.
            Err(e) => error!(file = %batch.path.display(), error = %e, "[INBOX] Ingestion failed"),
        }
    }
}

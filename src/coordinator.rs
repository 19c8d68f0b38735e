//! Lifecycle Coordinator
//!
//! Owns the three persisted collections and both engines, bootstraps them
//! from the store, runs the periodic tick loops and exposes ingestion, admin
//! resets and read-only views.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::engine::{
    spawn_fill, EngineConfig, MonitorReport, PositionMonitor, TriggerEngine, TriggerReport,
};
use crate::error::EngineError;
use crate::market_data::MarketDataGateway;
use crate::notifications::NotificationSink;
use crate::performance::PerformanceSummary;
use crate::persistence::{Collection, Slot, StateStore};
use crate::types::{ActiveTrade, CompletedTrade, OrderStatus, PendingSignal};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub accepted: usize,
    /// Ids already pending, active, in the ledger or repeated in the batch
    pub duplicates: usize,
    /// Signals with a non-finite target or stop, which the store cannot hold
    pub rejected: usize,
}

pub struct LifecycleCoordinator {
    config: EngineConfig,
    pending: Arc<Collection<PendingSignal>>,
    active: Arc<Collection<ActiveTrade>>,
    ledger: Arc<Collection<CompletedTrade>>,
    trigger: TriggerEngine,
    monitor: PositionMonitor,
}

impl LifecycleCoordinator {
    /// Load all collections from `store` and wire both engines to the shared
    /// gateway and sink
    pub fn bootstrap(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn MarketDataGateway>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let pending = Arc::new(Collection::load(Slot::PendingSignals, store.clone())?);
        let active = Arc::new(Collection::load(Slot::ActiveTrades, store.clone())?);
        let ledger = Arc::new(Collection::load(Slot::CompletedTrades, store)?);

        let trigger = TriggerEngine::new(
            config.clone(),
            pending.clone(),
            active.clone(),
            gateway.clone(),
            sink,
        );
        let monitor = PositionMonitor::new(config.clone(), active.clone(), ledger.clone(), gateway);

        Ok(Self {
            config,
            pending,
            active,
            ledger,
            trigger,
            monitor,
        })
    }

    // ─────────────────────────────────────────────────────────────────
    // Signals and ticks
    // ─────────────────────────────────────────────────────────────────

    /// Queue new signals, skipping ids the lifecycle has already seen
    pub async fn ingest_signals(
        &self,
        signals: Vec<PendingSignal>,
    ) -> Result<IngestReport, EngineError> {
        let mut seen: HashSet<String> =
            self.active.snapshot().await.into_iter().map(|t| t.id).collect();
        seen.extend(self.ledger.snapshot().await.into_iter().map(|t| t.id));

        let mut pending = self.pending.lock().await;
        seen.extend(pending.items().iter().map(PendingSignal::id));

        let mut report = IngestReport::default();
        let mut next = pending.items().to_vec();
        for signal in signals {
            let id = signal.id();
            if !signal.target.is_finite() || !signal.stop.is_finite() {
                warn!(
                    signal = %id,
                    target = signal.target,
                    stop = signal.stop,
                    "[INGEST] Signal rejected: target or stop is not finite"
                );
                report.rejected += 1;
                continue;
            }
            if seen.insert(id.clone()) {
                next.push(signal);
                report.accepted += 1;
            } else {
                debug!(signal = %id, "[INGEST] Duplicate signal ignored");
                report.duplicates += 1;
            }
        }

        if report.accepted > 0 {
            pending.commit(next)?;
            info!(
                accepted = report.accepted,
                duplicates = report.duplicates,
                rejected = report.rejected,
                "📥 [INGEST] Signals queued"
            );
        }
        Ok(report)
    }

    /// One trigger cycle; schedules the fill of every trade it opens
    pub async fn trigger_tick(&self, now: DateTime<Utc>) -> Result<TriggerReport, EngineError> {
        let report = self.trigger.tick(now).await?;
        for opened in &report.opened {
            spawn_fill(self.active.clone(), opened.id.clone(), opened.fill_due_at);
        }
        Ok(report)
    }

    pub async fn monitor_tick(&self, now: DateTime<Utc>) -> Result<MonitorReport, EngineError> {
        self.monitor.tick(now).await
    }

    // ─────────────────────────────────────────────────────────────────
    // Background loops
    // ─────────────────────────────────────────────────────────────────

    /// Reschedule outstanding fills and spawn both tick loops
    pub async fn start(self: Arc<Self>) -> EngineHandles {
        let outstanding: Vec<ActiveTrade> = self
            .active
            .snapshot()
            .await
            .into_iter()
            .filter(|t| t.order_status == OrderStatus::PendingFill)
            .collect();
        if !outstanding.is_empty() {
            info!(count = outstanding.len(), "[FILL] Rescheduling fills after restart");
        }
        for trade in outstanding {
            spawn_fill(self.active.clone(), trade.id, trade.fill_due_at);
        }

        let mut handles = EngineHandles::new();

        let coordinator = self.clone();
        handles.spawn_periodic("trigger", self.config.trigger_interval, move || {
            let coordinator = coordinator.clone();
            async move {
                if let Err(e) = coordinator.trigger_tick(Utc::now()).await {
                    log_tick_error("trigger", &e);
                }
            }
        });

        let coordinator = self.clone();
        handles.spawn_periodic("monitor", self.config.monitor_interval, move || {
            let coordinator = coordinator.clone();
            async move {
                if let Err(e) = coordinator.monitor_tick(Utc::now()).await {
                    log_tick_error("monitor", &e);
                }
            }
        });

        info!(
            trigger_secs = self.config.trigger_interval.as_secs(),
            monitor_secs = self.config.monitor_interval.as_secs(),
            "▶️ [ENGINE] Tick loops started"
        );
        handles
    }

    // ─────────────────────────────────────────────────────────────────
    // Admin
    // ─────────────────────────────────────────────────────────────────

    /// Clear active trades and pending signals
    pub async fn reset_active(&self) -> Result<(), EngineError> {
        let mut pending = self.pending.lock().await;
        let mut active = self.active.lock().await;
        let dropped = (pending.items().len(), active.items().len());
        active.commit(Vec::new())?;
        pending.commit(Vec::new())?;
        warn!(
            pending = dropped.0,
            active = dropped.1,
            "🧹 [ADMIN] Active trades and pending signals cleared"
        );
        Ok(())
    }

    /// Clear the completed-trade ledger
    pub async fn reset_ledger(&self) -> Result<(), EngineError> {
        let mut ledger = self.ledger.lock().await;
        let dropped = ledger.items().len();
        ledger.commit(Vec::new())?;
        warn!(trades = dropped, "🧹 [ADMIN] Ledger cleared");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Views
    // ─────────────────────────────────────────────────────────────────

    pub async fn pending_signals(&self) -> Vec<PendingSignal> {
        self.pending.snapshot().await
    }

    pub async fn active_trades(&self) -> Vec<ActiveTrade> {
        self.active.snapshot().await
    }

    pub async fn completed_trades(&self) -> Vec<CompletedTrade> {
        self.ledger.snapshot().await
    }

    pub async fn performance(&self) -> PerformanceSummary {
        PerformanceSummary::from_ledger(&self.ledger.snapshot().await)
    }
}

fn log_tick_error(engine: &'static str, e: &EngineError) {
    match e {
        EngineError::Persistence { .. } => {
            error!(engine, error = %e, "[ENGINE] Tick failed to persist, retrying next tick")
        }
        _ => warn!(engine, error = %e, "[ENGINE] Tick skipped"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Running background loops and the switch that stops them
pub struct EngineHandles {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl EngineHandles {
    fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Run `tick` every `period` until shutdown. Missed ticks are delayed,
    /// panics are logged and the loop keeps going; an in-flight tick always
    /// completes before the loop observes shutdown.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(panic) = AssertUnwindSafe(tick()).catch_unwind().await {
                            error!(
                                task = name,
                                panic = %panic_message(&*panic),
                                "[ENGINE] Tick panicked, loop continues"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "[ENGINE] Loop stopped");
        });
        self.tasks.push((name, handle));
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Signal every loop and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(task = name, error = %e, "[ENGINE] Task ended abnormally");
            }
        }
        info!("⏹️ [ENGINE] All loops stopped");
    }
}

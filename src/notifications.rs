//! Notification Sink
//!
//! Engines emit fire-and-forget events; nothing waits on delivery and a sink
//! failure never reaches the tick that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::persistence::{load_slot, Slot, StateStore};

/// Newest entries kept by the notification log
pub const NOTIFICATION_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// One batched event per trigger tick that opened positions
    PositionsOpened { count: usize },
    /// A pending signal is within the proximity band of its trigger line
    SignalNearEntry {
        asset: String,
        signal_id: String,
        price: f64,
        trigger_price: f64,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::PositionsOpened { .. } => "positions_opened",
            EngineEvent::SignalNearEntry { .. } => "signal_near_entry",
        }
    }

    pub fn asset(&self) -> Option<&str> {
        match self {
            EngineEvent::PositionsOpened { .. } => None,
            EngineEvent::SignalNearEntry { asset, .. } => Some(asset),
        }
    }

    pub fn message(&self) -> String {
        match self {
            EngineEvent::PositionsOpened { count } => {
                format!("{} new paper position(s) opened", count)
            }
            EngineEvent::SignalNearEntry {
                asset,
                price,
                trigger_price,
                ..
            } => format!(
                "{} at {:.6} is approaching its entry at {:.6}",
                asset, price, trigger_price
            ),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&self, event: EngineEvent) {
        info!(event = event.event_type(), "🔔 {}", event.message());
    }
}

/// Fans events out to in-process subscribers (UI bridges, tests)
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}

/// Forwards every event to each inner sink
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn emit(&self, event: EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Persisted notification log
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub event_type: String,
    pub message: String,
    #[serde(default)]
    pub asset: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// Keeps the newest notifications in the `notifications` slot
pub struct NotificationLog {
    store: Arc<dyn StateStore>,
    entries: Mutex<Vec<Notification>>,
    capacity: usize,
}

impl NotificationLog {
    pub fn load(store: Arc<dyn StateStore>, capacity: usize) -> anyhow::Result<Self> {
        let mut entries: Vec<Notification> = load_slot(store.as_ref(), Slot::Notifications)?;
        entries.truncate(capacity);
        Ok(Self {
            store,
            entries: Mutex::new(entries),
            capacity,
        })
    }

    /// Newest first
    pub fn entries(&self) -> Vec<Notification> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn unread_count(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.iter().filter(|n| !n.read).count())
            .unwrap_or(0)
    }

    pub fn mark_all_read(&self) {
        self.update(|entries| entries.iter_mut().for_each(|n| n.read = true));
    }

    pub fn clear(&self) {
        self.update(|entries| entries.clear());
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Notification>)) {
        let Ok(mut entries) = self.entries.lock() else {
            warn!("Notification log lock poisoned");
            return;
        };
        f(&mut entries);
        let persisted = serde_json::to_string_pretty(&*entries)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.store.save(Slot::Notifications, &json));
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist notification log");
        }
    }
}

impl NotificationSink for NotificationLog {
    fn emit(&self, event: EngineEvent) {
        let notification = Notification {
            id: format!("{}_{}", event.event_type(), uuid::Uuid::new_v4().simple()),
            event_type: event.event_type().to_string(),
            message: event.message(),
            asset: event.asset().map(str::to_string),
            timestamp: Utc::now(),
            read: false,
        };
        info!(event = %notification.event_type, "🔔 {}", notification.message);

        let capacity = self.capacity;
        self.update(|entries| {
            entries.insert(0, notification);
            entries.truncate(capacity);
        });
    }
}

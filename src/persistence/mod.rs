//! Persistence Module
//!
//! Four independent keyed slots (pending signals, active trades, completed
//! ledger, notification log), each holding a JSON array that is read whole at
//! startup and written whole after every committing tick.

mod collection;

pub use collection::{Collection, CollectionGuard};

use anyhow::{Context, Result};
use chrono::Utc;
use csv::WriterBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::types::CompletedTrade;

/// Keyed state slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    PendingSignals,
    ActiveTrades,
    CompletedTrades,
    Notifications,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::PendingSignals,
        Slot::ActiveTrades,
        Slot::CompletedTrades,
        Slot::Notifications,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Slot::PendingSignals => "pending_signals",
            Slot::ActiveTrades => "active_trades",
            Slot::CompletedTrades => "completed_trades",
            Slot::Notifications => "notifications",
        }
    }

    fn file_name(&self) -> String {
        format!("{}.json", self.key())
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Durable key-value surface the engines commit to
pub trait StateStore: Send + Sync {
    /// Raw JSON of a slot, `None` if it was never written
    fn load(&self, slot: Slot) -> Result<Option<String>>;

    /// Replace a slot's contents
    fn save(&self, slot: Slot, json: &str) -> Result<()>;

    /// Move an unreadable slot out of the way so the next save does not
    /// destroy it
    fn quarantine(&self, _slot: Slot) -> Result<()> {
        Ok(())
    }
}

/// Read a slot as a sequence. A missing slot is empty; an unparseable one is
/// quarantined and treated as empty.
pub fn load_slot<T: DeserializeOwned>(store: &dyn StateStore, slot: Slot) -> Result<Vec<T>> {
    let Some(raw) = store.load(slot)? else {
        return Ok(Vec::new());
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(items) => Ok(items),
        Err(e) => {
            warn!(slot = %slot, error = %e, "[STORE] Unreadable slot, starting empty");
            store
                .quarantine(slot)
                .with_context(|| format!("Failed to quarantine {}", slot))?;
            Ok(Vec::new())
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// JSON file store
// ─────────────────────────────────────────────────────────────────

/// One `<slot>.json` file per slot under `data_dir`
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn slot_path(&self, slot: Slot) -> PathBuf {
        self.data_dir.join(slot.file_name())
    }

    /// Copy the given slots into a timestamped directory under `_backups/`.
    pub fn backup_slots(&self, slots: &[Slot]) -> Result<PathBuf> {
        let backup_dir = self.data_dir.join("_backups").join(format!(
            "reset_{}",
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        ));
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("Failed creating backup dir {}", backup_dir.display()))?;

        let mut copied = 0usize;
        for slot in slots {
            let src = self.slot_path(*slot);
            if src.exists() {
                let dst = backup_dir.join(slot.file_name());
                fs::copy(&src, &dst).with_context(|| {
                    format!("Failed copying {} to {}", src.display(), dst.display())
                })?;
                copied += 1;
            }
        }

        info!(backup_dir = %backup_dir.display(), copied, "💾 [STORE] Slots backed up");
        Ok(backup_dir)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, slot: Slot) -> Result<Option<String>> {
        let path = self.slot_path(slot);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(raw))
    }

    fn save(&self, slot: Slot, json: &str) -> Result<()> {
        let path = self.slot_path(slot);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    fn quarantine(&self, slot: Slot) -> Result<()> {
        let path = self.slot_path(slot);
        if !path.exists() {
            return Ok(());
        }
        let aside = self.data_dir.join(format!(
            "{}.corrupt-{}.json",
            slot.key(),
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        fs::rename(&path, &aside)
            .with_context(|| format!("Failed moving {} aside", path.display()))?;
        warn!(slot = %slot, moved_to = %aside.display(), "[STORE] Corrupt slot quarantined");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────

/// Volatile store for embedding and tests. Writes can be made to fail on
/// demand to exercise the persistence-failure path.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<Slot, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(self, slot: Slot, json: impl Into<String>) -> Self {
        if let Ok(mut slots) = self.slots.write() {
            slots.insert(slot, json.into());
        }
        self
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self, slot: Slot) -> Option<String> {
        self.slots.read().ok()?.get(&slot).cloned()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, slot: Slot) -> Result<Option<String>> {
        let slots = self
            .slots
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(slots.get(&slot).cloned())
    }

    fn save(&self, slot: Slot, json: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated write failure for {}", slot);
        }
        let mut slots = self
            .slots
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        slots.insert(slot, json.to_string());
        Ok(())
    }

    fn quarantine(&self, slot: Slot) -> Result<()> {
        if let Ok(mut slots) = self.slots.write() {
            if let Some(raw) = slots.remove(&slot) {
                slots.insert(slot, String::new());
                warn!(slot = %slot, bytes = raw.len(), "[STORE] Corrupt slot dropped");
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Ledger export
// ─────────────────────────────────────────────────────────────────

/// Flat CSV row for a completed trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCsvRow {
    pub id: String,
    pub asset: String,
    pub direction: String,
    pub entry_time: String,
    pub exit_time: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub target: f64,
    pub stop: f64,
    pub outcome: String,
    pub closing_reason: String,
    pub net_pnl_usd: f64,
    pub net_pnl_percent: f64,
    pub fees_usd: f64,
    pub trigger_price: f64,
    pub price_source: String,
}

impl From<&CompletedTrade> for LedgerCsvRow {
    fn from(trade: &CompletedTrade) -> Self {
        Self {
            id: trade.id.clone(),
            asset: trade.asset.clone(),
            direction: trade.direction.to_string(),
            entry_time: trade.entry_time.to_rfc3339(),
            exit_time: trade.exit_time.to_rfc3339(),
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            target: trade.target,
            stop: trade.stop,
            outcome: trade.outcome.to_string(),
            closing_reason: trade.closing_reason.to_string(),
            net_pnl_usd: trade.net_pnl_usd,
            net_pnl_percent: trade.net_pnl_percent,
            fees_usd: trade.fees_usd,
            trigger_price: trade.market_snapshot.trigger_price,
            price_source: trade.market_snapshot.price_source.clone(),
        }
    }
}

/// Export the ledger for analysis. Returns the number of rows written.
pub fn export_ledger_csv(trades: &[CompletedTrade], output_path: &Path) -> Result<usize> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output_path)
        .context("Failed to create export file")?;

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for trade in trades {
        writer
            .serialize(LedgerCsvRow::from(trade))
            .context("Failed to write ledger row")?;
    }
    writer.flush().context("Failed to flush ledger export")?;

    info!(rows = trades.len(), path = %output_path.display(), "Exported ledger");
    Ok(trades.len())
}

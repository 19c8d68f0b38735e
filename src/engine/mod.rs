//! Trading engines
//!
//! Two periodic engines share the persisted collections:
//! - `TriggerEngine` promotes pending signals to active trades
//! - `PositionMonitor` marks active trades and closes them into the ledger
//!
//! Each tick reads a snapshot, awaits the gateway without holding a lock,
//! then locks, recomputes against the current contents and commits.

pub mod fill;
pub mod monitor;
pub mod trigger;

pub use fill::{complete_fill, fill_latency, spawn_fill};
pub use monitor::{closing_reason, MonitorReport, PositionMonitor};
pub use trigger::{OpenedTrade, TriggerEngine, TriggerReport};

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

use crate::realism::RealismParams;

/// Runtime parameters shared by both engines
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub trigger_interval: Duration,
    pub monitor_interval: Duration,
    pub fill_latency_min: Duration,
    pub fill_latency_max: Duration,
    /// Distance from the trigger line (percent) that counts as "near entry"
    pub proximity_pct: f64,
    /// Minimum gap between near-entry alerts for the same asset
    pub proximity_cooldown: Duration,
    pub realism: RealismParams,
    /// Fixed seed for slippage and latency draws (tests, replays)
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger_interval: Duration::from_secs(20),
            monitor_interval: Duration::from_secs(5),
            fill_latency_min: Duration::from_millis(1500),
            fill_latency_max: Duration::from_millis(2500),
            proximity_pct: 2.0,
            proximity_cooldown: Duration::from_secs(3600),
            realism: RealismParams::default(),
            rng_seed: None,
        }
    }
}

/// Seeded when a seed is configured, from entropy otherwise.
/// `stream` keeps the engines' sequences apart under a shared seed.
pub(crate) fn engine_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_entropy(),
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

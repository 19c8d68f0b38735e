//! PaperDesk Library
//!
//! Paper-trading engine: turns externally supplied trade signals into
//! simulated positions, tracks them against live prices and records the
//! outcomes in a persisted ledger.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod inbox;
pub mod market_data;
pub mod notifications;
pub mod performance;
pub mod persistence;
pub mod realism;
pub mod types;

pub use coordinator::{EngineHandles, IngestReport, LifecycleCoordinator};
pub use error::EngineError;

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

//! Configuration management for PaperDesk
//!
//! Layered: built-in defaults, then `config/default.*` and `config/local.*`
//! (any format the `config` crate understands), then `PAPERDESK__*`
//! environment variables. A `.env` file is loaded first via dotenvy.

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::realism::RealismParams;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub realism: RealismSection,
    pub market_data: MarketDataConfig,
    pub persistence: PersistenceConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// Trigger engine period in seconds
    pub trigger_interval_secs: u64,
    /// Position monitor period in seconds
    pub monitor_interval_secs: u64,
    pub fill_latency_min_ms: u64,
    pub fill_latency_max_ms: u64,
    /// Near-entry band around the trigger line, in percent
    pub proximity_pct: f64,
    pub proximity_cooldown_secs: u64,
    /// Ledger summary log period in seconds (0 disables)
    pub summary_interval_secs: u64,
    /// Seed slippage/latency draws for reproducible runs
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealismSection {
    pub fee_rate_pct: f64,
    pub max_slippage_pct: f64,
    pub base_notional_usd: f64,
    pub outcome_dead_zone_usd: f64,
    pub breakeven_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    /// Base URL of the price service
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the slot files and the signal inbox
    pub data_dir: String,
    /// Poll `<data_dir>/inbox/` for signal files
    pub inbox_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Newest entries kept in the persisted log
    pub log_capacity: usize,
    /// Buffer of the in-process event channel
    pub broadcast_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Engine defaults
            .set_default("engine.trigger_interval_secs", 20)?
            .set_default("engine.monitor_interval_secs", 5)?
            .set_default("engine.fill_latency_min_ms", 1500)?
            .set_default("engine.fill_latency_max_ms", 2500)?
            .set_default("engine.proximity_pct", 2.0)?
            .set_default("engine.proximity_cooldown_secs", 3600)?
            .set_default("engine.summary_interval_secs", 300)?
            // Realism defaults
            .set_default("realism.fee_rate_pct", 0.1)?
            .set_default("realism.max_slippage_pct", 0.05)?
            .set_default("realism.base_notional_usd", 100.0)?
            .set_default("realism.outcome_dead_zone_usd", 0.05)?
            .set_default("realism.breakeven_threshold", 0.5)?
            // Market data defaults
            .set_default("market_data.base_url", "http://localhost:3001")?
            .set_default("market_data.timeout_ms", 10_000)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.inbox_enabled", true)?
            // Notification defaults
            .set_default("notifications.log_capacity", 50)?
            .set_default("notifications.broadcast_capacity", 256)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PAPERDESK__*)
            .add_source(Environment::with_prefix("PAPERDESK").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Reject values the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.trigger_interval_secs == 0 || self.engine.monitor_interval_secs == 0 {
            bail!("engine tick intervals must be at least one second");
        }
        if self.engine.fill_latency_min_ms > self.engine.fill_latency_max_ms {
            bail!(
                "engine.fill_latency_min_ms ({}) exceeds engine.fill_latency_max_ms ({})",
                self.engine.fill_latency_min_ms,
                self.engine.fill_latency_max_ms
            );
        }
        if !(0.0..=1.0).contains(&self.realism.breakeven_threshold) {
            bail!("realism.breakeven_threshold must be within [0, 1]");
        }
        if self.realism.base_notional_usd <= 0.0 {
            bail!("realism.base_notional_usd must be positive");
        }
        if self.realism.fee_rate_pct < 0.0 || self.realism.max_slippage_pct < 0.0 {
            bail!("realism fee and slippage rates cannot be negative");
        }
        if self.market_data.base_url.trim().is_empty() {
            bail!("market_data.base_url is required");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            trigger_interval: Duration::from_secs(self.engine.trigger_interval_secs),
            monitor_interval: Duration::from_secs(self.engine.monitor_interval_secs),
            fill_latency_min: Duration::from_millis(self.engine.fill_latency_min_ms),
            fill_latency_max: Duration::from_millis(self.engine.fill_latency_max_ms),
            proximity_pct: self.engine.proximity_pct,
            proximity_cooldown: Duration::from_secs(self.engine.proximity_cooldown_secs),
            realism: self.realism_params(),
            rng_seed: self.engine.rng_seed,
        }
    }

    pub fn realism_params(&self) -> RealismParams {
        RealismParams {
            fee_rate_pct: self.realism.fee_rate_pct,
            max_slippage_pct: self.realism.max_slippage_pct,
            base_notional_usd: self.realism.base_notional_usd,
            outcome_dead_zone_usd: self.realism.outcome_dead_zone_usd,
            breakeven_threshold: self.realism.breakeven_threshold,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.persistence.data_dir)
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir().join("inbox")
    }

    pub fn market_data_timeout(&self) -> Duration {
        Duration::from_millis(self.market_data.timeout_ms)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "prices={} data_dir={} trigger={}s monitor={}s fee={}% slip<={}% seed={:?}",
            self.market_data.base_url,
            self.persistence.data_dir,
            self.engine.trigger_interval_secs,
            self.engine.monitor_interval_secs,
            self.realism.fee_rate_pct,
            self.realism.max_slippage_pct,
            self.engine.rng_seed
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_and_convert() {
        let config = AppConfig::load().unwrap();
        let engine = config.engine_config();
        assert!(engine.fill_latency_min <= engine.fill_latency_max);
        assert!(config.inbox_dir().ends_with("inbox"));
        assert!(config.digest().contains("trigger="));
    }

    #[test]
    fn inverted_latency_bounds_are_rejected() {
        let mut config = AppConfig::load().unwrap();
        config.engine.fill_latency_min_ms = 3000;
        config.engine.fill_latency_max_ms = 1000;
        assert!(config.validate().is_err());
    }
}

//! Configuration types and re-exports

pub use super::{
    AppConfig, EngineSection, LoggingConfig, MarketDataConfig, NotificationsConfig,
    PersistenceConfig, RealismSection,
};

//! Engine error taxonomy.
//!
//! Every tick returns `Result<_, EngineError>`; the coordinator's loops log
//! the error and wait for the next scheduled tick.

use thiserror::Error;

use crate::persistence::Slot;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Market data gateway unreachable or returned garbage. The tick is
    /// skipped without touching state.
    #[error("market data unavailable: {0:#}")]
    MarketData(anyhow::Error),

    /// A signal could not be evaluated this tick. It stays pending.
    #[error("malformed signal {id}: {reason}")]
    MalformedSignal { id: String, reason: String },

    /// An active trade carries values the monitor cannot price.
    #[error("invalid trade {id}: {reason}")]
    InvalidTrade { id: String, reason: String },

    /// Writing a slot failed. In-memory state of that collection is unchanged.
    #[error("failed to persist {slot}: {source:#}")]
    Persistence {
        slot: Slot,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn malformed_signal(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedSignal {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_trade(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::InvalidTrade {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures that are expected to clear on their own
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::MarketData(_))
    }
}

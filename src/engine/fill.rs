//! Simulated fill latency
//!
//! A new trade starts as `PendingFill` and flips to `Filled` once its latency
//! elapses. The due time lives on the trade itself so a restart (or a failed
//! commit) is picked up again by the coordinator or the monitor.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::persistence::Collection;
use crate::types::{ActiveTrade, OrderStatus};

/// Uniform draw in `[min, max]` at millisecond resolution
pub fn fill_latency<R: Rng + ?Sized>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rng.gen_range(lo..=hi))
}

/// Flip a still-pending trade to `Filled`.
///
/// Returns `false` when the trade is gone (closed or reset) or already filled.
pub async fn complete_fill(
    active: &Collection<ActiveTrade>,
    trade_id: &str,
) -> Result<bool, EngineError> {
    let mut guard = active.lock().await;
    let Some(index) = guard
        .items()
        .iter()
        .position(|t| t.id == trade_id && t.order_status == OrderStatus::PendingFill)
    else {
        return Ok(false);
    };

    let mut next = guard.items().to_vec();
    next[index].order_status = OrderStatus::Filled;
    guard.commit(next)?;
    Ok(true)
}

/// One-shot task sleeping until `fill_due_at`
pub fn spawn_fill(
    active: Arc<Collection<ActiveTrade>>,
    trade_id: String,
    fill_due_at: DateTime<Utc>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let wait = (fill_due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        match complete_fill(&active, &trade_id).await {
            Ok(true) => info!(trade = %trade_id, "✅ [FILL] Order filled"),
            Ok(false) => {
                debug!(trade = %trade_id, "[FILL] Trade no longer pending, nothing to fill")
            }
            Err(e) => warn!(
                trade = %trade_id,
                error = %e,
                "[FILL] Failed to persist fill, monitor will retry"
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, Slot};
    use crate::types::{Direction, MarketSnapshot, TechnicalContext};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pending_trade(id: &str) -> ActiveTrade {
        let now = Utc::now();
        ActiveTrade {
            id: id.to_string(),
            asset: "BTC".to_string(),
            direction: Direction::Buy,
            entry_low: 99.0,
            entry_high: 100.0,
            fill_price: 100.0,
            current_price: 100.0,
            live_pnl_usd: 0.0,
            live_pnl_percent: 0.0,
            order_status: OrderStatus::PendingFill,
            fill_due_at: now,
            target: 110.0,
            stop: 95.0,
            original_stop: 95.0,
            stop_adjusted: false,
            entry_time: now,
            opened_at: now,
            exit_time: now + chrono::Duration::hours(1),
            market_snapshot: MarketSnapshot {
                trigger_price: 100.0,
                price_source: "test".to_string(),
                captured_at: now,
            },
            technical_context: TechnicalContext::new(),
        }
    }

    #[test]
    fn latency_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let (min, max) = (Duration::from_millis(1500), Duration::from_millis(2500));
        for _ in 0..200 {
            let latency = fill_latency(&mut rng, min, max);
            assert!(latency >= min && latency <= max);
        }
        assert_eq!(fill_latency(&mut rng, max, min), max);
    }

    #[tokio::test]
    async fn fill_flips_status_once() {
        let store = Arc::new(MemoryStore::new());
        let active = Collection::load(Slot::ActiveTrades, store.clone()).unwrap();
        active.lock().await.commit(vec![pending_trade("BTC-1")]).unwrap();

        assert!(complete_fill(&active, "BTC-1").await.unwrap());
        assert!(!complete_fill(&active, "BTC-1").await.unwrap());
        assert!(!complete_fill(&active, "missing").await.unwrap());
        assert_eq!(active.snapshot().await[0].order_status, OrderStatus::Filled);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_fill_waits_for_due_time() {
        let store = Arc::new(MemoryStore::new());
        let active = Arc::new(Collection::load(Slot::ActiveTrades, store).unwrap());
        active.lock().await.commit(vec![pending_trade("BTC-1")]).unwrap();

        let due = Utc::now() + chrono::Duration::seconds(2);
        spawn_fill(active.clone(), "BTC-1".to_string(), due).await.unwrap();

        assert_eq!(active.snapshot().await[0].order_status, OrderStatus::Filled);
    }
}

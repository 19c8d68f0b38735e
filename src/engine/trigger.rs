//! Trigger Engine
//!
//! Expires stale signals, prices the rest in one batched call and promotes
//! those whose entry condition holds into simulated active trades.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{engine_rng, fill_latency, to_chrono, EngineConfig};
use crate::error::EngineError;
use crate::market_data::{fetch_usable, MarketDataGateway, PriceQuote};
use crate::notifications::{EngineEvent, NotificationSink};
use crate::persistence::Collection;
use crate::realism::{slippage_price, FillLeg};
use crate::types::{
    ActiveTrade, Direction, EntryRange, MarketSnapshot, OrderStatus, PendingSignal,
};

/// A trade created by the last tick, with the instant its fill is due
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedTrade {
    pub id: String,
    pub fill_due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerReport {
    pub expired: usize,
    pub opened: Vec<OpenedTrade>,
    pub still_pending: usize,
    /// Signals that could not be evaluated and stay pending
    pub skipped: usize,
    pub near_entry: usize,
}

impl TriggerReport {
    pub fn changed(&self) -> bool {
        self.expired > 0 || !self.opened.is_empty()
    }
}

enum Evaluation {
    Triggered(Box<ActiveTrade>),
    Waiting,
}

pub struct TriggerEngine {
    config: EngineConfig,
    pending: Arc<Collection<PendingSignal>>,
    active: Arc<Collection<ActiveTrade>>,
    gateway: Arc<dyn MarketDataGateway>,
    sink: Arc<dyn NotificationSink>,
    rng: Mutex<StdRng>,
    /// Last near-entry alert per asset
    last_alert: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TriggerEngine {
    pub fn new(
        config: EngineConfig,
        pending: Arc<Collection<PendingSignal>>,
        active: Arc<Collection<ActiveTrade>>,
        gateway: Arc<dyn MarketDataGateway>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let rng = Mutex::new(engine_rng(config.rng_seed, 0));
        Self {
            config,
            pending,
            active,
            gateway,
            sink,
            rng,
            last_alert: Mutex::new(HashMap::new()),
        }
    }

    /// Run one trigger cycle at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TriggerReport, EngineError> {
        let snapshot = self.pending.snapshot().await;
        if snapshot.is_empty() {
            return Ok(TriggerReport::default());
        }

        let assets: BTreeSet<String> = snapshot
            .iter()
            .filter(|s| !is_expired(s, now))
            .map(|s| s.asset.clone())
            .collect();

        // Gateway failure aborts before anything is touched, expiry included.
        let quotes = if assets.is_empty() {
            HashMap::new()
        } else {
            fetch_usable(self.gateway.as_ref(), &assets)
                .await
                .map_err(EngineError::MarketData)?
        };

        let mut pending = self.pending.lock().await;
        let (still_pending, candidates, mut report) =
            self.evaluate_all(pending.items(), &quotes, now);

        if !report.changed() && candidates.is_empty() {
            report.still_pending = still_pending.len();
            return Ok(report);
        }

        if !candidates.is_empty() {
            let mut active = self.active.lock().await;
            let mut known: HashSet<String> = active.items().iter().map(|t| t.id.clone()).collect();
            let mut next = active.items().to_vec();
            for trade in candidates {
                if !known.insert(trade.id.clone()) {
                    debug!(trade = %trade.id, "[TRIGGER] Trade already active, dropping duplicate");
                    continue;
                }
                report.opened.push(OpenedTrade {
                    id: trade.id.clone(),
                    fill_due_at: trade.fill_due_at,
                });
                next.push(trade);
            }

            if !report.opened.is_empty() {
                active.commit(next)?;
                info!(count = report.opened.len(), "🚀 [TRIGGER] Opened paper positions");
                self.sink.emit(EngineEvent::PositionsOpened {
                    count: report.opened.len(),
                });
            }
        }

        report.still_pending = still_pending.len();
        pending.commit(still_pending)?;

        if report.expired > 0 {
            info!(expired = report.expired, "⌛ [TRIGGER] Expired pending signals");
        }
        Ok(report)
    }

    /// Synchronous part of the tick. Holds the RNG and alert locks, never
    /// across an await.
    fn evaluate_all(
        &self,
        signals: &[PendingSignal],
        quotes: &HashMap<String, PriceQuote>,
        now: DateTime<Utc>,
    ) -> (Vec<PendingSignal>, Vec<ActiveTrade>, TriggerReport) {
        let mut report = TriggerReport::default();
        let mut still_pending = Vec::with_capacity(signals.len());
        let mut triggered = Vec::new();

        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for signal in signals {
            match signal.parsed_exit_time() {
                Some(exit_time) if exit_time <= now => {
                    report.expired += 1;
                    continue;
                }
                Some(_) => {}
                None => {
                    warn!(
                        signal = %signal.id(),
                        exit_time = %signal.exit_time,
                        "[TRIGGER] Unparseable exit timestamp, signal kept but never triggered"
                    );
                    report.skipped += 1;
                    still_pending.push(signal.clone());
                    continue;
                }
            }

            let Some(quote) = quotes.get(&signal.asset) else {
                debug!(asset = %signal.asset, "[TRIGGER] No price available");
                still_pending.push(signal.clone());
                continue;
            };

            match self.evaluate(signal, quote, now, &mut rng) {
                Ok(Evaluation::Triggered(trade)) => triggered.push(*trade),
                Ok(Evaluation::Waiting) => {
                    if self.maybe_alert_near_entry(signal, quote.price, now) {
                        report.near_entry += 1;
                    }
                    still_pending.push(signal.clone());
                }
                Err(e) => {
                    warn!(error = %e, "[TRIGGER] Signal skipped this tick");
                    report.skipped += 1;
                    still_pending.push(signal.clone());
                }
            }
        }

        (still_pending, triggered, report)
    }

    fn evaluate(
        &self,
        signal: &PendingSignal,
        quote: &PriceQuote,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> Result<Evaluation, EngineError> {
        let id = signal.id();
        let malformed = |what: &str, raw: &str| {
            EngineError::malformed_signal(&id, format!("unparseable {} {:?}", what, raw))
        };
        let range = signal
            .parsed_range()
            .ok_or_else(|| malformed("entry range", &signal.entry_range))?;
        let entry_time = signal
            .parsed_entry_time()
            .ok_or_else(|| malformed("entry time", &signal.entry_time))?;
        let exit_time = signal
            .parsed_exit_time()
            .ok_or_else(|| malformed("exit time", &signal.exit_time))?;
        if !signal.target.is_finite() || !signal.stop.is_finite() {
            return Err(EngineError::malformed_signal(&id, "target or stop is not finite"));
        }

        if !range.is_triggered(signal.direction, quote.price) {
            return Ok(Evaluation::Waiting);
        }

        let fill_price = slippage_price(
            &mut *rng,
            quote.price,
            signal.direction,
            FillLeg::Entry,
            self.config.realism.max_slippage_pct,
        );
        if !fill_price.is_finite() || fill_price <= 0.0 {
            return Err(EngineError::malformed_signal(
                &id,
                format!("slipped fill price {} is not usable", fill_price),
            ));
        }
        let latency = fill_latency(
            &mut *rng,
            self.config.fill_latency_min,
            self.config.fill_latency_max,
        );

        info!(
            signal = %id,
            direction = %signal.direction,
            price = quote.price,
            fill_price = fill_price,
            source = %quote.source,
            "🎯 [TRIGGER] Entry condition met"
        );

        Ok(Evaluation::Triggered(Box::new(ActiveTrade {
            id,
            asset: signal.asset.clone(),
            direction: signal.direction,
            entry_low: range.low,
            entry_high: range.high,
            fill_price,
            current_price: quote.price,
            live_pnl_usd: 0.0,
            live_pnl_percent: 0.0,
            order_status: OrderStatus::PendingFill,
            fill_due_at: now + to_chrono(latency),
            target: signal.target,
            stop: signal.stop,
            original_stop: signal.stop,
            stop_adjusted: false,
            entry_time,
            opened_at: now,
            exit_time,
            market_snapshot: MarketSnapshot {
                trigger_price: quote.price,
                price_source: quote.source.clone(),
                captured_at: now,
            },
            technical_context: signal.technical_context.clone(),
        })))
    }

    fn maybe_alert_near_entry(
        &self,
        signal: &PendingSignal,
        price: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(range) = signal.parsed_range() else {
            return false;
        };
        if !is_near_entry(signal.direction, &range, price, self.config.proximity_pct) {
            return false;
        }

        let mut last_alert = match self.last_alert.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cooldown = to_chrono(self.config.proximity_cooldown);
        if let Some(last) = last_alert.get(&signal.asset) {
            if now - *last < cooldown {
                return false;
            }
        }
        last_alert.insert(signal.asset.clone(), now);
        drop(last_alert);

        self.sink.emit(EngineEvent::SignalNearEntry {
            asset: signal.asset.clone(),
            signal_id: signal.id(),
            price,
            trigger_price: range.trigger_line(signal.direction),
        });
        true
    }
}

fn is_expired(signal: &PendingSignal, now: DateTime<Utc>) -> bool {
    signal.parsed_exit_time().is_some_and(|exit| exit <= now)
}

/// Price sits on the untriggered side, within `pct` percent of the trigger line
pub(crate) fn is_near_entry(
    direction: Direction,
    range: &EntryRange,
    price: f64,
    pct: f64,
) -> bool {
    let line = range.trigger_line(direction);
    let band = line * pct / 100.0;
    match direction {
        Direction::Buy => price > line && price <= line + band,
        Direction::Sell => price < line && price >= line - band,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::MockMarketDataGateway;
    use crate::notifications::BroadcastSink;
    use crate::persistence::{MemoryStore, Slot};
    use crate::types::TechnicalContext;

    fn signal(asset: &str, direction: Direction, range: &str, exit_time: &str) -> PendingSignal {
        PendingSignal {
            asset: asset.to_string(),
            direction,
            entry_range: range.to_string(),
            target: 111.0,
            stop: 95.0,
            entry_time: "2024-05-01T10:00:00Z".to_string(),
            exit_time: exit_time.to_string(),
            technical_context: TechnicalContext::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    fn gateway_with(prices: Vec<(&'static str, f64)>) -> MockMarketDataGateway {
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_fetch_prices().returning(move |_| {
            Ok(prices
                .iter()
                .map(|(asset, price)| (asset.to_string(), PriceQuote::new(*price, "mock")))
                .collect())
        });
        gateway
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        pending: Arc<Collection<PendingSignal>>,
        active: Arc<Collection<ActiveTrade>>,
        sink: BroadcastSink,
        engine: TriggerEngine,
    }

    async fn fixture(gateway: MockMarketDataGateway, signals: Vec<PendingSignal>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let pending = Arc::new(Collection::load(Slot::PendingSignals, store.clone()).unwrap());
        let active = Arc::new(Collection::load(Slot::ActiveTrades, store.clone()).unwrap());
        pending.lock().await.commit(signals).unwrap();
        let sink = BroadcastSink::new(16);
        let config = EngineConfig {
            rng_seed: Some(11),
            ..EngineConfig::default()
        };
        let engine = TriggerEngine::new(
            config,
            pending.clone(),
            active.clone(),
            Arc::new(gateway),
            Arc::new(sink.clone()),
        );
        Fixture {
            store,
            pending,
            active,
            sink,
            engine,
        }
    }

    #[tokio::test]
    async fn buy_triggers_at_or_below_range_high_only() {
        let f = fixture(
            gateway_with(vec![("BTC", 100.0), ("ETH", 103.0)]),
            vec![
                signal("BTC", Direction::Buy, "99-100", "2024-05-02T00:00:00Z"),
                signal("ETH", Direction::Buy, "99-100", "2024-05-02T00:00:00Z"),
            ],
        )
        .await;
        let mut rx = f.sink.subscribe();

        let report = f.engine.tick(now()).await.unwrap();
        assert_eq!(report.opened.len(), 1);
        assert_eq!(report.still_pending, 1);

        let active = f.active.snapshot().await;
        assert_eq!(active.len(), 1);
        let trade = &active[0];
        assert_eq!(trade.asset, "BTC");
        assert_eq!(trade.order_status, OrderStatus::PendingFill);
        assert!(trade.fill_price >= 100.0 && trade.fill_price <= 100.05 + 1e-9);
        assert_eq!(trade.market_snapshot.trigger_price, 100.0);
        assert_eq!(trade.live_pnl_usd, 0.0);
        assert!(!trade.stop_adjusted);
        let latency = trade.fill_due_at - now();
        assert!(latency >= chrono::Duration::milliseconds(1500));
        assert!(latency <= chrono::Duration::milliseconds(2500));

        assert_eq!(f.pending.snapshot().await[0].asset, "ETH");
        assert_eq!(rx.recv().await.unwrap(), EngineEvent::PositionsOpened { count: 1 });
    }

    #[tokio::test]
    async fn sell_triggers_at_or_above_range_low_with_downward_fill() {
        let f = fixture(
            gateway_with(vec![("SOL", 200.0)]),
            vec![signal("SOL", Direction::Sell, "200-205", "2024-05-02T00:00:00Z")],
        )
        .await;

        f.engine.tick(now()).await.unwrap();
        let trade = &f.active.snapshot().await[0];
        assert!(trade.fill_price <= 200.0 && trade.fill_price >= 199.9);
    }

    #[tokio::test]
    async fn overflowing_fill_price_keeps_signal_pending() {
        let f = fixture(
            gateway_with(vec![("BTC", f64::MAX)]),
            vec![signal(
                "BTC",
                Direction::Buy,
                "99-1.7976931348623157e308",
                "2024-05-02T00:00:00Z",
            )],
        )
        .await;

        let report = f.engine.tick(now()).await.unwrap();
        assert!(report.opened.is_empty());
        assert_eq!(report.skipped, 1);
        assert_eq!(f.pending.snapshot().await.len(), 1);
        assert!(f.active.is_empty().await);
    }

    #[tokio::test]
    async fn expired_signals_are_dropped_without_pricing() {
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_fetch_prices().never();
        let f = fixture(
            gateway,
            vec![signal("BTC", Direction::Buy, "99-100", "2024-05-01T11:59:59Z")],
        )
        .await;

        let report = f.engine.tick(now()).await.unwrap();
        assert_eq!(report.expired, 1);
        assert!(f.pending.is_empty().await);
        assert!(f.active.is_empty().await);
        assert_eq!(f.store.raw(Slot::PendingSignals).as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn gateway_failure_leaves_state_untouched() {
        let mut gateway = MockMarketDataGateway::new();
        gateway
            .expect_fetch_prices()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let f = fixture(
            gateway,
            vec![
                signal("BTC", Direction::Buy, "99-100", "2024-05-02T00:00:00Z"),
                signal("ETH", Direction::Buy, "99-100", "2024-05-01T11:00:00Z"),
            ],
        )
        .await;
        let before = f.store.raw(Slot::PendingSignals);

        let err = f.engine.tick(now()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(f.store.raw(Slot::PendingSignals), before);
        assert_eq!(f.pending.len().await, 2);
    }

    #[tokio::test]
    async fn malformed_signal_is_isolated() {
        let f = fixture(
            gateway_with(vec![("BTC", 100.0), ("ETH", 50.0)]),
            vec![
                signal("BTC", Direction::Buy, "abc", "2024-05-02T00:00:00Z"),
                signal("ETH", Direction::Buy, "49-51", "2024-05-02T00:00:00Z"),
                signal("SOL", Direction::Buy, "10", "someday"),
            ],
        )
        .await;

        let report = f.engine.tick(now()).await.unwrap();
        assert_eq!(report.opened.len(), 1);
        assert_eq!(report.skipped, 2);
        let pending: Vec<String> =
            f.pending.snapshot().await.iter().map(|s| s.asset.clone()).collect();
        assert_eq!(pending, vec!["BTC", "SOL"]);
    }

    #[tokio::test]
    async fn already_active_id_is_not_duplicated() {
        let f = fixture(
            gateway_with(vec![("BTC", 100.0)]),
            vec![signal("BTC", Direction::Buy, "99-100", "2024-05-02T00:00:00Z")],
        )
        .await;
        f.engine.tick(now()).await.unwrap();

        f.pending
            .lock()
            .await
            .commit(vec![signal("BTC", Direction::Buy, "99-100", "2024-05-02T00:00:00Z")])
            .unwrap();
        let report = f.engine.tick(now()).await.unwrap();

        assert!(report.opened.is_empty());
        assert_eq!(f.active.len().await, 1);
        assert!(f.pending.is_empty().await);
    }

    #[tokio::test]
    async fn near_entry_alert_respects_cooldown() {
        let f = fixture(
            gateway_with(vec![("BTC", 101.0)]),
            vec![signal("BTC", Direction::Buy, "99-100", "2024-05-02T00:00:00Z")],
        )
        .await;
        let mut rx = f.sink.subscribe();

        assert_eq!(f.engine.tick(now()).await.unwrap().near_entry, 1);
        assert_eq!(
            f.engine.tick(now() + chrono::Duration::minutes(30)).await.unwrap().near_entry,
            0
        );
        assert_eq!(
            f.engine.tick(now() + chrono::Duration::minutes(61)).await.unwrap().near_entry,
            1
        );

        match rx.recv().await.unwrap() {
            EngineEvent::SignalNearEntry { asset, trigger_price, .. } => {
                assert_eq!(asset, "BTC");
                assert_eq!(trigger_price, 100.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn proximity_band_is_on_the_untriggered_side() {
        let range = EntryRange { low: 99.0, high: 100.0 };
        assert!(is_near_entry(Direction::Buy, &range, 101.9, 2.0));
        assert!(!is_near_entry(Direction::Buy, &range, 100.0, 2.0));
        assert!(!is_near_entry(Direction::Buy, &range, 102.5, 2.0));
        assert!(is_near_entry(Direction::Sell, &range, 98.0, 2.0));
        assert!(!is_near_entry(Direction::Sell, &range, 99.5, 2.0));
    }
}

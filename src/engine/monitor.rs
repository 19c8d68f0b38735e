//! Position Monitor
//!
//! Marks every active trade to market, trails the stop to breakeven once a
//! trade is halfway to target, and closes trades into the ledger on target,
//! stop or expiry (in that order of precedence).

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{engine_rng, EngineConfig};
use crate::error::EngineError;
use crate::market_data::{fetch_usable, MarketDataGateway, PriceQuote};
use crate::persistence::Collection;
use crate::realism::{
    classify_outcome, gross_pnl_percent, net_pnl, slippage_price, target_progress, FillLeg,
};
use crate::types::{ActiveTrade, ClosingReason, CompletedTrade, Direction, OrderStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub valued: usize,
    pub unpriced: usize,
    pub stops_adjusted: usize,
    pub fills_completed: usize,
    pub errored: usize,
    pub closed: Vec<CompletedTrade>,
}

enum TradeUpdate {
    Open(ActiveTrade),
    Closed(Box<CompletedTrade>),
}

/// First-touch-wins: target, then stop, then expiry
pub fn closing_reason(
    direction: Direction,
    target: f64,
    stop: f64,
    exit_time: DateTime<Utc>,
    price: f64,
    now: DateTime<Utc>,
) -> Option<ClosingReason> {
    let (target_hit, stop_hit) = match direction {
        Direction::Buy => (price >= target, price <= stop),
        Direction::Sell => (price <= target, price >= stop),
    };
    if target_hit {
        Some(ClosingReason::TargetHit)
    } else if stop_hit {
        Some(ClosingReason::StopLossHit)
    } else if now > exit_time {
        Some(ClosingReason::Expired)
    } else {
        None
    }
}

pub struct PositionMonitor {
    config: EngineConfig,
    active: Arc<Collection<ActiveTrade>>,
    ledger: Arc<Collection<CompletedTrade>>,
    gateway: Arc<dyn MarketDataGateway>,
    rng: Mutex<StdRng>,
}

impl PositionMonitor {
    pub fn new(
        config: EngineConfig,
        active: Arc<Collection<ActiveTrade>>,
        ledger: Arc<Collection<CompletedTrade>>,
        gateway: Arc<dyn MarketDataGateway>,
    ) -> Self {
        let rng = Mutex::new(engine_rng(config.rng_seed, 1));
        Self {
            config,
            active,
            ledger,
            gateway,
            rng,
        }
    }

    /// Run one monitoring cycle at `now`
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<MonitorReport, EngineError> {
        let snapshot = self.active.snapshot().await;
        if snapshot.is_empty() {
            return Ok(MonitorReport::default());
        }

        let assets: BTreeSet<String> = snapshot.iter().map(|t| t.asset.clone()).collect();
        let quotes = fetch_usable(self.gateway.as_ref(), &assets)
            .await
            .map_err(EngineError::MarketData)?;

        let mut active = self.active.lock().await;
        let (still_open, closed, mut report) = self.evaluate_all(active.items(), &quotes, now);

        if !closed.is_empty() {
            // Ledger first: a crash before the active commit re-closes the
            // trade next tick and the id check keeps a single record.
            let mut ledger = self.ledger.lock().await;
            let mut known: HashSet<String> = ledger.items().iter().map(|t| t.id.clone()).collect();
            let mut next = ledger.items().to_vec();
            for trade in &closed {
                if known.insert(trade.id.clone()) {
                    next.push(trade.clone());
                } else {
                    debug!(trade = %trade.id, "[MONITOR] Already in ledger, skipping append");
                }
            }
            if next.len() != ledger.items().len() {
                ledger.commit(next)?;
            }
        }

        if still_open.as_slice() != active.items() {
            active.commit(still_open)?;
        }

        for trade in &closed {
            info!(
                trade = %trade.id,
                reason = %trade.closing_reason,
                outcome = %trade.outcome,
                exit_price = trade.exit_price,
                net_pnl = %format!("{:.4}", trade.net_pnl_usd),
                "📕 [MONITOR] Position closed"
            );
        }
        report.closed = closed;
        Ok(report)
    }

    fn evaluate_all(
        &self,
        trades: &[ActiveTrade],
        quotes: &HashMap<String, PriceQuote>,
        now: DateTime<Utc>,
    ) -> (Vec<ActiveTrade>, Vec<CompletedTrade>, MonitorReport) {
        let mut report = MonitorReport::default();
        let mut still_open = Vec::with_capacity(trades.len());
        let mut closed = Vec::new();

        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        for trade in trades {
            let mut trade = trade.clone();
            if trade.order_status == OrderStatus::PendingFill && now >= trade.fill_due_at {
                trade.order_status = OrderStatus::Filled;
                report.fills_completed += 1;
            }

            let Some(quote) = quotes.get(&trade.asset) else {
                report.unpriced += 1;
                still_open.push(trade);
                continue;
            };

            if let Err(e) = validate(&trade) {
                report.errored += 1;
                if trade.order_status != OrderStatus::Error {
                    warn!(error = %e, "[MONITOR] Trade cannot be valued, marking as error");
                    trade.order_status = OrderStatus::Error;
                }
                still_open.push(trade);
                continue;
            }

            let adjusted_before = trade.stop_adjusted;
            match self.evaluate(trade, quote.price, now, &mut rng) {
                TradeUpdate::Open(trade) => {
                    if trade.stop_adjusted && !adjusted_before {
                        report.stops_adjusted += 1;
                    }
                    report.valued += 1;
                    still_open.push(trade);
                }
                TradeUpdate::Closed(done) => {
                    report.valued += 1;
                    closed.push(*done);
                }
            }
        }

        (still_open, closed, report)
    }

    fn evaluate(
        &self,
        mut trade: ActiveTrade,
        price: f64,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> TradeUpdate {
        let params = &self.config.realism;

        trade.current_price = price;
        let live = net_pnl(
            params.base_notional_usd,
            gross_pnl_percent(trade.direction, trade.fill_price, price),
            params.fee_rate_pct,
        );
        trade.live_pnl_usd = live.net_usd;
        trade.live_pnl_percent = live.net_percent;

        if !trade.stop_adjusted {
            let progress = target_progress(trade.direction, trade.fill_price, price, trade.target);
            if progress.is_some_and(|p| p >= params.breakeven_threshold) {
                info!(
                    trade = %trade.id,
                    old_stop = trade.stop,
                    new_stop = trade.fill_price,
                    "🛡️ [MONITOR] Stop moved to breakeven"
                );
                trade.stop = trade.fill_price;
                trade.stop_adjusted = true;
            }
        }

        match closing_reason(
            trade.direction,
            trade.target,
            trade.stop,
            trade.exit_time,
            price,
            now,
        ) {
            Some(reason) => TradeUpdate::Closed(Box::new(self.close(trade, reason, now, rng))),
            None => TradeUpdate::Open(trade),
        }
    }

    fn close(
        &self,
        trade: ActiveTrade,
        reason: ClosingReason,
        now: DateTime<Utc>,
        rng: &mut StdRng,
    ) -> CompletedTrade {
        let params = &self.config.realism;
        let exit_price = slippage_price(
            rng,
            trade.current_price,
            trade.direction,
            FillLeg::Exit,
            params.max_slippage_pct,
        );
        let pnl = net_pnl(
            params.base_notional_usd,
            gross_pnl_percent(trade.direction, trade.fill_price, exit_price),
            params.fee_rate_pct,
        );

        CompletedTrade {
            id: trade.id,
            asset: trade.asset,
            direction: trade.direction,
            entry_time: trade.entry_time,
            exit_time: now,
            entry_price: trade.fill_price,
            exit_price,
            target: trade.target,
            stop: trade.stop,
            outcome: classify_outcome(pnl.net_usd, params.outcome_dead_zone_usd),
            closing_reason: reason,
            net_pnl_usd: pnl.net_usd,
            net_pnl_percent: pnl.net_percent,
            fees_usd: pnl.fees_usd,
            market_snapshot: trade.market_snapshot,
            technical_context: trade.technical_context,
        }
    }
}

fn validate(trade: &ActiveTrade) -> Result<(), EngineError> {
    if !trade.fill_price.is_finite() || trade.fill_price <= 0.0 {
        return Err(EngineError::invalid_trade(
            &trade.id,
            format!("fill price {}", trade.fill_price),
        ));
    }
    if !trade.target.is_finite() || !trade.stop.is_finite() {
        return Err(EngineError::invalid_trade(
            &trade.id,
            format!("target {} / stop {}", trade.target, trade.stop),
        ));
    }
    Ok(())
}

//! Ledger performance summary

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{ClosingReason, CompletedTrade, Direction, Outcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakevens: usize,
    /// Percent of all trades (breakevens included) that won
    pub win_rate: f64,
    /// Gross profit of wins over gross loss of losses; `None` without losses
    pub profit_factor: Option<f64>,
    pub total_net_profit_usd: f64,
    pub average_roi_percent: f64,
    pub total_fees_usd: f64,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub by_reason: BTreeMap<String, usize>,
}

impl PerformanceSummary {
    pub fn from_ledger(trades: &[CompletedTrade]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let mut summary = Self {
            total_trades: trades.len(),
            ..Self::default()
        };
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut roi_sum = 0.0;

        for trade in trades {
            match trade.outcome {
                Outcome::Win => {
                    summary.wins += 1;
                    gross_profit += trade.net_pnl_usd;
                }
                Outcome::Loss => {
                    summary.losses += 1;
                    gross_loss += trade.net_pnl_usd.abs();
                }
                Outcome::Breakeven => summary.breakevens += 1,
            }
            match trade.direction {
                Direction::Buy => summary.buy_trades += 1,
                Direction::Sell => summary.sell_trades += 1,
            }
            *summary
                .by_reason
                .entry(trade.closing_reason.to_string())
                .or_insert(0) += 1;

            summary.total_net_profit_usd += trade.net_pnl_usd;
            summary.total_fees_usd += trade.fees_usd;
            roi_sum += trade.net_pnl_percent;
        }

        summary.win_rate = summary.wins as f64 / summary.total_trades as f64 * 100.0;
        summary.profit_factor = (gross_loss > 0.0).then(|| gross_profit / gross_loss);
        summary.average_roi_percent = roi_sum / summary.total_trades as f64;
        summary
    }

    pub fn reason_count(&self, reason: ClosingReason) -> usize {
        self.by_reason.get(&reason.to_string()).copied().unwrap_or(0)
    }

    pub fn summary_string(&self) -> String {
        let pf = self
            .profit_factor
            .map(|pf| format!("{:.2}", pf))
            .unwrap_or_else(|| "∞".to_string());
        let results = format!(
            "{}W/{}L/{}B ({:.0}% WR) | P&L: ${:+.2} | Avg ROI: {:+.2}% | PF: {}",
            self.wins,
            self.losses,
            self.breakevens,
            self.win_rate,
            self.total_net_profit_usd,
            self.average_roi_percent,
            pf,
        );
        format!(
            "📋 Ledger: {} trades | {} | Fees: ${:.4} | TP: {} SL: {} EXP: {}",
            self.total_trades,
            results,
            self.total_fees_usd,
            self.reason_count(ClosingReason::TargetHit),
            self.reason_count(ClosingReason::StopLossHit),
            self.reason_count(ClosingReason::Expired),
        )
    }
}

//! Realism model: fees, slippage and outcome classification.
//!
//! Everything here is a pure function of its inputs (plus the caller's RNG
//! for slippage), shared by the trigger engine and the position monitor.

use rand::Rng;

use crate::types::{Direction, Outcome};

/// Fee charged on each leg, in percent of the leg's notional
pub const TRADING_FEE_PCT: f64 = 0.1;
/// Upper bound of the uniformly drawn slippage magnitude, in percent
pub const MAX_SLIPPAGE_PCT: f64 = 0.05;
/// Simulated position size used for every P&L computation
pub const BASE_NOTIONAL_USD: f64 = 100.0;
/// Net P&L band (in currency) classified as breakeven
pub const OUTCOME_DEAD_ZONE_USD: f64 = 0.05;
/// Fraction of the way to target at which the stop moves to breakeven
pub const BREAKEVEN_THRESHOLD: f64 = 0.5;

/// Which side of the round trip a fill belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillLeg {
    Entry,
    Exit,
}

/// Tunable realism parameters (defaults match the constants above)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealismParams {
    pub fee_rate_pct: f64,
    pub max_slippage_pct: f64,
    pub base_notional_usd: f64,
    pub outcome_dead_zone_usd: f64,
    pub breakeven_threshold: f64,
}

impl Default for RealismParams {
    fn default() -> Self {
        Self {
            fee_rate_pct: TRADING_FEE_PCT,
            max_slippage_pct: MAX_SLIPPAGE_PCT,
            base_notional_usd: BASE_NOTIONAL_USD,
            outcome_dead_zone_usd: OUTCOME_DEAD_ZONE_USD,
            breakeven_threshold: BREAKEVEN_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetPnl {
    pub net_usd: f64,
    pub net_percent: f64,
    pub fees_usd: f64,
}

/// Apply a uniformly drawn adverse slippage in `[0, max_slippage_pct]`.
///
/// Entries always fill worse (Buy higher, Sell lower); exits always close
/// worse (Buy sells lower, Sell buys back higher).
pub fn slippage_price<R: Rng + ?Sized>(
    rng: &mut R,
    base: f64,
    direction: Direction,
    leg: FillLeg,
    max_slippage_pct: f64,
) -> f64 {
    let magnitude = if max_slippage_pct > 0.0 {
        rng.gen_range(0.0..=max_slippage_pct) / 100.0
    } else {
        0.0
    };
    let worsen_up = matches!(
        (direction, leg),
        (Direction::Buy, FillLeg::Entry) | (Direction::Sell, FillLeg::Exit)
    );
    if worsen_up {
        base * (1.0 + magnitude)
    } else {
        base * (1.0 - magnitude)
    }
}

pub fn gross_pnl_percent(direction: Direction, entry: f64, mark: f64) -> f64 {
    match direction {
        Direction::Buy => (mark / entry - 1.0) * 100.0,
        Direction::Sell => (entry / mark - 1.0) * 100.0,
    }
}

/// Double-fee model: the entry fee is charged on the notional, the exit fee
/// on the notional plus gross P&L.
pub fn net_pnl(base_notional: f64, gross_pnl_percent: f64, fee_rate_pct: f64) -> NetPnl {
    let rate = fee_rate_pct / 100.0;
    let gross_usd = gross_pnl_percent / 100.0 * base_notional;
    let entry_fee = base_notional * rate;
    let exit_fee = (base_notional + gross_usd) * rate;
    let fees_usd = entry_fee + exit_fee;
    let net_usd = gross_usd - fees_usd;
    let net_percent = if base_notional > 0.0 {
        net_usd / base_notional * 100.0
    } else {
        0.0
    };
    NetPnl {
        net_usd,
        net_percent,
        fees_usd,
    }
}

pub fn classify_outcome(net_usd: f64, dead_zone_usd: f64) -> Outcome {
    if net_usd > dead_zone_usd {
        Outcome::Win
    } else if net_usd < -dead_zone_usd {
        Outcome::Loss
    } else {
        Outcome::Breakeven
    }
}

/// How far the position has travelled toward its target, clamped to `[0, 1]`.
///
/// `None` when the favorable distance to target is zero, negative (target on
/// the wrong side of the fill) or not finite.
pub fn target_progress(direction: Direction, fill: f64, mark: f64, target: f64) -> Option<f64> {
    let distance = (target - fill) * direction.sign();
    if !distance.is_finite() || distance <= 0.0 {
        return None;
    }
    let progress = (mark - fill) * direction.sign() / distance;
    progress.is_finite().then(|| progress.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn slippage_is_always_adverse_and_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let buy_in = slippage_price(&mut rng, 100.0, Direction::Buy, FillLeg::Entry, 0.05);
            assert!((100.0..=100.05 + 1e-9).contains(&buy_in));

            let sell_in = slippage_price(&mut rng, 100.0, Direction::Sell, FillLeg::Entry, 0.05);
            assert!((99.95 - 1e-9..=100.0).contains(&sell_in));

            let buy_out = slippage_price(&mut rng, 100.0, Direction::Buy, FillLeg::Exit, 0.05);
            assert!(buy_out <= 100.0);

            let sell_out = slippage_price(&mut rng, 100.0, Direction::Sell, FillLeg::Exit, 0.05);
            assert!(sell_out >= 100.0);
        }
    }

    #[test]
    fn zero_slippage_returns_base() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            slippage_price(&mut rng, 42.0, Direction::Buy, FillLeg::Entry, 0.0),
            42.0
        );
    }

    #[test]
    fn gross_pnl_uses_price_ratio_per_direction() {
        assert!((gross_pnl_percent(Direction::Buy, 100.0, 110.0) - 10.0).abs() < 1e-9);
        assert!((gross_pnl_percent(Direction::Sell, 110.0, 100.0) - 10.0).abs() < 1e-9);
        assert!(gross_pnl_percent(Direction::Sell, 100.0, 110.0) < 0.0);
    }

    #[test]
    fn unchanged_price_still_costs_both_fees() {
        let pnl = net_pnl(100.0, 0.0, 0.1);
        assert!((pnl.fees_usd - 0.2).abs() < 1e-9);
        assert!((pnl.net_usd + 0.2).abs() < 1e-9);
        assert!((pnl.net_percent + 0.2).abs() < 1e-9);
    }

    #[test]
    fn exit_fee_scales_with_position_value() {
        let pnl = net_pnl(100.0, 10.0, 0.1);
        // entry 0.10 + exit 0.11
        assert!((pnl.fees_usd - 0.21).abs() < 1e-9);
        assert!((pnl.net_usd - 9.79).abs() < 1e-9);
    }

    #[test]
    fn outcome_dead_zone_is_exclusive() {
        assert_eq!(classify_outcome(0.051, 0.05), Outcome::Win);
        assert_eq!(classify_outcome(0.05, 0.05), Outcome::Breakeven);
        assert_eq!(classify_outcome(-0.05, 0.05), Outcome::Breakeven);
        assert_eq!(classify_outcome(-0.051, 0.05), Outcome::Loss);
    }

    #[test]
    fn progress_undefined_for_inverted_or_degenerate_targets() {
        assert_eq!(target_progress(Direction::Buy, 100.0, 105.0, 110.0), Some(0.5));
        assert_eq!(target_progress(Direction::Sell, 200.0, 195.0, 190.0), Some(0.5));
        assert_eq!(target_progress(Direction::Buy, 100.0, 105.0, 100.0), None);
        assert_eq!(target_progress(Direction::Buy, 100.0, 105.0, 90.0), None);
        assert_eq!(target_progress(Direction::Sell, 200.0, 195.0, 210.0), None);
    }
}

//! Core types used throughout PaperDesk
//!
//! Defines the signal → active trade → completed trade records, the enums
//! that drive their state machine, and the parsers for the loosely formatted
//! fields a Signal Source hands us (entry ranges, timestamps).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ─────────────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────────────

/// Trading direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "BUY", alias = "Buy", alias = "long")]
    Buy,
    #[serde(alias = "SELL", alias = "Sell", alias = "short")]
    Sell,
}

impl Direction {
    /// +1 for Buy, -1 for Sell. Multiplying a price delta by this gives the
    /// move in the position's favor.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Some(Direction::Buy),
            "sell" | "short" => Some(Direction::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

/// Simulated order status of an active trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingFill,
    Filled,
    Error,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::PendingFill => write!(f, "PENDING_FILL"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Ledger classification of a closed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    Breakeven,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
            Outcome::Breakeven => write!(f, "BREAKEVEN"),
        }
    }
}

/// Why a trade left the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosingReason {
    #[serde(rename = "target_hit")]
    TargetHit,
    #[serde(rename = "stop_loss_hit")]
    StopLossHit,
    #[serde(rename = "expired")]
    Expired,
}

impl fmt::Display for ClosingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosingReason::TargetHit => write!(f, "target_hit"),
            ClosingReason::StopLossHit => write!(f, "stop_loss_hit"),
            ClosingReason::Expired => write!(f, "expired"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Technical context (opaque pass-through payload)
// ─────────────────────────────────────────────────────────────────

/// A single technical-context value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Flag(bool),
    /// Kept as written, so integers stay integers
    Number(serde_json::Number),
    Text(String),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        match serde_json::Number::from_f64(value) {
            Some(number) => ContextValue::Number(number),
            None => ContextValue::Text(value.to_string()),
        }
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Number(value.into())
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Flag(value)
    }
}

/// Insertion-ordered string map carried from signal to ledger untouched.
/// Serialized as a JSON object in the original key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechnicalContext(Vec<(String, ContextValue)>);

impl TechnicalContext {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert or replace; a replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for TechnicalContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TechnicalContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ContextVisitor;

        impl<'de> Visitor<'de> for ContextVisitor {
            type Value = TechnicalContext;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string keys to string, boolean or number values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut ctx = TechnicalContext::new();
                while let Some((key, value)) = access.next_entry::<String, ContextValue>()? {
                    ctx.insert(key, value);
                }
                Ok(ctx)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(TechnicalContext::new())
            }
        }

        deserializer.deserialize_any(ContextVisitor)
    }
}

// ─────────────────────────────────────────────────────────────────
// Signal field parsing
// ─────────────────────────────────────────────────────────────────

/// Parsed entry zone. `low == high` for single-price entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryRange {
    pub low: f64,
    pub high: f64,
}

impl EntryRange {
    /// Accepts `"100"` or `"99 - 100"` (bounds in either order). A `-`
    /// right after an exponent marker belongs to the number.
    pub fn parse(raw: &str) -> Option<Self> {
        let parse_price = |s: &str| {
            s.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
        };

        let raw = raw.trim();
        let bytes = raw.as_bytes();
        let separator = raw
            .char_indices()
            .find(|&(i, c)| c == '-' && i > 0 && !matches!(bytes[i - 1], b'e' | b'E'))
            .map(|(i, _)| i);
        let parts: Vec<&str> = match separator {
            Some(i) => vec![&raw[..i], &raw[i + 1..]],
            None => vec![raw],
        };
        match parts.as_slice() {
            [single] => {
                let price = parse_price(single)?;
                Some(Self {
                    low: price,
                    high: price,
                })
            }
            [a, b] => {
                let (a, b) = (parse_price(a)?, parse_price(b)?);
                Some(Self {
                    low: a.min(b),
                    high: a.max(b),
                })
            }
            _ => None,
        }
    }

    /// Fill-at-this-price-or-better line: the high bound for Buy, the low
    /// bound for Sell.
    pub fn trigger_line(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Buy => self.high,
            Direction::Sell => self.low,
        }
    }

    pub fn is_triggered(&self, direction: Direction, price: f64) -> bool {
        match direction {
            Direction::Buy => price <= self.high,
            Direction::Sell => price >= self.low,
        }
    }
}

/// Parse a signal timestamp. RFC 3339 is preferred; `dd/mm/yyyy HH:MM:SS` and
/// `yyyy-mm-dd HH:MM:SS` are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%d/%m/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// ─────────────────────────────────────────────────────────────────
// Lifecycle records
// ─────────────────────────────────────────────────────────────────

/// A candidate trade awaiting activation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSignal {
    pub asset: String,
    pub direction: Direction,
    /// `"low-high"` or a single price
    pub entry_range: String,
    pub target: f64,
    pub stop: f64,
    pub entry_time: String,
    /// Signal expires (if never triggered) at this instant
    pub exit_time: String,
    #[serde(default)]
    pub technical_context: TechnicalContext,
}

impl PendingSignal {
    /// Stable id shared with the trade and ledger record it turns into
    pub fn id(&self) -> String {
        format!("{}-{}", self.asset, self.entry_time)
    }

    pub fn parsed_range(&self) -> Option<EntryRange> {
        EntryRange::parse(&self.entry_range)
    }

    pub fn parsed_exit_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.exit_time)
    }

    pub fn parsed_entry_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.entry_time)
    }
}

/// Market state captured at the instant a signal triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Price observed by the trigger engine (before slippage)
    pub trigger_price: f64,
    pub price_source: String,
    pub captured_at: DateTime<Utc>,
}

/// A simulated open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub id: String,
    pub asset: String,
    pub direction: Direction,
    pub entry_low: f64,
    pub entry_high: f64,
    /// Slippage-adjusted entry price
    pub fill_price: f64,
    pub current_price: f64,
    pub live_pnl_usd: f64,
    pub live_pnl_percent: f64,
    pub order_status: OrderStatus,
    /// When the simulated fill latency elapses
    pub fill_due_at: DateTime<Utc>,
    pub target: f64,
    pub stop: f64,
    /// Stop as issued by the signal, before any breakeven trail
    pub original_stop: f64,
    pub stop_adjusted: bool,
    pub entry_time: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub market_snapshot: MarketSnapshot,
    #[serde(default)]
    pub technical_context: TechnicalContext,
}

/// An immutable ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub id: String,
    pub asset: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    /// Wall-clock close time, not the scheduled expiry
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub target: f64,
    /// Stop as of close (breakeven if the trail fired)
    pub stop: f64,
    pub outcome: Outcome,
    pub closing_reason: ClosingReason,
    pub net_pnl_usd: f64,
    pub net_pnl_percent: f64,
    pub fees_usd: f64,
    pub market_snapshot: MarketSnapshot,
    #[serde(default)]
    pub technical_context: TechnicalContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_range_parses_single_and_reversed_bounds() {
        assert_eq!(
            EntryRange::parse("100"),
            Some(EntryRange {
                low: 100.0,
                high: 100.0
            })
        );
        assert_eq!(
            EntryRange::parse(" 205 - 200 "),
            Some(EntryRange {
                low: 200.0,
                high: 205.0
            })
        );
        assert_eq!(EntryRange::parse("abc"), None);
        assert_eq!(EntryRange::parse("1-2-3"), None);
        assert_eq!(EntryRange::parse("-5"), None);
        assert_eq!(
            EntryRange::parse("1.3e-5-1.2e-5"),
            Some(EntryRange {
                low: 1.2e-5,
                high: 1.3e-5,
            })
        );
        assert_eq!(
            EntryRange::parse("2.5E-4"),
            Some(EntryRange {
                low: 2.5e-4,
                high: 2.5e-4,
            })
        );
        assert_eq!(EntryRange::parse(""), None);
    }

    #[test]
    fn trigger_line_is_asymmetric() {
        let range = EntryRange::parse("99-100").unwrap();
        assert!(range.is_triggered(Direction::Buy, 100.0));
        assert!(range.is_triggered(Direction::Buy, 50.0));
        assert!(!range.is_triggered(Direction::Buy, 100.01));
        assert!(range.is_triggered(Direction::Sell, 99.0));
        assert!(range.is_triggered(Direction::Sell, 500.0));
        assert!(!range.is_triggered(Direction::Sell, 98.99));
    }

    #[test]
    fn timestamps_accept_rfc3339_and_day_first() {
        let a = parse_timestamp("2026-03-01T12:30:00Z").unwrap();
        let b = parse_timestamp("01/03/2026 12:30:00").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn technical_context_round_trip_keeps_key_order() {
        let json = r#"{"zeta":"up","alpha":true,"mid":1.5}"#;
        let ctx: TechnicalContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(ctx.get("alpha"), Some(&ContextValue::Flag(true)));
        assert_eq!(serde_json::to_string(&ctx).unwrap(), json);
    }

    #[test]
    fn technical_context_keeps_integers_as_written() {
        let json = r#"{"period":14,"volume":9007199254740993,"rsi":38.2}"#;
        let ctx: TechnicalContext = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.get("period"), Some(&ContextValue::Number(14.into())));
        assert_eq!(serde_json::to_string(&ctx).unwrap(), json);
    }

    #[test]
    fn direction_accepts_common_spellings() {
        let d: Direction = serde_json::from_str("\"BUY\"").unwrap();
        assert_eq!(d, Direction::Buy);
        let d: Direction = serde_json::from_str("\"short\"").unwrap();
        assert_eq!(d, Direction::Sell);
        assert_eq!(Direction::from_str(" Sell "), Some(Direction::Sell));
    }
}

//! Market Data Gateway
//!
//! Thin adapter over the external price service. Each engine tick makes a
//! single batched call; assets the service cannot price are simply absent
//! from the returned map.

mod http;

pub use http::HttpPriceGateway;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

/// Current price of one asset and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub source: String,
}

impl PriceQuote {
    pub fn new(price: f64, source: impl Into<String>) -> Self {
        Self {
            price,
            source: source.into(),
        }
    }

    /// Finite and strictly positive
    pub fn is_usable(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// Trait for price lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Look up every asset in one call. Missing keys mean "no price".
    async fn fetch_prices(&self, assets: &BTreeSet<String>) -> Result<HashMap<String, PriceQuote>>;
}

/// Fetch and drop unusable quotes so the engines only ever see sane prices.
pub(crate) async fn fetch_usable(
    gateway: &dyn MarketDataGateway,
    assets: &BTreeSet<String>,
) -> Result<HashMap<String, PriceQuote>> {
    let mut quotes = gateway.fetch_prices(assets).await?;
    quotes.retain(|asset, quote| {
        let keep = quote.is_usable();
        if !keep {
            tracing::warn!(asset = %asset, price = quote.price, "Discarding unusable quote");
        }
        keep
    });
    Ok(quotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unusable_quotes_are_dropped() {
        let mut gateway = MockMarketDataGateway::new();
        gateway.expect_fetch_prices().returning(|_| {
            Ok(HashMap::from([
                ("BTC".to_string(), PriceQuote::new(100.0, "test")),
                ("ETH".to_string(), PriceQuote::new(f64::NAN, "test")),
                ("SOL".to_string(), PriceQuote::new(0.0, "test")),
            ]))
        });

        let assets: BTreeSet<String> =
            ["BTC", "ETH", "SOL"].iter().map(|s| s.to_string()).collect();
        let quotes = fetch_usable(&gateway, &assets).await.unwrap();
        assert_eq!(quotes.len(), 1);
        assert!(quotes.contains_key("BTC"));
    }
}

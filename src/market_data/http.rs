//! HTTP client for the market price service
//!
//! `POST {base_url}/api/market/prices` with `{"tickers": [...]}`; the reply
//! maps each ticker to `{"price": "<decimal>", "source": "<name>"}` or null.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::{MarketDataGateway, PriceQuote};

#[derive(Debug, Serialize)]
struct PricesRequest<'a> {
    tickers: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    price: Option<serde_json::Value>,
    #[serde(default)]
    source: Option<String>,
}

/// REST gateway to the price service
pub struct HttpPriceGateway {
    client: Client,
    base_url: String,
}

impl HttpPriceGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Prices arrive either as JSON numbers or as decimal strings
fn parse_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn into_quotes(raw: HashMap<String, Option<RawQuote>>) -> HashMap<String, PriceQuote> {
    raw.into_iter()
        .filter_map(|(asset, quote)| {
            let quote = quote?;
            let price = quote.price.as_ref().and_then(parse_price)?;
            let source = quote.source.unwrap_or_else(|| "unknown".to_string());
            Some((asset, PriceQuote { price, source }))
        })
        .collect()
}

#[async_trait]
impl MarketDataGateway for HttpPriceGateway {
    async fn fetch_prices(&self, assets: &BTreeSet<String>) -> Result<HashMap<String, PriceQuote>> {
        if assets.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/api/market/prices", self.base_url);
        let body = PricesRequest {
            tickers: assets.iter().map(String::as_str).collect(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Price request to {} failed", url))?
            .error_for_status()
            .context("Price service returned an error status")?;

        let raw: HashMap<String, Option<RawQuote>> = response
            .json()
            .await
            .context("Failed to decode price response")?;

        let quotes = into_quotes(raw);
        tracing::debug!(requested = assets.len(), priced = quotes.len(), "Fetched prices");
        Ok(quotes)
    }
}

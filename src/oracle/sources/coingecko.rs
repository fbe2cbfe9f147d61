//! CoinGecko market data client
//!
//! One `coins/{id}` request returns the coin's price in every supported
//! currency, so the response is shared by all tickers of a poll cycle.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::oracle::sources::QuoteSource;
use crate::types::Ticker;

pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Price per currency key, kept as the JSON number text
type PriceTable = HashMap<String, Box<RawValue>>;

#[derive(Debug, Deserialize)]
struct CoinResponse {
    market_data: MarketData,
}

#[derive(Debug, Deserialize)]
struct MarketData {
    current_price: PriceTable,
}

pub struct CoinGeckoSource {
    client: reqwest::Client,
    url: String,
    currencies: HashMap<Ticker, String>,
    cache_ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<PriceTable>)>>,
}

impl CoinGeckoSource {
    pub fn new(
        base_url: &str,
        coin_id: &str,
        currencies: HashMap<Ticker, String>,
        request_timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/coins/{}", base_url.trim_end_matches('/'), coin_id),
            currencies,
            cache_ttl,
            cache: Mutex::new(None),
        })
    }

    async fn current_prices(&self) -> Result<Arc<PriceTable>> {
        // Held across the request so concurrent tickers share one response
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, prices)) = cache.as_ref() {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(prices.clone());
            }
        }

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch CoinGecko market data")?;

        if !response.status().is_success() {
            bail!("CoinGecko API returned error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read CoinGecko response")?;
        let prices = Arc::new(parse_prices(&body)?);

        *cache = Some((Instant::now(), prices.clone()));
        Ok(prices)
    }
}

#[async_trait]
impl QuoteSource for CoinGeckoSource {
    async fn fetch(&self, ticker: Ticker) -> Result<Decimal> {
        let currency = self
            .currencies
            .get(&ticker)
            .with_context(|| format!("No CoinGecko currency configured for {}", ticker))?;
        let prices = self.current_prices().await?;
        extract_price(&prices, currency)
    }
}

fn parse_prices(body: &str) -> Result<PriceTable> {
    let response: CoinResponse = serde_json::from_str(body)
        .context("Missing market_data.current_price in CoinGecko response")?;
    Ok(response.market_data.current_price)
}

fn extract_price(prices: &PriceTable, currency: &str) -> Result<Decimal> {
    let text = prices
        .get(currency)
        .with_context(|| format!("Currency {} missing from CoinGecko prices", currency))?
        .get();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .with_context(|| format!("Non-numeric CoinGecko price for {}: {}", currency, text))
}

//! Configuration section types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::oracle::{DeviationPolicy, MissingSecondaryAction, QuoteStyle};
use crate::types::Ticker;

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Seconds between poll cycles
    pub poll_interval_secs: u64,
    /// Per-source request budget in milliseconds
    pub source_timeout_ms: u64,
    /// Ticker that must be priced for a record to be committed
    pub base_ticker: Ticker,
    /// Normalized values are floored to a multiple of this many atomic units
    pub granularity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SanityConfig {
    /// Query the secondary sources and cross-check every cycle
    pub enabled: bool,
    pub max_increase_ratio: Decimal,
    pub max_decrease_ratio: Decimal,
    pub missing_secondary: MissingSecondaryAction,
}

impl SanityConfig {
    pub fn policy(&self) -> DeviationPolicy {
        DeviationPolicy {
            max_increase_ratio: self.max_increase_ratio,
            max_decrease_ratio: self.max_decrease_ratio,
            missing_secondary: self.missing_secondary,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Grace on top of the poll interval before a record counts as stale
    pub staleness_tolerance_secs: u64,
    /// Schema served when the request names none
    pub default_version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    /// PEM private key; ignored when SIGNING_KEY is set
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Ethereum JSON-RPC endpoint for Chainlink feeds
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    pub coin_id: String,
    /// One response is reused for all tickers within this window
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Chainlink,
    Coingecko,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Chainlink => "chainlink",
            SourceKind::Coingecko => "coingecko",
        }
    }
}

/// Where and how one ticker is priced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    /// Feed contract (chainlink)
    #[serde(default)]
    pub address: Option<String>,
    /// Price currency key (coingecko)
    #[serde(default)]
    pub vs_currency: Option<String>,
    #[serde(default)]
    pub style: QuoteStyle,
    /// Decimal places of the raw value
    #[serde(default)]
    pub decimals: u32,
}

impl SourceDescriptor {
    pub fn coingecko(vs_currency: &str) -> Self {
        Self {
            kind: SourceKind::Coingecko,
            address: None,
            vs_currency: Some(vs_currency.to_string()),
            style: QuoteStyle::Direct,
            decimals: 0,
        }
    }

    pub fn chainlink(address: &str, style: QuoteStyle, decimals: u32) -> Self {
        Self {
            kind: SourceKind::Chainlink,
            address: Some(address.to_string()),
            vs_currency: None,
            style,
            decimals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerConfig {
    pub ticker: Ticker,
    pub primary: SourceDescriptor,
    #[serde(default)]
    pub secondary: Option<SourceDescriptor>,
}

/// CoinGecko `coins/haven` quotes every ticker directly
pub fn default_tickers() -> Vec<TickerConfig> {
    Ticker::ALL
        .iter()
        .map(|&ticker| TickerConfig {
            ticker,
            primary: SourceDescriptor::coingecko(default_vs_currency(ticker)),
            secondary: None,
        })
        .collect()
}

fn default_vs_currency(ticker: Ticker) -> &'static str {
    match ticker {
        Ticker::XAG => "xag",
        Ticker::XAU => "xau",
        Ticker::XAUD => "aud",
        Ticker::XBTC => "btc",
        Ticker::XCAD => "cad",
        Ticker::XCHF => "chf",
        Ticker::XCNY => "cny",
        Ticker::XEUR => "eur",
        Ticker::XGBP => "gbp",
        Ticker::XJPY => "jpy",
        Ticker::XNOK => "nok",
        Ticker::XNZD => "nzd",
        Ticker::XUSD => "usd",
    }
}

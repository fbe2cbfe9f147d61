//! Oracle module - Multi-source quote aggregation
//!
//! Collects prices from Chainlink reference feeds and CoinGecko market data,
//! normalizes them to atomic units and cross-checks primary against
//! secondary quotes.

mod aggregator;
mod normalize;
mod sanity;
pub mod sources;

pub use aggregator::{QuoteAggregator, TickerSource};
pub use normalize::{to_atomic_units, QuoteStyle, MAX_DECIMALS};
pub use sanity::{check, review, DeviationPolicy, MissingSecondaryAction, Rejection, SanityReport};

use rust_decimal::Decimal;

use crate::types::Ticker;

/// Outcome of one source request
#[derive(Debug, Clone)]
pub struct Quote {
    pub ticker: Ticker,
    pub source: String,
    /// Raw value as reported by the source
    pub value: Option<Decimal>,
    pub success: bool,
    pub error: Option<String>,
}

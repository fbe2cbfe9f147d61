//! Quote source implementations (Chainlink feeds, CoinGecko market data)

mod chainlink;
mod coingecko;

pub use chainlink::ChainlinkSource;
pub use coingecko::{CoinGeckoSource, COINGECKO_API_URL};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::Ticker;

/// One remote price feed, queried per ticker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Raw quote for `ticker`, in the source's own units
    async fn fetch(&self, ticker: Ticker) -> Result<Decimal>;
}

//! Quote Aggregator - Fans out to every configured source per cycle
//!
//! Each source request runs as its own task raced against the per-source
//! timeout. Failures degrade only the affected ticker to the zero
//! placeholder; the base ticker is the one exception.

use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{OracleError, Result};
use crate::oracle::normalize::{to_atomic_units, QuoteStyle};
use crate::oracle::sources::QuoteSource;
use crate::oracle::Quote;
use crate::types::{AssetValues, Ticker};

/// One ticker bound to the source that prices it
#[derive(Clone)]
pub struct TickerSource {
    pub ticker: Ticker,
    /// Source label for logs (e.g. "chainlink", "coingecko")
    pub label: String,
    pub source: Arc<dyn QuoteSource>,
    pub style: QuoteStyle,
    pub decimals: u32,
}

pub struct QuoteAggregator {
    sources: Vec<TickerSource>,
    timeout: Duration,
    granularity: u64,
    required: Option<Ticker>,
}

impl QuoteAggregator {
    pub fn new(sources: Vec<TickerSource>, timeout: Duration, granularity: u64) -> Self {
        Self {
            sources,
            timeout,
            granularity,
            required: None,
        }
    }

    /// Make `ticker` mandatory: aggregation fails without it
    pub fn require(mut self, ticker: Ticker) -> Self {
        self.required = Some(ticker);
        self
    }

    /// Query every source concurrently. Returns one quote per source, in
    /// configuration order, after all of them resolved or timed out.
    pub async fn fetch_quotes(&self) -> Vec<Quote> {
        let handles = self.sources.iter().cloned().map(|entry| {
            let timeout = self.timeout;
            tokio::spawn(async move { fetch_one(&entry, timeout).await })
        });

        join_all(handles)
            .await
            .into_iter()
            .zip(&self.sources)
            .map(|(joined, entry)| {
                joined.unwrap_or_else(|e| {
                    Quote::failure(entry.ticker, &entry.label, format!("fetch task failed: {}", e))
                })
            })
            .collect()
    }

    /// Fetch and normalize all quotes into fixed-point values.
    pub async fn aggregate(&self) -> Result<AssetValues> {
        let quotes = self.fetch_quotes().await;
        let values = self.normalize(&quotes);

        if let Some(base) = self.required {
            if values.get(base) == 0 {
                return Err(OracleError::BaseAssetMissing(base));
            }
        }

        tracing::debug!(
            sources = self.sources.len(),
            zeroed = values.zero_tickers().len(),
            "Quotes aggregated"
        );
        Ok(values)
    }

    fn normalize(&self, quotes: &[Quote]) -> AssetValues {
        let mut values = AssetValues::zeroed();

        for (quote, entry) in quotes.iter().zip(&self.sources) {
            let raw = match (&quote.value, quote.success) {
                (Some(raw), true) => *raw,
                _ => {
                    let err = OracleError::SourceUnavailable {
                        ticker: quote.ticker,
                        reason: quote.error.clone().unwrap_or_default(),
                    };
                    tracing::warn!(source = %quote.source, error = %err, "Quote dropped");
                    continue;
                }
            };

            match to_atomic_units(raw, entry.style, entry.decimals, self.granularity) {
                Some(value) => values.set(entry.ticker, value),
                None => {
                    tracing::warn!(
                        ticker = %entry.ticker,
                        source = %entry.label,
                        raw = %raw,
                        "Quote not representable in atomic units, using zero"
                    );
                }
            }
        }

        values
    }
}

async fn fetch_one(entry: &TickerSource, timeout: Duration) -> Quote {
    match tokio::time::timeout(timeout, entry.source.fetch(entry.ticker)).await {
        Ok(Ok(value)) => Quote::success(entry.ticker, &entry.label, value),
        Ok(Err(e)) => Quote::failure(entry.ticker, &entry.label, format!("{:#}", e)),
        Err(_) => Quote::failure(
            entry.ticker,
            &entry.label,
            format!("timed out after {}ms", timeout.as_millis()),
        ),
    }
}

impl Quote {
    pub fn success(ticker: Ticker, source: &str, value: Decimal) -> Self {
        Self {
            ticker,
            source: source.to_string(),
            value: Some(value),
            success: true,
            error: None,
        }
    }

    pub fn failure(ticker: Ticker, source: &str, error: String) -> Self {
        Self {
            ticker,
            source: source.to_string(),
            value: None,
            success: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::sources::MockQuoteSource;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct SlowSource {
        delay: Duration,
        value: Decimal,
    }

    #[async_trait]
    impl QuoteSource for SlowSource {
        async fn fetch(&self, _ticker: Ticker) -> anyhow::Result<Decimal> {
            tokio::time::sleep(self.delay).await;
            Ok(self.value)
        }
    }

    fn entry(ticker: Ticker, source: Arc<dyn QuoteSource>) -> TickerSource {
        TickerSource {
            ticker,
            label: "test".to_string(),
            source,
            style: QuoteStyle::Direct,
            decimals: 0,
        }
    }

    fn fixed(value: Decimal) -> Arc<dyn QuoteSource> {
        let mut mock = MockQuoteSource::new();
        mock.expect_fetch().returning(move |_| Ok(value));
        Arc::new(mock)
    }

    fn failing() -> Arc<dyn QuoteSource> {
        let mut mock = MockQuoteSource::new();
        mock.expect_fetch()
            .returning(|t| Err(anyhow!("rpc error for {}", t)));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn all_sources_succeeding_leave_no_placeholders() {
        let sources = Ticker::ALL
            .iter()
            .enumerate()
            .map(|(i, &t)| entry(t, fixed(Decimal::from(i as u64 + 1))))
            .collect();
        let aggregator =
            QuoteAggregator::new(sources, Duration::from_secs(1), 1).require(Ticker::XUSD);

        let values = aggregator.aggregate().await.unwrap();
        assert!(values.zero_tickers().is_empty());
        assert_eq!(values.get(Ticker::XAG), 1_000_000_000_000);
        assert_eq!(values.get(Ticker::XUSD), 13_000_000_000_000);
    }

    #[tokio::test]
    async fn failed_source_degrades_only_its_ticker() {
        let aggregator = QuoteAggregator::new(
            vec![
                entry(Ticker::XUSD, fixed(dec!(1.5))),
                entry(Ticker::XEUR, failing()),
                entry(Ticker::XGBP, fixed(dec!(0.8))),
            ],
            Duration::from_secs(1),
            1,
        )
        .require(Ticker::XUSD);

        let values = aggregator.aggregate().await.unwrap();
        assert_eq!(values.get(Ticker::XUSD), 1_500_000_000_000);
        assert_eq!(values.get(Ticker::XEUR), 0);
        assert_eq!(values.get(Ticker::XGBP), 800_000_000_000);
    }

    #[tokio::test]
    async fn missing_base_asset_fails_the_cycle() {
        let aggregator = QuoteAggregator::new(
            vec![
                entry(Ticker::XUSD, failing()),
                entry(Ticker::XEUR, fixed(dec!(1))),
            ],
            Duration::from_secs(1),
            1,
        )
        .require(Ticker::XUSD);

        let err = aggregator.aggregate().await.unwrap_err();
        assert!(matches!(err, OracleError::BaseAssetMissing(Ticker::XUSD)));
    }

    #[tokio::test]
    async fn non_positive_value_yields_placeholder() {
        let aggregator = QuoteAggregator::new(
            vec![
                entry(Ticker::XUSD, fixed(dec!(2))),
                entry(Ticker::XJPY, fixed(dec!(-4))),
            ],
            Duration::from_secs(1),
            1,
        );

        let values = aggregator.aggregate().await.unwrap();
        assert_eq!(values.get(Ticker::XJPY), 0);
    }

    #[tokio::test]
    async fn timeout_is_isolated_to_the_slow_source() {
        let slow: Arc<dyn QuoteSource> = Arc::new(SlowSource {
            delay: Duration::from_secs(5),
            value: dec!(9),
        });
        let aggregator = QuoteAggregator::new(
            vec![
                entry(Ticker::XUSD, fixed(dec!(1))),
                entry(Ticker::XCHF, slow),
                entry(Ticker::XNOK, fixed(dec!(3))),
            ],
            Duration::from_millis(50),
            1,
        );

        let started = std::time::Instant::now();
        let quotes = aggregator.fetch_quotes().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(quotes.len(), 3);
        assert!(quotes[0].success);
        assert!(!quotes[1].success);
        assert!(quotes[1].error.as_deref().unwrap_or("").contains("timed out"));
        assert!(quotes[2].success);

        let values = aggregator.aggregate().await.unwrap();
        assert_eq!(values.get(Ticker::XCHF), 0);
        assert_eq!(values.get(Ticker::XNOK), 3_000_000_000_000);
    }
}

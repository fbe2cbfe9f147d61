//! Poll Scheduler - Drives one aggregation cycle per interval
//!
//! A cycle aggregates primary and secondary quotes concurrently, runs the
//! sanity check and commits the result. Cycles never overlap.

use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{OracleError, Result};
use crate::ledger::Ledger;
use crate::oracle::{review, DeviationPolicy, QuoteAggregator};
use crate::types::{PricingRecord, Ticker};

pub struct PollScheduler {
    primary: QuoteAggregator,
    /// Cross-check source; `None` disables the sanity check
    secondary: Option<QuoteAggregator>,
    policy: DeviationPolicy,
    base_ticker: Ticker,
    ledger: Ledger,
    interval: Duration,
    cycle_guard: Mutex<()>,
}

impl PollScheduler {
    pub fn new(
        primary: QuoteAggregator,
        secondary: Option<QuoteAggregator>,
        policy: DeviationPolicy,
        base_ticker: Ticker,
        ledger: Ledger,
        interval: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
            base_ticker,
            ledger,
            interval,
            cycle_guard: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run cycles until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.interval.as_secs(),
            sanity = self.secondary.is_some(),
            "⏱️ Poll scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(record) => info!(id = record.id, "✅ Cycle complete"),
                        Err(e @ OracleError::BaseAssetMissing(_)) => {
                            warn!(error = %e, "Cycle skipped, retrying next tick");
                        }
                        Err(e) => error!(error = %e, "❌ Cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Poll scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One aggregation cycle. Concurrent callers are serialized.
    pub async fn run_cycle(&self) -> Result<PricingRecord> {
        let _guard = self.cycle_guard.lock().await;
        let span = info_span!("cycle", cycle_id = %Uuid::new_v4());
        self.cycle_inner().instrument(span).await
    }

    async fn cycle_inner(&self) -> Result<PricingRecord> {
        let secondary = async {
            match &self.secondary {
                Some(aggregator) => Some(aggregator.aggregate().await),
                None => None,
            }
        };
        let (primary, secondary) = tokio::join!(self.primary.aggregate(), secondary);

        let mut values = primary?;

        if let Some(secondary) = secondary {
            let report = review(&values, &secondary?, &self.policy);
            for (ticker, rejection) in &report.rejected {
                warn!(ticker = %ticker, rejection = ?rejection, "Quote rejected by sanity check");
            }
            values = report.values;

            if values.get(self.base_ticker) == 0 {
                return Err(OracleError::BaseAssetMissing(self.base_ticker));
            }
        }

        let zeroed = values.zero_tickers();
        if !zeroed.is_empty() {
            warn!(tickers = ?zeroed, "Committing with zero placeholders");
        }

        self.ledger.commit(&values).await
    }
}

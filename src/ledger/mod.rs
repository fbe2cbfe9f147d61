//! Ledger - Transactional append of signed pricing records
//!
//! A commit inserts the row, derives its moving averages from earlier rows,
//! signs the canonical payload and stores the signature, all inside one
//! store transaction.

mod moving_average;

pub use moving_average::{default_specs, floor_mean, AverageWindow, MovingAverageSpec};

use chrono::Utc;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::persistence::{LedgerStore, LedgerTx};
use crate::signing::MessageSigner;
use crate::types::{AssetValues, MovingAverages, PricingRecord};

/// Signed message layout: optional `id`, tickers in canonical order, then
/// `MA1`..`MA3`.
pub struct CanonicalPayload<'a> {
    pub id: Option<i64>,
    pub values: &'a AssetValues,
    pub averages: &'a MovingAverages,
}

impl Serialize for CanonicalPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let len = self.id.map_or(0, |_| 1) + crate::types::Ticker::COUNT + 3;
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(id) = self.id {
            map.serialize_entry("id", &id)?;
        }
        for (ticker, value) in self.values.iter() {
            map.serialize_entry(ticker.as_str(), &value)?;
        }
        for (name, value) in MovingAverages::FIELD_NAMES
            .iter()
            .zip(self.averages.as_array())
        {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

pub struct Ledger {
    store: LedgerStore,
    signer: Arc<dyn MessageSigner>,
    averages: Vec<MovingAverageSpec>,
}

impl Ledger {
    /// At most three specs are used, bound to MA1..MA3 in order.
    pub fn new(
        store: LedgerStore,
        signer: Arc<dyn MessageSigner>,
        averages: Vec<MovingAverageSpec>,
    ) -> Self {
        if averages.len() > 3 {
            warn!(count = averages.len(), "Only the first three moving averages are used");
        }
        Self {
            store,
            signer,
            averages: averages.into_iter().take(3).collect(),
        }
    }

    /// Compact JSON the ledger signs for a record
    pub fn canonical_payload(values: &AssetValues, averages: &MovingAverages) -> Result<String> {
        Ok(serde_json::to_string(&CanonicalPayload {
            id: None,
            values,
            averages,
        })?)
    }

    pub async fn commit(&self, values: &AssetValues) -> Result<PricingRecord> {
        self.commit_at(values, Utc::now().timestamp()).await
    }

    /// Commit with an explicit creation time (unix seconds)
    pub async fn commit_at(&self, values: &AssetValues, now: i64) -> Result<PricingRecord> {
        let mut tx = self.store.begin().await?;

        match self.write_record(&mut tx, values, now).await {
            Ok(record) => {
                tx.commit().await?;
                info!(
                    id = record.id,
                    ma1 = record.averages.ma1,
                    ma2 = record.averages.ma2,
                    ma3 = record.averages.ma3,
                    "📒 Pricing record committed"
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed, relying on drop");
                }
                Err(e)
            }
        }
    }

    async fn write_record(
        &self,
        tx: &mut LedgerTx,
        values: &AssetValues,
        now: i64,
    ) -> Result<PricingRecord> {
        let id = tx.insert_record(values, now).await?;

        let mut averages = Vec::with_capacity(self.averages.len());
        for spec in &self.averages {
            let window = tx.window_values(spec.ticker, spec.window, id, now).await?;
            averages.push(floor_mean(&window));
        }
        tx.update_averages(id, &MovingAverages::from_slice(&averages))
            .await?;

        // Sign what was actually stored
        let mut record = tx.fetch_record(id).await?;
        let payload = Self::canonical_payload(&record.values, &record.averages)?;
        let signature = self.signer.sign(payload.as_bytes())?;
        tx.update_signature(id, &signature).await?;

        record.signature = signature;
        Ok(record)
    }

    pub async fn latest(&self) -> Result<Option<PricingRecord>> {
        self.store.latest_record().await
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }
}

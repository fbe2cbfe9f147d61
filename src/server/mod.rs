//! Record Server - Versioned, freshness-bounded read of the latest record
//!
//! Two response schemas are supported:
//! * V1 signs at serve time over a payload that also carries the record id,
//!   and reports the stored creation time.
//! * V2 returns the signature stored at commit time, leaves the id
//!   unsigned, and reports the serve time.

mod api;

pub use api::create_router;

use chrono::Utc;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::Arc;

use crate::error::{OracleError, Result};
use crate::ledger::CanonicalPayload;
use crate::persistence::LedgerStore;
use crate::signing::{MessageSigner, SignatureCompact};
use crate::types::{AssetValues, MovingAverages, PricingRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVersion {
    V1,
    V2,
}

impl RecordVersion {
    pub const LATEST: RecordVersion = RecordVersion::V2;

    pub fn number(&self) -> u32 {
        match self {
            RecordVersion::V1 => 1,
            RecordVersion::V2 => 2,
        }
    }
}

impl TryFrom<u32> for RecordVersion {
    type Error = OracleError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(RecordVersion::V1),
            2 => Ok(RecordVersion::V2),
            other => Err(OracleError::UnsupportedVersion(other)),
        }
    }
}

/// Record as returned to consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRecordView {
    pub id: i64,
    pub values: AssetValues,
    pub averages: MovingAverages,
    pub signature: SignatureCompact,
    pub timestamp: i64,
}

impl Serialize for SignedRecordView {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (ticker, value) in self.values.iter() {
            map.serialize_entry(ticker.as_str(), &value)?;
        }
        for (name, value) in MovingAverages::FIELD_NAMES
            .iter()
            .zip(self.averages.as_array())
        {
            map.serialize_entry(name, &value)?;
        }
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("signature", &self.signature.to_hex())?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.end()
    }
}

/// `{"pr": {...}}` envelope
#[derive(Debug, serde::Serialize)]
pub struct PricingRecordResponse {
    pub pr: SignedRecordView,
}

pub struct RecordServer {
    store: LedgerStore,
    signer: Arc<dyn MessageSigner>,
    /// poll interval + tolerance
    max_age_secs: i64,
    default_version: RecordVersion,
}

impl RecordServer {
    pub fn new(
        store: LedgerStore,
        signer: Arc<dyn MessageSigner>,
        poll_interval_secs: u64,
        staleness_tolerance_secs: u64,
    ) -> Self {
        Self {
            store,
            signer,
            max_age_secs: i64::try_from(poll_interval_secs.saturating_add(staleness_tolerance_secs))
                .unwrap_or(i64::MAX),
            default_version: RecordVersion::LATEST,
        }
    }

    pub fn with_default_version(mut self, version: RecordVersion) -> Self {
        self.default_version = version;
        self
    }

    pub fn default_version(&self) -> RecordVersion {
        self.default_version
    }

    /// V1 signed message: `id` first, then the canonical record payload
    pub fn v1_payload(record: &PricingRecord) -> Result<String> {
        Ok(serde_json::to_string(&CanonicalPayload {
            id: Some(record.id),
            values: &record.values,
            averages: &record.averages,
        })?)
    }

    pub async fn serve(&self, version: RecordVersion) -> Result<SignedRecordView> {
        self.serve_at(version, Utc::now().timestamp()).await
    }

    pub async fn serve_at(&self, version: RecordVersion, now: i64) -> Result<SignedRecordView> {
        let record = self.fresh_record(now).await?;

        if record.signature.is_placeholder() {
            return Err(OracleError::CorruptRecord(format!(
                "record {} has no signature",
                record.id
            )));
        }

        let (signature, timestamp) = match version {
            RecordVersion::V1 => {
                let payload = Self::v1_payload(&record)?;
                (self.signer.sign(payload.as_bytes())?, record.timestamp)
            }
            RecordVersion::V2 => (record.signature, now),
        };

        Ok(SignedRecordView {
            id: record.id,
            values: record.values,
            averages: record.averages,
            signature,
            timestamp,
        })
    }

    /// Latest record, or an error if there is none within the age bound
    pub async fn fresh_record(&self, now: i64) -> Result<PricingRecord> {
        let record = self
            .store
            .latest_record()
            .await?
            .ok_or(OracleError::NoRecord)?;

        let age_secs = now - record.timestamp;
        if age_secs > self.max_age_secs {
            return Err(OracleError::StaleRecord {
                age_secs,
                max_age_secs: self.max_age_secs,
            });
        }
        Ok(record)
    }
}

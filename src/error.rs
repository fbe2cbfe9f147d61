//! Oracle error taxonomy

use thiserror::Error;

use crate::signing::SignatureError;
use crate::types::Ticker;

#[derive(Debug, Error)]
pub enum OracleError {
    /// A single quote source failed or timed out. Absorbed as a zero value.
    #[error("source for {ticker} unavailable: {reason}")]
    SourceUnavailable { ticker: Ticker, reason: String },

    /// The base ticker could not be determined; no record for this cycle.
    #[error("base asset {0} missing, cycle aborted")]
    BaseAssetMissing(Ticker),

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("corrupt pricing record: {0}")]
    CorruptRecord(String),

    #[error("signature decode error: {0}")]
    Signature(#[from] SignatureError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no recent pricing record (age {age_secs}s, limit {max_age_secs}s)")]
    StaleRecord { age_secs: i64, max_age_secs: i64 },

    #[error("no pricing record committed yet")]
    NoRecord,

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, OracleError>;

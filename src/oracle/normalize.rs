//! Fixed-point normalization of raw quotes

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::ATOMIC_UNITS;

/// How a source expresses its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    /// Value is already the record's quote (e.g. USD per unit)
    Direct,
    /// Value is the reciprocal of the record's quote
    Inverse,
}

impl Default for QuoteStyle {
    fn default() -> Self {
        QuoteStyle::Direct
    }
}

/// Largest raw decimal count accepted; keeps `10^decimals` inside u64
pub const MAX_DECIMALS: u32 = 18;

/// Convert a raw source value to atomic units, floored to `granularity`.
///
/// * direct: `raw / 10^decimals * 10^12`
/// * inverse: `(10^decimals / raw) * 10^12`
///
/// Returns `None` for non-positive input, arithmetic overflow, or a
/// result that does not fit in `u64`.
pub fn to_atomic_units(
    raw: Decimal,
    style: QuoteStyle,
    decimals: u32,
    granularity: u64,
) -> Option<u64> {
    if raw <= Decimal::ZERO || decimals > MAX_DECIMALS {
        return None;
    }
    let unit = Decimal::from(10u64.pow(decimals));
    let atomic = Decimal::from(ATOMIC_UNITS);

    let scaled = match style {
        QuoteStyle::Direct => raw.checked_div(unit)?.checked_mul(atomic)?,
        QuoteStyle::Inverse => unit.checked_div(raw)?.checked_mul(atomic)?,
    };

    let value = scaled.floor().to_u64()?;
    let granularity = granularity.max(1);
    Some(value - value % granularity)
}

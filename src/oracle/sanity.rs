//! Sanity Checker - Cross-validates primary quotes against a secondary source
//!
//! Deterministic: depends only on its inputs, never on time or randomness.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{AssetValues, Ticker};

/// What to do with a primary quote that has no secondary counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSecondaryAction {
    Zero,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationPolicy {
    /// Reject primary above `secondary * max_increase_ratio`
    pub max_increase_ratio: Decimal,
    /// Reject primary below `secondary * max_decrease_ratio`
    pub max_decrease_ratio: Decimal,
    pub missing_secondary: MissingSecondaryAction,
}

impl Default for DeviationPolicy {
    fn default() -> Self {
        Self {
            max_increase_ratio: dec!(1.15),
            max_decrease_ratio: dec!(0.85),
            missing_secondary: MissingSecondaryAction::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AboveBand { primary: u64, secondary: u64 },
    BelowBand { primary: u64, secondary: u64 },
    Unconfirmed { primary: u64 },
}

/// Checked values plus the reason for every zeroed ticker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityReport {
    pub values: AssetValues,
    pub rejected: Vec<(Ticker, Rejection)>,
}

/// Zero every primary value that deviates from, or is not confirmed by,
/// the secondary value for the same ticker.
pub fn check(
    primary: &AssetValues,
    secondary: &AssetValues,
    policy: &DeviationPolicy,
) -> AssetValues {
    review(primary, secondary, policy).values
}

/// [`check`] with the list of rejections
pub fn review(
    primary: &AssetValues,
    secondary: &AssetValues,
    policy: &DeviationPolicy,
) -> SanityReport {
    let mut values = *primary;
    let mut rejected = Vec::new();

    for ticker in Ticker::ALL {
        let p = primary.get(ticker);
        let s = secondary.get(ticker);
        if p == 0 {
            continue;
        }

        let rejection = if s > 0 {
            let pd = Decimal::from(p);
            let sd = Decimal::from(s);
            // A bound past Decimal::MAX is above any u64 primary
            let above = sd
                .checked_mul(policy.max_increase_ratio)
                .map_or(false, |upper| pd > upper);
            let below = sd
                .checked_mul(policy.max_decrease_ratio)
                .map_or(true, |lower| pd < lower);
            if above {
                Some(Rejection::AboveBand {
                    primary: p,
                    secondary: s,
                })
            } else if below {
                Some(Rejection::BelowBand {
                    primary: p,
                    secondary: s,
                })
            } else {
                None
            }
        } else {
            match policy.missing_secondary {
                MissingSecondaryAction::Zero => Some(Rejection::Unconfirmed { primary: p }),
                MissingSecondaryAction::Keep => None,
            }
        };

        if let Some(rejection) = rejection {
            values.set(ticker, 0);
            rejected.push((ticker, rejection));
        }
    }

    SanityReport { values, rejected }
}

//! Core types used throughout the oracle
//!
//! Defines the tracked tickers, the per-ticker value table and the
//! committed pricing record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::signing::SignatureCompact;

/// Fixed-point scale: one whole unit is 10^12 atomic units.
pub const ATOMIC_UNITS: u64 = 1_000_000_000_000;

/// Tracked assets, in canonical record order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ticker {
    #[serde(rename = "xAG")]
    XAG,
    #[serde(rename = "xAU")]
    XAU,
    #[serde(rename = "xAUD")]
    XAUD,
    #[serde(rename = "xBTC")]
    XBTC,
    #[serde(rename = "xCAD")]
    XCAD,
    #[serde(rename = "xCHF")]
    XCHF,
    #[serde(rename = "xCNY")]
    XCNY,
    #[serde(rename = "xEUR")]
    XEUR,
    #[serde(rename = "xGBP")]
    XGBP,
    #[serde(rename = "xJPY")]
    XJPY,
    #[serde(rename = "xNOK")]
    XNOK,
    #[serde(rename = "xNZD")]
    XNZD,
    #[serde(rename = "xUSD")]
    XUSD,
}

impl Default for Ticker {
    fn default() -> Self {
        Ticker::XUSD
    }
}

impl Ticker {
    pub const COUNT: usize = 13;

    /// Every ticker in canonical order
    pub const ALL: [Ticker; Ticker::COUNT] = [
        Ticker::XAG,
        Ticker::XAU,
        Ticker::XAUD,
        Ticker::XBTC,
        Ticker::XCAD,
        Ticker::XCHF,
        Ticker::XCNY,
        Ticker::XEUR,
        Ticker::XGBP,
        Ticker::XJPY,
        Ticker::XNOK,
        Ticker::XNZD,
        Ticker::XUSD,
    ];

    /// Wire name, also used as the ledger column name
    pub fn as_str(&self) -> &'static str {
        match self {
            Ticker::XAG => "xAG",
            Ticker::XAU => "xAU",
            Ticker::XAUD => "xAUD",
            Ticker::XBTC => "xBTC",
            Ticker::XCAD => "xCAD",
            Ticker::XCHF => "xCHF",
            Ticker::XCNY => "xCNY",
            Ticker::XEUR => "xEUR",
            Ticker::XGBP => "xGBP",
            Ticker::XJPY => "xJPY",
            Ticker::XNOK => "xNOK",
            Ticker::XNZD => "xNZD",
            Ticker::XUSD => "xUSD",
        }
    }

    /// Position in canonical order
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Parse from wire name (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        Ticker::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fixed-point value per ticker. Missing tickers are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetValues {
    values: [u64; Ticker::COUNT],
}

impl AssetValues {
    /// All tickers at the zero placeholder
    pub fn zeroed() -> Self {
        Self::default()
    }

    pub fn get(&self, ticker: Ticker) -> u64 {
        self.values[ticker.index()]
    }

    pub fn set(&mut self, ticker: Ticker, value: u64) {
        self.values[ticker.index()] = value;
    }

    pub fn with(mut self, ticker: Ticker, value: u64) -> Self {
        self.set(ticker, value);
        self
    }

    /// (ticker, value) pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Ticker, u64)> + '_ {
        Ticker::ALL.iter().map(move |&t| (t, self.get(t)))
    }

    /// Tickers currently holding the zero placeholder
    pub fn zero_tickers(&self) -> Vec<Ticker> {
        self.iter().filter(|(_, v)| *v == 0).map(|(t, _)| t).collect()
    }
}

impl FromIterator<(Ticker, u64)> for AssetValues {
    fn from_iter<I: IntoIterator<Item = (Ticker, u64)>>(iter: I) -> Self {
        let mut values = AssetValues::zeroed();
        for (ticker, value) in iter {
            values.set(ticker, value);
        }
        values
    }
}

/// Moving-average slots carried on every record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovingAverages {
    pub ma1: u64,
    pub ma2: u64,
    pub ma3: u64,
}

impl MovingAverages {
    pub const FIELD_NAMES: [&'static str; 3] = ["MA1", "MA2", "MA3"];

    pub fn as_array(&self) -> [u64; 3] {
        [self.ma1, self.ma2, self.ma3]
    }

    pub fn from_slice(values: &[u64]) -> Self {
        let at = |i: usize| values.get(i).copied().unwrap_or(0);
        Self {
            ma1: at(0),
            ma2: at(1),
            ma3: at(2),
        }
    }
}

/// One committed ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingRecord {
    /// Sequence id assigned by the store
    pub id: i64,
    pub values: AssetValues,
    pub averages: MovingAverages,
    /// Creation time, unix seconds
    pub timestamp: i64,
    pub signature: SignatureCompact,
}

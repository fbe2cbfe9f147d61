//! Moving-average windows over the ledger

use serde::{Deserialize, Serialize};

use crate::types::Ticker;

/// Which prior rows feed an average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AverageWindow {
    /// Last `rows` records whose value for the ticker is non-zero
    LastNonZero { rows: u32 },
    /// Last `rows` records no older than `max_age_secs`
    Trailing { rows: u32, max_age_secs: u64 },
}

impl AverageWindow {
    pub fn rows(&self) -> u32 {
        match self {
            AverageWindow::LastNonZero { rows } | AverageWindow::Trailing { rows, .. } => *rows,
        }
    }
}

/// One averaged field (MA1..MA3, in declaration order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovingAverageSpec {
    pub ticker: Ticker,
    pub window: AverageWindow,
}

impl MovingAverageSpec {
    pub fn last_non_zero(ticker: Ticker, rows: u32) -> Self {
        Self {
            ticker,
            window: AverageWindow::LastNonZero { rows },
        }
    }

    pub fn trailing(ticker: Ticker, rows: u32, max_age_secs: u64) -> Self {
        Self {
            ticker,
            window: AverageWindow::Trailing { rows, max_age_secs },
        }
    }
}

/// xUSD over 360 / 1080 / 2160 rows: 3h, 9h and 18h at a 30s poll
pub fn default_specs() -> Vec<MovingAverageSpec> {
    vec![
        MovingAverageSpec::last_non_zero(Ticker::XUSD, 360),
        MovingAverageSpec::last_non_zero(Ticker::XUSD, 1080),
        MovingAverageSpec::last_non_zero(Ticker::XUSD, 2160),
    ]
}

/// floor(sum / count); 0 for an empty window
pub fn floor_mean(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let sum: u128 = values.iter().map(|&v| v as u128).sum();
    // mean of u64 values always fits in u64
    (sum / values.len() as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_floors_and_handles_empty() {
        assert_eq!(floor_mean(&[]), 0);
        assert_eq!(floor_mean(&[10, 20, 30]), 20);
        assert_eq!(floor_mean(&[1, 2]), 1);
    }

    #[test]
    fn mean_does_not_overflow() {
        assert_eq!(floor_mean(&[u64::MAX, u64::MAX, u64::MAX]), u64::MAX);
    }

    #[test]
    fn window_deserializes_from_tagged_form() {
        let spec: MovingAverageSpec = serde_json::from_str(
            r#"{"ticker":"xUSD","window":{"kind":"trailing","rows":10,"max_age_secs":600}}"#,
        )
        .unwrap();
        assert_eq!(spec, MovingAverageSpec::trailing(Ticker::XUSD, 10, 600));
        assert_eq!(spec.window.rows(), 10);
    }
}

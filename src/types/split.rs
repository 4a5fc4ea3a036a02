//! Stock split / corporate action record (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered split: `ratio_from` shares become `ratio_to` shares on
/// `split_date`.
///
/// Worked example from the original journal: a 4:1 reverse split has
/// `ratio_from = 4`, `ratio_to = 1` — historical quantity divides by 4,
/// historical price multiplies by 4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSplit {
    /// Database row id.
    pub id: i64,
    /// Affected symbol.
    pub symbol: String,
    /// Date the split took effect.
    pub split_date: DateTime<Utc>,
    /// Shares-before side of the ratio.
    pub ratio_from: i64,
    /// Shares-after side of the ratio.
    pub ratio_to: i64,
}

impl StockSplit {
    /// Quantity adjustment factor: `ratio_to / ratio_from`.
    #[must_use]
    pub fn adjustment_factor(&self) -> f64 {
        self.ratio_to as f64 / self.ratio_from as f64
    }

    /// Price adjustment factor: `ratio_from / ratio_to`.
    #[must_use]
    pub fn price_factor(&self) -> f64 {
        self.ratio_from as f64 / self.ratio_to as f64
    }

    /// True when shares decrease (`ratio_from > ratio_to`).
    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.ratio_from > self.ratio_to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    #[test]
    fn reverse_split_factors() {
        let split = StockSplit {
            id: 1,
            symbol: "NVDA".to_string(),
            split_date: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            ratio_from: 4,
            ratio_to: 1,
        };
        assert!(split.is_reverse());
        assert_abs_diff_eq!(split.adjustment_factor(), 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(split.price_factor(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn forward_split_factors() {
        let split = StockSplit {
            id: 2,
            symbol: "AAPL".to_string(),
            split_date: Utc.with_ymd_and_hms(2020, 8, 31, 0, 0, 0).unwrap(),
            ratio_from: 1,
            ratio_to: 4,
        };
        assert!(!split.is_reverse());
        assert_abs_diff_eq!(split.adjustment_factor(), 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(split.price_factor(), 0.25, epsilon = 1e-12);
    }
}

//! Split Calendar: maps `(symbol, date) -> (ratio_from, ratio_to)` and
//! supplies adjustment factors (spec.md §4.1).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::{Money, StockSplit};

/// Read-mostly, process-wide registry of stock splits, with a cache
/// invalidated on mutation (spec.md §5). Grounded on the
/// `parking_lot::RwLock<FxHashMap<..>>` pattern used for position tracking
/// in `portfolio-manager/src/position.rs`.
#[derive(Debug, Default)]
pub struct SplitCalendar {
    by_symbol: RwLock<FxHashMap<String, Vec<StockSplit>>>,
    next_id: AtomicU64,
    generation: AtomicU64,
}

impl SplitCalendar {
    /// Create an empty calendar.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a split, keeping each symbol's list sorted by
    /// `(split_date asc, id asc)` as spec.md §4.1 requires for deterministic
    /// ordering within a date. Invalidates the process-wide cache
    /// generation counter.
    pub fn register_split(
        &self,
        symbol: impl Into<String>,
        split_date: DateTime<Utc>,
        ratio_from: i64,
        ratio_to: i64,
    ) -> StockSplit {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel) as i64;
        let symbol = symbol.into();
        let split = StockSplit {
            id,
            symbol: symbol.clone(),
            split_date,
            ratio_from,
            ratio_to,
        };

        let mut by_symbol = self.by_symbol.write();
        let entries = by_symbol.entry(symbol).or_default();
        entries.push(split.clone());
        entries.sort_by(|a, b| a.split_date.cmp(&b.split_date).then(a.id.cmp(&b.id)));
        drop(by_symbol);

        self.generation.fetch_add(1, Ordering::Release);
        split
    }

    /// Current cache generation, bumped on every mutation. Callers holding
    /// a cached view can compare this to know to refresh.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// All splits registered for `symbol`, in deterministic order.
    #[must_use]
    pub fn splits_for(&self, symbol: &str) -> Vec<StockSplit> {
        self.by_symbol
            .read()
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Adjust a historical `(qty, price)` pair for every split registered
    /// strictly after `execution_time`, applied multiplicatively in
    /// `(split_date asc, id asc)` order (spec.md §4.1). Returns the
    /// adjusted quantity, adjusted price, and the list of splits applied.
    ///
    /// Quantity and price are each rounded to 4 decimals using banker's
    /// rounding after all factors are composed, so
    /// `adjusted_qty * adjusted_price ≈ qty * price` modulo that single
    /// rounding step (spec.md §8).
    #[must_use]
    pub fn adjust(
        &self,
        symbol: &str,
        execution_time: DateTime<Utc>,
        qty: Money,
        price: Money,
    ) -> (Money, Money, Vec<StockSplit>) {
        let applicable: Vec<StockSplit> = self
            .splits_for(symbol)
            .into_iter()
            .filter(|s| s.split_date > execution_time)
            .collect();

        if applicable.is_empty() {
            return (qty, price, applicable);
        }

        let mut qty_factor = 1.0_f64;
        let mut price_factor = 1.0_f64;
        for split in &applicable {
            qty_factor *= split.adjustment_factor();
            price_factor *= split.price_factor();
        }

        let adjusted_qty = Money::from_f64(qty.as_f64() * qty_factor);
        let adjusted_price = Money::from_f64(price.as_f64() * price_factor);

        (adjusted_qty, adjusted_price, applicable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn no_splits_is_identity() {
        let calendar = SplitCalendar::new();
        let (q, p, applied) = calendar.adjust(
            "AAPL",
            dt(2024, 1, 1),
            Money::from_units(100),
            Money::from_units(50),
        );
        assert_eq!(q, Money::from_units(100));
        assert_eq!(p, Money::from_units(50));
        assert!(applied.is_empty());
    }

    #[test]
    fn reverse_split_scales_qty_down_price_up() {
        let calendar = SplitCalendar::new();
        calendar.register_split("NVDA", dt(2025, 6, 1), 4, 1);

        let (q, p, applied) = calendar.adjust(
            "NVDA",
            dt(2025, 5, 15),
            Money::from_units(400),
            Money::from_units(25),
        );
        assert_eq!(applied.len(), 1);
        assert_eq!(q, Money::from_units(100));
        assert_eq!(p, Money::from_units(100));
    }

    #[test]
    fn split_before_execution_time_not_applied() {
        let calendar = SplitCalendar::new();
        calendar.register_split("NVDA", dt(2025, 6, 1), 4, 1);

        let (q, p, applied) = calendar.adjust(
            "NVDA",
            dt(2025, 7, 1),
            Money::from_units(100),
            Money::from_units(100),
        );
        assert!(applied.is_empty());
        assert_eq!(q, Money::from_units(100));
        assert_eq!(p, Money::from_units(100));
    }

    #[test]
    fn notional_preserved_modulo_rounding() {
        let calendar = SplitCalendar::new();
        calendar.register_split("XYZ", dt(2024, 3, 1), 3, 2);

        let qty = Money::from_f64(123.4567);
        let price = Money::from_f64(10.1234);
        let (aq, ap, _) = calendar.adjust("XYZ", dt(2024, 1, 1), qty, price);

        let before = qty.as_f64() * price.as_f64();
        let after = aq.as_f64() * ap.as_f64();
        assert_abs_diff_eq!(before, after, epsilon = 0.01);
    }

    #[test]
    fn register_bumps_generation() {
        let calendar = SplitCalendar::new();
        let g0 = calendar.generation();
        calendar.register_split("SPY", dt(2024, 1, 1), 1, 1);
        assert!(calendar.generation() > g0);
    }
}

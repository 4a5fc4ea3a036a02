//! Per-leg position ledger row (spec.md §3, §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fixed::Money;

/// Lifecycle status of a `LedgerEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerStatus {
    /// Non-zero quantity outstanding.
    Open,
    /// Quantity has returned to zero.
    Closed,
}

/// One row per `(underlying, leg_key)` currently or historically open
/// (spec.md §3). A re-open after closure creates a new row; closed rows are
/// retained for history, never overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Database row id, assigned on first persistence.
    pub id: Option<i64>,
    /// Underlying symbol.
    pub underlying: String,
    /// Canonical leg key (`Execution::leg_key`).
    pub leg_key: String,

    /// Signed quantity: positive long, negative short.
    pub quantity: Money,
    /// Per-unit average cost basis, always positive.
    pub avg_cost: Money,
    /// `avg_cost * |quantity| * multiplier`.
    pub total_cost: Money,
    /// Realized P&L accumulated on this row.
    pub realized_pnl: Money,

    /// Current status. `status == Closed` iff `quantity == 0`
    /// (spec.md §3 invariant).
    pub status: LedgerStatus,
    /// When this row first went from flat to open.
    pub opened_at: DateTime<Utc>,
    /// When this row last returned to flat, if it has.
    pub closed_at: Option<DateTime<Utc>>,

    /// The `Trade` this row is currently associated with, if any. A weak
    /// link by id, not an owned reference (spec.md §3 ownership note).
    pub trade_id: Option<i64>,
}

impl LedgerEntry {
    /// True if `quantity == 0`.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// True if long (positive quantity).
    #[must_use]
    pub fn is_long(&self) -> bool {
        self.quantity.raw() > 0
    }

    /// True if short (negative quantity).
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity.raw() < 0
    }

    /// Assert the `status == Closed ⇔ quantity == 0` invariant holds.
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        (self.status == LedgerStatus::Closed) == self.is_flat()
    }
}

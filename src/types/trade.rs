//! Logical multi-leg trade (spec.md §3) and its classification tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::fixed::{Greek, Money};

/// Lifecycle status of a `Trade`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeStatus {
    /// At least one leg still carries non-zero quantity.
    Open,
    /// Every leg has returned to flat.
    Closed,
}

/// Strategy classification tag (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    /// Single stock position.
    Stock,
    /// Single option leg.
    Single,
    /// Vertical call spread.
    VerticalCall,
    /// Vertical put spread.
    VerticalPut,
    /// Calendar spread, calls.
    CalendarCall,
    /// Calendar spread, puts.
    CalendarPut,
    /// Straddle (call + put, same strike/expiration).
    Straddle,
    /// Strangle (call + put, different strikes, same expiration).
    Strangle,
    /// Iron condor (short call spread + short put spread).
    IronCondor,
    /// Iron butterfly (iron condor with coincident short strikes).
    IronButterfly,
    /// Poor man's covered call.
    Pmcc,
    /// Covered call (long stock + short call).
    CoveredCall,
    /// No pattern matched; not an error (spec.md §7 `ClassificationUnknown`).
    Custom,
}

/// A snapshot of one leg's Greeks at a point in time (open or close),
/// persisted to the `trade_leg_greeks` table (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLegGreeks {
    /// Leg key this snapshot belongs to.
    pub leg_key: String,
    /// When the snapshot was captured.
    pub captured_at: DateTime<Utc>,
    /// Delta.
    pub delta: Greek,
    /// Gamma.
    pub gamma: Greek,
    /// Theta.
    pub theta: Greek,
    /// Vega.
    pub vega: Greek,
    /// Rho.
    pub rho: Greek,
    /// Implied volatility used to compute the above.
    pub implied_volatility: Greek,
}

/// A free-form label a caller may attach to a `Trade`.
pub type Tag = String;

/// A logical multi-leg position reconstructed from one or more executions
/// (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Database row id, assigned on first persistence.
    pub id: Option<i64>,
    /// Underlying symbol.
    pub underlying: String,
    /// Strategy classification.
    pub strategy_type: StrategyType,
    /// Lifecycle status.
    pub status: TradeStatus,
    /// Timestamp of the earliest opening execution.
    pub opened_at: DateTime<Utc>,
    /// Timestamp of the last closing execution, once closed.
    pub closed_at: Option<DateTime<Utc>>,
    /// Number of distinct legs.
    pub num_legs: usize,
    /// Number of executions grouped into this trade.
    pub num_executions: usize,

    /// Signed sum of `net_amount` over opening executions, pre-commission.
    /// Credits positive, debits negative (spec.md §4.3).
    pub opening_cost: Money,
    /// Realized P&L accumulated across this trade's legs.
    pub realized_pnl: Money,
    /// Sum of commission across all executions in this trade.
    pub total_commission: Money,
    /// Wash-sale adjustment. Always `0.00` by default — no computation rule
    /// exists in the source system (spec.md §9 Open Question 2).
    pub wash_sale_adjustment: Money,

    /// Shared id linking every trade in a roll chain.
    pub roll_chain_id: Option<uuid::Uuid>,
    /// The trade this one was rolled from, if any.
    pub rolled_from_trade_id: Option<i64>,
    /// The trade this one was rolled into, if any.
    pub rolled_to_trade_id: Option<i64>,
    /// Materialized flag, kept consistent with `rolled_from_trade_id`
    /// (original_source `schemas/roll.py`).
    pub is_roll: bool,
    /// True if this trade arose from an option assignment.
    pub is_assignment: bool,
    /// The trade an assignment originated from, if any.
    pub assigned_from_trade_id: Option<i64>,
    /// Free-form tags.
    pub tags: BTreeSet<Tag>,

    /// Max profit, if bounded. `None` for naked/unbounded-risk positions.
    pub max_profit: Option<Money>,
    /// Max risk, if bounded. `None` for naked/unbounded-risk positions.
    pub max_risk: Option<Money>,
    /// Breakeven prices.
    pub breakevens: Vec<Money>,
    /// Net delta across all legs, signed by leg direction.
    pub net_delta: Option<Greek>,
    /// Net theta across all legs, signed by leg direction.
    pub net_theta: Option<Greek>,
    /// Per-leg Greeks captured when the trade opened.
    pub greeks_at_open: Vec<TradeLegGreeks>,
    /// Per-leg Greeks captured when the trade closed.
    pub greeks_at_close: Vec<TradeLegGreeks>,
    /// Set when a provider call used a stale cached value for this trade's
    /// analytics (spec.md §7 `ProviderError` handling).
    pub analytics_partial: bool,
}

impl Trade {
    /// True once every leg has returned to flat.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Total realized P&L net of commission.
    #[must_use]
    pub fn net_pnl(&self) -> Money {
        self.realized_pnl - self.total_commission + self.wash_sale_adjustment
    }
}

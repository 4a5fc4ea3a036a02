//! Events relayed to the REST surface this crate doesn't own (spec.md §6).

use crate::types::Trade;

/// Event broadcast whenever derived state changes, suitable for relaying to
/// an external event bus. Grounded on `oms`'s `OrderEvent` broadcast-enum
/// convention.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A new `Trade` was materialized from grouped executions.
    TradeCreated(Trade),
    /// An existing `Trade` changed (new execution attached, analytics
    /// refreshed).
    TradeUpdated(Trade),
    /// A `Trade` transitioned to `Closed`.
    TradeClosed(Trade),
    /// Two trades were linked as a roll.
    RollLinked {
        /// The trade that was closed.
        from_trade_id: i64,
        /// The trade it rolled into.
        to_trade_id: i64,
        /// The chain id shared by both trades.
        roll_chain_id: uuid::Uuid,
    },
}

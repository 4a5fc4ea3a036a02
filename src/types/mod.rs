//! Core data model (spec.md §3).

pub mod execution;
pub mod fixed;
pub mod ledger;
pub mod margin;
pub mod split;
pub mod trade;

pub use execution::{Execution, OpenCloseIndicator, OptionType, SecurityType, Side};
pub use fixed::{Greek, Money};
pub use ledger::{LedgerEntry, LedgerStatus};
pub use margin::MarginSettings;
pub use split::StockSplit;
pub use trade::{StrategyType, Tag, Trade, TradeLegGreeks, TradeStatus};

//! Normalized execution record — the sole source of truth the core
//! consumes (spec.md §3, §6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fixed::Money;

/// Security type of the instrument executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    /// Listed option contract.
    Opt,
    /// Equity / ETF share.
    Stk,
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    /// Call.
    Call,
    /// Put.
    Put,
}

/// Fill direction as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bought.
    Bot,
    /// Sold.
    Sld,
}

impl Side {
    /// Signed quantity multiplier: `+1` for `Bot`, `-1` for `Sld`.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Bot => 1,
            Self::Sld => -1,
        }
    }
}

/// Broker-supplied open/close hint, when present (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenCloseIndicator {
    /// Broker reports this as an opening transaction.
    Open,
    /// Broker reports this as a closing transaction.
    Close,
}

/// A single, immutable broker execution (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Broker-unique execution identifier.
    pub exec_id: String,
    /// Broker order identifier.
    pub order_id: i64,
    /// Broker permanent identifier — fills sharing this are always grouped
    /// together (spec.md §4.3 rule 1).
    pub perm_id: i64,

    /// Underlying symbol (e.g. `"SPY"`).
    pub underlying: String,
    /// Security type.
    pub security_type: SecurityType,
    /// Option right, `None` for stock.
    pub option_type: Option<OptionType>,
    /// Strike price, `None` for stock.
    pub strike: Option<Money>,
    /// Expiration date, `None` for stock.
    pub expiration: Option<DateTime<Utc>>,
    /// Contract multiplier: 100 for options, 1 for stock.
    pub multiplier: i64,

    /// Buy/sell direction.
    pub side: Side,
    /// Fixed-point quantity (admits fractional shares, spec.md §3).
    pub quantity: Money,
    /// Execution price per unit.
    pub price: Money,
    /// Commission, tracked separately from `net_amount`.
    pub commission: Money,
    /// Signed net amount: negative for `Bot`, positive for `Sld`, never
    /// including commission (spec.md §3 invariant).
    pub net_amount: Money,

    /// Execution timestamp, always UTC.
    pub execution_time: DateTime<Utc>,
    /// Account identifier.
    pub account_id: String,
    /// Optional broker-supplied open/close hint.
    pub open_close_indicator: Option<OpenCloseIndicator>,
    /// Back-link to the `Trade` this execution has been grouped into, if
    /// any. `None` until the grouping engine attaches it.
    pub trade_id: Option<i64>,
}

impl Execution {
    /// Canonical leg key for this execution: `"STK"` for stock, or
    /// `"YYYYMMDD_strike_{C|P}"` for options (spec.md §3).
    ///
    /// # Panics
    /// Panics if an `Opt` execution is missing `strike`/`expiration`/
    /// `option_type` — the normalizer is responsible for rejecting such
    /// malformed executions before they reach this call site.
    #[must_use]
    pub fn leg_key(&self) -> String {
        match self.security_type {
            SecurityType::Stk => "STK".to_string(),
            SecurityType::Opt => {
                let expiration = self
                    .expiration
                    .expect("OPT execution missing expiration");
                let strike = self.strike.expect("OPT execution missing strike");
                let right = match self.option_type.expect("OPT execution missing option_type") {
                    OptionType::Call => 'C',
                    OptionType::Put => 'P',
                };
                format!("{}_{}_{}", expiration.format("%Y%m%d"), strike, right)
            }
        }
    }

    /// Signed quantity delta this execution applies to the ledger:
    /// `+quantity` for `Bot`, `-quantity` for `Sld` (spec.md §4.2).
    #[must_use]
    pub fn signed_delta(&self) -> Money {
        match self.side {
            Side::Bot => self.quantity,
            Side::Sld => -self.quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base(security_type: SecurityType) -> Execution {
        Execution {
            exec_id: "E1".into(),
            order_id: 1,
            perm_id: 1,
            underlying: "SPY".into(),
            security_type,
            option_type: None,
            strike: None,
            expiration: None,
            multiplier: 1,
            side: Side::Bot,
            quantity: Money::from_units(1),
            price: Money::from_units(1),
            commission: Money::ZERO,
            net_amount: Money::from_units(-1),
            execution_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            account_id: "ACC".into(),
            open_close_indicator: None,
            trade_id: None,
        }
    }

    #[test]
    fn stock_leg_key_is_stk() {
        let exec = base(SecurityType::Stk);
        assert_eq!(exec.leg_key(), "STK");
    }

    #[test]
    fn option_leg_key_format() {
        let mut exec = base(SecurityType::Opt);
        exec.option_type = Some(OptionType::Put);
        exec.strike = Some(Money::from_units(580));
        exec.expiration = Some(Utc.with_ymd_and_hms(2025, 11, 21, 0, 0, 0).unwrap());
        assert_eq!(exec.leg_key(), "20251121_580.0000_P");
    }

    #[test]
    fn signed_delta_matches_side() {
        let mut exec = base(SecurityType::Stk);
        exec.quantity = Money::from_units(100);
        exec.side = Side::Bot;
        assert_eq!(exec.signed_delta(), Money::from_units(100));
        exec.side = Side::Sld;
        assert_eq!(exec.signed_delta(), Money::from_units(-100));
    }
}

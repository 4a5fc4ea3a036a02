//! Position Ledger: per-`(underlying, leg_key)` state machine consuming a
//! time-ordered execution stream (spec.md §4.2).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{CoreError, CoreResult};
use crate::types::{Execution, LedgerEntry, LedgerStatus, Money};

/// How a ledger transition tags the execution that caused it, overriding
/// any broker-supplied `open_close_indicator` (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTag {
    /// Execution opened or added to a position.
    Open,
    /// Execution reduced, flattened, or crossed a position.
    Close,
}

/// One state transition produced by applying an execution. A cross
/// (case 5) yields two deltas: a `Close` on the row that flattened and an
/// `Open` on the new row created in the opposite direction.
#[derive(Debug, Clone)]
pub struct LedgerDelta {
    /// Underlying symbol.
    pub underlying: String,
    /// Leg key affected.
    pub leg_key: String,
    /// Open/Close tag for this half of the transition.
    pub tag: LedgerTag,
    /// Realized P&L attributed to this half (zero for pure opens/adds).
    pub realized_pnl: Money,
    /// The ledger row's state immediately after this half was applied.
    pub entry: LedgerEntry,
}

#[derive(Debug, Default)]
struct KeyState {
    rows: Vec<LedgerEntry>,
    halted: bool,
    halt_reason: Option<String>,
}

/// Per-leg running position state, keyed on `(underlying, leg_key)`.
/// Grounded on the `parking_lot::RwLock<FxHashMap<..>>` concurrent-state
/// pattern from `portfolio-manager/src/position.rs`, generalized from
/// single-instrument positions to the multi-leg options ledger.
#[derive(Debug, Default)]
pub struct PositionLedger {
    state: RwLock<FxHashMap<(String, String), KeyState>>,
}

impl PositionLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one normalized execution, returning the resulting transition(s).
    ///
    /// # Errors
    /// Returns [`CoreError::Integrity`] if the `(underlying, leg_key)` is
    /// already halted, or if this execution's `execution_time` precedes the
    /// boundary timestamp of the most recent row (time regression
    /// inconsistent with recorded history) — in which case the key is
    /// halted for future calls too, until [`PositionLedger::clear_halt`] is
    /// called.
    pub fn apply(&self, exec: &Execution) -> CoreResult<Vec<LedgerDelta>> {
        let key = (exec.underlying.clone(), exec.leg_key());
        let mut state = self.state.write();
        let entry = state.entry(key.clone()).or_default();

        if entry.halted {
            return Err(CoreError::Integrity {
                underlying: key.0,
                leg_key: key.1,
                reason: entry
                    .halt_reason
                    .clone()
                    .unwrap_or_else(|| "ledger halted".to_string()),
            });
        }

        if let Some(last) = entry.rows.last() {
            let boundary = match last.status {
                LedgerStatus::Open => last.opened_at,
                LedgerStatus::Closed => last.closed_at.unwrap_or(last.opened_at),
            };
            if exec.execution_time < boundary {
                let reason = format!(
                    "execution at {} precedes last recorded boundary {}",
                    exec.execution_time, boundary
                );
                entry.halted = true;
                entry.halt_reason = Some(reason.clone());
                return Err(CoreError::Integrity {
                    underlying: key.0,
                    leg_key: key.1,
                    reason,
                });
            }
        }

        let deltas = apply_transition(&mut entry.rows, exec);
        Ok(deltas)
    }

    /// Discard all per-key state, resetting to an empty ledger. Paired
    /// with [`crate::grouping::TradeGroupingEngine::reset`] and a full
    /// execution replay (spec.md §4.3 `reprocess_all_executions`).
    pub fn reset(&self) {
        self.state.write().clear();
    }

    /// Clear a halt on `(underlying, leg_key)` after manual resolution,
    /// allowing ingestion to resume.
    pub fn clear_halt(&self, underlying: &str, leg_key: &str) {
        if let Some(entry) = self
            .state
            .write()
            .get_mut(&(underlying.to_string(), leg_key.to_string()))
        {
            entry.halted = false;
            entry.halt_reason = None;
        }
    }

    /// True if `(underlying, leg_key)` is currently halted.
    #[must_use]
    pub fn is_halted(&self, underlying: &str, leg_key: &str) -> bool {
        self.state
            .read()
            .get(&(underlying.to_string(), leg_key.to_string()))
            .is_some_and(|s| s.halted)
    }

    /// Snapshot of the current (possibly open) row for `(underlying,
    /// leg_key)`, if any row has ever existed.
    #[must_use]
    pub fn current(&self, underlying: &str, leg_key: &str) -> Option<LedgerEntry> {
        self.state
            .read()
            .get(&(underlying.to_string(), leg_key.to_string()))
            .and_then(|s| s.rows.last().cloned())
    }

    /// All rows, open and closed, ever recorded for `(underlying, leg_key)`.
    #[must_use]
    pub fn history(&self, underlying: &str, leg_key: &str) -> Vec<LedgerEntry> {
        self.state
            .read()
            .get(&(underlying.to_string(), leg_key.to_string()))
            .map(|s| s.rows.clone())
            .unwrap_or_default()
    }
}

/// Core 5-case state machine (spec.md §4.2), applied against the key's row
/// history. Isolated from locking so it's trivially unit-testable.
fn apply_transition(rows: &mut Vec<LedgerEntry>, exec: &Execution) -> Vec<LedgerDelta> {
    let delta_q = exec.signed_delta();
    let multiplier = exec.multiplier;

    let active_idx = rows
        .last()
        .filter(|r| r.status == LedgerStatus::Open)
        .map(|_| rows.len() - 1);

    match active_idx {
        None => {
            // Case 1: FLAT -> OPEN.
            let entry = open_row(exec, delta_q, exec.price, multiplier);
            rows.push(entry.clone());
            vec![LedgerDelta {
                underlying: exec.underlying.clone(),
                leg_key: exec.leg_key(),
                tag: LedgerTag::Open,
                realized_pnl: Money::ZERO,
                entry,
            }]
        }
        Some(idx) => {
            let same_sign = rows[idx].quantity.signum() == delta_q.signum();
            if same_sign {
                // Case 2: OPEN same-sign add, weighted-average cost.
                let row = &mut rows[idx];
                let old_abs = row.quantity.abs().as_f64();
                let add_abs = delta_q.abs().as_f64();
                let new_avg = (row.avg_cost.as_f64() * old_abs + exec.price.as_f64() * add_abs)
                    / (old_abs + add_abs);
                row.avg_cost = Money::from_f64(new_avg);
                row.quantity += delta_q;
                row.total_cost = row.avg_cost.mul_i64(multiplier).mul_money(row.quantity.abs());
                vec![LedgerDelta {
                    underlying: exec.underlying.clone(),
                    leg_key: exec.leg_key(),
                    tag: LedgerTag::Open,
                    realized_pnl: Money::ZERO,
                    entry: row.clone(),
                }]
            } else {
                let q_abs = rows[idx].quantity.abs();
                let dq_abs = delta_q.abs();

                if dq_abs.raw() < q_abs.raw() {
                    // Case 3: opposite-sign reduce.
                    let pnl = realize_pnl(exec, &rows[idx], dq_abs);
                    let row = &mut rows[idx];
                    row.quantity += delta_q;
                    row.realized_pnl += pnl;
                    row.total_cost = row.avg_cost.mul_i64(multiplier).mul_money(row.quantity.abs());
                    vec![LedgerDelta {
                        underlying: exec.underlying.clone(),
                        leg_key: exec.leg_key(),
                        tag: LedgerTag::Close,
                        realized_pnl: pnl,
                        entry: row.clone(),
                    }]
                } else if dq_abs.raw() == q_abs.raw() {
                    // Case 4: opposite-sign flatten.
                    let pnl = realize_pnl(exec, &rows[idx], dq_abs);
                    let row = &mut rows[idx];
                    row.quantity = Money::ZERO;
                    row.total_cost = Money::ZERO;
                    row.status = LedgerStatus::Closed;
                    row.closed_at = Some(exec.execution_time);
                    row.realized_pnl += pnl;
                    vec![LedgerDelta {
                        underlying: exec.underlying.clone(),
                        leg_key: exec.leg_key(),
                        tag: LedgerTag::Close,
                        realized_pnl: pnl,
                        entry: row.clone(),
                    }]
                } else {
                    // Case 5: opposite-sign cross. Close the existing row at
                    // |q|, then open a new row with the remainder.
                    let pnl = realize_pnl(exec, &rows[idx], q_abs);
                    let row = &mut rows[idx];
                    row.quantity = Money::ZERO;
                    row.total_cost = Money::ZERO;
                    row.status = LedgerStatus::Closed;
                    row.closed_at = Some(exec.execution_time);
                    row.realized_pnl += pnl;
                    let close_delta = LedgerDelta {
                        underlying: exec.underlying.clone(),
                        leg_key: exec.leg_key(),
                        tag: LedgerTag::Close,
                        realized_pnl: pnl,
                        entry: row.clone(),
                    };

                    let remaining_abs = dq_abs - q_abs;
                    let remaining_signed =
                        Money::from_raw(remaining_abs.raw() * delta_q.signum());
                    let new_entry = open_row(exec, remaining_signed, exec.price, multiplier);
                    rows.push(new_entry.clone());
                    let open_delta = LedgerDelta {
                        underlying: exec.underlying.clone(),
                        leg_key: exec.leg_key(),
                        tag: LedgerTag::Open,
                        realized_pnl: Money::ZERO,
                        entry: new_entry,
                    };
                    vec![close_delta, open_delta]
                }
            }
        }
    }
}

fn open_row(exec: &Execution, quantity: Money, price: Money, multiplier: i64) -> LedgerEntry {
    LedgerEntry {
        id: None,
        underlying: exec.underlying.clone(),
        leg_key: exec.leg_key(),
        quantity,
        avg_cost: price,
        total_cost: price.mul_i64(multiplier).mul_money(quantity.abs()),
        realized_pnl: Money::ZERO,
        status: LedgerStatus::Open,
        opened_at: exec.execution_time,
        closed_at: None,
        trade_id: None,
    }
}

/// `Δpnl = (price - avg_cost)*|Δq|*m` for long reductions (SLD), or
/// `(avg_cost - price)*|Δq|*m` for short reductions (BOT) (spec.md §4.2).
fn realize_pnl(exec: &Execution, row: &LedgerEntry, closed_abs: Money) -> Money {
    use crate::types::Side;
    let diff = match exec.side {
        Side::Sld => exec.price - row.avg_cost,
        Side::Bot => row.avg_cost - exec.price,
    };
    diff.mul_i64(exec.multiplier).mul_money(closed_abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptionType, SecurityType, Side};
    use chrono::TimeZone;

    fn stock(side: Side, qty: i64, price: i64, time: DateTime<Utc>) -> Execution {
        Execution {
            exec_id: format!("E-{time}"),
            order_id: 1,
            perm_id: 1,
            underlying: "AAPL".into(),
            security_type: SecurityType::Stk,
            option_type: None,
            strike: None,
            expiration: None,
            multiplier: 1,
            side,
            quantity: Money::from_units(qty),
            price: Money::from_units(price),
            commission: Money::ZERO,
            net_amount: Money::ZERO,
            execution_time: time,
            account_id: "ACC".into(),
            open_close_indicator: None,
            trade_id: None,
        }
    }

    fn dt(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn flat_to_open() {
        let ledger = PositionLedger::new();
        let deltas = ledger.apply(&stock(Side::Bot, 100, 50, dt(9))).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].tag, LedgerTag::Open);
        assert_eq!(deltas[0].entry.quantity, Money::from_units(100));
        assert_eq!(deltas[0].entry.avg_cost, Money::from_units(50));
    }

    #[test]
    fn same_sign_add_weighted_average() {
        let ledger = PositionLedger::new();
        ledger.apply(&stock(Side::Bot, 100, 50, dt(9))).unwrap();
        let deltas = ledger.apply(&stock(Side::Bot, 100, 60, dt(10))).unwrap();
        assert_eq!(deltas[0].entry.quantity, Money::from_units(200));
        assert_eq!(deltas[0].entry.avg_cost, Money::from_units(55));
    }

    #[test]
    fn opposite_sign_partial_reduce_realizes_pnl() {
        let ledger = PositionLedger::new();
        ledger.apply(&stock(Side::Bot, 100, 50, dt(9))).unwrap();
        let deltas = ledger.apply(&stock(Side::Sld, 40, 60, dt(10))).unwrap();
        assert_eq!(deltas[0].tag, LedgerTag::Close);
        assert_eq!(deltas[0].realized_pnl, Money::from_units(400));
        assert_eq!(deltas[0].entry.quantity, Money::from_units(60));
        assert_eq!(deltas[0].entry.status, LedgerStatus::Open);
    }

    #[test]
    fn opposite_sign_flatten_closes_row() {
        let ledger = PositionLedger::new();
        ledger.apply(&stock(Side::Bot, 100, 50, dt(9))).unwrap();
        let deltas = ledger.apply(&stock(Side::Sld, 100, 60, dt(10))).unwrap();
        assert_eq!(deltas[0].tag, LedgerTag::Close);
        assert_eq!(deltas[0].realized_pnl, Money::from_units(1000));
        assert_eq!(deltas[0].entry.quantity, Money::ZERO);
        assert_eq!(deltas[0].entry.status, LedgerStatus::Closed);
    }

    #[test]
    fn opposite_sign_cross_splits_into_close_and_open() {
        let ledger = PositionLedger::new();
        ledger.apply(&stock(Side::Bot, 100, 50, dt(9))).unwrap();
        let deltas = ledger.apply(&stock(Side::Sld, 150, 60, dt(10))).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].tag, LedgerTag::Close);
        assert_eq!(deltas[0].entry.status, LedgerStatus::Closed);
        assert_eq!(deltas[1].tag, LedgerTag::Open);
        assert_eq!(deltas[1].entry.quantity, Money::from_units(-50));
        assert_eq!(deltas[1].entry.avg_cost, Money::from_units(60));
    }

    #[test]
    fn time_regression_halts_ingestion() {
        let ledger = PositionLedger::new();
        ledger.apply(&stock(Side::Bot, 100, 50, dt(10))).unwrap();
        let result = ledger.apply(&stock(Side::Sld, 50, 60, dt(9)));
        assert!(result.is_err());
        assert!(ledger.is_halted("AAPL", "STK"));

        let retried = ledger.apply(&stock(Side::Sld, 50, 60, dt(11)));
        assert!(retried.is_err());

        ledger.clear_halt("AAPL", "STK");
        assert!(ledger.apply(&stock(Side::Sld, 50, 60, dt(11))).is_ok());
    }

    #[test]
    fn option_leg_key_isolates_state() {
        let ledger = PositionLedger::new();
        let mut opt = stock(Side::Bot, 1, 5, dt(9));
        opt.security_type = SecurityType::Opt;
        opt.option_type = Some(OptionType::Put);
        opt.strike = Some(Money::from_units(580));
        opt.expiration = Some(dt(9));
        opt.multiplier = 100;
        ledger.apply(&opt).unwrap();

        assert!(ledger.current("AAPL", "STK").is_none());
        assert!(ledger.current("AAPL", &opt.leg_key()).is_some());
    }
}

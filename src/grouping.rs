//! Trade Grouping Engine: promotes Open-tagged ledger deltas into Trades,
//! attaches Close-tagged deltas, and tracks closure (spec.md §4.3).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::classifier::{self, LegSignature, LegType};
use crate::ledger::{LedgerDelta, LedgerTag};
use crate::types::{Execution, Money, OptionType, SecurityType, Trade, TradeStatus};

/// Outcome of feeding one ledger delta through the grouping engine.
#[derive(Debug, Clone)]
pub enum GroupingEvent {
    /// A brand-new Trade was created.
    Created(Trade),
    /// An existing Trade changed (leg added, partial close, reclassified).
    Updated(Trade),
    /// A Trade's final leg flattened.
    Closed(Trade),
}

impl GroupingEvent {
    /// The trade carried by this event, regardless of variant.
    #[must_use]
    pub fn trade(&self) -> &Trade {
        match self {
            Self::Created(t) | Self::Updated(t) | Self::Closed(t) => t,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenLegMeta {
    leg_type: LegType,
    strike: Option<Money>,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct TradeState {
    trade: Trade,
    perm_ids: FxHashSet<i64>,
    /// Legs still carrying non-zero quantity; emptiness is the trade's
    /// closure signal.
    open_legs: FxHashMap<String, OpenLegMeta>,
    /// Every leg the trade has ever held, insert-only. `legs()` reads from
    /// here so a closed trade still reports its final leg set for roll
    /// detection's leg-overlap test (spec.md §4.6 rule 3) after
    /// `process_close` empties `open_legs`.
    all_legs: FxHashMap<String, OpenLegMeta>,
    leg_qty: FxHashMap<String, Money>,
    /// Last non-zero signed quantity recorded for each leg. A closed leg's
    /// `leg_qty` entry is zero by definition, but roll detection's
    /// leg-overlap test (spec.md §4.6 rule 3) needs the sign the leg held
    /// while open, so `legs()` reads from here instead.
    last_signed_qty: FxHashMap<String, Money>,
}

impl TradeState {
    fn set_leg_qty(&mut self, leg_key: String, qty: Money) {
        if !qty.is_zero() {
            self.last_signed_qty.insert(leg_key.clone(), qty);
        }
        self.leg_qty.insert(leg_key, qty);
    }
}

/// Tracks which Trade currently owns each open `(underlying, leg_key)`,
/// materializes new Trades when no candidate window matches, and closes
/// Trades once every owned leg returns to flat.
#[derive(Default)]
pub struct TradeGroupingEngine {
    trades: RwLock<FxHashMap<i64, TradeState>>,
    leg_owner: RwLock<FxHashMap<(String, String), i64>>,
    open_by_underlying: RwLock<FxHashMap<String, Vec<i64>>>,
    next_id: AtomicI64,
}

impl TradeGroupingEngine {
    /// A fresh grouping engine with no trades.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all derived trades, resetting to an empty state. Callers
    /// pair this with resetting the ledger and replaying executions in
    /// global time order (spec.md §4.3 `reprocess_all_executions`).
    pub fn reset(&self) {
        self.trades.write().clear();
        self.leg_owner.write().clear();
        self.open_by_underlying.write().clear();
        self.next_id.store(0, Ordering::Release);
    }

    /// The leg signatures currently recorded for `trade_id`, suitable for
    /// the classifier and analytics kernel.
    #[must_use]
    pub fn legs(&self, trade_id: i64) -> Vec<LegSignature> {
        self.trades
            .read()
            .get(&trade_id)
            .map(|state| {
                state
                    .all_legs
                    .iter()
                    .map(|(leg_key, meta)| LegSignature {
                        leg_key: leg_key.clone(),
                        leg_type: meta.leg_type,
                        strike: meta.strike,
                        expiration: meta.expiration,
                        signed_qty: state.last_signed_qty.get(leg_key).copied().unwrap_or(Money::ZERO),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current snapshot of a trade by id.
    #[must_use]
    pub fn trade(&self, trade_id: i64) -> Option<Trade> {
        self.trades.read().get(&trade_id).map(|s| s.trade.clone())
    }

    /// True if the two trades share at least one broker `perm_id` — the
    /// "same order" test roll detection's extended window needs (spec.md
    /// §9 Open Question 3).
    #[must_use]
    pub fn shares_perm_id(&self, a: i64, b: i64) -> bool {
        let trades = self.trades.read();
        let (Some(ta), Some(tb)) = (trades.get(&a), trades.get(&b)) else {
            return false;
        };
        ta.perm_ids.intersection(&tb.perm_ids).next().is_some()
    }

    /// Feed one ledger delta (and the execution that produced it) through
    /// the grouping state machine.
    pub fn process(
        &self,
        delta: &LedgerDelta,
        exec: &Execution,
        w_open: Duration,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        match delta.tag {
            LedgerTag::Open => self.process_open(delta, exec, w_open, underlying_price),
            LedgerTag::Close => self.process_close(delta, exec, underlying_price),
        }
    }

    fn process_open(
        &self,
        delta: &LedgerDelta,
        exec: &Execution,
        w_open: Duration,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        let key = (delta.underlying.clone(), delta.leg_key.clone());

        if let Some(&trade_id) = self.leg_owner.read().get(&key) {
            // Case 2: same-sign add to a leg this engine already owns.
            return self.apply_add(trade_id, &key, delta, exec, underlying_price);
        }

        if let Some(trade_id) = self.find_candidate(&delta.underlying, exec, w_open) {
            return self.attach_new_leg(trade_id, &key, delta, exec, underlying_price);
        }

        self.create_trade(&key, delta, exec, underlying_price)
    }

    fn find_candidate(&self, underlying: &str, exec: &Execution, w_open: Duration) -> Option<i64> {
        let open_ids = self.open_by_underlying.read().get(underlying).cloned()?;
        let trades = self.trades.read();

        if let Some(id) = open_ids
            .iter()
            .find(|id| trades.get(id).is_some_and(|s| s.perm_ids.contains(&exec.perm_id)))
        {
            return Some(*id);
        }

        open_ids.into_iter().find(|id| {
            trades.get(id).is_some_and(|state| {
                let dt = (exec.execution_time - state.trade.opened_at)
                    .abs()
                    .to_std()
                    .unwrap_or(Duration::MAX);
                dt <= w_open
            })
        })
    }

    fn create_trade(
        &self,
        key: &(String, String),
        delta: &LedgerDelta,
        exec: &Execution,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let mut state = new_trade_state(id, &key.0, exec);
        state.perm_ids.insert(exec.perm_id);
        insert_leg(&mut state, exec, delta.entry.quantity);

        apply_execution_accounting(&mut state.trade, exec);
        state.trade.num_legs = state.open_legs.len();
        state.trade.strategy_type = classify_from_state(&state, underlying_price);

        self.trades.write().insert(id, state.clone());
        self.leg_owner.write().insert(key.clone(), id);
        self.open_by_underlying
            .write()
            .entry(key.0.clone())
            .or_default()
            .push(id);

        GroupingEvent::Created(state.trade)
    }

    /// A Close-tagged delta arrived for a leg this engine never saw opened
    /// (e.g. replay started mid-history). Synthesizes a standalone trade
    /// instead of dropping the close, carrying over its realized P&L and
    /// closing immediately if the leg went flat so the trade never gets
    /// stuck `Open` with no way to reach `Closed`.
    fn create_trade_from_close(
        &self,
        key: &(String, String),
        delta: &LedgerDelta,
        exec: &Execution,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let mut state = new_trade_state(id, &key.0, exec);
        state.perm_ids.insert(exec.perm_id);
        insert_leg(&mut state, exec, delta.entry.quantity);
        state.trade.realized_pnl += delta.realized_pnl;
        state.trade.num_executions += 1;
        state.trade.total_commission += exec.commission;

        let leg_flat = delta.entry.quantity.is_zero();
        if leg_flat {
            state.open_legs.remove(&delta.leg_key);
            state.trade.status = TradeStatus::Closed;
            state.trade.closed_at = Some(exec.execution_time);
        }
        state.trade.num_legs = state.open_legs.len();
        state.trade.strategy_type = classify_from_state(&state, underlying_price);

        self.trades.write().insert(id, state.clone());
        if leg_flat {
            GroupingEvent::Closed(state.trade)
        } else {
            self.leg_owner.write().insert(key.clone(), id);
            self.open_by_underlying
                .write()
                .entry(key.0.clone())
                .or_default()
                .push(id);
            GroupingEvent::Updated(state.trade)
        }
    }

    fn attach_new_leg(
        &self,
        trade_id: i64,
        key: &(String, String),
        delta: &LedgerDelta,
        exec: &Execution,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        let mut trades = self.trades.write();
        let state = trades.get_mut(&trade_id).expect("candidate trade must exist");
        state.perm_ids.insert(exec.perm_id);
        insert_leg(state, exec, delta.entry.quantity);
        apply_execution_accounting(&mut state.trade, exec);
        state.trade.num_legs = state.open_legs.len();
        state.trade.strategy_type = classify_from_state(state, underlying_price);
        let trade = state.trade.clone();
        drop(trades);

        self.leg_owner.write().insert(key.clone(), trade_id);
        GroupingEvent::Updated(trade)
    }

    fn apply_add(
        &self,
        trade_id: i64,
        _key: &(String, String),
        delta: &LedgerDelta,
        exec: &Execution,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        let mut trades = self.trades.write();
        let state = trades.get_mut(&trade_id).expect("owning trade must exist");
        state.set_leg_qty(delta.leg_key.clone(), delta.entry.quantity);
        apply_execution_accounting(&mut state.trade, exec);
        state.trade.strategy_type = classify_from_state(state, underlying_price);
        GroupingEvent::Updated(state.trade.clone())
    }

    fn process_close(
        &self,
        delta: &LedgerDelta,
        exec: &Execution,
        underlying_price: Option<Money>,
    ) -> GroupingEvent {
        let key = (delta.underlying.clone(), delta.leg_key.clone());
        let Some(trade_id) = self.leg_owner.read().get(&key).copied() else {
            // No engine-tracked owner (e.g. replay started mid-history);
            // synthesize a standalone trade so the close isn't dropped.
            return self.create_trade_from_close(&key, delta, exec, underlying_price);
        };

        let mut trades = self.trades.write();
        let state = trades.get_mut(&trade_id).expect("owning trade must exist");
        state.trade.realized_pnl += delta.realized_pnl;
        state.trade.num_executions += 1;
        state.trade.total_commission += exec.commission;
        state.set_leg_qty(delta.leg_key.clone(), delta.entry.quantity);

        let leg_flat = delta.entry.quantity.is_zero();
        if leg_flat {
            state.open_legs.remove(&delta.leg_key);
        }
        state.trade.strategy_type = classify_from_state(state, underlying_price);

        let all_flat = state.open_legs.is_empty();
        if all_flat {
            state.trade.status = TradeStatus::Closed;
            state.trade.closed_at = Some(exec.execution_time);
        }
        let trade = state.trade.clone();
        drop(trades);

        if leg_flat {
            self.leg_owner.write().remove(&key);
        }
        if all_flat {
            if let Some(ids) = self.open_by_underlying.write().get_mut(&key.0) {
                ids.retain(|&id| id != trade_id);
            }
            GroupingEvent::Closed(trade)
        } else {
            GroupingEvent::Updated(trade)
        }
    }
}

fn new_trade_state(id: i64, underlying: &str, exec: &Execution) -> TradeState {
    TradeState {
        trade: Trade {
            id: Some(id),
            underlying: underlying.to_string(),
            strategy_type: crate::types::StrategyType::Custom,
            status: TradeStatus::Open,
            opened_at: exec.execution_time,
            closed_at: None,
            num_legs: 0,
            num_executions: 0,
            opening_cost: Money::ZERO,
            realized_pnl: Money::ZERO,
            total_commission: Money::ZERO,
            wash_sale_adjustment: Money::ZERO,
            roll_chain_id: None,
            rolled_from_trade_id: None,
            rolled_to_trade_id: None,
            is_roll: false,
            is_assignment: false,
            assigned_from_trade_id: None,
            tags: Default::default(),
            max_profit: None,
            max_risk: None,
            breakevens: Vec::new(),
            net_delta: None,
            net_theta: None,
            greeks_at_open: Vec::new(),
            greeks_at_close: Vec::new(),
            analytics_partial: false,
        },
        perm_ids: FxHashSet::default(),
        open_legs: FxHashMap::default(),
        all_legs: FxHashMap::default(),
        leg_qty: FxHashMap::default(),
        last_signed_qty: FxHashMap::default(),
    }
}

fn insert_leg(state: &mut TradeState, exec: &Execution, quantity: Money) {
    let leg_key = exec.leg_key();
    let leg_type = match exec.security_type {
        SecurityType::Stk => LegType::Stock,
        SecurityType::Opt => match exec.option_type {
            Some(OptionType::Call) => LegType::Call,
            Some(OptionType::Put) => LegType::Put,
            None => LegType::Stock,
        },
    };
    let meta = OpenLegMeta {
        leg_type,
        strike: exec.strike,
        expiration: exec.expiration,
    };
    state.open_legs.insert(leg_key.clone(), meta.clone());
    state.all_legs.insert(leg_key.clone(), meta);
    state.set_leg_qty(leg_key, quantity);
}

fn apply_execution_accounting(trade: &mut Trade, exec: &Execution) {
    trade.opening_cost += exec.net_amount;
    trade.total_commission += exec.commission;
    trade.num_executions += 1;
}

fn classify_from_state(state: &TradeState, underlying_price: Option<Money>) -> crate::types::StrategyType {
    let legs: Vec<LegSignature> = state
        .open_legs
        .iter()
        .map(|(leg_key, meta)| LegSignature {
            leg_key: leg_key.clone(),
            leg_type: meta.leg_type,
            strike: meta.strike,
            expiration: meta.expiration,
            signed_qty: state.leg_qty.get(leg_key).copied().unwrap_or(Money::ZERO),
        })
        .collect();
    classifier::classify(&legs, underlying_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionLedger;
    use crate::types::{SecurityType, Side};
    use chrono::TimeZone;

    fn dt(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    fn stock(perm_id: i64, side: Side, qty: i64, price: i64, time: DateTime<Utc>) -> Execution {
        Execution {
            exec_id: format!("E-{time}-{side:?}"),
            order_id: perm_id,
            perm_id,
            underlying: "TSLA".into(),
            security_type: SecurityType::Stk,
            option_type: None,
            strike: None,
            expiration: None,
            multiplier: 1,
            side,
            quantity: Money::from_units(qty),
            price: Money::from_units(price),
            commission: Money::ZERO,
            net_amount: match side {
                Side::Bot => Money::from_units(-qty * price),
                Side::Sld => Money::from_units(qty * price),
            },
            execution_time: time,
            account_id: "ACC".into(),
            open_close_indicator: None,
            trade_id: None,
        }
    }

    #[test]
    fn simple_stock_round_trip_creates_then_closes_one_trade() {
        let ledger = PositionLedger::new();
        let grouping = TradeGroupingEngine::new();

        let open = stock(1, Side::Bot, 100, 250, dt(9));
        let open_deltas = ledger.apply(&open).unwrap();
        let event = grouping.process(&open_deltas[0], &open, Duration::from_secs(300), None);
        let GroupingEvent::Created(trade) = event else {
            panic!("expected Created");
        };
        assert_eq!(trade.opening_cost, Money::from_units(-25000));

        let close = stock(2, Side::Sld, 100, 260, dt(10));
        let close_deltas = ledger.apply(&close).unwrap();
        let event = grouping.process(&close_deltas[0], &close, Duration::from_secs(300), None);
        let GroupingEvent::Closed(trade) = event else {
            panic!("expected Closed");
        };
        assert_eq!(trade.realized_pnl, Money::from_units(1000));
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.strategy_type, crate::types::StrategyType::Stock);
    }

    #[test]
    fn cross_zero_updates_same_trade_then_reopens() {
        let ledger = PositionLedger::new();
        let grouping = TradeGroupingEngine::new();

        let mut short_open = stock(1, Side::Sld, 1, 580, dt(9));
        short_open.security_type = SecurityType::Opt;
        short_open.option_type = Some(OptionType::Put);
        short_open.strike = Some(Money::from_units(580));
        short_open.expiration = Some(dt(9));
        short_open.multiplier = 100;
        short_open.net_amount = Money::from_units(580 * 100);

        let deltas = ledger.apply(&short_open).unwrap();
        let event = grouping.process(&deltas[0], &short_open, Duration::from_secs(300), None);
        assert!(matches!(event, GroupingEvent::Created(_)));

        let mut cross = short_open.clone();
        cross.side = Side::Bot;
        cross.quantity = Money::from_units(2);
        cross.execution_time = dt(10);
        cross.net_amount = Money::from_units(-580 * 200);

        let deltas = ledger.apply(&cross).unwrap();
        assert_eq!(deltas.len(), 2);
        let closed_event = grouping.process(&deltas[0], &cross, Duration::from_secs(300), None);
        assert!(matches!(closed_event, GroupingEvent::Closed(_)));
        let opened_event = grouping.process(&deltas[1], &cross, Duration::from_secs(300), None);
        assert!(matches!(opened_event, GroupingEvent::Created(_)));
    }

    #[test]
    fn close_with_no_tracked_owner_carries_realized_pnl_and_closes() {
        let ledger = PositionLedger::new();
        let grouping = TradeGroupingEngine::new();

        // Skip the open entirely: feed only a flattening sell, as if replay
        // started mid-history and this engine never saw the original buy.
        ledger.apply(&stock(1, Side::Bot, 100, 250, dt(9))).unwrap();
        let close = stock(2, Side::Sld, 100, 260, dt(10));
        let close_deltas = ledger.apply(&close).unwrap();
        assert!(close_deltas[0].entry.quantity.is_zero());

        let event = grouping.process(&close_deltas[0], &close, Duration::from_secs(300), None);
        let GroupingEvent::Closed(trade) = event else {
            panic!("expected Closed");
        };
        assert_eq!(trade.realized_pnl, close_deltas[0].realized_pnl);
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.num_legs, 0);
    }

    #[test]
    fn partial_reduce_with_no_tracked_owner_stays_open() {
        let ledger = PositionLedger::new();
        let grouping = TradeGroupingEngine::new();

        ledger.apply(&stock(1, Side::Bot, 100, 250, dt(9))).unwrap();
        let reduce = stock(2, Side::Sld, 40, 260, dt(10));
        let reduce_deltas = ledger.apply(&reduce).unwrap();
        assert!(!reduce_deltas[0].entry.quantity.is_zero());

        let event = grouping.process(&reduce_deltas[0], &reduce, Duration::from_secs(300), None);
        let GroupingEvent::Updated(trade) = event else {
            panic!("expected Updated");
        };
        assert_eq!(trade.realized_pnl, reduce_deltas[0].realized_pnl);
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.num_legs, 1);
    }
}

//! Property-based tests for the quantified invariants spec.md §8 names:
//! ledger status/quantity consistency, split notional preservation,
//! reprocessing determinism, and round-trip realized P&L.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use journal_core::grouping::TradeGroupingEngine;
use journal_core::ledger::PositionLedger;
use journal_core::split_calendar::SplitCalendar;
use journal_core::types::{Execution, Money, SecurityType, Side};

fn dt(offset_hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(offset_hours)
}

fn stock_exec(exec_id: usize, side: Side, qty: i64, price: i64, hour: i64) -> Execution {
    let net_amount = match side {
        Side::Bot => Money::from_units(-qty * price),
        Side::Sld => Money::from_units(qty * price),
    };
    Execution {
        exec_id: format!("E{exec_id}"),
        order_id: 1,
        perm_id: 1,
        underlying: "PROP".into(),
        security_type: SecurityType::Stk,
        option_type: None,
        strike: None,
        expiration: None,
        multiplier: 1,
        side,
        quantity: Money::from_units(qty),
        price: Money::from_units(price),
        commission: Money::ZERO,
        net_amount,
        execution_time: dt(hour),
        account_id: "ACC".into(),
        open_close_indicator: None,
        trade_id: None,
    }
}

proptest! {
    /// spec.md §8: `LedgerEntry.status == Closed` iff `quantity == 0`, for
    /// every row produced by any sequence of same/opposite-sign fills.
    #[test]
    fn ledger_status_matches_quantity_invariant(
        sides in prop::collection::vec(any::<bool>(), 1..12),
        qtys in prop::collection::vec(1_i64..=50, 1..12),
        prices in prop::collection::vec(1_i64..=500, 1..12),
    ) {
        let n = sides.len().min(qtys.len()).min(prices.len());
        prop_assume!(n > 0);
        let ledger = PositionLedger::new();

        for i in 0..n {
            let side = if sides[i] { Side::Bot } else { Side::Sld };
            let exec = stock_exec(i, side, qtys[i], prices[i], i as i64);
            if let Ok(deltas) = ledger.apply(&exec) {
                for delta in &deltas {
                    prop_assert!(delta.entry.invariant_holds());
                }
            }
            // A halt is itself a valid outcome (time regression can't occur
            // here since hours are strictly increasing); once unhalted the
            // invariant must still hold going forward.
        }

        if let Some(current) = ledger.current("PROP", "STK") {
            prop_assert!(current.invariant_holds());
        }
    }

    /// spec.md §4.1: adjusting a `(qty, price)` pair across a split and
    /// multiplying back out reproduces the original notional, modulo one
    /// rounding step.
    #[test]
    fn split_adjustment_preserves_notional(
        ratio_from in 1_i64..=10,
        ratio_to in 1_i64..=10,
        qty in 1_i64..=1_000,
        price in 1_i64..=10_000,
    ) {
        let calendar = SplitCalendar::new();
        calendar.register_split("PROP", dt(100), ratio_from, ratio_to);

        let original_qty = Money::from_units(qty);
        let original_price = Money::from_f64(price as f64 / 100.0);
        let (adjusted_qty, adjusted_price, applied) =
            calendar.adjust("PROP", dt(0), original_qty, original_price);

        prop_assert_eq!(applied.len(), 1);
        let before = original_qty.as_f64() * original_price.as_f64();
        let after = adjusted_qty.as_f64() * adjusted_price.as_f64();
        // Two independent roundings (qty and price) at 4 decimals each
        // bound the absolute error regardless of notional size.
        prop_assert!((before - after).abs() <= 1.0);
    }

    /// spec.md §4.3 / §5: replaying the same execution stream through a
    /// fresh ledger and grouping engine always produces the same final
    /// trade count, statuses, and realized P&L — the reprocessing
    /// determinism the global replay in `reprocess_all` depends on.
    #[test]
    fn replaying_same_stream_is_deterministic(
        sides in prop::collection::vec(any::<bool>(), 1..10),
        qtys in prop::collection::vec(1_i64..=20, 1..10),
        prices in prop::collection::vec(1_i64..=200, 1..10),
    ) {
        let n = sides.len().min(qtys.len()).min(prices.len());
        prop_assume!(n > 0);
        let execs: Vec<Execution> = (0..n)
            .map(|i| {
                let side = if sides[i] { Side::Bot } else { Side::Sld };
                stock_exec(i, side, qtys[i], prices[i], i as i64)
            })
            .collect();

        let run = || {
            let ledger = PositionLedger::new();
            let grouping = TradeGroupingEngine::new();
            let mut trade_count = 0usize;
            let mut total_realized = Money::ZERO;
            for exec in &execs {
                let Ok(deltas) = ledger.apply(exec) else { continue };
                for delta in &deltas {
                    total_realized += delta.realized_pnl;
                    let event = grouping.process(delta, exec, std::time::Duration::from_secs(300), None);
                    if matches!(event, journal_core::grouping::GroupingEvent::Created(_)) {
                        trade_count += 1;
                    }
                }
            }
            (trade_count, total_realized)
        };

        let first = run();
        let second = run();
        prop_assert_eq!(first.0, second.0);
        prop_assert_eq!(first.1, second.1);
    }

    /// spec.md §4.2: a single buy followed by a full-quantity sell
    /// realizes exactly `(sell_price - buy_price) * qty`.
    #[test]
    fn round_trip_realized_pnl_matches_price_delta(
        qty in 1_i64..=1000,
        buy_price in 1_i64..=1000,
        sell_price in 1_i64..=1000,
    ) {
        let ledger = PositionLedger::new();
        ledger.apply(&stock_exec(0, Side::Bot, qty, buy_price, 0)).unwrap();
        let deltas = ledger.apply(&stock_exec(1, Side::Sld, qty, sell_price, 1)).unwrap();

        let expected = Money::from_units((sell_price - buy_price) * qty);
        prop_assert_eq!(deltas[0].realized_pnl, expected);
        prop_assert_eq!(deltas[0].entry.quantity, Money::ZERO);
        prop_assert!(deltas[0].entry.invariant_holds());
    }
}

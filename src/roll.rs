//! Roll Detection: links a closed Trade to a subsequent opening Trade in
//! the same underlying (spec.md §4.6).

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classifier::{LegSignature, LegType};
use crate::types::{StrategyType, Trade};

/// A candidate trade under evaluation for roll linking, paired with its
/// final leg signatures (needed for leg-overlap matching, spec.md §4.6
/// rule 3).
#[derive(Debug, Clone)]
pub struct RollCandidate {
    /// The trade itself.
    pub trade: Trade,
    /// Its final leg set.
    pub legs: Vec<LegSignature>,
}

/// One roll link produced by a detection pass.
#[derive(Debug, Clone, Copy)]
pub struct RollLink {
    /// The trade that closed.
    pub from_trade_id: i64,
    /// The trade it rolled into.
    pub to_trade_id: i64,
    /// The chain id shared by both trades.
    pub roll_chain_id: Uuid,
}

/// Evaluate all closed/open trade pairs for one underlying and return the
/// links that should be created. Pure function over candidate lists, so
/// `reprocess`-style idempotent re-runs are trivial for the caller to
/// verify: running this twice over the same already-linked trades yields
/// no new links, since `already_linked` filters them out.
///
/// `closed` should be every CLOSED trade for the underlying, newest first
/// (spec.md §4.6 "batch pass ... newest first"); `opened_since` every
/// trade opened at or after the earliest candidate's `closed_at`.
#[must_use]
pub fn detect_rolls(
    closed: &[RollCandidate],
    opened_since: &[RollCandidate],
    w_roll: Duration,
    w_roll_same_order: Duration,
    same_order: impl Fn(i64, i64) -> bool,
) -> Vec<RollLink> {
    let mut links = Vec::new();

    for a in closed {
        if a.trade.rolled_to_trade_id.is_some() {
            continue; // already linked, idempotent re-run
        }
        let Some(closed_at) = a.trade.closed_at else { continue };

        let best = opened_since
            .iter()
            .filter(|b| b.trade.id != a.trade.id)
            .filter(|b| b.trade.opened_at >= closed_at)
            .filter(|b| b.trade.underlying == a.trade.underlying)
            .filter(|b| b.trade.rolled_from_trade_id.is_none())
            .filter(|b| within_window(closed_at, b.trade.opened_at, w_roll, w_roll_same_order, &same_order, a.trade.id, b.trade.id))
            .filter(|b| leg_signature_overlap(&a.legs, &b.legs))
            .filter(|b| structurally_compatible(a.trade.strategy_type, b.trade.strategy_type))
            .min_by_key(|b| b.trade.opened_at);

        if let Some(b) = best {
            let chain_id = a.trade.roll_chain_id.unwrap_or_else(Uuid::new_v4);
            links.push(RollLink {
                from_trade_id: a.trade.id.expect("closed trade must be persisted"),
                to_trade_id: b.trade.id.expect("open trade must be persisted"),
                roll_chain_id: chain_id,
            });
        }
    }

    links
}

fn within_window(
    closed_at: DateTime<Utc>,
    opened_at: DateTime<Utc>,
    w_roll: Duration,
    w_roll_same_order: Duration,
    same_order: &impl Fn(i64, i64) -> bool,
    from_id: i64,
    to_id: i64,
) -> bool {
    let gap = (opened_at - closed_at).to_std().unwrap_or(Duration::MAX);
    if gap <= w_roll {
        return true;
    }
    same_order(from_id, to_id) && gap <= w_roll_same_order
}

/// At least one leg in `b` shares `(option_type, sign)` with a leg in `a`,
/// and the shared leg's strike or expiration differs (a pure re-entry at
/// identical terms would already have been grouped by the trade-grouping
/// engine, spec.md §4.6 rule 3).
fn leg_signature_overlap(a: &[LegSignature], b: &[LegSignature]) -> bool {
    a.iter().any(|la| {
        b.iter().any(|lb| {
            la.leg_type == lb.leg_type
                && la.signed_qty.signum() == lb.signed_qty.signum()
                && la.signed_qty.signum() != 0
                && (la.strike != lb.strike || la.expiration != lb.expiration)
        })
    })
}

/// Same strategy tag, or one side of an iron condor matching a vertical
/// (spec.md §4.6 rule 4).
fn structurally_compatible(a: StrategyType, b: StrategyType) -> bool {
    if a == b {
        return true;
    }
    let condor_put_side = matches!(a, StrategyType::IronCondor | StrategyType::IronButterfly)
        && b == StrategyType::VerticalPut
        || matches!(b, StrategyType::IronCondor | StrategyType::IronButterfly) && a == StrategyType::VerticalPut;
    let condor_call_side = matches!(a, StrategyType::IronCondor | StrategyType::IronButterfly)
        && b == StrategyType::VerticalCall
        || matches!(b, StrategyType::IronCondor | StrategyType::IronButterfly) && a == StrategyType::VerticalCall;
    condor_put_side || condor_call_side
}

/// A single trade's position within a roll chain, for `get_roll_chain`.
#[derive(Debug, Clone)]
pub struct ChainMember {
    /// The trade id.
    pub trade_id: i64,
    /// When it opened.
    pub opened_at: DateTime<Utc>,
}

/// All trades sharing `chain_id`, in `opened_at` order (spec.md §4.6).
#[must_use]
pub fn get_roll_chain(trades: &[Trade], chain_id: Uuid) -> Vec<ChainMember> {
    let mut members: Vec<ChainMember> = trades
        .iter()
        .filter(|t| t.roll_chain_id == Some(chain_id))
        .map(|t| ChainMember {
            trade_id: t.id.expect("chain member must be persisted"),
            opened_at: t.opened_at,
        })
        .collect();
    members.sort_by_key(|m| m.opened_at);
    members
}

/// Summary statistics for one roll chain (supplemental feature, spec.md
/// §11): total realized P&L across every trade in the chain, its span,
/// and how many legs were rolled.
#[derive(Debug, Clone, Default)]
pub struct ChainStatistics {
    /// Number of trades in the chain.
    pub trade_count: usize,
    /// Sum of `net_pnl()` across every trade in the chain.
    pub total_net_pnl: crate::types::Money,
    /// Timestamp the chain first opened.
    pub opened_at: Option<DateTime<Utc>>,
    /// Timestamp the chain last closed, if every trade in it is closed.
    pub closed_at: Option<DateTime<Utc>>,
}

/// Compute [`ChainStatistics`] for every trade sharing `chain_id`.
#[must_use]
pub fn chain_statistics(trades: &[Trade], chain_id: Uuid) -> ChainStatistics {
    let members: Vec<&Trade> = trades
        .iter()
        .filter(|t| t.roll_chain_id == Some(chain_id))
        .collect();
    if members.is_empty() {
        return ChainStatistics::default();
    }
    let total_net_pnl = members.iter().map(|t| t.net_pnl()).sum();
    let opened_at = members.iter().map(|t| t.opened_at).min();
    let closed_at = if members.iter().all(|t| t.closed_at.is_some()) {
        members.iter().filter_map(|t| t.closed_at).max()
    } else {
        None
    };
    ChainStatistics {
        trade_count: members.len(),
        total_net_pnl,
        opened_at,
        closed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Money, TradeStatus};
    use chrono::TimeZone;

    fn trade(id: i64, opened_at: DateTime<Utc>, closed_at: Option<DateTime<Utc>>, strategy: StrategyType) -> Trade {
        Trade {
            id: Some(id),
            underlying: "SPY".into(),
            strategy_type: strategy,
            status: if closed_at.is_some() { TradeStatus::Closed } else { TradeStatus::Open },
            opened_at,
            closed_at,
            num_legs: 1,
            num_executions: 1,
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
        }
    }

    fn put_leg(strike: i64, expiration: DateTime<Utc>, qty: i64) -> LegSignature {
        LegSignature {
            leg_key: format!("{}", strike),
            leg_type: LegType::Put,
            strike: Some(Money::from_units(strike)),
            expiration: Some(expiration),
            signed_qty: Money::from_units(qty),
        }
    }

    fn dt(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn links_short_put_roll_across_expirations() {
        let a = RollCandidate {
            trade: trade(1, dt(1), Some(dt(21)), StrategyType::Single),
            legs: vec![put_leg(580, dt(21), -1)],
        };
        let b = RollCandidate {
            trade: trade(2, dt(21), None, StrategyType::Single),
            legs: vec![put_leg(580, dt(28), -1)],
        };

        let links = detect_rolls(&[a], &[b], Duration::from_secs(600), Duration::from_secs(86_400), |_, _| false);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].from_trade_id, 1);
        assert_eq!(links[0].to_trade_id, 2);
    }

    #[test]
    fn idempotent_rerun_produces_no_duplicate_link() {
        let mut a = trade(1, dt(1), Some(dt(21)), StrategyType::Single);
        let chain_id = Uuid::new_v4();
        a.roll_chain_id = Some(chain_id);
        a.rolled_to_trade_id = Some(2);
        let candidate_a = RollCandidate {
            trade: a,
            legs: vec![put_leg(580, dt(21), -1)],
        };
        let b = RollCandidate {
            trade: trade(2, dt(21), None, StrategyType::Single),
            legs: vec![put_leg(580, dt(28), -1)],
        };

        let links = detect_rolls(
            &[candidate_a],
            &[b],
            Duration::from_secs(600),
            Duration::from_secs(86_400),
            |_, _| false,
        );
        assert!(links.is_empty());
    }

    #[test]
    fn no_link_when_outside_window() {
        let a = RollCandidate {
            trade: trade(1, dt(1), Some(dt(1)), StrategyType::Single),
            legs: vec![put_leg(580, dt(21), -1)],
        };
        let b = RollCandidate {
            trade: trade(2, dt(5), None, StrategyType::Single),
            legs: vec![put_leg(580, dt(28), -1)],
        };
        let links = detect_rolls(&[a], &[b], Duration::from_secs(600), Duration::from_secs(86_400), |_, _| false);
        assert!(links.is_empty());
    }

    #[test]
    fn chain_statistics_sum_pnl_across_members() {
        let mut a = trade(1, dt(1), Some(dt(21)), StrategyType::Single);
        let mut b = trade(2, dt(21), Some(dt(28)), StrategyType::Single);
        let chain_id = Uuid::new_v4();
        a.roll_chain_id = Some(chain_id);
        a.realized_pnl = Money::from_units(100);
        b.roll_chain_id = Some(chain_id);
        b.realized_pnl = Money::from_units(50);

        let stats = chain_statistics(&[a, b], chain_id);
        assert_eq!(stats.trade_count, 2);
        assert_eq!(stats.total_net_pnl, Money::from_units(150));
        assert!(stats.closed_at.is_some());
    }
}

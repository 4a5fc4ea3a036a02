//! Strategy Classifier: an ordered cascade of pattern matches over a
//! Trade's final leg set (spec.md §4.4), encoded as data rather than
//! polymorphic subclasses (spec.md §9 redesign hint).

use chrono::{DateTime, Utc};

use crate::types::{Money, StrategyType};

/// The option right a leg represents, or `Stock` for an equity leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegType {
    /// Call option.
    Call,
    /// Put option.
    Put,
    /// Equity/ETF shares.
    Stock,
}

/// A leg's classification-relevant shape: type, strike/expiration (absent
/// for stock), and net signed quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct LegSignature {
    /// Canonical leg key, as produced by `Execution::leg_key`.
    pub leg_key: String,
    /// Option right, or stock.
    pub leg_type: LegType,
    /// Strike, `None` for stock.
    pub strike: Option<Money>,
    /// Expiration, `None` for stock.
    pub expiration: Option<DateTime<Utc>>,
    /// Net signed quantity held in this leg (positive long, negative short).
    pub signed_qty: Money,
}

impl LegSignature {
    fn is_long(&self) -> bool {
        self.signed_qty.raw() > 0
    }

    fn is_short(&self) -> bool {
        self.signed_qty.raw() < 0
    }
}

/// Classify a Trade's final leg set. `underlying_price`, when available,
/// sharpens the PMCC heuristic (spec.md §4.4 row 9); without it that rule
/// is skipped rather than guessed.
#[must_use]
pub fn classify(legs: &[LegSignature], underlying_price: Option<Money>) -> StrategyType {
    if let Some(strategy) = classify_single_leg(legs) {
        return strategy;
    }
    if legs.len() == 2 {
        if let Some(strategy) = classify_two_legs(legs) {
            return strategy;
        }
    }
    if legs.len() == 4 {
        if let Some(strategy) = classify_iron(legs) {
            return strategy;
        }
    }
    if let Some(strategy) = classify_pmcc(legs, underlying_price) {
        return strategy;
    }
    if let Some(strategy) = classify_covered_call(legs) {
        return strategy;
    }
    StrategyType::Custom
}

fn classify_single_leg(legs: &[LegSignature]) -> Option<StrategyType> {
    if legs.len() != 1 {
        return None;
    }
    match legs[0].leg_type {
        LegType::Stock => Some(StrategyType::Stock),
        LegType::Call | LegType::Put => Some(StrategyType::Single),
    }
}

fn classify_two_legs(legs: &[LegSignature]) -> Option<StrategyType> {
    let (a, b) = (&legs[0], &legs[1]);
    let opposite_signs = a.signed_qty.signum() != 0
        && b.signed_qty.signum() != 0
        && a.signed_qty.signum() != b.signed_qty.signum();
    let same_sign = a.signed_qty.signum() == b.signed_qty.signum();

    // Vertical: same type, same expiration, opposite signs, different strikes.
    if a.leg_type == b.leg_type
        && a.leg_type != LegType::Stock
        && a.expiration == b.expiration
        && a.strike != b.strike
        && opposite_signs
    {
        return Some(match a.leg_type {
            LegType::Call => StrategyType::VerticalCall,
            LegType::Put => StrategyType::VerticalPut,
            LegType::Stock => unreachable!(),
        });
    }

    // Calendar: same type, same strike, different expirations, opposite signs.
    if a.leg_type == b.leg_type
        && a.leg_type != LegType::Stock
        && a.strike == b.strike
        && a.expiration != b.expiration
        && opposite_signs
    {
        return Some(match a.leg_type {
            LegType::Call => StrategyType::CalendarCall,
            LegType::Put => StrategyType::CalendarPut,
            LegType::Stock => unreachable!(),
        });
    }

    // Straddle / strangle: one call, one put, same expiration, same sign.
    let is_call_put_pair = (a.leg_type == LegType::Call && b.leg_type == LegType::Put)
        || (a.leg_type == LegType::Put && b.leg_type == LegType::Call);
    if is_call_put_pair && a.expiration == b.expiration && same_sign {
        if a.strike == b.strike {
            return Some(StrategyType::Straddle);
        }
        return Some(StrategyType::Strangle);
    }

    None
}

fn classify_iron(legs: &[LegSignature]) -> Option<StrategyType> {
    let calls: Vec<&LegSignature> = legs.iter().filter(|l| l.leg_type == LegType::Call).collect();
    let puts: Vec<&LegSignature> = legs.iter().filter(|l| l.leg_type == LegType::Put).collect();
    if calls.len() != 2 || puts.len() != 2 {
        return None;
    }
    let expiration = legs[0].expiration;
    if legs.iter().any(|l| l.expiration != expiration) {
        return None;
    }

    let (put_low, put_high) = order_by_strike(puts[0], puts[1])?;
    let (call_low, call_high) = order_by_strike(calls[0], calls[1])?;

    // Put vertical: long lower strike, short higher strike (credit spread).
    // Call vertical: short lower strike, long higher strike (credit spread).
    let put_vertical_ok = put_low.is_long() && put_high.is_short();
    let call_vertical_ok = call_low.is_short() && call_high.is_long();
    if !put_vertical_ok || !call_vertical_ok {
        return None;
    }
    if put_high.strike >= call_low.strike {
        return None;
    }

    if put_high.strike == call_low.strike {
        Some(StrategyType::IronButterfly)
    } else {
        Some(StrategyType::IronCondor)
    }
}

fn order_by_strike<'a>(
    a: &'a LegSignature,
    b: &'a LegSignature,
) -> Option<(&'a LegSignature, &'a LegSignature)> {
    match (a.strike, b.strike) {
        (Some(sa), Some(sb)) if sa < sb => Some((a, b)),
        (Some(sa), Some(sb)) if sb < sa => Some((b, a)),
        _ => None,
    }
}

/// `strike <= 0.7 * underlying_price` stands in for `delta >= 0.7` when no
/// Greeks are available (spec.md §4.4 row 9).
fn classify_pmcc(legs: &[LegSignature], underlying_price: Option<Money>) -> Option<StrategyType> {
    if legs.len() != 2 {
        return None;
    }
    let price = underlying_price?;
    let calls: Vec<&LegSignature> = legs.iter().filter(|l| l.leg_type == LegType::Call).collect();
    if calls.len() != 2 {
        return None;
    }
    let (long_leg, short_leg) = if calls[0].is_long() && calls[1].is_short() {
        (calls[0], calls[1])
    } else if calls[1].is_long() && calls[0].is_short() {
        (calls[1], calls[0])
    } else {
        return None;
    };
    if long_leg.expiration == short_leg.expiration {
        return None;
    }
    let deep_itm = long_leg.strike.is_some_and(|k| k.as_f64() <= 0.7 * price.as_f64());
    let long_dated = match (long_leg.expiration, short_leg.expiration) {
        (Some(le), Some(se)) => le > se,
        _ => false,
    };
    if deep_itm && long_dated {
        Some(StrategyType::Pmcc)
    } else {
        None
    }
}

fn classify_covered_call(legs: &[LegSignature]) -> Option<StrategyType> {
    if legs.len() != 2 {
        return None;
    }
    let stock = legs.iter().find(|l| l.leg_type == LegType::Stock)?;
    let call = legs.iter().find(|l| l.leg_type == LegType::Call)?;
    if !stock.is_long() || !call.is_short() {
        return None;
    }
    let shares = stock.signed_qty.abs();
    let contracts = call.signed_qty.abs();
    if contracts.is_zero() {
        return None;
    }
    let ratio_ok = (shares.as_f64() - 100.0 * contracts.as_f64()).abs() < 1e-6;
    ratio_ok.then_some(StrategyType::CoveredCall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn exp(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, d, 0, 0, 0).unwrap()
    }

    fn leg(leg_type: LegType, strike: Option<i64>, expiration: Option<DateTime<Utc>>, qty: i64) -> LegSignature {
        LegSignature {
            leg_key: "X".into(),
            leg_type,
            strike: strike.map(Money::from_units),
            expiration,
            signed_qty: Money::from_units(qty),
        }
    }

    #[test]
    fn single_stock_leg_is_stock() {
        let legs = vec![leg(LegType::Stock, None, None, 100)];
        assert_eq!(classify(&legs, None), StrategyType::Stock);
    }

    #[test]
    fn single_option_leg_is_single() {
        let legs = vec![leg(LegType::Put, Some(580), Some(exp(21)), -1)];
        assert_eq!(classify(&legs, None), StrategyType::Single);
    }

    #[rstest]
    #[case::vertical_put_credit_spread(
        vec![
            leg(LegType::Put, Some(580), Some(exp(21)), -1),
            leg(LegType::Put, Some(575), Some(exp(21)), 1),
        ],
        StrategyType::VerticalPut,
    )]
    #[case::calendar_call(
        vec![
            leg(LegType::Call, Some(600), Some(exp(21)), -1),
            leg(LegType::Call, Some(600), Some(exp(28)), 1),
        ],
        StrategyType::CalendarCall,
    )]
    #[case::straddle_same_strike_same_sign(
        vec![
            leg(LegType::Call, Some(600), Some(exp(21)), 1),
            leg(LegType::Put, Some(600), Some(exp(21)), 1),
        ],
        StrategyType::Straddle,
    )]
    #[case::strangle_different_strikes_same_sign(
        vec![
            leg(LegType::Call, Some(610), Some(exp(21)), 1),
            leg(LegType::Put, Some(590), Some(exp(21)), 1),
        ],
        StrategyType::Strangle,
    )]
    #[case::iron_condor_shorts_inner(
        vec![
            leg(LegType::Put, Some(570), Some(exp(21)), 1),
            leg(LegType::Put, Some(575), Some(exp(21)), -1),
            leg(LegType::Call, Some(625), Some(exp(21)), -1),
            leg(LegType::Call, Some(630), Some(exp(21)), 1),
        ],
        StrategyType::IronCondor,
    )]
    #[case::iron_butterfly_coincident_shorts(
        vec![
            leg(LegType::Put, Some(570), Some(exp(21)), 1),
            leg(LegType::Put, Some(600), Some(exp(21)), -1),
            leg(LegType::Call, Some(600), Some(exp(21)), -1),
            leg(LegType::Call, Some(630), Some(exp(21)), 1),
        ],
        StrategyType::IronButterfly,
    )]
    fn strike_cascade_classification(#[case] legs: Vec<LegSignature>, #[case] expected: StrategyType) {
        assert_eq!(classify(&legs, None), expected);
    }

    #[test]
    fn covered_call_ratio() {
        let legs = vec![
            leg(LegType::Stock, None, None, 100),
            leg(LegType::Call, Some(610), Some(exp(21)), -1),
        ];
        assert_eq!(classify(&legs, None), StrategyType::CoveredCall);
    }

    #[test]
    fn pmcc_with_underlying_price() {
        let legs = vec![
            leg(LegType::Call, Some(400), Some(exp(28)), 1),
            leg(LegType::Call, Some(610), Some(exp(21)), -1),
        ];
        assert_eq!(
            classify(&legs, Some(Money::from_units(600))),
            StrategyType::Pmcc
        );
    }

    #[test]
    fn falls_back_to_custom() {
        let legs = vec![
            leg(LegType::Call, Some(600), Some(exp(21)), 1),
            leg(LegType::Put, Some(590), Some(exp(21)), -1),
            leg(LegType::Put, Some(580), Some(exp(21)), 1),
        ];
        assert_eq!(classify(&legs, None), StrategyType::Custom);
    }
}

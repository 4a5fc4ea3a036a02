//! Analytics Kernel: breakevens, max profit/risk, net Greeks, DTE,
//! Black-Scholes PoP, and collateral (spec.md §4.5).

use chrono::{DateTime, Utc};

use crate::classifier::{LegSignature, LegType};
use crate::provider::Quote;
use crate::types::{Greek, MarginSettings, Money, StrategyType};

/// One leg's signature plus its latest quote, when available. A missing
/// quote degrades analytics gracefully rather than failing the trade
/// (spec.md §7 `ProviderError`).
#[derive(Debug, Clone)]
pub struct LegQuote {
    /// The leg's classification-relevant shape.
    pub leg: LegSignature,
    /// The most recent quote for this leg, if a provider call succeeded.
    pub quote: Option<Quote>,
}

/// Full analytics output for one Trade, ready to be written onto the
/// `Trade` record by the caller.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsResult {
    /// Breakeven prices, if a formula is defined for this strategy.
    pub breakevens: Vec<Money>,
    /// Max profit, `None` when unbounded (naked short) or undefined.
    pub max_profit: Option<Money>,
    /// Max risk, `None` when unbounded (naked long/short) or undefined.
    pub max_risk: Option<Money>,
    /// Net delta across all legs with a quote.
    pub net_delta: Option<Greek>,
    /// Net theta across all legs with a quote.
    pub net_theta: Option<Greek>,
    /// Days to expiration, using the nearest leg expiration.
    pub dte: Option<i64>,
    /// Probability of profit at expiration, percent, clamped to [1, 99].
    pub pop_pct: Option<u8>,
    /// Required collateral per `MarginSettings` and strategy.
    pub collateral: Option<Money>,
    /// True if any leg is missing a quote, so this result used stale or
    /// absent provider data.
    pub analytics_partial: bool,
}

/// Pure, synchronous analytics computation. Takes already-resolved quotes
/// rather than calling out itself, keeping the CPU-bound kernel separate
/// from the provider I/O (spec.md §9 "Coroutine I/O" redesign hint).
pub struct AnalyticsKernel;

impl AnalyticsKernel {
    /// Compute the full analytics result for a Trade's legs.
    ///
    /// `premium` is the trade's `opening_cost` (signed credit positive).
    /// `underlying_price`, when available, is used for PoP and collateral.
    /// `risk_free_rate` is the annualized rate from the risk-free-rate
    /// provider (spec.md §4.5).
    #[must_use]
    pub fn compute(
        &self,
        strategy: StrategyType,
        legs: &[LegQuote],
        premium: Money,
        margin: &MarginSettings,
        underlying_price: Option<Money>,
        risk_free_rate: f64,
        now: DateTime<Utc>,
    ) -> AnalyticsResult {
        let analytics_partial = legs.iter().any(|l| l.quote.is_none());
        let dte = nearest_dte(legs, now);
        let breakevens = breakevens_for(strategy, legs, premium);
        let (max_profit, max_risk) = profit_risk_for(strategy, legs, premium);
        let (net_delta, net_theta) = net_greeks(legs);
        let collateral = collateral_for(strategy, legs, premium, margin, underlying_price);
        let pop_pct = pop_for(strategy, legs, &breakevens, premium, underlying_price, risk_free_rate, dte);

        AnalyticsResult {
            breakevens,
            max_profit,
            max_risk,
            net_delta,
            net_theta,
            dte,
            pop_pct,
            collateral,
            analytics_partial,
        }
    }

    /// Group open positions by expiration date, nearest first, with days
    /// to expiration precomputed (original_source `schemas/calendar.py`'s
    /// `ExpirationDate`/`UpcomingExpirationsResponse`). Pure aggregation
    /// over leg signatures already on hand; stock legs (no expiration) are
    /// excluded.
    #[must_use]
    pub fn upcoming_expirations(legs: &[LegSignature], now: DateTime<Utc>) -> Vec<ExpirationGroup> {
        let mut by_expiration: std::collections::BTreeMap<DateTime<Utc>, Vec<LegSignature>> =
            std::collections::BTreeMap::new();
        for leg in legs {
            if let Some(expiration) = leg.expiration {
                by_expiration.entry(expiration).or_default().push(leg.clone());
            }
        }
        by_expiration
            .into_iter()
            .map(|(expiration, legs)| ExpirationGroup {
                expiration,
                days_to_expiration: (expiration - now).num_days().max(0),
                legs,
            })
            .collect()
    }
}

/// One expiration date's open legs, as returned by
/// [`AnalyticsKernel::upcoming_expirations`].
#[derive(Debug, Clone)]
pub struct ExpirationGroup {
    /// The shared expiration date.
    pub expiration: DateTime<Utc>,
    /// Days remaining until expiration, clamped to non-negative.
    pub days_to_expiration: i64,
    /// Every open leg expiring on this date.
    pub legs: Vec<LegSignature>,
}

fn per_leg_qty_abs(legs: &[LegQuote]) -> f64 {
    legs.iter()
        .map(|l| l.leg.signed_qty.abs().as_f64())
        .fold(0.0_f64, f64::max)
        .max(1.0)
}

fn find<'a>(legs: &'a [LegQuote], pred: impl Fn(&LegSignature) -> bool) -> Option<&'a LegQuote> {
    legs.iter().find(|l| pred(&l.leg))
}

fn breakevens_for(strategy: StrategyType, legs: &[LegQuote], premium: Money) -> Vec<Money> {
    let q = per_leg_qty_abs(legs);
    let per_unit = Money::from_f64(premium.as_f64().abs() / q);
    let signed_per_unit = Money::from_f64(premium.as_f64() / q);

    match strategy {
        StrategyType::VerticalPut => find(legs, |l| l.leg_type == LegType::Put && l.signed_qty.raw() < 0)
            .and_then(|l| l.leg.strike)
            .map(|short_strike| vec![short_strike - signed_per_unit])
            .unwrap_or_default(),
        StrategyType::VerticalCall => find(legs, |l| l.leg_type == LegType::Call && l.signed_qty.raw() < 0)
            .and_then(|l| l.leg.strike)
            .map(|short_strike| vec![short_strike + signed_per_unit])
            .unwrap_or_default(),
        StrategyType::IronCondor | StrategyType::IronButterfly => {
            let put_short = find(legs, |l| l.leg_type == LegType::Put && l.signed_qty.raw() < 0)
                .and_then(|l| l.leg.strike);
            let call_short = find(legs, |l| l.leg_type == LegType::Call && l.signed_qty.raw() < 0)
                .and_then(|l| l.leg.strike);
            match (put_short, call_short) {
                (Some(p), Some(c)) => vec![p - signed_per_unit, c + signed_per_unit],
                _ => Vec::new(),
            }
        }
        StrategyType::Straddle => find(legs, |l| l.leg_type == LegType::Call)
            .and_then(|l| l.leg.strike)
            .map(|strike| vec![strike - per_unit, strike + per_unit])
            .unwrap_or_default(),
        StrategyType::Single => {
            let leg = legs.first();
            leg.and_then(|l| l.leg.strike.map(|strike| (l.leg.leg_type, strike)))
                .map(|(leg_type, strike)| match leg_type {
                    LegType::Call => vec![strike + per_unit],
                    LegType::Put => vec![strike - per_unit],
                    LegType::Stock => Vec::new(),
                })
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

fn profit_risk_for(
    strategy: StrategyType,
    legs: &[LegQuote],
    premium: Money,
) -> (Option<Money>, Option<Money>) {
    let q = per_leg_qty_abs(legs);
    let multiplier = legs
        .iter()
        .find(|l| l.leg.leg_type != LegType::Stock)
        .map_or(1.0, |_| 100.0);

    match strategy {
        StrategyType::VerticalPut | StrategyType::VerticalCall => {
            let strikes: Vec<Money> = legs.iter().filter_map(|l| l.leg.strike).collect();
            if strikes.len() != 2 {
                return (None, None);
            }
            let width = (strikes[0].as_f64() - strikes[1].as_f64()).abs() * multiplier * q;
            credit_debit_profit_risk(premium, Money::from_f64(width))
        }
        StrategyType::IronCondor | StrategyType::IronButterfly => {
            let puts: Vec<Money> = legs
                .iter()
                .filter(|l| l.leg.leg_type == LegType::Put)
                .filter_map(|l| l.leg.strike)
                .collect();
            let calls: Vec<Money> = legs
                .iter()
                .filter(|l| l.leg.leg_type == LegType::Call)
                .filter_map(|l| l.leg.strike)
                .collect();
            if puts.len() != 2 || calls.len() != 2 {
                return (None, None);
            }
            let put_width = (puts[0].as_f64() - puts[1].as_f64()).abs();
            let call_width = (calls[0].as_f64() - calls[1].as_f64()).abs();
            let width = put_width.max(call_width) * multiplier * q;
            credit_debit_profit_risk(premium, Money::from_f64(width))
        }
        StrategyType::Single | StrategyType::Straddle | StrategyType::Strangle => {
            if premium.raw() < 0 {
                // Debit: bounded risk, unbounded profit.
                (None, Some(premium.abs()))
            } else {
                // Credit (naked short): bounded profit, unbounded risk.
                (Some(premium), None)
            }
        }
        StrategyType::Stock => (None, None),
        _ => (None, None),
    }
}

fn credit_debit_profit_risk(premium: Money, width: Money) -> (Option<Money>, Option<Money>) {
    if premium.raw() >= 0 {
        // Credit: profit capped at premium, risk is the remainder of width.
        (Some(premium), Some(width - premium))
    } else {
        // Debit: risk capped at premium paid, profit is the remainder.
        (Some(width + premium), Some(-premium))
    }
}

fn net_greeks(legs: &[LegQuote]) -> (Option<Greek>, Option<Greek>) {
    let mut delta = Greek::ZERO;
    let mut theta = Greek::ZERO;
    let mut any = false;
    for leg_quote in legs {
        let Some(quote) = leg_quote.quote else { continue };
        let sign = leg_quote.leg.signed_qty.signum();
        let qty = leg_quote.leg.signed_qty.abs().as_f64();
        if let Some(d) = quote.delta {
            delta += Greek::from_f64(d.as_f64() * qty * sign as f64);
            any = true;
        }
        if let Some(t) = quote.theta {
            theta += Greek::from_f64(t.as_f64() * qty * sign as f64);
            any = true;
        }
    }
    if any {
        (Some(delta), Some(theta))
    } else {
        (None, None)
    }
}

fn nearest_dte(legs: &[LegQuote], now: DateTime<Utc>) -> Option<i64> {
    legs.iter()
        .filter_map(|l| l.leg.expiration)
        .min()
        .map(|expiration| (expiration - now).num_days().max(0))
}

fn collateral_for(
    strategy: StrategyType,
    legs: &[LegQuote],
    premium: Money,
    margin: &MarginSettings,
    underlying_price: Option<Money>,
) -> Option<Money> {
    let q = per_leg_qty_abs(legs);
    match strategy {
        StrategyType::Stock => underlying_price.map(|price| Money::from_f64(price.as_f64() * q)),
        StrategyType::Single => {
            let leg = legs.first()?;
            if leg.leg.signed_qty.raw() >= 0 {
                return None; // long option, no collateral required
            }
            let strike = leg.leg.strike?;
            let pct = match leg.leg.leg_type {
                LegType::Put => margin.naked_put_margin_pct,
                LegType::Call => margin.naked_call_margin_pct,
                LegType::Stock => return None,
            };
            Some(Money::from_f64(strike.as_f64() * 100.0 * q * pct / 100.0))
        }
        StrategyType::VerticalPut | StrategyType::VerticalCall => {
            let strikes: Vec<Money> = legs.iter().filter_map(|l| l.leg.strike).collect();
            if strikes.len() != 2 {
                return None;
            }
            let width = (strikes[0].as_f64() - strikes[1].as_f64()).abs();
            Some(Money::from_f64(width * 100.0 * q * margin.spread_margin_pct / 100.0))
        }
        StrategyType::IronCondor | StrategyType::IronButterfly => {
            let (_, max_risk) = profit_risk_for(strategy, legs, premium);
            max_risk.map(|risk| Money::from_f64(risk.as_f64() * margin.iron_condor_margin_pct / 100.0))
        }
        _ => None,
    }
}

/// Standard normal CDF via `libm::erf`.
fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / std::f64::consts::SQRT_2))
}

/// Black-Scholes probability of profit at expiration for a credit or
/// debit defined-risk trade (spec.md §4.5). Returns `None` if any input
/// is non-positive (no meaningful distribution).
#[must_use]
pub fn probability_of_profit(
    spot: f64,
    breakeven: f64,
    risk_free_rate: f64,
    sigma: f64,
    t_years: f64,
    is_credit: bool,
) -> Option<u8> {
    if spot <= 0.0 || breakeven <= 0.0 || sigma <= 0.0 || t_years <= 0.0 {
        return None;
    }
    let d = ((spot / breakeven).ln() + (risk_free_rate - sigma * sigma / 2.0) * t_years)
        / (sigma * t_years.sqrt());
    let phi = norm_cdf(d);
    let pop = if is_credit { phi } else { 1.0 - phi };
    let pct = (pop * 100.0).round().clamp(1.0, 99.0);
    Some(pct as u8)
}

fn pop_for(
    strategy: StrategyType,
    legs: &[LegQuote],
    breakevens: &[Money],
    premium: Money,
    underlying_price: Option<Money>,
    risk_free_rate: f64,
    dte: Option<i64>,
) -> Option<u8> {
    let is_defined_risk = matches!(
        strategy,
        StrategyType::VerticalPut | StrategyType::VerticalCall | StrategyType::IronCondor | StrategyType::IronButterfly
    );
    if !is_defined_risk || breakevens.is_empty() {
        return None;
    }
    let spot = underlying_price?.as_f64();
    let t_years = dte? as f64 / 365.0;
    let sigma = average_iv(legs)?;
    let breakeven = breakevens[0].as_f64();
    let is_credit = premium.raw() >= 0;
    probability_of_profit(spot, breakeven, risk_free_rate, sigma, t_years, is_credit)
}

fn average_iv(legs: &[LegQuote]) -> Option<f64> {
    let ivs: Vec<f64> = legs
        .iter()
        .filter_map(|l| l.quote.and_then(|q| q.implied_volatility))
        .map(|iv| iv.as_f64())
        .collect();
    if ivs.is_empty() {
        return None;
    }
    Some(ivs.iter().sum::<f64>() / ivs.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn leg(leg_type: LegType, strike: Option<i64>, expiration: Option<DateTime<Utc>>, qty: i64) -> LegSignature {
        LegSignature {
            leg_key: "X".into(),
            leg_type,
            strike: strike.map(Money::from_units),
            expiration,
            signed_qty: Money::from_units(qty),
        }
    }

    fn lq(leg: LegSignature) -> LegQuote {
        LegQuote { leg, quote: None }
    }

    fn exp(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn vertical_put_credit_spread_breakeven_and_risk() {
        let legs = vec![
            lq(leg(LegType::Put, Some(580), Some(exp(21)), -1)),
            lq(leg(LegType::Put, Some(575), Some(exp(21)), 1)),
        ];
        let premium = Money::from_f64(1.50);
        let breakevens = breakevens_for(StrategyType::VerticalPut, &legs, premium);
        assert_eq!(breakevens.len(), 1);
        assert_abs_diff_eq!(breakevens[0].as_f64(), 578.50, epsilon = 1e-6);

        let (profit, risk) = profit_risk_for(StrategyType::VerticalPut, &legs, premium);
        assert_abs_diff_eq!(profit.unwrap().as_f64(), 150.0, epsilon = 1e-6);
        assert_abs_diff_eq!(risk.unwrap().as_f64(), 350.0, epsilon = 1e-6);
    }

    #[test]
    fn iron_condor_breakevens_and_risk() {
        let legs = vec![
            lq(leg(LegType::Put, Some(570), Some(exp(21)), 1)),
            lq(leg(LegType::Put, Some(575), Some(exp(21)), -1)),
            lq(leg(LegType::Call, Some(625), Some(exp(21)), -1)),
            lq(leg(LegType::Call, Some(630), Some(exp(21)), 1)),
        ];
        let premium = Money::from_f64(150.0); // net credit already in dollars
        let (profit, risk) = profit_risk_for(StrategyType::IronCondor, &legs, premium);
        assert_abs_diff_eq!(profit.unwrap().as_f64(), 150.0, epsilon = 1e-6);
        assert_abs_diff_eq!(risk.unwrap().as_f64(), 350.0, epsilon = 1e-6);
    }

    #[test]
    fn single_long_call_debit_has_bounded_risk_unbounded_profit() {
        let legs = vec![lq(leg(LegType::Call, Some(600), Some(exp(21)), 1))];
        let premium = Money::from_f64(-500.0);
        let (profit, risk) = profit_risk_for(StrategyType::Single, &legs, premium);
        assert!(profit.is_none());
        assert_abs_diff_eq!(risk.unwrap().as_f64(), 500.0, epsilon = 1e-6);
    }

    #[test]
    fn dte_uses_nearest_expiration_and_clamps_nonnegative() {
        let now = Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap();
        let legs = vec![
            lq(leg(LegType::Call, Some(600), Some(exp(21)), 1)),
            lq(leg(LegType::Call, Some(610), Some(exp(28)), -1)),
        ];
        assert_eq!(nearest_dte(&legs, now), Some(1));

        let past_now = Utc.with_ymd_and_hms(2025, 11, 25, 0, 0, 0).unwrap();
        assert_eq!(nearest_dte(&legs, past_now), Some(0));
    }

    #[test]
    fn pop_clamps_to_one_through_ninety_nine() {
        let extreme_low = probability_of_profit(100.0, 1000.0, 0.05, 3.0, 0.01, true).unwrap();
        assert_eq!(extreme_low, 1);
        let extreme_high = probability_of_profit(1000.0, 1.0, 0.05, 3.0, 0.01, true).unwrap();
        assert_eq!(extreme_high, 99);
    }

    #[test]
    fn pop_none_for_non_positive_inputs() {
        assert!(probability_of_profit(0.0, 100.0, 0.05, 0.2, 0.1, true).is_none());
        assert!(probability_of_profit(100.0, 100.0, 0.05, 0.0, 0.1, true).is_none());
    }

    #[test]
    fn upcoming_expirations_groups_by_date_nearest_first() {
        let legs = vec![
            leg(LegType::Call, Some(610), Some(exp(28)), -1),
            leg(LegType::Put, Some(575), Some(exp(21)), 1),
            leg(LegType::Stock, None, None, 100),
        ];
        let now = Utc.with_ymd_and_hms(2025, 11, 14, 0, 0, 0).unwrap();
        let groups = AnalyticsKernel::upcoming_expirations(&legs, now);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].expiration, exp(21));
        assert_eq!(groups[0].days_to_expiration, 7);
        assert_eq!(groups[1].expiration, exp(28));
    }

    #[test]
    fn naked_put_collateral_matches_margin_pct() {
        let legs = vec![lq(leg(LegType::Put, Some(580), Some(exp(21)), -1))];
        let margin = MarginSettings::for_underlying("SPY");
        let collateral = collateral_for(StrategyType::Single, &legs, Money::from_f64(150.0), &margin, None);
        assert_abs_diff_eq!(collateral.unwrap().as_f64(), 11_600.0, epsilon = 1e-6);
    }
}

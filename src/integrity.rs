//! Integrity Checker: advisory scan for implausible ledger positions and
//! unnormalized splits (spec.md §4.7). Never mutates state.

use crate::types::Money;

/// One underlying's raw vs. split-adjusted net position, plus the
/// historical sample used to judge plausibility.
#[derive(Debug, Clone)]
pub struct PositionSample {
    /// Underlying symbol.
    pub underlying: String,
    /// Net position ignoring splits (sum of raw execution quantities).
    pub raw_position: Money,
    /// Net position after split adjustment.
    pub adjusted_position: Money,
    /// 95th-percentile absolute quantity observed historically for this
    /// symbol, used as the "typical lot" baseline.
    pub p95_abs_quantity: Money,
    /// Strikes on raw (unadjusted) options positions still open.
    pub open_option_strikes: Vec<Money>,
    /// Most recent adjusted close price, if known.
    pub last_adjusted_close: Option<Money>,
}

/// Multiplier applied to `p95_abs_quantity` beyond which a position is
/// flagged suspiciously large (spec.md §4.7).
const SUSPICIOUS_POSITION_MULTIPLE: f64 = 10.0;

/// Multiplier applied to the last adjusted close beyond which a strike is
/// flagged implausible (spec.md §4.7).
const IMPLAUSIBLE_STRIKE_MULTIPLE: f64 = 10.0;

/// One advisory finding. Never halts ingestion; the caller decides what,
/// if anything, to do about it.
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityFinding {
    /// The adjusted position is implausibly large relative to this
    /// symbol's historical typical lot size — likely an unregistered
    /// split.
    SuspiciousPosition {
        /// Underlying symbol.
        underlying: String,
        /// The adjusted position that triggered the finding.
        adjusted_position: Money,
        /// The baseline it was compared against.
        baseline: Money,
    },
    /// An open option strike is implausible against the adjusted
    /// historical stock price — also suggests a missing split entry.
    ImplausibleStrike {
        /// Underlying symbol.
        underlying: String,
        /// The strike that triggered the finding.
        strike: Money,
        /// The last adjusted close it was compared against.
        last_adjusted_close: Money,
    },
}

/// Scan one underlying's position sample for integrity findings
/// (spec.md §4.7). Pure and read-only.
#[must_use]
pub fn check(sample: &PositionSample) -> Vec<IntegrityFinding> {
    let mut findings = Vec::new();

    if !sample.p95_abs_quantity.is_zero() {
        let threshold = sample.p95_abs_quantity.as_f64() * SUSPICIOUS_POSITION_MULTIPLE;
        if sample.adjusted_position.abs().as_f64() > threshold {
            findings.push(IntegrityFinding::SuspiciousPosition {
                underlying: sample.underlying.clone(),
                adjusted_position: sample.adjusted_position,
                baseline: sample.p95_abs_quantity,
            });
        }
    }

    if let Some(last_close) = sample.last_adjusted_close {
        let threshold = last_close.as_f64() * IMPLAUSIBLE_STRIKE_MULTIPLE;
        for &strike in &sample.open_option_strikes {
            if strike.as_f64() > threshold {
                findings.push(IntegrityFinding::ImplausibleStrike {
                    underlying: sample.underlying.clone(),
                    strike,
                    last_adjusted_close: last_close,
                });
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_suspiciously_large_position() {
        let sample = PositionSample {
            underlying: "NVDA".into(),
            raw_position: Money::from_units(4000),
            adjusted_position: Money::from_units(4000),
            p95_abs_quantity: Money::from_units(100),
            open_option_strikes: Vec::new(),
            last_adjusted_close: None,
        };
        let findings = check(&sample);
        assert_eq!(findings.len(), 1);
        assert!(matches!(findings[0], IntegrityFinding::SuspiciousPosition { .. }));
    }

    #[test]
    fn flags_implausible_strike() {
        let sample = PositionSample {
            underlying: "NVDA".into(),
            raw_position: Money::from_units(0),
            adjusted_position: Money::from_units(0),
            p95_abs_quantity: Money::from_units(100),
            open_option_strikes: vec![Money::from_units(5000)],
            last_adjusted_close: Some(Money::from_units(100)),
        };
        let findings = check(&sample);
        assert_eq!(findings.len(), 1);
        assert!(matches!(findings[0], IntegrityFinding::ImplausibleStrike { .. }));
    }

    #[test]
    fn clean_position_has_no_findings() {
        let sample = PositionSample {
            underlying: "SPY".into(),
            raw_position: Money::from_units(100),
            adjusted_position: Money::from_units(100),
            p95_abs_quantity: Money::from_units(100),
            open_option_strikes: vec![Money::from_units(580)],
            last_adjusted_close: Some(Money::from_units(575)),
        };
        assert!(check(&sample).is_empty());
    }
}

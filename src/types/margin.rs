//! Per-underlying margin configuration (spec.md §3).

use serde::{Deserialize, Serialize};

/// Collateral percentages for one underlying. Defaults 20/20/100/100 per
/// spec.md §3, confirmed by `original_source/models/margin_settings.py`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginSettings {
    /// Underlying symbol this applies to (unique).
    pub underlying: String,
    /// Naked put margin percentage.
    pub naked_put_margin_pct: f64,
    /// Naked call margin percentage.
    pub naked_call_margin_pct: f64,
    /// Defined-risk spread margin percentage (of width).
    pub spread_margin_pct: f64,
    /// Iron condor margin percentage (of the wider side's width).
    pub iron_condor_margin_pct: f64,
    /// Free-text justification for a non-default override. Operator
    /// metadata only; no computed meaning.
    pub notes: Option<String>,
}

impl Default for MarginSettings {
    fn default() -> Self {
        Self {
            underlying: String::new(),
            naked_put_margin_pct: 20.0,
            naked_call_margin_pct: 20.0,
            spread_margin_pct: 100.0,
            iron_condor_margin_pct: 100.0,
            notes: None,
        }
    }
}

impl MarginSettings {
    /// Default settings for a given underlying.
    #[must_use]
    pub fn for_underlying(underlying: impl Into<String>) -> Self {
        Self {
            underlying: underlying.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let m = MarginSettings::for_underlying("SPY");
        assert_eq!(m.naked_put_margin_pct, 20.0);
        assert_eq!(m.naked_call_margin_pct, 20.0);
        assert_eq!(m.spread_margin_pct, 100.0);
        assert_eq!(m.iron_condor_margin_pct, 100.0);
    }
}

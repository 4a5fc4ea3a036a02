//! Execution Normalizer: sign-convention enforcement and split adjustment
//! (spec.md §4.1).

use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::split_calendar::SplitCalendar;
use crate::types::{Execution, Money, SecurityType};

/// Tolerance used to detect commission folded into `net_amount` by
/// historical Flex Query imports (spec.md §4.1).
const COMMISSION_TOLERANCE: f64 = 0.10;

/// Normalizes raw executions into the canonical shape the rest of the core
/// consumes: required fields present, `net_amount` sign convention
/// enforced, and split-adjusted quantity/price applied.
pub struct ExecutionNormalizer {
    splits: Arc<SplitCalendar>,
}

impl ExecutionNormalizer {
    /// Build a normalizer backed by the given split calendar.
    #[must_use]
    pub fn new(splits: Arc<SplitCalendar>) -> Self {
        Self { splits }
    }

    /// Normalize one raw execution. Rejects executions missing
    /// option-specific fields on an `Opt` record; everything else is
    /// corrected in place rather than rejected.
    pub fn normalize(&self, mut exec: Execution) -> CoreResult<Execution> {
        self.validate_required_fields(&exec)?;

        let expected_net = self.expected_net_amount(&exec);
        exec.net_amount = self.reconcile_net_amount(&exec, expected_net);

        let (adjusted_qty, adjusted_price, splits_applied) = self.splits.adjust(
            &exec.underlying,
            exec.execution_time,
            exec.quantity,
            exec.price,
        );
        if !splits_applied.is_empty() {
            exec.quantity = adjusted_qty;
            exec.price = adjusted_price;
            exec.net_amount = self.expected_net_amount(&exec);
        }

        Ok(exec)
    }

    fn validate_required_fields(&self, exec: &Execution) -> CoreResult<()> {
        if exec.security_type == SecurityType::Opt
            && (exec.option_type.is_none() || exec.strike.is_none() || exec.expiration.is_none())
        {
            return Err(CoreError::Normalization {
                exec_id: exec.exec_id.clone(),
                reason: "OPT execution missing option_type/strike/expiration".to_string(),
            });
        }
        if exec.quantity.is_zero() {
            return Err(CoreError::Normalization {
                exec_id: exec.exec_id.clone(),
                reason: "quantity must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// The canonical `net_amount` for an execution, per the sign convention
    /// `net_amount = -price*|q|*m` for BOT, `+price*|q|*m` for SLD
    /// (spec.md §4.1), excluding commission.
    fn expected_net_amount(&self, exec: &Execution) -> Money {
        let gross = exec.price.mul_i64(exec.multiplier.max(1));
        let gross = Money::from_f64(gross.as_f64() * (exec.quantity.as_f64().abs()));
        match exec.side {
            crate::types::Side::Bot => -gross,
            crate::types::Side::Sld => gross,
        }
    }

    /// If the upstream `net_amount` already matches the expected value
    /// within tolerance, keep it (preserves provenance); otherwise check
    /// whether commission was folded in (historical Flex Query behavior)
    /// and restore the raw value; otherwise fall back to the computed
    /// expected value and log the discrepancy.
    fn reconcile_net_amount(&self, exec: &Execution, expected: Money) -> Money {
        let upstream = exec.net_amount;
        if (upstream.as_f64() - expected.as_f64()).abs() <= COMMISSION_TOLERANCE {
            return upstream;
        }

        let restored = match exec.side {
            crate::types::Side::Bot => upstream - exec.commission,
            crate::types::Side::Sld => upstream + exec.commission,
        };
        if (restored.as_f64() - expected.as_f64()).abs() <= COMMISSION_TOLERANCE {
            tracing::debug!(
                exec_id = %exec.exec_id,
                "net_amount included commission, restored to raw value"
            );
            return restored;
        }

        tracing::warn!(
            exec_id = %exec.exec_id,
            upstream = %upstream,
            expected = %expected,
            "net_amount deviates from sign convention beyond tolerance, using computed value"
        );
        expected
    }
}

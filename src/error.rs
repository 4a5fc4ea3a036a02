//! Error types for the core engine (spec.md §7).

use thiserror::Error;

/// Errors the core distinguishes, per spec.md §7.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Applying an execution would move a ledger row to a state
    /// inconsistent with history (e.g. closing more contracts than open).
    /// Halts ingestion for the affected `(underlying, leg_key)`.
    #[error("integrity error on {underlying}/{leg_key}: {reason}")]
    Integrity {
        /// Underlying symbol.
        underlying: String,
        /// Leg key of the affected ledger row.
        leg_key: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// An incoming execution was unparseable or missing required fields.
    /// The execution is dropped with a logged warning; a counter is
    /// incremented on the caller's `OperationStats`.
    #[error("normalization error for exec {exec_id}: {reason}")]
    Normalization {
        /// The execution id that failed to normalize.
        exec_id: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// An execution spans a split boundary without a registered split entry
    /// when the integrity checker's heuristics say one is required.
    /// Advisory only — ingestion proceeds.
    #[error("possible unregistered split for {symbol} around {around}")]
    SplitAmbiguity {
        /// Symbol suspected to have an unregistered split.
        symbol: String,
        /// Approximate date the split would have occurred.
        around: chrono::DateTime<chrono::Utc>,
    },

    /// An outbound market-data or risk-free-rate call failed. Analytics
    /// proceed with the last cached value; the trade is marked
    /// `analytics_partial = true`.
    #[error("provider error from {provider}: {reason}")]
    Provider {
        /// Name of the provider that failed (e.g. `"polygon"`, `"fred"`).
        provider: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// Linking a roll chain would create a cycle; the link is rejected.
    #[error("roll link conflict: trade {from} -> {to} would create a cycle")]
    RollLinkConflict {
        /// The trade the link would originate from.
        from: i64,
        /// The trade the link would point to.
        to: i64,
    },

    /// A persistence-layer call failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Configuration was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable explanation.
        message: String,
    },
}

/// Result alias used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;

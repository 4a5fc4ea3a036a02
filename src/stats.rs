//! Result shape every top-level operation returns (spec.md §6, §7).

use serde::{Deserialize, Serialize};

/// `{fetched, new, existing, errors, message}` — returned by every
/// top-level operation (ingest, reprocess, detect-rolls). Errors never
/// abort a batch silently: the count is surfaced here and logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    /// Number of input records considered.
    pub fetched: usize,
    /// Number of new derived records created (trades, ledger rows, links).
    pub new: usize,
    /// Number of records that already existed and were left unchanged.
    pub existing: usize,
    /// Number of errors encountered; the batch still completed.
    pub errors: usize,
    /// Human-readable summary.
    pub message: String,
}

impl OperationStats {
    /// A stats value for an operation that touched nothing.
    #[must_use]
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Merge another operation's stats into this one (sums counters, keeps
    /// this value's message).
    pub fn merge(&mut self, other: &Self) {
        self.fetched += other.fetched;
        self.new += other.new;
        self.existing += other.existing;
        self.errors += other.errors;
    }
}

//! Options trading journal core
//!
//! Reconstructs logical multi-leg option trades and a per-leg position
//! ledger from a raw stream of broker execution reports, classifies
//! strategies, computes analytics against live or cached market data, and
//! links rolled positions across trades.
//!
//! Features:
//! - Execution normalization across stock splits
//! - Per-`(underlying, leg_key)` position ledger with a fixed state machine
//! - Trade grouping into logical multi-leg positions
//! - Strategy classification (verticals, straddles, condors, PMCC, ...)
//! - Analytics: breakevens, max profit/risk, net Greeks, probability of profit
//! - Roll detection and chain linking
//! - Position integrity checks
//! - Postgres persistence with full reprocessing from recorded executions

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod analytics;
pub mod classifier;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod grouping;
pub mod integrity;
pub mod ledger;
pub mod normalizer;
pub mod persistence;
pub mod provider;
pub mod roll;
pub mod split_calendar;
pub mod stats;
pub mod types;

pub use config::JournalConfig;
pub use core::Core;
pub use error::{CoreError, CoreResult};
pub use events::CoreEvent;
pub use stats::OperationStats;

//! Runtime configuration for the core engine (spec.md §6, §9).
//!
//! Mirrors `services-common`'s env-struct-with-`Default` convention. The
//! outer config *service* (env var discovery, secret stores, ...) is out of
//! scope per spec.md §1; this struct is the shape that service hands the
//! core at startup.

use std::env;
use std::time::Duration;

/// Tunables the core needs to run: trade-grouping/roll windows and default
/// margin percentages (spec.md §6), plus optional provider credentials that
/// degrade gracefully to `None` when absent.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Postgres connection string.
    pub database_url: String,

    /// Trade-grouping window: opening executions within this interval (or
    /// sharing `order_id`/`perm_id`) are grouped into one trade candidate
    /// (spec.md §4.3 rule 1). Default 5 minutes.
    pub w_open: Duration,
    /// Roll-detection window for executions across distinct orders
    /// (spec.md §4.6 rule 2). Default 10 minutes.
    pub w_roll: Duration,
    /// Roll-detection window extension applied when the closing and
    /// opening trades share an `order_id`/`perm_id` (spec.md §9 Open
    /// Question 3). Default 24 hours.
    pub w_roll_same_order: Duration,

    /// Default naked-put margin percentage.
    pub default_naked_put_margin_pct: f64,
    /// Default naked-call margin percentage.
    pub default_naked_call_margin_pct: f64,
    /// Default defined-risk spread margin percentage.
    pub default_spread_margin_pct: f64,
    /// Default iron-condor margin percentage.
    pub default_iron_condor_margin_pct: f64,

    /// Polygon API key, if configured. Analytics degrade gracefully when
    /// absent (spec.md §6).
    pub polygon_api_key: Option<String>,
    /// FRED API key, if configured.
    pub fred_api_key: Option<String>,

    /// TTL for cached quotes (spec.md §5). Default 5 minutes.
    pub quote_cache_ttl: Duration,
    /// TTL for the cached risk-free rate (spec.md §5). Default 24 hours.
    pub risk_free_rate_cache_ttl: Duration,

    /// Maximum number of underlying partitions processed concurrently
    /// (spec.md §5).
    pub max_concurrent_partitions: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/options_journal".to_string(),
            w_open: Duration::from_secs(5 * 60),
            w_roll: Duration::from_secs(10 * 60),
            w_roll_same_order: Duration::from_secs(24 * 60 * 60),
            default_naked_put_margin_pct: 20.0,
            default_naked_call_margin_pct: 20.0,
            default_spread_margin_pct: 100.0,
            default_iron_condor_margin_pct: 100.0,
            polygon_api_key: None,
            fred_api_key: None,
            quote_cache_ttl: Duration::from_secs(5 * 60),
            risk_free_rate_cache_ttl: Duration::from_secs(24 * 60 * 60),
            max_concurrent_partitions: 8,
        }
    }
}

impl JournalConfig {
    /// Load configuration from the environment, falling back to
    /// `dotenv`-loaded `.env` values and then to defaults. Never fails:
    /// missing provider keys simply leave those fields `None`.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(secs) = env_u64("W_OPEN_SECS") {
            config.w_open = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("W_ROLL_SECS") {
            config.w_roll = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("W_ROLL_SAME_ORDER_SECS") {
            config.w_roll_same_order = Duration::from_secs(secs);
        }
        if let Some(pct) = env_f64("DEFAULT_MARGIN_PCT") {
            config.default_naked_put_margin_pct = pct;
            config.default_naked_call_margin_pct = pct;
        }
        config.polygon_api_key = env::var("POLYGON_API_KEY").ok();
        config.fred_api_key = env::var("FRED_API_KEY").ok();

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = JournalConfig::default();
        assert_eq!(config.w_open, Duration::from_secs(300));
        assert_eq!(config.w_roll, Duration::from_secs(600));
        assert_eq!(config.w_roll_same_order, Duration::from_secs(86_400));
        assert_eq!(config.default_spread_margin_pct, 100.0);
        assert!(config.polygon_api_key.is_none());
    }
}

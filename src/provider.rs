//! Market-data and risk-free-rate collaborators (spec.md §1, §5, §6).
//!
//! The broker adapter, Polygon client, and FRED client are external
//! collaborators out of scope for this crate; only the interfaces they
//! must satisfy, plus an in-process TTL cache wrapper, live here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{CoreError, CoreResult};
use crate::types::{Greek, Money};

/// A quote and the Greeks/IV needed for analytics, for one leg key.
#[derive(Debug, Clone, Copy)]
pub struct Quote {
    /// Last/mid price for the instrument.
    pub price: Money,
    /// Implied volatility, if the provider has one (options only).
    pub implied_volatility: Option<Greek>,
    /// Delta, if available.
    pub delta: Option<Greek>,
    /// Gamma, if available.
    pub gamma: Option<Greek>,
    /// Theta, if available.
    pub theta: Option<Greek>,
    /// Vega, if available.
    pub vega: Option<Greek>,
    /// Rho, if available.
    pub rho: Option<Greek>,
}

/// Market-data lookup: quotes and Greeks keyed by `(underlying, leg_key)`.
/// Implemented by a Polygon client outside this crate; this crate only
/// depends on the trait.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch a quote for one leg key under `underlying`.
    async fn quote(&self, underlying: &str, leg_key: &str) -> CoreResult<Quote>;
}

/// Risk-free-rate lookup (3-month T-bill rate from FRED), used by the
/// analytics kernel's PoP calculation (spec.md §4.5).
#[async_trait]
pub trait RiskFreeRateProvider: Send + Sync {
    /// Current annualized risk-free rate, e.g. `0.0525` for 5.25%.
    async fn risk_free_rate(&self) -> CoreResult<f64>;
}

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

/// Wraps a [`QuoteProvider`] with an in-process, thread-safe TTL cache
/// (spec.md §5), grounded on `portfolio-manager`'s
/// `RwLock<FxHashMap<..>>` state pattern. A timed-out or failed fetch
/// falls back to the last cached value and reports staleness via
/// [`CachedQuote::stale`], matching the "stale flag" behavior spec.md §5
/// describes for provider timeouts.
pub struct CachingQuoteProvider<P: QuoteProvider> {
    inner: P,
    ttl: Duration,
    cache: RwLock<FxHashMap<(String, String), CacheEntry<Quote>>>,
}

/// A quote together with whether it was served from a cache entry older
/// than the TTL because the live fetch failed.
#[derive(Debug, Clone, Copy)]
pub struct CachedQuote {
    /// The quote value.
    pub quote: Quote,
    /// True if this value came from an expired cache entry after a failed
    /// refresh.
    pub stale: bool,
}

impl<P: QuoteProvider> CachingQuoteProvider<P> {
    /// Wrap `inner` with a cache of the given TTL.
    #[must_use]
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    /// Fetch a quote, consulting and refreshing the cache as needed.
    pub async fn quote(&self, underlying: &str, leg_key: &str) -> CoreResult<CachedQuote> {
        let key = (underlying.to_string(), leg_key.to_string());

        if let Some(entry) = self.cache.read().get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(CachedQuote {
                    quote: entry.value,
                    stale: false,
                });
            }
        }

        match self.inner.quote(underlying, leg_key).await {
            Ok(quote) => {
                self.cache.write().insert(
                    key,
                    CacheEntry {
                        value: quote,
                        fetched_at: Instant::now(),
                    },
                );
                Ok(CachedQuote {
                    quote,
                    stale: false,
                })
            }
            Err(err) => {
                if let Some(entry) = self.cache.read().get(&key) {
                    tracing::warn!(%underlying, %leg_key, error = %err, "quote refresh failed, serving stale cache");
                    return Ok(CachedQuote {
                        quote: entry.value,
                        stale: true,
                    });
                }
                Err(err)
            }
        }
    }
}

/// Wraps a [`RiskFreeRateProvider`] with a long-TTL cache (default 24h,
/// spec.md §5).
pub struct CachingRateProvider<P: RiskFreeRateProvider> {
    inner: P,
    ttl: Duration,
    cache: RwLock<Option<CacheEntry<f64>>>,
}

impl<P: RiskFreeRateProvider> CachingRateProvider<P> {
    /// Wrap `inner` with a cache of the given TTL.
    #[must_use]
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Fetch the risk-free rate, consulting and refreshing the cache.
    pub async fn rate(&self) -> CoreResult<f64> {
        if let Some(entry) = self.cache.read().as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.value);
            }
        }
        match self.inner.risk_free_rate().await {
            Ok(value) => {
                *self.cache.write() = Some(CacheEntry {
                    value,
                    fetched_at: Instant::now(),
                });
                Ok(value)
            }
            Err(err) => {
                if let Some(entry) = self.cache.read().as_ref() {
                    tracing::warn!(error = %err, "risk-free rate refresh failed, serving stale cache");
                    return Ok(entry.value);
                }
                Err(err)
            }
        }
    }
}

/// A [`QuoteProvider`] with no live backend, useful when providers are
/// unconfigured (spec.md §6 "analytics degrade gracefully").
pub struct NullQuoteProvider;

#[async_trait]
impl QuoteProvider for NullQuoteProvider {
    async fn quote(&self, underlying: &str, leg_key: &str) -> CoreResult<Quote> {
        Err(CoreError::Provider {
            provider: "none".to_string(),
            reason: format!("no quote provider configured for {underlying}/{leg_key}"),
        })
    }
}

/// A [`RiskFreeRateProvider`] returning a fixed default rate when FRED is
/// unconfigured.
pub struct FixedRateProvider(pub f64);

#[async_trait]
impl RiskFreeRateProvider for FixedRateProvider {
    async fn risk_free_rate(&self) -> CoreResult<f64> {
        Ok(self.0)
    }
}

/// Convenience alias for a shared, caching quote provider.
pub type SharedQuoteProvider<P> = Arc<CachingQuoteProvider<P>>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuoteProvider for CountingProvider {
        async fn quote(&self, _underlying: &str, _leg_key: &str) -> CoreResult<Quote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Quote {
                price: Money::from_units(1),
                implied_volatility: None,
                delta: None,
                gamma: None,
                theta: None,
                vega: None,
                rho: None,
            })
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let provider = CachingQuoteProvider::new(
            CountingProvider {
                calls: AtomicUsize::new(0),
            },
            Duration::from_secs(300),
        );
        provider.quote("SPY", "STK").await.unwrap();
        provider.quote("SPY", "STK").await.unwrap();
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn null_provider_errors() {
        let err = NullQuoteProvider.quote("SPY", "STK").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn fixed_rate_provider_returns_configured_value() {
        let rate = FixedRateProvider(0.0525).risk_free_rate().await.unwrap();
        assert_abs_diff_eq!(rate, 0.0525, epsilon = 1e-12);
    }
}

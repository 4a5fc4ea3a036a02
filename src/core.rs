//! Orchestration layer: wires the normalizer, ledger, grouping engine,
//! analytics kernel, persistence store, and provider collaborators into
//! the top-level operations spec.md §5 names — ingest, reprocess,
//! detect-rolls, check-integrity. Grounded on `oms/src/lib.rs`'s
//! `OrderManagementSystem`: a single god-struct holding `Arc<Config>`, a
//! connection pool, in-memory active-state maps, a
//! `broadcast::Sender` event bus, and an async `new()` that builds the
//! pool, runs migrations, and constructs its component managers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use rustc_hash::FxHashMap;
use parking_lot::RwLock;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};

use crate::analytics::{AnalyticsKernel, LegQuote};
use crate::config::JournalConfig;
use crate::error::CoreResult;
use crate::events::CoreEvent;
use crate::grouping::{GroupingEvent, TradeGroupingEngine};
use crate::integrity::{self, IntegrityFinding, PositionSample};
use crate::ledger::{LedgerDelta, PositionLedger};
use crate::normalizer::ExecutionNormalizer;
use crate::persistence::{GreeksPhase, PersistenceStore};
use crate::provider::{CachingQuoteProvider, CachingRateProvider, QuoteProvider, RiskFreeRateProvider};
use crate::roll::{self, RollCandidate};
use crate::split_calendar::SplitCalendar;
use crate::stats::OperationStats;
use crate::types::{Execution, MarginSettings, Trade, TradeLegGreeks, TradeStatus};

/// The execution-to-trade reconstruction engine. Generic over the
/// market-data and risk-free-rate collaborators so callers can plug in a
/// live Polygon/FRED client or a test double.
pub struct Core<Q: QuoteProvider, R: RiskFreeRateProvider> {
    config: Arc<JournalConfig>,
    persistence: PersistenceStore,
    splits: Arc<SplitCalendar>,
    normalizer: ExecutionNormalizer,
    ledger: PositionLedger,
    grouping: TradeGroupingEngine,
    analytics: AnalyticsKernel,
    quotes: Arc<CachingQuoteProvider<Q>>,
    rates: Arc<CachingRateProvider<R>>,
    events: broadcast::Sender<CoreEvent>,
    semaphore: Arc<Semaphore>,
    /// Last persisted `position_ledger` row id for each currently-open
    /// `(underlying, leg_key)`. The ledger state machine itself never
    /// tracks database identity (spec.md §4.2 is pure in-memory state);
    /// this map is how `ingest_one` turns a same-sign add or a partial
    /// reduce into an `UPDATE` of the already-open row instead of a new
    /// one, while a flatten or the close-half of a cross drops the entry
    /// so the next open for that key allocates fresh.
    ledger_row_ids: RwLock<FxHashMap<(String, String), i64>>,
}

impl<Q: QuoteProvider + Send + Sync + 'static, R: RiskFreeRateProvider + Send + Sync + 'static> Core<Q, R> {
    /// Build a new core: connect to Postgres, apply migrations, and wire
    /// every collaborator. Mirrors `OrderManagementSystem::new`'s
    /// connect-migrate-construct sequence.
    pub async fn new(config: JournalConfig, quote_provider: Q, rate_provider: R) -> CoreResult<Self> {
        info!("initializing options journal core");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        let persistence = PersistenceStore::new(pool);
        persistence.migrate().await?;

        let (events, _) = broadcast::channel(1024);
        let max_concurrent_partitions = config.max_concurrent_partitions;
        let quote_cache_ttl = config.quote_cache_ttl;
        let risk_free_rate_cache_ttl = config.risk_free_rate_cache_ttl;
        let splits = SplitCalendar::new();

        let core = Self {
            config: Arc::new(config),
            persistence,
            normalizer: ExecutionNormalizer::new(Arc::clone(&splits)),
            splits,
            ledger: PositionLedger::new(),
            grouping: TradeGroupingEngine::new(),
            analytics: AnalyticsKernel,
            quotes: Arc::new(CachingQuoteProvider::new(quote_provider, quote_cache_ttl)),
            rates: Arc::new(CachingRateProvider::new(rate_provider, risk_free_rate_cache_ttl)),
            events,
            semaphore: Arc::new(Semaphore::new(max_concurrent_partitions.max(1))),
            ledger_row_ids: RwLock::new(FxHashMap::default()),
        };

        info!("options journal core ready");
        Ok(core)
    }

    /// Subscribe to derived-state change events, for relaying to an
    /// external bus (spec.md §6).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Register a stock split so future normalization adjusts across it
    /// (spec.md §4.1).
    pub fn register_split(
        &self,
        symbol: impl Into<String>,
        split_date: chrono::DateTime<Utc>,
        ratio_from: i64,
        ratio_to: i64,
    ) {
        self.splits.register_split(symbol, split_date, ratio_from, ratio_to);
    }

    /// Ingest a batch of raw executions. Partitions by `underlying` and
    /// processes partitions concurrently (bounded by
    /// `max_concurrent_partitions`); within a partition, executions are
    /// applied strictly in order since the ledger state machine requires
    /// a total order per `(underlying, leg_key)` (spec.md §5 "scheduling
    /// model"). No error here escapes as an `Err` — every failure is
    /// folded into the returned stats (spec.md §7 "propagation policy").
    pub async fn ingest_batch(self: &Arc<Self>, executions: Vec<Execution>) -> OperationStats {
        let partitions = partition_by_underlying(executions);
        let mut handles = Vec::with_capacity(partitions.len());

        for (underlying, execs) in partitions {
            let core = Arc::clone(self);
            let semaphore = Arc::clone(&self.semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                core.ingest_partition(&underlying, execs).await
            }));
        }

        let mut total = OperationStats::empty("ingest_batch");
        for handle in handles {
            match handle.await {
                Ok(stats) => total.merge(&stats),
                Err(join_err) => {
                    total.errors += 1;
                    warn!(error = %join_err, "ingestion partition task panicked");
                }
            }
        }
        total.message = format!("ingested {} execution(s) across partitions", total.fetched);
        total
    }

    async fn ingest_partition(&self, underlying: &str, executions: Vec<Execution>) -> OperationStats {
        let mut stats = OperationStats {
            fetched: executions.len(),
            ..OperationStats::default()
        };
        let mut touched_trades: BTreeSet<i64> = BTreeSet::new();

        for raw in executions {
            match self.ingest_one(raw).await {
                Ok(trade_ids) => {
                    stats.new += trade_ids.len();
                    touched_trades.extend(trade_ids);
                }
                Err(err) => {
                    stats.errors += 1;
                    warn!(%underlying, error = %err, "execution ingestion failed");
                }
            }
        }

        for trade_id in touched_trades {
            if let Err(err) = self.refresh_trade_analytics(trade_id).await {
                stats.errors += 1;
                warn!(trade_id, error = %err, "analytics refresh failed");
            }
        }

        stats.message = format!("partition {underlying}: {} execution(s)", stats.fetched);
        stats
    }

    /// Normalize, persist, and fold one execution through the ledger and
    /// grouping engine, returning every trade id touched. A single
    /// execution can touch two trades when it crosses a position
    /// (spec.md §4.2 case 5: close one trade's leg, open another's).
    async fn ingest_one(&self, raw: Execution) -> CoreResult<Vec<i64>> {
        let exec = self.normalizer.normalize(raw)?;
        self.persistence.save_execution(&exec).await?;

        let deltas = self.ledger.apply(&exec)?;
        let mut touched = Vec::with_capacity(deltas.len());

        for delta in &deltas {
            self.persist_ledger_delta(delta).await?;

            let event = self.grouping.process(delta, &exec, self.config.w_open, None);
            let trade = event.trade().clone();
            let trade_id = self.persistence.save_trade(&trade).await?;
            touched.push(trade_id);

            let core_event = match event {
                GroupingEvent::Created(_) => CoreEvent::TradeCreated(trade),
                GroupingEvent::Updated(_) => CoreEvent::TradeUpdated(trade),
                GroupingEvent::Closed(_) => CoreEvent::TradeClosed(trade),
            };
            let _ = self.events.send(core_event);
        }

        Ok(touched)
    }

    /// Persist one ledger delta, reusing the already-open row's id for a
    /// same-sign add or partial reduce, and dropping the tracked id once
    /// a key fully flattens so the next open allocates a fresh row.
    async fn persist_ledger_delta(&self, delta: &LedgerDelta) -> CoreResult<()> {
        let key = (delta.underlying.clone(), delta.leg_key.clone());
        let mut entry = delta.entry.clone();

        let existing_id = self.ledger_row_ids.read().get(&key).copied();
        entry.id = existing_id;

        let id = self.persistence.save_ledger_entry(&entry).await?;

        if entry.quantity.is_zero() {
            self.ledger_row_ids.write().remove(&key);
        } else {
            self.ledger_row_ids.write().insert(key, id);
        }

        Ok(())
    }

    /// Recompute a trade's analytics from its current legs: resolve
    /// quotes (tracking staleness into `analytics_partial`), fetch the
    /// risk-free rate, load margin settings, run the analytics kernel,
    /// and persist the refreshed trade plus a Greeks snapshot for the
    /// appropriate lifecycle phase.
    async fn refresh_trade_analytics(&self, trade_id: i64) -> CoreResult<Trade> {
        let Some(mut trade) = self.grouping.trade(trade_id) else {
            return Err(crate::error::CoreError::Integrity {
                underlying: String::new(),
                leg_key: String::new(),
                reason: format!("refresh_trade_analytics: unknown trade {trade_id}"),
            });
        };

        let legs = self.grouping.legs(trade_id);
        let mut leg_quotes = Vec::with_capacity(legs.len());
        let mut any_stale = false;
        for leg in &legs {
            match self.quotes.quote(&trade.underlying, &leg.leg_key).await {
                Ok(cached) => {
                    any_stale |= cached.stale;
                    leg_quotes.push(LegQuote {
                        leg: leg.clone(),
                        quote: Some(cached.quote),
                    });
                }
                Err(err) => {
                    warn!(underlying = %trade.underlying, leg_key = %leg.leg_key, error = %err, "quote unavailable");
                    leg_quotes.push(LegQuote {
                        leg: leg.clone(),
                        quote: None,
                    });
                }
            }
        }

        let underlying_price = leg_quotes
            .iter()
            .find(|lq| lq.leg.leg_type == crate::classifier::LegType::Stock)
            .and_then(|lq| lq.quote.map(|q| q.price));

        let risk_free_rate = self.rates.rate().await.unwrap_or(0.0);

        let margin = self
            .persistence
            .load_margin_settings(&trade.underlying)
            .await?
            .unwrap_or_else(|| default_margin_settings(&self.config, &trade.underlying));

        let result = self.analytics.compute(
            trade.strategy_type,
            &leg_quotes,
            trade.opening_cost,
            &margin,
            underlying_price,
            risk_free_rate,
            Utc::now(),
        );

        trade.breakevens = result.breakevens;
        trade.max_profit = result.max_profit;
        trade.max_risk = result.max_risk;
        trade.net_delta = result.net_delta;
        trade.net_theta = result.net_theta;
        trade.analytics_partial = result.analytics_partial || any_stale;

        let snapshot = leg_snapshot(&leg_quotes, Utc::now());
        if trade.status == TradeStatus::Closed {
            trade.greeks_at_close = snapshot;
        } else if trade.greeks_at_open.is_empty() {
            trade.greeks_at_open = snapshot;
        }

        self.persistence.save_trade(&trade).await?;
        let phase = if trade.status == TradeStatus::Closed {
            GreeksPhase::Close
        } else {
            GreeksPhase::Open
        };
        let source = if trade.status == TradeStatus::Closed {
            &trade.greeks_at_close
        } else {
            &trade.greeks_at_open
        };
        for greeks in source {
            self.persistence.save_trade_leg_greeks(trade_id, phase, greeks).await?;
        }

        Ok(trade)
    }

    /// Discard every derived Trade (but not executions), reset the
    /// ledger and grouping engine, and replay every recorded execution in
    /// global time order (spec.md §4.3 `reprocess_all_executions`).
    /// Global, not per-underlying: the operation's own description names
    /// no partition, and a true per-partition reset would leave other
    /// underlyings' in-memory state pointing at database rows that no
    /// longer exist.
    pub async fn reprocess_all(self: &Arc<Self>) -> OperationStats {
        let mut stats = OperationStats::empty("reprocess_all_executions");

        if let Err(err) = self.persistence.clear_derived_state().await {
            stats.errors += 1;
            stats.message = format!("failed to clear derived state: {err}");
            return stats;
        }
        self.ledger.reset();
        self.grouping.reset();
        self.ledger_row_ids.write().clear();

        let executions = match self.persistence.all_executions_ordered().await {
            Ok(execs) => execs,
            Err(err) => {
                stats.errors += 1;
                stats.message = format!("failed to load executions for replay: {err}");
                return stats;
            }
        };

        let mut replay = self.ingest_batch_sequential(executions).await;
        replay.message = format!("reprocessed {} execution(s) in global order", replay.fetched);
        replay
    }

    /// Replay executions strictly in the order given, never partitioned
    /// concurrently — used by `reprocess_all` where spec.md §4.3 requires
    /// one global total order rather than per-underlying partitions.
    async fn ingest_batch_sequential(&self, executions: Vec<Execution>) -> OperationStats {
        let mut stats = OperationStats {
            fetched: executions.len(),
            ..OperationStats::default()
        };
        let mut touched_trades: BTreeSet<i64> = BTreeSet::new();

        for raw in executions {
            match self.ingest_one(raw).await {
                Ok(trade_ids) => {
                    stats.new += trade_ids.len();
                    touched_trades.extend(trade_ids);
                }
                Err(err) => {
                    stats.errors += 1;
                    warn!(error = %err, "execution replay failed");
                }
            }
        }

        for trade_id in touched_trades {
            if let Err(err) = self.refresh_trade_analytics(trade_id).await {
                stats.errors += 1;
                warn!(trade_id, error = %err, "analytics refresh failed during replay");
            }
        }

        stats
    }

    /// Evaluate one underlying's closed and recently-opened trades for
    /// roll links, persisting any new links found (spec.md §4.6).
    pub async fn detect_rolls(&self, underlying: &str) -> OperationStats {
        let mut stats = OperationStats::empty(format!("detect_rolls {underlying}"));

        let trades = match self.persistence.trades_for_underlying(underlying).await {
            Ok(trades) => trades,
            Err(err) => {
                stats.errors += 1;
                stats.message = format!("failed to load trades: {err}");
                return stats;
            }
        };
        stats.fetched = trades.len();

        let closed: Vec<RollCandidate> = trades
            .iter()
            .filter(|t| t.status == TradeStatus::Closed)
            .cloned()
            .map(|trade| RollCandidate {
                legs: self.grouping.legs(trade.id.unwrap_or_default()),
                trade,
            })
            .collect();
        let opened_since: Vec<RollCandidate> = trades
            .into_iter()
            .map(|trade| RollCandidate {
                legs: self.grouping.legs(trade.id.unwrap_or_default()),
                trade,
            })
            .collect();

        let links = roll::detect_rolls(
            &closed,
            &opened_since,
            self.config.w_roll,
            self.config.w_roll_same_order,
            |from_id, to_id| self.grouping.shares_perm_id(from_id, to_id),
        );

        for link in links {
            if let Err(err) = self.apply_roll_link(link).await {
                stats.errors += 1;
                warn!(from = link.from_trade_id, to = link.to_trade_id, error = %err, "failed to persist roll link");
                continue;
            }
            stats.new += 1;
            let _ = self.events.send(CoreEvent::RollLinked {
                from_trade_id: link.from_trade_id,
                to_trade_id: link.to_trade_id,
                roll_chain_id: link.roll_chain_id,
            });
        }

        stats.message = format!("evaluated {} trade(s), linked {} roll(s)", stats.fetched, stats.new);
        stats
    }

    async fn apply_roll_link(&self, link: roll::RollLink) -> CoreResult<()> {
        if let Some(mut trade) = self.grouping.trade(link.from_trade_id) {
            trade.rolled_to_trade_id = Some(link.to_trade_id);
            trade.is_roll = true;
            trade.roll_chain_id = Some(link.roll_chain_id);
            self.persistence.save_trade(&trade).await?;
        }
        if let Some(mut trade) = self.grouping.trade(link.to_trade_id) {
            trade.rolled_from_trade_id = Some(link.from_trade_id);
            trade.roll_chain_id = Some(link.roll_chain_id);
            self.persistence.save_trade(&trade).await?;
        }
        Ok(())
    }

    /// Advisory integrity scan for one underlying's position sample
    /// (spec.md §4.7). Never halts ingestion; the caller decides what to
    /// do with the findings.
    #[must_use]
    pub fn check_integrity(&self, sample: &PositionSample) -> Vec<IntegrityFinding> {
        integrity::check(sample)
    }
}

/// Split a batch of executions by `underlying`, preserving each
/// partition's relative order. Pure and trivially testable; the async
/// ingestion path bounds concurrency across the partitions this returns.
fn partition_by_underlying(executions: Vec<Execution>) -> BTreeMap<String, Vec<Execution>> {
    let mut partitions: BTreeMap<String, Vec<Execution>> = BTreeMap::new();
    for exec in executions {
        partitions.entry(exec.underlying.clone()).or_default().push(exec);
    }
    partitions
}

fn leg_snapshot(leg_quotes: &[LegQuote], now: chrono::DateTime<Utc>) -> Vec<TradeLegGreeks> {
    leg_quotes
        .iter()
        .filter_map(|lq| {
            let quote = lq.quote?;
            Some(TradeLegGreeks {
                leg_key: lq.leg.leg_key.clone(),
                captured_at: now,
                delta: quote.delta.unwrap_or_default(),
                gamma: quote.gamma.unwrap_or_default(),
                theta: quote.theta.unwrap_or_default(),
                vega: quote.vega.unwrap_or_default(),
                rho: quote.rho.unwrap_or_default(),
                implied_volatility: quote.implied_volatility.unwrap_or_default(),
            })
        })
        .collect()
}

fn default_margin_settings(config: &JournalConfig, underlying: &str) -> MarginSettings {
    MarginSettings {
        underlying: underlying.to_string(),
        naked_put_margin_pct: config.default_naked_put_margin_pct,
        naked_call_margin_pct: config.default_naked_call_margin_pct,
        spread_margin_pct: config.default_spread_margin_pct,
        iron_condor_margin_pct: config.default_iron_condor_margin_pct,
        notes: None,
    }
}

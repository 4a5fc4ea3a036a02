//! Postgres persistence layer (spec.md §6): `executions`, `trades`,
//! `position_ledger`, `trade_leg_greeks`, `stock_splits`, `margin_settings`,
//! `tags`, `trade_tags`. Grounded on `oms/src/persistence.rs`'s
//! `sqlx::query(...).bind(...)` convention with `ON CONFLICT DO UPDATE`
//! upserts, rather than compile-time-checked `query!` macros (this core
//! has no build-time database to check against).

use sqlx::{PgPool, Row};

use crate::error::CoreResult;
use crate::types::{
    Execution, Greek, LedgerEntry, LedgerStatus, MarginSettings, Money, OpenCloseIndicator,
    OptionType, SecurityType, Side, StockSplit, StrategyType, Trade, TradeLegGreeks, TradeStatus,
};

/// Which side of a Trade's lifecycle a `TradeLegGreeks` snapshot belongs
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreeksPhase {
    /// Captured when the trade opened.
    Open,
    /// Captured when the trade closed.
    Close,
}

impl GreeksPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// Thin wrapper over a `PgPool` exposing the core's persisted shapes.
/// Owns no connection-lifecycle logic beyond the pool itself; callers
/// (core.rs) are responsible for transaction boundaries per spec.md §5
/// ("one transaction per underlying partition").
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    pool: PgPool,
}

impl PersistenceStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the core's table/index DDL. Idempotent (`CREATE TABLE IF NOT
    /// EXISTS`); real deployments are expected to use migrations instead,
    /// but this keeps the crate self-contained for local testing.
    pub async fn migrate(&self) -> CoreResult<()> {
        for statement in MIGRATION_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert an execution. Conflicts on `exec_id` are ignored — executions
    /// are immutable once recorded (spec.md §3).
    pub async fn save_execution(&self, exec: &Execution) -> CoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO executions (
                exec_id, order_id, perm_id, underlying, security_type, option_type,
                strike, expiration, multiplier, side, quantity, price, commission,
                net_amount, execution_time, account_id, open_close_indicator, trade_id
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
            )
            ON CONFLICT (exec_id) DO NOTHING
            ",
        )
        .bind(&exec.exec_id)
        .bind(exec.order_id)
        .bind(exec.perm_id)
        .bind(&exec.underlying)
        .bind(format!("{:?}", exec.security_type))
        .bind(exec.option_type.map(|t| format!("{t:?}")))
        .bind(exec.strike.map(Money::raw))
        .bind(exec.expiration)
        .bind(exec.multiplier)
        .bind(format!("{:?}", exec.side))
        .bind(exec.quantity.raw())
        .bind(exec.price.raw())
        .bind(exec.commission.raw())
        .bind(exec.net_amount.raw())
        .bind(exec.execution_time)
        .bind(&exec.account_id)
        .bind(exec.open_close_indicator.map(|i| format!("{i:?}")))
        .bind(exec.trade_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All executions recorded for one underlying, in `(execution_time,
    /// exec_id)` order (spec.md §5 ordering guarantee).
    pub async fn executions_for_underlying(&self, underlying: &str) -> CoreResult<Vec<Execution>> {
        let rows = sqlx::query(
            r"
            SELECT exec_id, order_id, perm_id, underlying, security_type, option_type,
                   strike, expiration, multiplier, side, quantity, price, commission,
                   net_amount, execution_time, account_id, open_close_indicator, trade_id
            FROM executions
            WHERE underlying = $1
            ORDER BY execution_time ASC, exec_id ASC
            ",
        )
        .bind(underlying)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_execution).collect()
    }

    /// Upsert a Trade row, returning its id. The trade-grouping engine
    /// assigns ids itself (an in-memory sequence, mirroring `oms`'s
    /// app-generated order ids) rather than relying on the `BIGSERIAL`
    /// default, so a `Some(id)` trade is upserted by that explicit id;
    /// only a bare `None` falls back to letting Postgres assign one.
    pub async fn save_trade(&self, trade: &Trade) -> CoreResult<i64> {
        let breakevens: Vec<i64> = trade.breakevens.iter().map(|m| m.raw()).collect();

        if let Some(id) = trade.id {
            sqlx::query(
                r"
                INSERT INTO trades (
                    id, underlying, strategy_type, status, opened_at, closed_at, num_legs,
                    num_executions, opening_cost, realized_pnl, total_commission,
                    wash_sale_adjustment, roll_chain_id, rolled_from_trade_id,
                    rolled_to_trade_id, is_roll, is_assignment, assigned_from_trade_id,
                    max_profit, max_risk, breakevens, net_delta, net_theta, analytics_partial
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24
                )
                ON CONFLICT (id) DO UPDATE SET
                    strategy_type = EXCLUDED.strategy_type,
                    status = EXCLUDED.status,
                    closed_at = EXCLUDED.closed_at,
                    num_legs = EXCLUDED.num_legs,
                    num_executions = EXCLUDED.num_executions,
                    opening_cost = EXCLUDED.opening_cost,
                    realized_pnl = EXCLUDED.realized_pnl,
                    total_commission = EXCLUDED.total_commission,
                    wash_sale_adjustment = EXCLUDED.wash_sale_adjustment,
                    roll_chain_id = EXCLUDED.roll_chain_id,
                    rolled_from_trade_id = EXCLUDED.rolled_from_trade_id,
                    rolled_to_trade_id = EXCLUDED.rolled_to_trade_id,
                    is_roll = EXCLUDED.is_roll,
                    is_assignment = EXCLUDED.is_assignment,
                    assigned_from_trade_id = EXCLUDED.assigned_from_trade_id,
                    max_profit = EXCLUDED.max_profit,
                    max_risk = EXCLUDED.max_risk,
                    breakevens = EXCLUDED.breakevens,
                    net_delta = EXCLUDED.net_delta,
                    net_theta = EXCLUDED.net_theta,
                    analytics_partial = EXCLUDED.analytics_partial
                ",
            )
            .bind(id)
            .bind(&trade.underlying)
            .bind(format!("{:?}", trade.strategy_type))
            .bind(format!("{:?}", trade.status))
            .bind(trade.opened_at)
            .bind(trade.closed_at)
            .bind(trade.num_legs as i32)
            .bind(trade.num_executions as i32)
            .bind(trade.opening_cost.raw())
            .bind(trade.realized_pnl.raw())
            .bind(trade.total_commission.raw())
            .bind(trade.wash_sale_adjustment.raw())
            .bind(trade.roll_chain_id)
            .bind(trade.rolled_from_trade_id)
            .bind(trade.rolled_to_trade_id)
            .bind(trade.is_roll)
            .bind(trade.is_assignment)
            .bind(trade.assigned_from_trade_id)
            .bind(trade.max_profit.map(Money::raw))
            .bind(trade.max_risk.map(Money::raw))
            .bind(breakevens)
            .bind(trade.net_delta.map(Greek::raw))
            .bind(trade.net_theta.map(Greek::raw))
            .bind(trade.analytics_partial)
            .execute(&self.pool)
            .await?;
            return Ok(id);
        }

        let row = sqlx::query(
            r"
            INSERT INTO trades (
                underlying, strategy_type, status, opened_at, closed_at, num_legs,
                num_executions, opening_cost, realized_pnl, total_commission,
                wash_sale_adjustment, roll_chain_id, rolled_from_trade_id,
                rolled_to_trade_id, is_roll, is_assignment, assigned_from_trade_id,
                max_profit, max_risk, breakevens, net_delta, net_theta, analytics_partial
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23
            )
            RETURNING id
            ",
        )
        .bind(&trade.underlying)
        .bind(format!("{:?}", trade.strategy_type))
        .bind(format!("{:?}", trade.status))
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .bind(trade.num_legs as i32)
        .bind(trade.num_executions as i32)
        .bind(trade.opening_cost.raw())
        .bind(trade.realized_pnl.raw())
        .bind(trade.total_commission.raw())
        .bind(trade.wash_sale_adjustment.raw())
        .bind(trade.roll_chain_id)
        .bind(trade.rolled_from_trade_id)
        .bind(trade.rolled_to_trade_id)
        .bind(trade.is_roll)
        .bind(trade.is_assignment)
        .bind(trade.assigned_from_trade_id)
        .bind(trade.max_profit.map(Money::raw))
        .bind(trade.max_risk.map(Money::raw))
        .bind(breakevens)
        .bind(trade.net_delta.map(Greek::raw))
        .bind(trade.net_theta.map(Greek::raw))
        .bind(trade.analytics_partial)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Upsert a ledger row, returning its id. Inserts (assigning a fresh id
    /// via the `BIGSERIAL` default) when `entry.id` is `None`; otherwise
    /// updates the existing row. Closed rows are retained, never deleted —
    /// a re-open allocates a new row with a fresh id.
    pub async fn save_ledger_entry(&self, entry: &LedgerEntry) -> CoreResult<i64> {
        if let Some(id) = entry.id {
            sqlx::query(
                r"
                UPDATE position_ledger SET
                    quantity = $2, avg_cost = $3, total_cost = $4, realized_pnl = $5,
                    status = $6, closed_at = $7, trade_id = $8
                WHERE id = $1
                ",
            )
            .bind(id)
            .bind(entry.quantity.raw())
            .bind(entry.avg_cost.raw())
            .bind(entry.total_cost.raw())
            .bind(entry.realized_pnl.raw())
            .bind(format!("{:?}", entry.status))
            .bind(entry.closed_at)
            .bind(entry.trade_id)
            .execute(&self.pool)
            .await?;
            return Ok(id);
        }

        let row = sqlx::query(
            r"
            INSERT INTO position_ledger (
                underlying, leg_key, quantity, avg_cost, total_cost, realized_pnl,
                status, opened_at, closed_at, trade_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            ",
        )
        .bind(&entry.underlying)
        .bind(&entry.leg_key)
        .bind(entry.quantity.raw())
        .bind(entry.avg_cost.raw())
        .bind(entry.total_cost.raw())
        .bind(entry.realized_pnl.raw())
        .bind(format!("{:?}", entry.status))
        .bind(entry.opened_at)
        .bind(entry.closed_at)
        .bind(entry.trade_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    /// Insert (or replace) a Greeks snapshot for one leg at open or close.
    pub async fn save_trade_leg_greeks(
        &self,
        trade_id: i64,
        phase: GreeksPhase,
        greeks: &TradeLegGreeks,
    ) -> CoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO trade_leg_greeks (
                trade_id, leg_key, phase, captured_at, delta, gamma, theta, vega, rho,
                implied_volatility
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (trade_id, leg_key, phase) DO UPDATE SET
                captured_at = EXCLUDED.captured_at,
                delta = EXCLUDED.delta,
                gamma = EXCLUDED.gamma,
                theta = EXCLUDED.theta,
                vega = EXCLUDED.vega,
                rho = EXCLUDED.rho,
                implied_volatility = EXCLUDED.implied_volatility
            ",
        )
        .bind(trade_id)
        .bind(&greeks.leg_key)
        .bind(phase.as_str())
        .bind(greeks.captured_at)
        .bind(greeks.delta.raw())
        .bind(greeks.gamma.raw())
        .bind(greeks.theta.raw())
        .bind(greeks.vega.raw())
        .bind(greeks.rho.raw())
        .bind(greeks.implied_volatility.raw())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a stock split. Splits are immutable once registered.
    pub async fn save_stock_split(&self, split: &StockSplit) -> CoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO stock_splits (id, symbol, split_date, ratio_from, ratio_to)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(split.id)
        .bind(&split.symbol)
        .bind(split.split_date)
        .bind(split.ratio_from)
        .bind(split.ratio_to)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All splits recorded for `symbol`, in `(split_date, id)` order.
    pub async fn splits_for_symbol(&self, symbol: &str) -> CoreResult<Vec<StockSplit>> {
        let rows = sqlx::query(
            r"
            SELECT id, symbol, split_date, ratio_from, ratio_to
            FROM stock_splits
            WHERE symbol = $1
            ORDER BY split_date ASC, id ASC
            ",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StockSplit {
                id: row.get("id"),
                symbol: row.get("symbol"),
                split_date: row.get("split_date"),
                ratio_from: row.get("ratio_from"),
                ratio_to: row.get("ratio_to"),
            })
            .collect())
    }

    /// Upsert per-underlying margin settings.
    pub async fn upsert_margin_settings(&self, settings: &MarginSettings) -> CoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO margin_settings (
                underlying, naked_put_margin_pct, naked_call_margin_pct,
                spread_margin_pct, iron_condor_margin_pct, notes
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (underlying) DO UPDATE SET
                naked_put_margin_pct = EXCLUDED.naked_put_margin_pct,
                naked_call_margin_pct = EXCLUDED.naked_call_margin_pct,
                spread_margin_pct = EXCLUDED.spread_margin_pct,
                iron_condor_margin_pct = EXCLUDED.iron_condor_margin_pct,
                notes = EXCLUDED.notes
            ",
        )
        .bind(&settings.underlying)
        .bind(settings.naked_put_margin_pct)
        .bind(settings.naked_call_margin_pct)
        .bind(settings.spread_margin_pct)
        .bind(settings.iron_condor_margin_pct)
        .bind(&settings.notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load margin settings for one underlying, if configured.
    pub async fn load_margin_settings(&self, underlying: &str) -> CoreResult<Option<MarginSettings>> {
        let row = sqlx::query(
            r"
            SELECT underlying, naked_put_margin_pct, naked_call_margin_pct,
                   spread_margin_pct, iron_condor_margin_pct, notes
            FROM margin_settings
            WHERE underlying = $1
            ",
        )
        .bind(underlying)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| MarginSettings {
            underlying: row.get("underlying"),
            naked_put_margin_pct: row.get("naked_put_margin_pct"),
            naked_call_margin_pct: row.get("naked_call_margin_pct"),
            spread_margin_pct: row.get("spread_margin_pct"),
            iron_condor_margin_pct: row.get("iron_condor_margin_pct"),
            notes: row.get("notes"),
        }))
    }

    /// Attach a free-form tag to a trade, creating the tag row if needed.
    pub async fn add_tag(&self, trade_id: i64, tag: &str) -> CoreResult<()> {
        let tag_id: i64 = sqlx::query(
            r"
            INSERT INTO tags (name) VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            ",
        )
        .bind(tag)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        sqlx::query(
            r"
            INSERT INTO trade_tags (trade_id, tag_id) VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(trade_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All trades for one underlying, in `(opened_at, id)` order —
    /// feeds roll detection and reprocessing (spec.md §5).
    pub async fn trades_for_underlying(&self, underlying: &str) -> CoreResult<Vec<Trade>> {
        let rows = sqlx::query(
            r"
            SELECT id, underlying, strategy_type, status, opened_at, closed_at, num_legs,
                   num_executions, opening_cost, realized_pnl, total_commission,
                   wash_sale_adjustment, roll_chain_id, rolled_from_trade_id,
                   rolled_to_trade_id, is_roll, is_assignment, assigned_from_trade_id,
                   max_profit, max_risk, breakevens, net_delta, net_theta, analytics_partial
            FROM trades
            WHERE underlying = $1
            ORDER BY opened_at ASC, id ASC
            ",
        )
        .bind(underlying)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_trade).collect()
    }

    /// Every ledger row (open and historically closed) for one underlying,
    /// in `(opened_at, id)` order.
    pub async fn ledger_for_underlying(&self, underlying: &str) -> CoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, underlying, leg_key, quantity, avg_cost, total_cost, realized_pnl,
                   status, opened_at, closed_at, trade_id
            FROM position_ledger
            WHERE underlying = $1
            ORDER BY opened_at ASC, id ASC
            ",
        )
        .bind(underlying)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_ledger_entry).collect()
    }

    /// Every execution recorded, across all underlyings, in global
    /// `(execution_time, exec_id)` order — feeds
    /// `reprocess_all_executions` (spec.md §4.3, "replays all executions
    /// in global time order").
    pub async fn all_executions_ordered(&self) -> CoreResult<Vec<Execution>> {
        let rows = sqlx::query(
            r"
            SELECT exec_id, order_id, perm_id, underlying, security_type, option_type,
                   strike, expiration, multiplier, side, quantity, price, commission,
                   net_amount, execution_time, account_id, open_close_indicator, trade_id
            FROM executions
            ORDER BY execution_time ASC, exec_id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_execution).collect()
    }

    /// Discard every derived Trade and ledger row (but not executions),
    /// in preparation for a full replay (spec.md §4.3
    /// `reprocess_all_executions`: "discards derived Trades... resets the
    /// ledger"). Greeks snapshots and trade tags cascade with their owning
    /// trades.
    pub async fn clear_derived_state(&self) -> CoreResult<()> {
        sqlx::query("DELETE FROM trade_leg_greeks").execute(&self.pool).await?;
        sqlx::query("DELETE FROM trade_tags").execute(&self.pool).await?;
        sqlx::query("DELETE FROM position_ledger").execute(&self.pool).await?;
        sqlx::query("DELETE FROM trades").execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_trade(row: &sqlx::postgres::PgRow) -> CoreResult<Trade> {
    let strategy_type_raw: String = row.try_get("strategy_type")?;
    let status_raw: String = row.try_get("status")?;
    let breakevens: Vec<i64> = row.try_get("breakevens")?;

    Ok(Trade {
        id: row.try_get("id")?,
        underlying: row.try_get("underlying")?,
        strategy_type: strategy_type_from_str(&strategy_type_raw),
        status: trade_status_from_str(&status_raw),
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
        num_legs: row.try_get::<i32, _>("num_legs")? as usize,
        num_executions: row.try_get::<i32, _>("num_executions")? as usize,
        opening_cost: Money::from_raw(row.try_get("opening_cost")?),
        realized_pnl: Money::from_raw(row.try_get("realized_pnl")?),
        total_commission: Money::from_raw(row.try_get("total_commission")?),
        wash_sale_adjustment: Money::from_raw(row.try_get("wash_sale_adjustment")?),
        roll_chain_id: row.try_get("roll_chain_id")?,
        rolled_from_trade_id: row.try_get("rolled_from_trade_id")?,
        rolled_to_trade_id: row.try_get("rolled_to_trade_id")?,
        is_roll: row.try_get("is_roll")?,
        is_assignment: row.try_get("is_assignment")?,
        assigned_from_trade_id: row.try_get("assigned_from_trade_id")?,
        tags: Default::default(),
        max_profit: row.try_get::<Option<i64>, _>("max_profit")?.map(Money::from_raw),
        max_risk: row.try_get::<Option<i64>, _>("max_risk")?.map(Money::from_raw),
        breakevens: breakevens.into_iter().map(Money::from_raw).collect(),
        net_delta: row.try_get::<Option<i64>, _>("net_delta")?.map(Greek::from_raw),
        net_theta: row.try_get::<Option<i64>, _>("net_theta")?.map(Greek::from_raw),
        greeks_at_open: Vec::new(),
        greeks_at_close: Vec::new(),
        analytics_partial: row.try_get("analytics_partial")?,
    })
}

fn row_to_ledger_entry(row: &sqlx::postgres::PgRow) -> CoreResult<LedgerEntry> {
    let status_raw: String = row.try_get("status")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        underlying: row.try_get("underlying")?,
        leg_key: row.try_get("leg_key")?,
        quantity: Money::from_raw(row.try_get("quantity")?),
        avg_cost: Money::from_raw(row.try_get("avg_cost")?),
        total_cost: Money::from_raw(row.try_get("total_cost")?),
        realized_pnl: Money::from_raw(row.try_get("realized_pnl")?),
        status: ledger_status_from_str(&status_raw),
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
        trade_id: row.try_get("trade_id")?,
    })
}

fn row_to_execution(row: &sqlx::postgres::PgRow) -> CoreResult<Execution> {
    let security_type_raw: String = row.try_get("security_type")?;
    let option_type_raw: Option<String> = row.try_get("option_type")?;
    let side_raw: String = row.try_get("side")?;
    let open_close_raw: Option<String> = row.try_get("open_close_indicator")?;

    Ok(Execution {
        exec_id: row.try_get("exec_id")?,
        order_id: row.try_get("order_id")?,
        perm_id: row.try_get("perm_id")?,
        underlying: row.try_get("underlying")?,
        security_type: parse_security_type(&security_type_raw),
        option_type: option_type_raw.as_deref().map(parse_option_type),
        strike: row.try_get::<Option<i64>, _>("strike")?.map(Money::from_raw),
        expiration: row.try_get("expiration")?,
        multiplier: row.try_get("multiplier")?,
        side: parse_side(&side_raw),
        quantity: Money::from_raw(row.try_get("quantity")?),
        price: Money::from_raw(row.try_get("price")?),
        commission: Money::from_raw(row.try_get("commission")?),
        net_amount: Money::from_raw(row.try_get("net_amount")?),
        execution_time: row.try_get("execution_time")?,
        account_id: row.try_get("account_id")?,
        open_close_indicator: open_close_raw.as_deref().map(parse_open_close),
        trade_id: row.try_get("trade_id")?,
    })
}

fn parse_security_type(raw: &str) -> SecurityType {
    match raw {
        "Opt" => SecurityType::Opt,
        _ => SecurityType::Stk,
    }
}

fn parse_option_type(raw: &str) -> OptionType {
    match raw {
        "Call" => OptionType::Call,
        _ => OptionType::Put,
    }
}

fn parse_side(raw: &str) -> Side {
    match raw {
        "Bot" => Side::Bot,
        _ => Side::Sld,
    }
}

fn parse_open_close(raw: &str) -> OpenCloseIndicator {
    match raw {
        "Open" => OpenCloseIndicator::Open,
        _ => OpenCloseIndicator::Close,
    }
}

const MIGRATION_STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS executions (
        exec_id TEXT PRIMARY KEY,
        order_id BIGINT NOT NULL,
        perm_id BIGINT NOT NULL,
        underlying TEXT NOT NULL,
        security_type TEXT NOT NULL,
        option_type TEXT,
        strike BIGINT,
        expiration TIMESTAMPTZ,
        multiplier BIGINT NOT NULL,
        side TEXT NOT NULL,
        quantity BIGINT NOT NULL,
        price BIGINT NOT NULL,
        commission BIGINT NOT NULL,
        net_amount BIGINT NOT NULL,
        execution_time TIMESTAMPTZ NOT NULL,
        account_id TEXT NOT NULL,
        open_close_indicator TEXT,
        trade_id BIGINT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_executions_underlying_time ON executions (underlying, execution_time)",
    r"
    CREATE TABLE IF NOT EXISTS trades (
        id BIGSERIAL PRIMARY KEY,
        underlying TEXT NOT NULL,
        strategy_type TEXT NOT NULL,
        status TEXT NOT NULL,
        opened_at TIMESTAMPTZ NOT NULL,
        closed_at TIMESTAMPTZ,
        num_legs INT NOT NULL,
        num_executions INT NOT NULL,
        opening_cost BIGINT NOT NULL,
        realized_pnl BIGINT NOT NULL,
        total_commission BIGINT NOT NULL,
        wash_sale_adjustment BIGINT NOT NULL,
        roll_chain_id UUID,
        rolled_from_trade_id BIGINT,
        rolled_to_trade_id BIGINT,
        is_roll BOOLEAN NOT NULL,
        is_assignment BOOLEAN NOT NULL,
        assigned_from_trade_id BIGINT,
        max_profit BIGINT,
        max_risk BIGINT,
        breakevens BIGINT[] NOT NULL DEFAULT '{}',
        net_delta BIGINT,
        net_theta BIGINT,
        analytics_partial BOOLEAN NOT NULL DEFAULT FALSE
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_trades_underlying_opened ON trades (underlying, opened_at)",
    "CREATE INDEX IF NOT EXISTS idx_trades_roll_chain ON trades (roll_chain_id)",
    r"
    CREATE TABLE IF NOT EXISTS position_ledger (
        id BIGSERIAL PRIMARY KEY,
        underlying TEXT NOT NULL,
        leg_key TEXT NOT NULL,
        quantity BIGINT NOT NULL,
        avg_cost BIGINT NOT NULL,
        total_cost BIGINT NOT NULL,
        realized_pnl BIGINT NOT NULL,
        status TEXT NOT NULL,
        opened_at TIMESTAMPTZ NOT NULL,
        closed_at TIMESTAMPTZ,
        trade_id BIGINT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_ledger_underlying_leg ON position_ledger (underlying, leg_key)",
    r"
    CREATE TABLE IF NOT EXISTS trade_leg_greeks (
        trade_id BIGINT NOT NULL,
        leg_key TEXT NOT NULL,
        phase TEXT NOT NULL,
        captured_at TIMESTAMPTZ NOT NULL,
        delta BIGINT NOT NULL,
        gamma BIGINT NOT NULL,
        theta BIGINT NOT NULL,
        vega BIGINT NOT NULL,
        rho BIGINT NOT NULL,
        implied_volatility BIGINT NOT NULL,
        PRIMARY KEY (trade_id, leg_key, phase)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS stock_splits (
        id BIGINT PRIMARY KEY,
        symbol TEXT NOT NULL,
        split_date TIMESTAMPTZ NOT NULL,
        ratio_from BIGINT NOT NULL,
        ratio_to BIGINT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS margin_settings (
        underlying TEXT PRIMARY KEY,
        naked_put_margin_pct DOUBLE PRECISION NOT NULL,
        naked_call_margin_pct DOUBLE PRECISION NOT NULL,
        spread_margin_pct DOUBLE PRECISION NOT NULL,
        iron_condor_margin_pct DOUBLE PRECISION NOT NULL,
        notes TEXT
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS tags (
        id BIGSERIAL PRIMARY KEY,
        name TEXT UNIQUE NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS trade_tags (
        trade_id BIGINT NOT NULL,
        tag_id BIGINT NOT NULL,
        PRIMARY KEY (trade_id, tag_id)
    )
    ",
];

fn strategy_type_from_str(raw: &str) -> StrategyType {
    match raw {
        "Stock" => StrategyType::Stock,
        "Single" => StrategyType::Single,
        "VerticalCall" => StrategyType::VerticalCall,
        "VerticalPut" => StrategyType::VerticalPut,
        "CalendarCall" => StrategyType::CalendarCall,
        "CalendarPut" => StrategyType::CalendarPut,
        "Straddle" => StrategyType::Straddle,
        "Strangle" => StrategyType::Strangle,
        "IronCondor" => StrategyType::IronCondor,
        "IronButterfly" => StrategyType::IronButterfly,
        "Pmcc" => StrategyType::Pmcc,
        "CoveredCall" => StrategyType::CoveredCall,
        _ => StrategyType::Custom,
    }
}

fn trade_status_from_str(raw: &str) -> TradeStatus {
    match raw {
        "Closed" => TradeStatus::Closed,
        _ => TradeStatus::Open,
    }
}

fn ledger_status_from_str(raw: &str) -> LedgerStatus {
    match raw {
        "Closed" => LedgerStatus::Closed,
        _ => LedgerStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_round_tripped_enums() {
        assert_eq!(parse_security_type("Opt"), SecurityType::Opt);
        assert_eq!(parse_security_type("Stk"), SecurityType::Stk);
        assert_eq!(parse_side("Bot"), Side::Bot);
        assert_eq!(parse_side("Sld"), Side::Sld);
        assert_eq!(strategy_type_from_str("IronCondor"), StrategyType::IronCondor);
        assert_eq!(strategy_type_from_str("bogus"), StrategyType::Custom);
        assert_eq!(trade_status_from_str("Closed"), TradeStatus::Closed);
        assert_eq!(trade_status_from_str("Open"), TradeStatus::Open);
        assert_eq!(ledger_status_from_str("Closed"), LedgerStatus::Closed);
        assert_eq!(ledger_status_from_str("Open"), LedgerStatus::Open);
    }

    #[test]
    fn migration_statements_are_nonempty() {
        assert!(!MIGRATION_STATEMENTS.is_empty());
    }
}

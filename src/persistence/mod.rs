//! SQLite persistence for the hedge trade ledger.
//!
//! Two tables:
//! - `active_trades`: at most one row per symbol, every non-CLOSED trade
//! - `trade_history`: append-only record of CLOSED trades
//!
//! Closing a trade moves its row from `active_trades` to `trade_history`
//! inside one transaction.

use crate::exchange::{Side, Venue};
use crate::ledger::{HedgeLeg, HedgeTrade, Ledger, TradeStatus, TradeUpdate};
use crate::utils::{Clock, SystemClock};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TRADE_COLUMNS: &str = r#"
    symbol, status,
    leg_a_venue, leg_a_side, leg_a_notional, leg_a_entry_price, leg_a_order_ref,
    leg_b_venue, leg_b_side, leg_b_notional, leg_b_entry_price, leg_b_order_ref,
    notional_usd, entry_spread_pct, entry_net_rate_hourly, created_at,
    funding_collected, close_reason, is_farm_trade
"#;

/// SQLite-backed [`Ledger`].
pub struct SqliteLedger {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn with_clock<P: AsRef<Path>>(db_path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open ledger at {:?}", db_path.as_ref()))?;

        let ledger = Self {
            conn: Mutex::new(conn),
            clock,
        };
        ledger.init_schema()?;

        info!("Ledger initialized at {:?}", db_path.as_ref());
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            -- Active hedges (one per symbol)
            CREATE TABLE IF NOT EXISTS active_trades (
                symbol TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                leg_a_venue TEXT NOT NULL,
                leg_a_side TEXT NOT NULL,
                leg_a_notional TEXT NOT NULL,
                leg_a_entry_price TEXT NOT NULL,
                leg_a_order_ref TEXT,
                leg_b_venue TEXT NOT NULL,
                leg_b_side TEXT NOT NULL,
                leg_b_notional TEXT NOT NULL,
                leg_b_entry_price TEXT NOT NULL,
                leg_b_order_ref TEXT,
                notional_usd TEXT NOT NULL,
                entry_spread_pct TEXT NOT NULL,
                entry_net_rate_hourly TEXT NOT NULL,
                created_at TEXT NOT NULL,
                funding_collected TEXT NOT NULL DEFAULT '0',
                close_reason TEXT,
                is_farm_trade INTEGER NOT NULL DEFAULT 0
            );

            -- Closed hedges (append-only)
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                leg_a_venue TEXT NOT NULL,
                leg_a_side TEXT NOT NULL,
                leg_a_notional TEXT NOT NULL,
                leg_a_entry_price TEXT NOT NULL,
                leg_a_order_ref TEXT,
                leg_b_venue TEXT NOT NULL,
                leg_b_side TEXT NOT NULL,
                leg_b_notional TEXT NOT NULL,
                leg_b_entry_price TEXT NOT NULL,
                leg_b_order_ref TEXT,
                notional_usd TEXT NOT NULL,
                entry_spread_pct TEXT NOT NULL,
                entry_net_rate_hourly TEXT NOT NULL,
                created_at TEXT NOT NULL,
                funding_collected TEXT NOT NULL,
                close_reason TEXT,
                is_farm_trade INTEGER NOT NULL,
                realized_pnl TEXT NOT NULL,
                closed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_symbol ON trade_history(symbol);
            CREATE INDEX IF NOT EXISTS idx_history_closed_at ON trade_history(closed_at);
            "#,
        )?;

        debug!("Ledger schema initialized");
        Ok(())
    }

    /// Most recently closed trades, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<HedgeTrade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRADE_COLUMNS}, realized_pnl, closed_at FROM trade_history
             ORDER BY id DESC LIMIT ?1"
        ))?;

        let trades = stmt
            .query_map([limit], |row| {
                let mut trade = trade_from_row(row)?;
                trade.realized_pnl = Some(decimal_col(row, 19)?);
                trade.closed_at = Some(time_col(row, 20)?);
                Ok(trade)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(trades)
    }

    /// Sum of realized PnL over the whole history.
    pub fn total_realized_pnl(&self) -> Result<Decimal> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT realized_pnl FROM trade_history")?;
        let total = stmt
            .query_map([], |row| decimal_col(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .sum();
        Ok(total)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn create_open(&self, trade: &HedgeTrade) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO active_trades ({TRADE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
            ),
            params![
                trade.symbol,
                trade.status.as_str(),
                trade.leg_a.venue.to_string(),
                trade.leg_a.side.as_str(),
                trade.leg_a.filled_notional_usd.to_string(),
                trade.leg_a.entry_price.to_string(),
                trade.leg_a.order_ref,
                trade.leg_b.venue.to_string(),
                trade.leg_b.side.as_str(),
                trade.leg_b.filled_notional_usd.to_string(),
                trade.leg_b.entry_price.to_string(),
                trade.leg_b.order_ref,
                trade.notional_usd.to_string(),
                trade.entry_spread_pct.to_string(),
                trade.entry_net_rate_hourly.to_string(),
                trade.created_at.to_rfc3339(),
                trade.funding_collected.to_string(),
                trade.close_reason,
                trade.is_farm_trade as i32,
            ],
        )
        .with_context(|| format!("Failed to persist active trade {}", trade.symbol))?;

        debug!(symbol = %trade.symbol, status = %trade.status, "Trade persisted");
        Ok(())
    }

    async fn update(&self, symbol: &str, fields: TradeUpdate) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT symbol FROM active_trades WHERE symbol = ?1",
                [symbol],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            bail!("No active trade for {}", symbol);
        }

        if let Some(status) = fields.status {
            if status == TradeStatus::Closed {
                bail!("Use close() to archive {}", symbol);
            }
            tx.execute(
                "UPDATE active_trades SET status = ?2 WHERE symbol = ?1",
                params![symbol, status.as_str()],
            )?;
        }
        if let Some(funding) = fields.funding_collected {
            tx.execute(
                "UPDATE active_trades SET funding_collected = ?2 WHERE symbol = ?1",
                params![symbol, funding.to_string()],
            )?;
        }
        if let Some(reason) = fields.close_reason {
            tx.execute(
                "UPDATE active_trades SET close_reason = ?2 WHERE symbol = ?1",
                params![symbol, reason],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn close(&self, symbol: &str, reason: &str, pnl: Decimal) -> Result<()> {
        let closed_at = self.clock.now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let moved = tx.execute(
            &format!(
                "INSERT INTO trade_history ({TRADE_COLUMNS}, realized_pnl, closed_at)
                 SELECT symbol, 'CLOSED',
                        leg_a_venue, leg_a_side, leg_a_notional, leg_a_entry_price, leg_a_order_ref,
                        leg_b_venue, leg_b_side, leg_b_notional, leg_b_entry_price, leg_b_order_ref,
                        notional_usd, entry_spread_pct, entry_net_rate_hourly, created_at,
                        funding_collected, ?2, is_farm_trade, ?3, ?4
                 FROM active_trades WHERE symbol = ?1"
            ),
            params![symbol, reason, pnl.to_string(), closed_at.to_rfc3339()],
        )?;
        if moved == 0 {
            bail!("No active trade for {}", symbol);
        }

        tx.execute("DELETE FROM active_trades WHERE symbol = ?1", [symbol])?;
        tx.commit()?;

        info!(%symbol, %reason, pnl = %pnl, "Trade archived to history");
        Ok(())
    }

    async fn get_open_trades(&self) -> Result<Vec<HedgeTrade>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRADE_COLUMNS} FROM active_trades ORDER BY created_at"
        ))?;

        let trades = stmt
            .query_map([], trade_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let skipped = trades.iter().filter(|t| !t.is_active()).count();
        if skipped > 0 {
            warn!(skipped, "CLOSED rows found in active table");
        }

        Ok(trades.into_iter().filter(HedgeTrade::is_active).collect())
    }
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn venue_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Venue> {
    let raw: String = row.get(idx)?;
    Venue::parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown venue {raw}")))
}

fn side_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Side> {
    let raw: String = row.get(idx)?;
    Side::parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown side {raw}")))
}

fn leg_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<HedgeLeg> {
    Ok(HedgeLeg {
        venue: venue_col(row, base)?,
        side: side_col(row, base + 1)?,
        filled_notional_usd: decimal_col(row, base + 2)?,
        entry_price: decimal_col(row, base + 3)?,
        order_ref: row.get(base + 4)?,
    })
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<HedgeTrade> {
    let status: String = row.get(1)?;
    Ok(HedgeTrade {
        symbol: row.get(0)?,
        status: TradeStatus::parse(&status)
            .ok_or_else(|| conversion_error(1, format!("unknown status {status}")))?,
        leg_a: leg_from_row(row, 2)?,
        leg_b: leg_from_row(row, 7)?,
        notional_usd: decimal_col(row, 12)?,
        entry_spread_pct: decimal_col(row, 13)?,
        entry_net_rate_hourly: decimal_col(row, 14)?,
        created_at: time_col(row, 15)?,
        funding_collected: decimal_col(row, 16)?,
        close_reason: row.get(17)?,
        realized_pnl: None,
        closed_at: None,
        is_farm_trade: row.get::<_, i32>(18)? != 0,
    })
}

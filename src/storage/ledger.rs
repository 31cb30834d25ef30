//! SQLite trade ledger.
//!
//! One row per opened structure. Close fields are SQL NULL until an
//! external close process fills them in via `record_close`. Rows written by
//! older versions may carry `''` instead of NULL in the close columns; the
//! closed-trade predicate treats both as "still open" and reads decode both
//! as absent.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{ReportTiming, TradeRecord};

/// Column name → declared type. Order is the insert order.
const COLUMNS: &[(&str, &str)] = &[
    ("Ticker", "TEXT"),
    ("Implied Move", "TEXT"),
    ("Structure", "TEXT"),
    ("Side", "TEXT"),
    ("When", "TEXT"),
    ("Size", "INTEGER"),
    ("Short Symbol", "TEXT"),
    ("Long Symbol", "TEXT"),
    ("Open Date", "TEXT"),
    ("Open Price", "REAL"),
    ("Open Comm.", "REAL"),
    ("Close Date", "TEXT"),
    ("Close Price", "REAL"),
    ("Close Comm.", "REAL"),
];

/// A row counts as closed only with a non-NULL, non-blank close date.
const CLOSED_PREDICATE: &str = r#"NULLIF(TRIM("Close Date"), '') IS NOT NULL"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct TradeLedger {
    pool: SqlitePool,
}

impl TradeLedger {
    /// Open (creating if missing) the database at `database_url` and bring
    /// the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid ledger URL: {database_url}"))?
            .create_if_missing(true);

        // Each in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open ledger {database_url}"))?;

        let ledger = Self { pool };
        ledger.migrate().await?;
        info!(database_url, "Trade ledger ready");
        Ok(ledger)
    }

    /// Fresh in-memory ledger.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Create the table if needed, then add any column an older store lacks.
    /// Existing rows are never touched.
    async fn migrate(&self) -> Result<()> {
        let columns_sql = COLUMNS
            .iter()
            .map(|(name, ty)| format!("\"{name}\" {ty}"))
            .collect::<Vec<_>>()
            .join(", ");
        sqlx::query(&format!("CREATE TABLE IF NOT EXISTS trades ({columns_sql})"))
            .execute(&self.pool)
            .await
            .context("Failed to create trades table")?;

        let existing: Vec<String> = sqlx::query("PRAGMA table_info(trades)")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read trades schema")?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;

        for (name, ty) in COLUMNS {
            if !existing.iter().any(|c| c.as_str() == *name) {
                sqlx::query(&format!("ALTER TABLE trades ADD COLUMN \"{name}\" {ty}"))
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("Failed to add column {name}"))?;
                info!(column = name, "Ledger column added");
            }
        }
        Ok(())
    }

    /// Insert one opened trade. Close fields are always written as NULL.
    /// Returns the new row id.
    pub async fn persist(&self, record: &TradeRecord) -> Result<i64> {
        if record.size < 1 {
            anyhow::bail!("Refusing to persist {} with size {}", record.ticker, record.size);
        }
        if record.open_price <= Decimal::ZERO {
            anyhow::bail!(
                "Refusing to persist {} with open price {}",
                record.ticker,
                record.open_price
            );
        }

        let column_list = COLUMNS
            .iter()
            .map(|(name, _)| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; COLUMNS.len()].join(", ");

        let result = sqlx::query(&format!(
            "INSERT INTO trades ({column_list}) VALUES ({placeholders})"
        ))
        .bind(&record.ticker)
        .bind(&record.implied_move)
        .bind(&record.structure)
        .bind(&record.side)
        .bind(record.timing.code())
        .bind(i64::from(record.size))
        .bind(&record.short_symbols)
        .bind(&record.long_symbols)
        .bind(record.open_date.format(DATE_FORMAT).to_string())
        .bind(to_f64(record.open_price))
        .bind(to_f64(record.open_commission))
        .bind(None::<String>)
        .bind(None::<f64>)
        .bind(None::<f64>)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert trade for {}", record.ticker))?;

        let id = result.last_insert_rowid();
        debug!(id, ticker = %record.ticker, "Trade persisted");
        Ok(id)
    }

    /// Populate the close fields of an open trade. Fails if the row does not
    /// exist or is already closed.
    pub async fn record_close(
        &self,
        id: i64,
        close_date: NaiveDate,
        close_price: Decimal,
        close_commission: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(&format!(
            r#"UPDATE trades
               SET "Close Date" = ?1, "Close Price" = ?2, "Close Comm." = ?3
               WHERE rowid = ?4 AND NOT ({CLOSED_PREDICATE})"#
        ))
        .bind(close_date.format(DATE_FORMAT).to_string())
        .bind(to_f64(close_price))
        .bind(to_f64(close_commission))
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to close trade {id}"))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Trade {id} does not exist or is already closed");
        }
        Ok(())
    }

    /// Cumulative realized profit over closed trades, floored at zero.
    pub async fn total_realized_profit(&self, contract_multiplier: Decimal) -> Result<Decimal> {
        let sum: Option<f64> = sqlx::query_scalar(&format!(
            r#"SELECT SUM(("Close Price" - "Open Price") * "Size" * ?1
                          - COALESCE("Open Comm.", 0) - COALESCE("Close Comm.", 0))
               FROM trades WHERE {CLOSED_PREDICATE}"#
        ))
        .bind(to_f64(contract_multiplier))
        .fetch_one(&self.pool)
        .await
        .context("Failed to aggregate realized profit")?;

        let profit = sum
            .and_then(Decimal::from_f64)
            .map(|d| d.round_dp(2))
            .filter(|d| *d > Decimal::ZERO)
            .unwrap_or(Decimal::ZERO);
        Ok(profit)
    }

    /// Whether `ticker` already has a trade opened on `open_date`.
    pub async fn has_trade_opened_on(&self, ticker: &str, open_date: NaiveDate) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM trades WHERE "Ticker" = ?1 AND "Open Date" = ?2"#,
        )
        .bind(ticker)
        .bind(open_date.format(DATE_FORMAT).to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to look up existing trades")?;
        Ok(count > 0)
    }

    /// All rows in insertion order.
    pub async fn all_trades(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .context("Failed to read trades")?;
        rows.iter().map(row_to_record).collect()
    }

    /// Raw pool access for maintenance and tests.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn decimal_column(row: &SqliteRow, name: &str) -> Result<Option<Decimal>> {
    if let Ok(value) = row.try_get::<Option<f64>, _>(name) {
        return Ok(value.and_then(Decimal::from_f64));
    }
    // REAL affinity keeps a blank string as TEXT.
    let raw: Option<String> = row.try_get(name)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Decimal::from_str(s)
            .map(Some)
            .with_context(|| format!("Invalid {name}: {s}")),
    }
}

fn date_column(row: &SqliteRow, name: &str) -> Result<Option<NaiveDate>> {
    let raw: Option<String> = row.try_get(name)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Some)
            .with_context(|| format!("Invalid {name}: {s}")),
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TradeRecord> {
    let when: Option<String> = row.try_get("When")?;
    let size: i64 = row.try_get("Size")?;
    Ok(TradeRecord {
        ticker: row.try_get("Ticker")?,
        implied_move: row.try_get::<Option<String>, _>("Implied Move")?.unwrap_or_default(),
        structure: row.try_get::<Option<String>, _>("Structure")?.unwrap_or_default(),
        side: row.try_get::<Option<String>, _>("Side")?.unwrap_or_default(),
        timing: ReportTiming::from_calendar(when.as_deref().unwrap_or("AMC")),
        size: u32::try_from(size).context("Negative size in ledger")?,
        short_symbols: row.try_get::<Option<String>, _>("Short Symbol")?.unwrap_or_default(),
        long_symbols: row.try_get::<Option<String>, _>("Long Symbol")?.unwrap_or_default(),
        open_date: date_column(row, "Open Date")?.context("Missing open date")?,
        open_price: decimal_column(row, "Open Price")?.unwrap_or_default(),
        open_commission: decimal_column(row, "Open Comm.")?.unwrap_or_default(),
        close_date: date_column(row, "Close Date")?,
        close_price: decimal_column(row, "Close Price")?,
        close_commission: decimal_column(row, "Close Comm.")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

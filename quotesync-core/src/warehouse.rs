//! SQLite warehouse for OHLCV rows and instrument metadata.
//!
//! One table per interval, keyed by `(symbol, date)`. Writes are
//! insert-missing-only: rows already stored are never touched.

use crate::domain::{Instrument, Interval, OhlcvRow};
use crate::schema::{schema_sql, validate_schema, SchemaType};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch row {found} does not belong to {expected}")]
    BatchMismatch { expected: String, found: String },

    #[error("batch dates not strictly ascending: {next} follows {prev}")]
    UnorderedBatch { prev: NaiveDate, next: NaiveDate },

    #[error("empty batch")]
    EmptyBatch,

    #[error("table {table} does not match the warehouse schema: {}", .errors.join("; "))]
    IncompatibleSchema { table: String, errors: Vec<String> },
}

/// Stored date range of one (symbol, interval).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub first: NaiveDate,
    pub last: NaiveDate,
    pub rows: u64,
}

/// Storage session the synchronizer writes through.
///
/// Passed explicitly to every component that needs it; there is no global
/// connection.
pub trait OhlcvStore {
    /// Latest stored date for the pair, `None` when nothing is stored.
    fn last_date(&self, symbol: &str, interval: Interval) -> Result<Option<NaiveDate>, StoreError>;

    /// Insert rows whose key is not yet stored, atomically. Returns rows inserted.
    ///
    /// `rows` must be non-empty, belong to `symbol`/`interval`, and be strictly
    /// ascending by date.
    fn insert_missing(
        &mut self,
        symbol: &str,
        interval: Interval,
        rows: &[OhlcvRow],
    ) -> Result<usize, StoreError>;
}

/// Check that a batch is non-empty, homogeneous and strictly ascending.
pub fn validate_batch(symbol: &str, interval: Interval, rows: &[OhlcvRow]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Err(StoreError::EmptyBatch);
    }
    for row in rows {
        if row.symbol != symbol || row.interval != interval {
            return Err(StoreError::BatchMismatch {
                expected: format!("{symbol}/{interval}"),
                found: format!("{}/{}", row.symbol, row.interval),
            });
        }
    }
    for pair in rows.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(StoreError::UnorderedBatch {
                prev: pair[0].date,
                next: pair[1].date,
            });
        }
    }
    Ok(())
}

/// SQLite-backed warehouse.
pub struct Warehouse {
    conn: Connection,
}

impl Warehouse {
    /// Open or create the warehouse file, creating parent directories and tables.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.as_ref().display(), journal_mode = %mode, "warehouse opened");

        let warehouse = Self { conn };
        warehouse.init_schema()?;
        Ok(warehouse)
    }

    /// Open an in-memory warehouse (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let warehouse = Self {
            conn: Connection::open_in_memory()?,
        };
        warehouse.init_schema()?;
        Ok(warehouse)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(&schema_sql())?;

        for interval in Interval::ALL {
            let table = interval.table();
            let columns: Vec<(String, Option<SchemaType>)> = self
                .conn
                .prepare(&format!("PRAGMA table_info({table})"))?
                .query_map([], |row| {
                    let name: String = row.get(1)?;
                    let decl: String = row.get(2)?;
                    Ok((name, SchemaType::from_declared(&decl)))
                })?
                .collect::<Result<_, _>>()?;

            let validation = validate_schema(&columns);
            if !validation.is_valid {
                return Err(StoreError::IncompatibleSchema {
                    table: table.to_string(),
                    errors: validation.errors,
                });
            }
        }
        Ok(())
    }

    /// Insert or replace catalog metadata. Returns rows written.
    pub fn upsert_instruments(&mut self, instruments: &[Instrument]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO instruments
                (symbol, company_name, date_of_listing, isin, market_cap)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;

            for inst in instruments {
                stmt.execute(params![
                    inst.symbol,
                    inst.name,
                    inst.listing_date,
                    inst.isin,
                    inst.market_cap,
                ])?;
                count += 1;
            }
        }

        tx.commit()?;
        info!(instruments = count, "instrument metadata upserted");
        Ok(count)
    }

    /// Stored date range for a pair.
    pub fn coverage(&self, symbol: &str, interval: Interval) -> Result<Option<Coverage>, StoreError> {
        let sql = format!(
            "SELECT MIN(date), MAX(date), COUNT(*) FROM {} WHERE symbol = ?1",
            interval.table()
        );
        let (first, last, rows): (Option<NaiveDate>, Option<NaiveDate>, i64) = self
            .conn
            .query_row(&sql, params![symbol], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        Ok(match (first, last) {
            (Some(first), Some(last)) => Some(Coverage {
                first,
                last,
                rows: u64::try_from(rows).unwrap_or_default(),
            }),
            _ => None,
        })
    }

    /// Coverage of every stored symbol for an interval, ordered by symbol.
    pub fn coverage_report(&self, interval: Interval) -> Result<Vec<(String, Coverage)>, StoreError> {
        let sql = format!(
            "SELECT symbol, MIN(date), MAX(date), COUNT(*) FROM {} GROUP BY symbol ORDER BY symbol",
            interval.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let report = stmt
            .query_map([], |row| {
                let rows: i64 = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    Coverage {
                        first: row.get(1)?,
                        last: row.get(2)?,
                        rows: u64::try_from(rows).unwrap_or_default(),
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(report)
    }

    /// All stored rows for a pair, ascending by date.
    pub fn load_rows(&self, symbol: &str, interval: Interval) -> Result<Vec<OhlcvRow>, StoreError> {
        let sql = format!(
            "SELECT date, open, high, low, close, volume FROM {} WHERE symbol = ?1 ORDER BY date",
            interval.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                let volume: i64 = row.get(5)?;
                Ok(OhlcvRow {
                    symbol: symbol.to_string(),
                    interval,
                    date: row.get(0)?,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: u64::try_from(volume).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total rows stored for an interval.
    pub fn row_count(&self, interval: Interval) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", interval.table());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Stored catalog entry for a symbol.
    pub fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, StoreError> {
        let found = self
            .conn
            .query_row(
                r#"
                SELECT symbol, company_name, date_of_listing, isin, market_cap
                FROM instruments WHERE symbol = ?1
                "#,
                params![symbol],
                |row| {
                    Ok(Instrument {
                        symbol: row.get(0)?,
                        name: row.get(1)?,
                        listing_date: row.get(2)?,
                        isin: row.get(3)?,
                        market_cap: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }
}

impl OhlcvStore for Warehouse {
    fn last_date(&self, symbol: &str, interval: Interval) -> Result<Option<NaiveDate>, StoreError> {
        let sql = format!("SELECT MAX(date) FROM {} WHERE symbol = ?1", interval.table());
        let last: Option<NaiveDate> = self.conn.query_row(&sql, params![symbol], |row| row.get(0))?;
        Ok(last)
    }

    fn insert_missing(
        &mut self,
        symbol: &str,
        interval: Interval,
        rows: &[OhlcvRow],
    ) -> Result<usize, StoreError> {
        validate_batch(symbol, interval, rows)?;

        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(&format!(
                r#"
                INSERT OR IGNORE INTO {}
                (symbol, date, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                interval.table()
            ))?;

            for row in rows {
                inserted += stmt.execute(params![
                    row.symbol,
                    row.date,
                    row.open,
                    row.high,
                    row.low,
                    row.close,
                    i64::try_from(row.volume).unwrap_or(i64::MAX),
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }
}

//! SQLite persistence.
//!
//! Decimals are stored as TEXT to keep exact precision, timestamps as
//! RFC3339 TEXT, dates as ISO-8601 TEXT, identifiers as hyphenated UUID
//! TEXT. All access goes through [`Store`] behind a tokio mutex; the
//! recommendation submit path is the one place that needs an explicit
//! transaction.

pub mod alerts;
pub mod models;
pub mod positions;
pub mod recommendations;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} {id} is {actual}, expected {expected}")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        actual: String,
        expected: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        info!(path, "database opened");
        Ok(store)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trade_recommendations (
                id                  TEXT PRIMARY KEY,
                ticker              TEXT NOT NULL,
                strategy            TEXT NOT NULL,
                contract            TEXT NOT NULL,
                strike              TEXT NOT NULL,
                expiry              TEXT NOT NULL,
                delta               TEXT NOT NULL,
                credit_est          TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'PENDING',
                thesis              TEXT,
                metrics_json        TEXT NOT NULL,
                created_at          TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_recs_ticker ON trade_recommendations (ticker);
            CREATE INDEX IF NOT EXISTS idx_recs_status ON trade_recommendations (status);

            CREATE TABLE IF NOT EXISTS active_positions (
                id                      TEXT PRIMARY KEY,
                ticker                  TEXT NOT NULL,
                status                  TEXT NOT NULL DEFAULT 'OPEN',
                lifecycle_stage         TEXT NOT NULL DEFAULT 'MONITORING',
                strategy                TEXT NOT NULL,
                contract                TEXT NOT NULL,
                short_strike            TEXT NOT NULL,
                expiry_date             TEXT NOT NULL,
                entry_price             TEXT NOT NULL,
                entry_timestamp         TEXT NOT NULL,
                contracts               INTEGER NOT NULL DEFAULT 1,
                capital_deployed        TEXT NOT NULL,
                sector                  TEXT NOT NULL DEFAULT 'Unknown',
                stop_loss_price         TEXT NOT NULL,
                take_profit_price       TEXT NOT NULL,
                max_dte_hold            INTEGER NOT NULL,
                force_close_date        TEXT NOT NULL,
                hb_timestamp            TEXT,
                hb_mark_price           TEXT,
                hb_underlying_price     TEXT,
                hb_freshness            TEXT,
                parent_position_id      TEXT,
                root_position_id        TEXT NOT NULL,
                roll_count              INTEGER NOT NULL DEFAULT 0,
                realized_pnl_pre_roll   TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_positions_ticker ON active_positions (ticker);
            CREATE INDEX IF NOT EXISTS idx_positions_stage ON active_positions (lifecycle_stage);
            CREATE INDEX IF NOT EXISTS idx_positions_root ON active_positions (root_position_id);

            CREATE TABLE IF NOT EXISTS alert_log (
                id              TEXT PRIMARY KEY,
                position_id     TEXT NOT NULL,
                trigger_type    TEXT NOT NULL,
                triggered_at    TEXT NOT NULL,
                sent_at         TEXT,
                UNIQUE (position_id, trigger_type)
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_position ON alert_log (position_id);
            "#,
        )?;
        Ok(())
    }
}

// Column conversion helpers shared by the table modules. SQLite hands
// back TEXT; conversion failures surface as rusqlite errors so they flow
// through the normal query error path.

fn conversion_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn parse_decimal(s: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(s).map_err(conversion_err)
}

pub(crate) fn parse_opt_decimal(s: Option<&str>) -> rusqlite::Result<Option<Decimal>> {
    s.map(parse_decimal).transpose()
}

pub(crate) fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(conversion_err)
}

pub(crate) fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::from_str(s).map_err(conversion_err)
}

pub(crate) fn parse_datetime(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(conversion_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_twice() {
        let store = Store::open_in_memory().unwrap();
        // idempotent re-apply
        store.init_schema().unwrap();
    }

    #[test]
    fn test_parse_decimal_round_trips_exactly() {
        let d = parse_decimal("10.5000").unwrap();
        assert_eq!(d.to_string(), "10.5000");
    }
}

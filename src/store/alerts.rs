//! Alert log: the idempotency guard behind `ensure_sent`.
//!
//! A row per (position, trigger). The UNIQUE constraint makes the
//! check-and-record race free even if two cycles ever overlapped.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::models::{AlertLogEntry, TriggerType};
use super::{parse_datetime, parse_uuid, Store, StoreError};

impl Store {
    /// Record a trigger if it has not fired for this position before.
    /// Returns true when this call created the row, meaning the caller
    /// owns the (single) dispatch.
    pub fn record_alert_if_new(
        &self,
        position_id: Uuid,
        trigger: TriggerType,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO alert_log (id, position_id, trigger_type, triggered_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                position_id.to_string(),
                trigger.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Stamp the delivery time once dispatch has been attempted.
    pub fn mark_alert_sent(
        &self,
        position_id: Uuid,
        trigger: TriggerType,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE alert_log SET sent_at = ?3
             WHERE position_id = ?1 AND trigger_type = ?2",
            params![
                position_id.to_string(),
                trigger.as_str(),
                sent_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_alerts(&self, position_id: Uuid) -> Result<Vec<AlertLogEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, position_id, trigger_type, triggered_at, sent_at
             FROM alert_log WHERE position_id = ?1 ORDER BY triggered_at",
        )?;
        let rows = stmt.query_map(params![position_id.to_string()], row_to_alert)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<AlertLogEntry> {
    let id: String = row.get(0)?;
    let position_id: String = row.get(1)?;
    let trigger: String = row.get(2)?;
    let triggered_at: String = row.get(3)?;
    let sent_at: Option<String> = row.get(4)?;

    Ok(AlertLogEntry {
        id: parse_uuid(&id)?,
        position_id: parse_uuid(&position_id)?,
        trigger_type: trigger
            .parse::<TriggerType>()
            .map_err(super::conversion_err)?,
        triggered_at: parse_datetime(&triggered_at)?,
        sent_at: sent_at.as_deref().map(parse_datetime).transpose()?,
    })
}

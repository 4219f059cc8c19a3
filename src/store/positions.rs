//! ActivePosition table: watchman state, manual entries, roll lineage.

use chrono::{DateTime, NaiveDate, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::RiskRuleConfig;

use super::models::{
    ActivePosition, EntryData, FreshnessStatus, HeartbeatRecord, Lineage, LifecycleStage,
    PositionStatus, RiskRules,
};
use super::{
    parse_date, parse_datetime, parse_decimal, parse_opt_decimal, parse_uuid, Store, StoreError,
};

/// Replacement contract terms for a roll.
#[derive(Debug, Clone)]
pub struct RollEntry {
    pub contract: String,
    pub short_strike: Decimal,
    pub expiry_date: NaiveDate,
    pub entry_price: Decimal,
}

pub(crate) fn insert_position_inner(
    conn: &Connection,
    pos: &ActivePosition,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO active_positions
         (id, ticker, status, lifecycle_stage, strategy, contract, short_strike,
          expiry_date, entry_price, entry_timestamp, contracts, capital_deployed, sector,
          stop_loss_price, take_profit_price, max_dte_hold, force_close_date,
          hb_timestamp, hb_mark_price, hb_underlying_price, hb_freshness,
          parent_position_id, root_position_id, roll_count, realized_pnl_pre_roll,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                 ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            pos.id.to_string(),
            pos.ticker,
            pos.status.as_str(),
            pos.lifecycle_stage.as_str(),
            pos.entry_data.strategy.as_str(),
            pos.entry_data.contract,
            pos.entry_data.short_strike.to_string(),
            pos.entry_data.expiry_date.to_string(),
            pos.entry_data.entry_price.to_string(),
            pos.entry_data.entry_timestamp.to_rfc3339(),
            pos.entry_data.contracts,
            pos.entry_data.capital_deployed.to_string(),
            pos.entry_data.sector,
            pos.risk_rules.stop_loss_price.to_string(),
            pos.risk_rules.take_profit_price.to_string(),
            pos.risk_rules.max_dte_hold,
            pos.risk_rules.force_close_date.to_string(),
            pos.last_heartbeat.as_ref().map(|h| h.timestamp.to_rfc3339()),
            pos.last_heartbeat.as_ref().map(|h| h.mark_price.to_string()),
            pos.last_heartbeat
                .as_ref()
                .map(|h| h.underlying_price.to_string()),
            pos.last_heartbeat
                .as_ref()
                .map(|h| h.data_freshness_status.as_str()),
            pos.lineage.parent_position_id.map(|id| id.to_string()),
            pos.lineage.root_position_id.to_string(),
            pos.lineage.roll_count,
            pos.lineage.realized_pnl_pre_roll.map(|d| d.to_string()),
            pos.created_at.to_rfc3339(),
            pos.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

const POSITION_COLUMNS: &str =
    "id, ticker, status, lifecycle_stage, strategy, contract, short_strike,
     expiry_date, entry_price, entry_timestamp, contracts, capital_deployed, sector,
     stop_loss_price, take_profit_price, max_dte_hold, force_close_date,
     hb_timestamp, hb_mark_price, hb_underlying_price, hb_freshness,
     parent_position_id, root_position_id, roll_count, realized_pnl_pre_roll,
     created_at, updated_at";

impl Store {
    pub fn insert_position(&self, pos: &ActivePosition) -> Result<(), StoreError> {
        insert_position_inner(&self.conn, pos)?;
        info!(position_id = %pos.id, ticker = %pos.ticker, "position recorded");
        Ok(())
    }

    pub fn get_position(&self, id: Uuid) -> Result<ActivePosition, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {POSITION_COLUMNS} FROM active_positions WHERE id = ?1"),
                params![id.to_string()],
                row_to_position,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "position",
                id,
            })
    }

    /// Positions the watchman still supervises (lifecycle stage not CLOSED),
    /// newest first.
    pub fn list_open_positions(&self) -> Result<Vec<ActivePosition>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM active_positions
             WHERE lifecycle_stage != 'CLOSED' ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_position)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_position(&self, id: Uuid) -> Result<(), StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM active_positions WHERE id = ?1",
            params![id.to_string()],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: "position",
                id,
            });
        }
        info!(position_id = %id, "position deleted");
        Ok(())
    }

    /// Watchman write path: latest observation plus any stage escalation.
    pub fn update_monitoring_state(
        &self,
        id: Uuid,
        heartbeat: &HeartbeatRecord,
        stage: LifecycleStage,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE active_positions
             SET hb_timestamp = ?2, hb_mark_price = ?3, hb_underlying_price = ?4,
                 hb_freshness = ?5, lifecycle_stage = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id.to_string(),
                heartbeat.timestamp.to_rfc3339(),
                heartbeat.mark_price.to_string(),
                heartbeat.underlying_price.to_string(),
                heartbeat.data_freshness_status.as_str(),
                stage.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "position",
                id,
            });
        }
        Ok(())
    }

    /// Roll: close the current leg and open its successor in one
    /// transaction. The child keeps the chain's root, bumps roll_count by
    /// one, and banks the realized P&L of the closed leg.
    pub fn roll_position(
        &mut self,
        parent_id: Uuid,
        entry: RollEntry,
        risk: &RiskRuleConfig,
        realized_pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ActivePosition, StoreError> {
        let parent = self.get_position(parent_id)?;
        if parent.status != PositionStatus::Open {
            return Err(StoreError::Conflict {
                entity: "position",
                id: parent_id,
                actual: parent.status.to_string(),
                expected: PositionStatus::Open.to_string(),
            });
        }

        let mut force_close = entry.expiry_date - Duration::days(risk.max_dte_hold);
        let today = now.date_naive();
        if force_close < today {
            force_close = today;
        }

        let child = ActivePosition {
            id: Uuid::new_v4(),
            ticker: parent.ticker.clone(),
            status: PositionStatus::Open,
            lifecycle_stage: LifecycleStage::Monitoring,
            entry_data: EntryData {
                strategy: parent.entry_data.strategy,
                contract: entry.contract,
                short_strike: entry.short_strike,
                expiry_date: entry.expiry_date,
                entry_price: entry.entry_price,
                entry_timestamp: now,
                contracts: parent.entry_data.contracts,
                capital_deployed: entry.short_strike
                    * Decimal::new(100, 0)
                    * Decimal::from(parent.entry_data.contracts),
                sector: parent.entry_data.sector.clone(),
            },
            risk_rules: RiskRules {
                stop_loss_price: entry.entry_price * risk.stop_loss_multiple,
                take_profit_price: entry.entry_price * risk.take_profit_multiple,
                max_dte_hold: risk.max_dte_hold,
                force_close_date: force_close,
            },
            last_heartbeat: None,
            lineage: Lineage {
                parent_position_id: Some(parent.id),
                root_position_id: parent.lineage.root_position_id,
                roll_count: parent.lineage.roll_count + 1,
                realized_pnl_pre_roll: Some(realized_pnl),
            },
            created_at: now,
            updated_at: now,
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE active_positions
             SET status = 'CLOSED', lifecycle_stage = 'CLOSED', updated_at = ?2
             WHERE id = ?1",
            params![parent_id.to_string(), now.to_rfc3339()],
        )?;
        insert_position_inner(&tx, &child)?;
        tx.commit()?;

        info!(
            parent_id = %parent_id,
            child_id = %child.id,
            roll_count = child.lineage.roll_count,
            "position rolled"
        );
        Ok(child)
    }
}

fn row_to_position(row: &Row<'_>) -> rusqlite::Result<ActivePosition> {
    let id: String = row.get(0)?;
    let status: String = row.get(2)?;
    let stage: String = row.get(3)?;
    let strategy: String = row.get(4)?;
    let short_strike: String = row.get(6)?;
    let expiry_date: String = row.get(7)?;
    let entry_price: String = row.get(8)?;
    let entry_timestamp: String = row.get(9)?;
    let capital_deployed: String = row.get(11)?;
    let stop_loss: String = row.get(13)?;
    let take_profit: String = row.get(14)?;
    let force_close: String = row.get(16)?;
    let hb_timestamp: Option<String> = row.get(17)?;
    let hb_mark: Option<String> = row.get(18)?;
    let hb_underlying: Option<String> = row.get(19)?;
    let hb_freshness: Option<String> = row.get(20)?;
    let parent_id: Option<String> = row.get(21)?;
    let root_id: String = row.get(22)?;
    let realized_pnl: Option<String> = row.get(24)?;
    let created_at: String = row.get(25)?;
    let updated_at: String = row.get(26)?;

    let last_heartbeat = match (hb_timestamp, hb_mark, hb_underlying, hb_freshness) {
        (Some(ts), Some(mark), Some(underlying), Some(freshness)) => Some(HeartbeatRecord {
            timestamp: parse_datetime(&ts)?,
            mark_price: parse_decimal(&mark)?,
            underlying_price: parse_decimal(&underlying)?,
            data_freshness_status: freshness
                .parse::<FreshnessStatus>()
                .map_err(super::conversion_err)?,
        }),
        _ => None,
    };

    Ok(ActivePosition {
        id: parse_uuid(&id)?,
        ticker: row.get(1)?,
        status: status
            .parse::<PositionStatus>()
            .map_err(super::conversion_err)?,
        lifecycle_stage: stage
            .parse::<LifecycleStage>()
            .map_err(super::conversion_err)?,
        entry_data: EntryData {
            strategy: strategy
                .parse()
                .map_err(super::conversion_err)?,
            contract: row.get(5)?,
            short_strike: parse_decimal(&short_strike)?,
            expiry_date: parse_date(&expiry_date)?,
            entry_price: parse_decimal(&entry_price)?,
            entry_timestamp: parse_datetime(&entry_timestamp)?,
            contracts: row.get(10)?,
            capital_deployed: parse_decimal(&capital_deployed)?,
            sector: row.get(12)?,
        },
        risk_rules: RiskRules {
            stop_loss_price: parse_decimal(&stop_loss)?,
            take_profit_price: parse_decimal(&take_profit)?,
            max_dte_hold: row.get(15)?,
            force_close_date: parse_date(&force_close)?,
        },
        last_heartbeat,
        lineage: Lineage {
            parent_position_id: parent_id.as_deref().map(parse_uuid).transpose()?,
            root_position_id: parse_uuid(&root_id)?,
            roll_count: row.get(23)?,
            realized_pnl_pre_roll: parse_opt_decimal(realized_pnl.as_deref())?,
        },
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

//! Recommendation ledger: idempotent submission and the approval queue.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::RiskRuleConfig;

use super::models::{
    ActivePosition, EntryData, Lineage, LifecycleStage, PositionStatus, RecommendationStatus,
    RiskRules, TradeRecommendation,
};
use super::{parse_date, parse_datetime, parse_decimal, parse_uuid, Store, StoreError};

/// Outcome of a submit: either a fresh row or the surviving PENDING row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub id: Uuid,
    pub deduplicated: bool,
}

impl Store {
    /// Insert a recommendation unless a PENDING row already exists for
    /// the same (ticker, strategy, expiry). The lookup and insert run in
    /// one transaction so concurrent submissions cannot both insert.
    pub fn submit_recommendation(
        &mut self,
        rec: &TradeRecommendation,
    ) -> Result<SubmitOutcome, StoreError> {
        let tx = self.conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM trade_recommendations
                 WHERE ticker = ?1 AND strategy = ?2 AND expiry = ?3 AND status = 'PENDING'",
                params![
                    rec.ticker,
                    rec.strategy.as_str(),
                    rec.expiry.to_string()
                ],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            let id = parse_uuid(&id)?;
            tx.commit()?;
            return Ok(SubmitOutcome {
                id,
                deduplicated: true,
            });
        }

        tx.execute(
            "INSERT INTO trade_recommendations
             (id, ticker, strategy, contract, strike, expiry, delta, credit_est,
              status, thesis, metrics_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                rec.id.to_string(),
                rec.ticker,
                rec.strategy.as_str(),
                rec.contract,
                rec.strike.to_string(),
                rec.expiry.to_string(),
                rec.delta.to_string(),
                rec.credit_est.to_string(),
                rec.status.as_str(),
                rec.thesis,
                rec.metrics.to_string(),
                rec.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        info!(id = %rec.id, ticker = %rec.ticker, strategy = %rec.strategy, "recommendation queued");
        Ok(SubmitOutcome {
            id: rec.id,
            deduplicated: false,
        })
    }

    pub fn get_recommendation(&self, id: Uuid) -> Result<TradeRecommendation, StoreError> {
        self.conn
            .query_row(
                "SELECT id, ticker, strategy, contract, strike, expiry, delta, credit_est,
                        status, thesis, metrics_json, created_at
                 FROM trade_recommendations WHERE id = ?1",
                params![id.to_string()],
                row_to_recommendation,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "recommendation",
                id,
            })
    }

    pub fn list_recommendations(
        &self,
        status: Option<RecommendationStatus>,
    ) -> Result<Vec<TradeRecommendation>, StoreError> {
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, ticker, strategy, contract, strike, expiry, delta, credit_est,
                            status, thesis, metrics_json, created_at
                     FROM trade_recommendations WHERE status = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(params![status.as_str()], row_to_recommendation)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, ticker, strategy, contract, strike, expiry, delta, credit_est,
                            status, thesis, metrics_json, created_at
                     FROM trade_recommendations ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map([], row_to_recommendation)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// PENDING -> APPROVED, creating the supervised ActivePosition in the
    /// same transaction. Risk thresholds derive from the entry credit:
    /// stop at the configured multiple, take profit at the configured
    /// fraction, force close clamped to no earlier than today.
    pub fn approve_recommendation(
        &mut self,
        id: Uuid,
        risk: &RiskRuleConfig,
        sector: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivePosition, StoreError> {
        let rec = self.get_recommendation(id)?;
        if rec.status != RecommendationStatus::Pending {
            return Err(StoreError::Conflict {
                entity: "recommendation",
                id,
                actual: rec.status.to_string(),
                expected: RecommendationStatus::Pending.to_string(),
            });
        }

        let entry_price = rec.credit_est;
        let mut force_close = rec.expiry - Duration::days(risk.max_dte_hold);
        let today = now.date_naive();
        if force_close < today {
            force_close = today;
        }

        let position_id = Uuid::new_v4();
        let contracts = 1u32;
        let position = ActivePosition {
            id: position_id,
            ticker: rec.ticker.clone(),
            status: PositionStatus::Open,
            lifecycle_stage: LifecycleStage::Monitoring,
            entry_data: EntryData {
                strategy: rec.strategy,
                contract: rec.contract.clone(),
                short_strike: rec.strike,
                expiry_date: rec.expiry,
                entry_price,
                entry_timestamp: now,
                contracts,
                capital_deployed: rec.strike * Decimal::new(100, 0) * Decimal::from(contracts),
                sector: sector.to_string(),
            },
            risk_rules: RiskRules {
                stop_loss_price: entry_price * risk.stop_loss_multiple,
                take_profit_price: entry_price * risk.take_profit_multiple,
                max_dte_hold: risk.max_dte_hold,
                force_close_date: force_close,
            },
            last_heartbeat: None,
            lineage: Lineage {
                parent_position_id: None,
                root_position_id: position_id,
                roll_count: 0,
                realized_pnl_pre_roll: None,
            },
            created_at: now,
            updated_at: now,
        };

        let tx = self.conn.transaction()?;
        let updated = tx.execute(
            "UPDATE trade_recommendations SET status = 'APPROVED'
             WHERE id = ?1 AND status = 'PENDING'",
            params![id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "recommendation",
                id,
            });
        }
        super::positions::insert_position_inner(&tx, &position)?;
        tx.commit()?;

        info!(
            recommendation_id = %id,
            position_id = %position.id,
            ticker = %position.ticker,
            "recommendation approved, position now monitored"
        );
        Ok(position)
    }

    /// PENDING -> REJECTED. No side effects.
    pub fn reject_recommendation(&mut self, id: Uuid) -> Result<(), StoreError> {
        let rec = self.get_recommendation(id)?;
        if rec.status != RecommendationStatus::Pending {
            return Err(StoreError::Conflict {
                entity: "recommendation",
                id,
                actual: rec.status.to_string(),
                expected: RecommendationStatus::Pending.to_string(),
            });
        }
        self.conn.execute(
            "UPDATE trade_recommendations SET status = 'REJECTED' WHERE id = ?1",
            params![id.to_string()],
        )?;
        info!(recommendation_id = %id, "recommendation rejected");
        Ok(())
    }
}

fn row_to_recommendation(row: &Row<'_>) -> rusqlite::Result<TradeRecommendation> {
    let id: String = row.get(0)?;
    let strategy: String = row.get(2)?;
    let strike: String = row.get(4)?;
    let expiry: String = row.get(5)?;
    let delta: String = row.get(6)?;
    let credit_est: String = row.get(7)?;
    let status: String = row.get(8)?;
    let metrics_json: String = row.get(10)?;
    let created_at: String = row.get(11)?;

    Ok(TradeRecommendation {
        id: parse_uuid(&id)?,
        ticker: row.get(1)?,
        strategy: strategy
            .parse()
            .map_err(|e| super::conversion_err(e))?,
        contract: row.get(3)?,
        strike: parse_decimal(&strike)?,
        expiry: parse_date(&expiry)?,
        delta: parse_decimal(&delta)?,
        credit_est: parse_decimal(&credit_est)?,
        status: status.parse().map_err(|e| super::conversion_err(e))?,
        thesis: row.get(9)?,
        metrics: serde_json::from_str(&metrics_json)
            .map_err(|e| super::conversion_err(e))?,
        created_at: parse_datetime(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use crate::store::models::Strategy;

    pub(crate) fn sample_recommendation(ticker: &str) -> TradeRecommendation {
        TradeRecommendation {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            strategy: Strategy::ShortPut,
            contract: format!("{ticker}251017P00155000"),
            strike: dec!(155),
            expiry: NaiveDate::from_ymd_opt(2025, 10, 17).unwrap(),
            delta: dec!(-0.22),
            credit_est: dec!(3.50),
            status: RecommendationStatus::Pending,
            thesis: None,
            metrics: serde_json::json!({ "analysis": { "sector": "Technology" } }),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_submit_is_idempotent_per_ticker_strategy_expiry() {
        let mut store = Store::open_in_memory().unwrap();
        let first = sample_recommendation("AAPL");
        let out1 = store.submit_recommendation(&first).unwrap();
        assert!(!out1.deduplicated);

        let duplicate = sample_recommendation("AAPL");
        let out2 = store.submit_recommendation(&duplicate).unwrap();
        assert!(out2.deduplicated);
        assert_eq!(out2.id, first.id);

        let pending = store
            .list_recommendations(Some(RecommendationStatus::Pending))
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_approve_derives_risk_rules_from_entry_credit() {
        let mut store = Store::open_in_memory().unwrap();
        let rec = sample_recommendation("MSFT");
        store.submit_recommendation(&rec).unwrap();

        let position = store
            .approve_recommendation(rec.id, &RiskRuleConfig::default(), "Technology", Utc::now())
            .unwrap();
        assert_eq!(position.risk_rules.stop_loss_price, dec!(10.50));
        assert_eq!(position.risk_rules.take_profit_price, dec!(1.750));
        assert_eq!(position.lineage.root_position_id, position.id);
        assert_eq!(position.lineage.roll_count, 0);

        let approved = store.get_recommendation(rec.id).unwrap();
        assert_eq!(approved.status, RecommendationStatus::Approved);
    }

    #[test]
    fn test_approve_non_pending_is_conflict() {
        let mut store = Store::open_in_memory().unwrap();
        let rec = sample_recommendation("NVDA");
        store.submit_recommendation(&rec).unwrap();
        store.reject_recommendation(rec.id).unwrap();

        let err = store
            .approve_recommendation(rec.id, &RiskRuleConfig::default(), "Unknown", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_reject_unknown_id_is_not_found() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store.reject_recommendation(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}

//! Alert ledger: idempotent trigger dispatch and the system heartbeat.
//!
//! Delivery is best effort. Once a trigger's log row exists the alert is
//! considered handled, whether or not the webhook answered, so a
//! flapping endpoint cannot cause an alert storm.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::store::models::TriggerType;
use crate::store::{Store, StoreError};

/// Payload posted to the alert webhook.
#[derive(Debug, Clone, Serialize)]
pub struct AlertNotification {
    pub position_id: Uuid,
    pub ticker: String,
    pub trigger: TriggerType,
    pub timestamp: DateTime<Utc>,
    pub detail: String,
}

/// System-online heartbeat with a data-freshness summary.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatSummary {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub open_positions: usize,
    pub stale_positions: usize,
}

impl HeartbeatSummary {
    pub fn new(now: DateTime<Utc>, open_positions: usize, stale_positions: usize) -> Self {
        Self {
            kind: "SYSTEM_ONLINE",
            timestamp: now,
            message: "Watchman system online.".to_string(),
            open_positions,
            stale_positions,
        }
    }
}

pub struct AlertLedger {
    store: Arc<Mutex<Store>>,
    http: reqwest::Client,
    config: AlertConfig,
    latest_heartbeat: RwLock<Option<HeartbeatSummary>>,
}

impl AlertLedger {
    pub fn new(store: Arc<Mutex<Store>>, http: reqwest::Client, config: AlertConfig) -> Self {
        Self {
            store,
            http,
            config,
            latest_heartbeat: RwLock::new(None),
        }
    }

    /// Dispatch a trigger at most once per (position, trigger). Returns
    /// true when this call performed the dispatch.
    pub async fn ensure_sent(
        &self,
        notification: &AlertNotification,
    ) -> Result<bool, StoreError> {
        let is_new = self.store.lock().await.record_alert_if_new(
            notification.position_id,
            notification.trigger,
            notification.timestamp,
        )?;
        if !is_new {
            return Ok(false);
        }

        info!(
            position_id = %notification.position_id,
            ticker = %notification.ticker,
            trigger = %notification.trigger,
            "alert triggered"
        );
        self.dispatch(&self.config.alert_webhook_url, notification)
            .await;
        self.store.lock().await.mark_alert_sent(
            notification.position_id,
            notification.trigger,
            Utc::now(),
        )?;
        Ok(true)
    }

    /// Emit the heartbeat and keep the latest copy for the HTTP surface.
    pub async fn emit_heartbeat(&self, summary: HeartbeatSummary) {
        self.dispatch(&self.config.heartbeat_webhook_url, &summary)
            .await;
        *self.latest_heartbeat.write().await = Some(summary);
    }

    pub async fn latest_heartbeat(&self) -> Option<HeartbeatSummary> {
        self.latest_heartbeat.read().await.clone()
    }

    /// Bounded-retry POST. Failures are logged and swallowed.
    async fn dispatch<T: Serialize>(&self, url: &str, payload: &T) {
        if url.is_empty() {
            return;
        }
        let timeout = Duration::from_secs(self.config.dispatch_timeout_secs);
        for attempt in 1..=self.config.delivery_attempts {
            let result = self
                .http
                .post(url)
                .timeout(timeout)
                .json(payload)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    warn!(attempt, status = %response.status(), "webhook rejected delivery");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "webhook delivery failed");
                }
            }
        }
    }
}

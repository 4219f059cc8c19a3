//! The watchman: supervised periodic monitoring of open positions.
//!
//! One cycle at a time, always. A tick that lands on a weekend exits
//! immediately; a cycle error or timeout is logged and the loop keeps
//! running. Per-position failures never abort the rest of a cycle.

pub mod market_hours;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::{AlertLedger, AlertNotification, HeartbeatSummary};
use crate::config::{RiskRuleConfig, WatchmanConfig};
use crate::provider::MarketDataProvider;
use crate::rate_limit::RateLimiter;
use crate::store::models::{FreshnessStatus, HeartbeatRecord, TriggerType};
use crate::store::{Store, StoreError};

#[derive(Debug, Default)]
pub struct CycleSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub dispatched: Vec<(Uuid, TriggerType)>,
    pub stale: usize,
}

pub struct Watchman {
    store: Arc<Mutex<Store>>,
    provider: Arc<dyn MarketDataProvider>,
    limiter: Arc<RateLimiter>,
    alerts: Arc<AlertLedger>,
    risk: RiskRuleConfig,
    config: WatchmanConfig,
}

impl Watchman {
    pub fn new(
        store: Arc<Mutex<Store>>,
        provider: Arc<dyn MarketDataProvider>,
        limiter: Arc<RateLimiter>,
        alerts: Arc<AlertLedger>,
        risk: RiskRuleConfig,
        config: WatchmanConfig,
    ) -> Self {
        Self {
            store,
            provider,
            limiter,
            alerts,
            risk,
            config,
        }
    }

    /// Evaluate every supervised position once. A position whose quote
    /// cannot be fetched is skipped this cycle; no synthetic price is
    /// ever substituted.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, StoreError> {
        let positions = self.store.lock().await.list_open_positions()?;
        let mut summary = CycleSummary::default();

        for position in positions {
            if self.limiter.acquire().await.is_err() {
                warn!(position_id = %position.id, "rate limiter timeout, position skipped");
                summary.skipped += 1;
                continue;
            }
            let quote = match self
                .provider
                .get_position_quote(&position.ticker, &position.entry_data.contract)
                .await
            {
                Ok(q) => q,
                Err(e) => {
                    warn!(
                        position_id = %position.id,
                        ticker = %position.ticker,
                        error = %e,
                        "quote unavailable, position skipped this cycle"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            let evaluation = rules::evaluate(&position, &quote, &self.risk, now);
            if evaluation.freshness == FreshnessStatus::Stale {
                summary.stale += 1;
            }

            let heartbeat = HeartbeatRecord {
                timestamp: now,
                mark_price: quote.option_mark,
                underlying_price: quote.underlying_price,
                data_freshness_status: evaluation.freshness,
            };
            self.store.lock().await.update_monitoring_state(
                position.id,
                &heartbeat,
                evaluation.stage,
                now,
            )?;

            for raised in evaluation.triggers {
                let sent = self
                    .alerts
                    .ensure_sent(&AlertNotification {
                        position_id: position.id,
                        ticker: position.ticker.clone(),
                        trigger: raised.trigger,
                        timestamp: now,
                        detail: raised.detail,
                    })
                    .await?;
                if sent {
                    summary.dispatched.push((position.id, raised.trigger));
                }
            }
            summary.evaluated += 1;
        }

        debug!(
            evaluated = summary.evaluated,
            skipped = summary.skipped,
            dispatched = summary.dispatched.len(),
            "watchman cycle complete"
        );
        Ok(summary)
    }

    async fn emit_heartbeat(&self, now: DateTime<Utc>) {
        let (open, stale) = match self.store.lock().await.list_open_positions() {
            Ok(positions) => {
                let stale = positions
                    .iter()
                    .filter(|p| {
                        p.last_heartbeat
                            .as_ref()
                            .is_some_and(|h| h.data_freshness_status == FreshnessStatus::Stale)
                    })
                    .count();
                (positions.len(), stale)
            }
            Err(e) => {
                error!(error = %e, "heartbeat could not read positions");
                (0, 0)
            }
        };
        self.alerts
            .emit_heartbeat(HeartbeatSummary::new(now, open, stale))
            .await;
    }

    /// The supervised recurring loop. Runs until the task is dropped or
    /// aborted; nothing raised inside a cycle can terminate it.
    pub async fn run_forever(&self) {
        let heartbeat_every =
            chrono::Duration::seconds(self.config.heartbeat_interval_secs as i64);
        let mut next_heartbeat = Utc::now();
        info!("watchman started");

        loop {
            let now = Utc::now();

            if market_hours::is_trading_day(now) {
                let cycle_budget = Duration::from_secs(self.config.cycle_timeout_secs);
                match tokio::time::timeout(cycle_budget, self.run_cycle(now)).await {
                    Ok(Ok(summary)) => {
                        if !summary.dispatched.is_empty() {
                            info!(alerts = summary.dispatched.len(), "cycle raised alerts");
                        }
                    }
                    Ok(Err(e)) => error!(error = %e, "watchman cycle failed"),
                    Err(_) => error!(
                        timeout_secs = self.config.cycle_timeout_secs,
                        "watchman cycle timed out and was aborted"
                    ),
                }
            } else {
                debug!("non-trading day, cycle skipped");
            }

            if now >= next_heartbeat {
                self.emit_heartbeat(now).await;
                next_heartbeat = now + heartbeat_every;
            }

            let interval = if market_hours::is_market_hours(now) {
                self.config.market_interval_secs
            } else {
                self.config.off_hours_interval_secs
            };
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use crate::config::{AlertConfig, Config, RateLimitConfig};
    use crate::provider::{
        MarketSnapshot, OptionChain, PositionQuote, ProviderError,
    };
    use crate::store::models::LifecycleStage;
    use crate::store::positions::tests::sample_position;

    // Wed 2025-09-03 10:30 ET
    fn market_open_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 14, 30, 0).unwrap()
    }

    /// Quote fixed at the strike so every cycle raises STRIKE_TOUCH;
    /// one designated ticker always fails to fetch.
    struct TouchQuoteProvider {
        broken_ticker: Option<&'static str>,
    }

    #[async_trait]
    impl MarketDataProvider for TouchQuoteProvider {
        async fn get_snapshot(&self, _: &str) -> Result<MarketSnapshot, ProviderError> {
            unreachable!("watchman never fetches snapshots")
        }

        async fn get_option_chain(&self, _: &str) -> Result<OptionChain, ProviderError> {
            unreachable!("watchman never fetches chains")
        }

        async fn get_position_quote(
            &self,
            ticker: &str,
            _contract: &str,
        ) -> Result<PositionQuote, ProviderError> {
            if Some(ticker) == self.broken_ticker {
                return Err(ProviderError::NoData {
                    ticker: ticker.to_string(),
                    reason: "vendor outage".to_string(),
                });
            }
            Ok(PositionQuote {
                underlying_price: dec!(155),
                option_mark: dec!(3.40),
                as_of: market_open_now(),
            })
        }
    }

    fn watchman_with(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<Mutex<Store>>,
    ) -> Watchman {
        let config = Config::default();
        let alerts = Arc::new(AlertLedger::new(
            store.clone(),
            reqwest::Client::new(),
            AlertConfig::default(),
        ));
        Watchman::new(
            store,
            provider,
            Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            alerts,
            config.risk,
            config.watchman,
        )
    }

    #[tokio::test]
    async fn test_cycle_alerts_once_and_updates_state() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let now = market_open_now();
        let mut pos = sample_position("AAPL");
        pos.entry_data.expiry_date = now.date_naive() + chrono::Duration::days(35);
        store.lock().await.insert_position(&pos).unwrap();

        let watchman = watchman_with(
            Arc::new(TouchQuoteProvider {
                broken_ticker: None,
            }),
            store.clone(),
        );

        let first = watchman.run_cycle(now).await.unwrap();
        assert_eq!(first.evaluated, 1);
        assert!(first
            .dispatched
            .contains(&(pos.id, TriggerType::StrikeTouch)));

        // the same condition re-detected next cycle dispatches nothing new
        let second = watchman.run_cycle(now).await.unwrap();
        assert!(second.dispatched.is_empty());

        let loaded = store.lock().await.get_position(pos.id).unwrap();
        assert_eq!(loaded.lifecycle_stage, LifecycleStage::ClosingUrgent);
        let hb = loaded.last_heartbeat.unwrap();
        assert_eq!(hb.underlying_price, dec!(155));
        assert_eq!(hb.data_freshness_status, FreshnessStatus::Ok);
    }

    #[tokio::test]
    async fn test_fetch_failure_isolated_to_one_position() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let now = market_open_now();
        for ticker in ["AAPL", "JPM"] {
            let mut pos = sample_position(ticker);
            pos.entry_data.expiry_date = now.date_naive() + chrono::Duration::days(35);
            store.lock().await.insert_position(&pos).unwrap();
        }

        let watchman = watchman_with(
            Arc::new(TouchQuoteProvider {
                broken_ticker: Some("JPM"),
            }),
            store.clone(),
        );
        let summary = watchman.run_cycle(now).await.unwrap();
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_counts_open_and_stale() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let now = market_open_now();
        let mut pos = sample_position("AAPL");
        pos.entry_data.expiry_date = now.date_naive() + chrono::Duration::days(35);
        pos.last_heartbeat = Some(HeartbeatRecord {
            timestamp: now,
            mark_price: dec!(3.40),
            underlying_price: dec!(175.50),
            data_freshness_status: FreshnessStatus::Stale,
        });
        store.lock().await.insert_position(&pos).unwrap();

        let watchman = watchman_with(
            Arc::new(TouchQuoteProvider {
                broken_ticker: None,
            }),
            store,
        );
        watchman.emit_heartbeat(now).await;

        let latest = watchman.alerts.latest_heartbeat().await.unwrap();
        assert_eq!(latest.open_positions, 1);
        assert_eq!(latest.stale_positions, 1);
    }
}

//! The analysis pipeline: provider data in, gated recommendation out.
//!
//! Gates short-circuit in a fixed order and the first failure becomes
//! the reported no-trade reason. Every numeric decision is deterministic;
//! the synthesizer only narrates numbers that already passed.

pub mod batch;
pub mod options;
pub mod strategy;
pub mod universe;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Config, ThresholdConfig};
use crate::provider::{
    occ_symbol, MacroCalendarProvider, MarketDataProvider, MarketSnapshot, ProviderError,
};
use crate::quant::{self, RsiRegime, TrendDirection};
use crate::rate_limit::RateLimiter;
use crate::store::models::{RecommendationStatus, Strategy, TradeRecommendation};
use crate::store::{Store, StoreError};
use crate::synthesis::{synthesize_with_timeout, Synthesizer, ThesisContext};

use options::SelectedContract;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Technical state at analysis time, embedded in every report.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSnapshot {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub rsi_14: Decimal,
    pub trend: TrendDirection,
    #[serde(with = "rust_decimal::serde::str")]
    pub iv_natr_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub expected_move_1sd: Decimal,
    pub sector: String,
    pub earnings_date: Option<NaiveDate>,
}

/// The actionable half of a report, present only when every gate passed.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendationDetail {
    pub strategy: Strategy,
    pub contract: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub strike: Decimal,
    pub expiry: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub delta: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub credit_est: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub annualized_yield: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub skew_points: Option<Decimal>,
    pub safety_check: String,
    pub thesis: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub regime: String,
    pub analysis: AnalysisSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendationDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_trade_reason: Option<String>,
    /// Identifier of the persisted PENDING recommendation; on an
    /// idempotency match this is the surviving row's id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<Uuid>,
    pub deduplicated: bool,
}

pub struct Analyzer {
    provider: Arc<dyn MarketDataProvider>,
    macro_calendar: Arc<dyn MacroCalendarProvider>,
    limiter: Arc<RateLimiter>,
    store: Arc<Mutex<Store>>,
    synthesizer: Arc<dyn Synthesizer>,
    thresholds: ThresholdConfig,
    synthesis_timeout: Duration,
}

impl Analyzer {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        macro_calendar: Arc<dyn MacroCalendarProvider>,
        limiter: Arc<RateLimiter>,
        store: Arc<Mutex<Store>>,
        synthesizer: Arc<dyn Synthesizer>,
        config: &Config,
    ) -> Self {
        Self {
            provider,
            macro_calendar,
            limiter,
            store,
            synthesizer,
            thresholds: config.thresholds.clone(),
            synthesis_timeout: Duration::from_secs(config.synthesis.timeout_secs),
        }
    }

    /// Run the full pipeline for one ticker at `now`. A no-trade verdict
    /// is a normal report; only fetch/persistence failures are errors.
    pub async fn analyze(
        &self,
        ticker: &str,
        now: DateTime<Utc>,
    ) -> Result<AnalysisReport, AnalysisError> {
        let ticker = ticker.trim().to_uppercase();
        let today = now.date_naive();

        self.limiter.acquire().await?;
        let spy = self.provider.get_snapshot("SPY").await?;
        let regime = strategy::market_regime(&spy);

        let snapshot = if ticker == "SPY" {
            spy
        } else {
            self.limiter.acquire().await?;
            self.provider.get_snapshot(&ticker).await?
        };

        self.limiter.acquire().await?;
        let chain = self.provider.get_option_chain(&ticker).await?;

        let trend = quant::classify_trend(snapshot.price, snapshot.sma_50, snapshot.sma_200);
        let rsi_state = quant::classify_rsi(
            snapshot.rsi_14,
            self.thresholds.rsi_overbought,
            self.thresholds.rsi_oversold,
        );
        let natr = quant::natr_pct(snapshot.atr_14, snapshot.price);
        let iv_natr_ratio = quant::iv_natr_ratio(snapshot.iv_30d, natr);

        // setups are evaluated against the nearest in-window expiry;
        // lacking one, the far edge of the window bounds the trade
        let target_expiry = chain
            .contracts
            .iter()
            .filter(|c| {
                let dte = (c.expiry - today).num_days();
                dte >= self.thresholds.dte_min && dte <= self.thresholds.dte_max
            })
            .map(|c| c.expiry)
            .min()
            .unwrap_or(today + ChronoDuration::days(self.thresholds.dte_max));
        let target_dte = (target_expiry - today).num_days();
        let expected_move = quant::expected_move(snapshot.price, snapshot.iv_30d, target_dte);

        let sector = universe::sector_of(&ticker).to_string();
        let base = AnalysisReport {
            ticker: ticker.clone(),
            timestamp: now,
            regime: regime.label.clone(),
            analysis: AnalysisSnapshot {
                price: snapshot.price,
                rsi_14: snapshot.rsi_14,
                trend,
                iv_natr_ratio,
                expected_move_1sd: expected_move,
                sector: sector.clone(),
                earnings_date: snapshot.earnings_date,
            },
            recommendation: None,
            no_trade_reason: None,
            recommendation_id: None,
            deduplicated: false,
        };

        let verdict = self
            .run_gates(
                &snapshot, &chain, &regime, trend, rsi_state, iv_natr_ratio, natr,
                target_expiry, today, now,
            )
            .await?;
        let (strategy, selected, annual_yield) = match verdict {
            Ok(passed) => passed,
            Err(reason) => {
                info!(ticker = %ticker, %reason, "no trade");
                return Ok(AnalysisReport {
                    no_trade_reason: Some(reason),
                    ..base
                });
            }
        };

        let contract_symbol = occ_symbol(
            &ticker,
            selected.contract.expiry,
            selected.contract.side,
            selected.contract.strike,
        );
        let thesis = synthesize_with_timeout(
            self.synthesizer.as_ref(),
            &ThesisContext {
                ticker: ticker.clone(),
                price: snapshot.price,
                rsi_14: snapshot.rsi_14,
                trend,
                iv_natr_ratio,
                expected_move_1sd: expected_move,
                strike: selected.contract.strike,
                delta: selected.contract.delta,
            },
            self.synthesis_timeout,
        )
        .await;

        let detail = RecommendationDetail {
            strategy,
            contract: contract_symbol,
            strike: selected.contract.strike,
            expiry: selected.contract.expiry,
            delta: selected.contract.delta,
            credit_est: selected.credit_est,
            annualized_yield: annual_yield,
            skew_points: selected.skew_points,
            safety_check: "Strike is outside 1-SD expected move".to_string(),
            thesis,
        };

        let metrics = serde_json::json!({
            "timestamp": now,
            "regime": base.regime,
            "analysis": serde_json::to_value(&base.analysis)?,
            "recommendation": serde_json::to_value(&detail)?,
        });
        let record = TradeRecommendation {
            id: Uuid::new_v4(),
            ticker: ticker.clone(),
            strategy,
            contract: detail.contract.clone(),
            strike: detail.strike,
            expiry: detail.expiry,
            delta: detail.delta,
            credit_est: detail.credit_est,
            status: RecommendationStatus::Pending,
            thesis: detail.thesis.clone(),
            metrics,
            created_at: now,
        };
        let outcome = self.store.lock().await.submit_recommendation(&record)?;

        Ok(AnalysisReport {
            recommendation: Some(detail),
            recommendation_id: Some(outcome.id),
            deduplicated: outcome.deduplicated,
            ..base
        })
    }

    /// The ordered gate chain. `Ok(Err(reason))` is a normal rejection;
    /// the outer error is a fetch/store failure.
    #[allow(clippy::too_many_arguments)]
    async fn run_gates(
        &self,
        snapshot: &MarketSnapshot,
        chain: &crate::provider::OptionChain,
        regime: &strategy::MarketRegime,
        trend: TrendDirection,
        rsi_state: RsiRegime,
        iv_natr_ratio: Decimal,
        natr: Decimal,
        target_expiry: NaiveDate,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Result<(Strategy, SelectedContract, Decimal), String>, AnalysisError> {
        let chosen = match strategy::select_strategy(trend, rsi_state, regime) {
            Ok(s) => s,
            Err(reason) => return Ok(Err(reason)),
        };

        if chosen == Strategy::ShortPut {
            if let Some(sma_50) = snapshot.sma_50 {
                if snapshot.price < sma_50 {
                    return Ok(Err(format!(
                        "ticker trend filter: price {} below 50-day SMA {}",
                        snapshot.price, sma_50
                    )));
                }
            }
        }

        if let Some(adv) = snapshot.average_daily_volume {
            if adv <= self.thresholds.min_adv {
                return Ok(Err(format!(
                    "liquidity gate: ADV {adv} at or below floor {}",
                    self.thresholds.min_adv
                )));
            }
        }

        if universe::earnings_blocks_trade(snapshot.earnings_date, target_expiry, today) {
            return Ok(Err(
                "earnings exclusion: earnings event between today and expiry".to_string(),
            ));
        }

        self.limiter.acquire().await?;
        let events = self
            .macro_calendar
            .high_impact_events(self.thresholds.macro_lookahead_hours)
            .await?;
        let cutoff = now + ChronoDuration::hours(self.thresholds.macro_lookahead_hours);
        if let Some(event) = events
            .iter()
            .find(|e| e.start_time >= now && e.start_time <= cutoff)
        {
            return Ok(Err(format!(
                "macro gate: {} within {}h",
                event.name, self.thresholds.macro_lookahead_hours
            )));
        }

        if iv_natr_ratio <= self.thresholds.iv_natr_min_ratio {
            return Ok(Err(format!(
                "efficiency gate: IV/NATR ratio {} not above {}",
                crate::utils::decimal::round_half_up(iv_natr_ratio, 2),
                self.thresholds.iv_natr_min_ratio
            )));
        }

        if chosen == Strategy::ShortPut && snapshot.rsi_14 >= self.thresholds.rsi_entry_threshold {
            return Ok(Err(format!(
                "entry gate: RSI {} not below {}",
                snapshot.rsi_14, self.thresholds.rsi_entry_threshold
            )));
        }

        let selected = match options::select_contract(chain, chosen, today, &self.thresholds) {
            Ok(s) => s,
            Err(reason) => return Ok(Err(reason)),
        };

        // term-structure recheck: the selected contract's own IV must
        // clear the same efficiency bar as the 30-day proxy
        let contract_ratio = quant::iv_natr_ratio(selected.contract.iv, natr);
        if contract_ratio <= self.thresholds.iv_natr_min_ratio {
            return Ok(Err(format!(
                "efficiency gate: contract IV/NATR ratio {} not above {}",
                crate::utils::decimal::round_half_up(contract_ratio, 2),
                self.thresholds.iv_natr_min_ratio
            )));
        }

        let annual_yield =
            quant::annualized_yield(selected.credit_est, selected.contract.strike, selected.dte);
        if annual_yield <= self.thresholds.min_annual_yield {
            return Ok(Err(format!(
                "yield gate: annualized yield {} not above {}",
                crate::utils::decimal::round_half_up(annual_yield, 4),
                self.thresholds.min_annual_yield
            )));
        }

        let sector = universe::sector_of(&snapshot.ticker);
        let open_positions = self.store.lock().await.list_open_positions()?;
        if !universe::sector_exposure_allowed(
            &open_positions,
            sector,
            self.thresholds.max_sector_allocation,
        ) {
            return Ok(Err(format!(
                "sector exposure cap: {sector} already at {} of deployed capital",
                self.thresholds.max_sector_allocation
            )));
        }
        if !universe::sector_count_allowed(
            &open_positions,
            sector,
            self.thresholds.max_positions_per_sector,
        ) {
            return Ok(Err(format!(
                "sector correlation cap: {} positions already open in {sector}",
                self.thresholds.max_positions_per_sector
            )));
        }

        let expected_move =
            quant::expected_move(snapshot.price, snapshot.iv_30d, selected.dte);
        let strike = selected.contract.strike;
        let safe = match chosen {
            Strategy::ShortPut => strike < snapshot.price - expected_move,
            Strategy::ShortCall => strike > snapshot.price + expected_move,
        };
        if !safe {
            return Ok(Err(format!(
                "safety check: strike {strike} inside the 1-SD expected move ({expected_move})"
            )));
        }

        debug!(ticker = %snapshot.ticker, strategy = %chosen, %strike, "all gates passed");
        Ok(Ok((chosen, selected, annual_yield)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    use crate::provider::{
        MacroEvent, OptionChain, OptionContract, OptionSide, PositionQuote,
    };
    use crate::synthesis::StubSynthesizer;

    /// Provider tuned so every gate passes for a short put.
    pub(crate) struct PassingProvider;

    #[async_trait]
    impl MarketDataProvider for PassingProvider {
        async fn get_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
            Ok(MarketSnapshot {
                ticker: ticker.to_uppercase(),
                price: dec!(175.50),
                sma_50: Some(dec!(172.00)),
                sma_200: Some(dec!(165.00)),
                atr_14: dec!(2.80),
                rsi_14: dec!(28.5),
                iv_30d: dec!(0.30),
                average_daily_volume: Some(dec!(50000000)),
                earnings_date: None,
                as_of: Utc::now(),
            })
        }

        async fn get_option_chain(&self, ticker: &str) -> Result<OptionChain, ProviderError> {
            let expiry = Utc::now().date_naive() + ChronoDuration::days(35);
            Ok(OptionChain {
                ticker: ticker.to_uppercase(),
                contracts: vec![
                    OptionContract {
                        side: OptionSide::Put,
                        strike: dec!(155),
                        expiry,
                        delta: dec!(-0.22),
                        bid: dec!(3.10),
                        ask: dec!(3.30),
                        iv: dec!(0.30),
                    },
                    OptionContract {
                        side: OptionSide::Call,
                        strike: dec!(195),
                        expiry,
                        delta: dec!(0.25),
                        bid: dec!(2.50),
                        ask: dec!(2.65),
                        iv: dec!(0.26),
                    },
                ],
            })
        }

        async fn get_position_quote(
            &self,
            _ticker: &str,
            _contract: &str,
        ) -> Result<PositionQuote, ProviderError> {
            Ok(PositionQuote {
                underlying_price: dec!(175.50),
                option_mark: dec!(3.40),
                as_of: Utc::now(),
            })
        }
    }

    pub(crate) struct QuietCalendar;

    #[async_trait]
    impl MacroCalendarProvider for QuietCalendar {
        async fn high_impact_events(
            &self,
            _within_hours: i64,
        ) -> Result<Vec<MacroEvent>, ProviderError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn analyzer_for_store(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<Mutex<Store>>,
    ) -> Analyzer {
        let config = Config::default();
        Analyzer::new(
            provider,
            Arc::new(QuietCalendar),
            Arc::new(RateLimiter::new(&config.rate_limit)),
            store,
            Arc::new(StubSynthesizer),
            &config,
        )
    }

    pub(crate) fn analyzer_with(provider: Arc<dyn MarketDataProvider>) -> Analyzer {
        analyzer_for_store(provider, Arc::new(Mutex::new(Store::open_in_memory().unwrap())))
    }

    #[tokio::test]
    async fn test_full_pipeline_produces_short_put_recommendation() {
        let analyzer = analyzer_with(Arc::new(PassingProvider));
        let report = analyzer.analyze("aapl", Utc::now()).await.unwrap();

        assert_eq!(report.ticker, "AAPL");
        assert_eq!(report.regime, "BULLISH_SPY_OVER_200SMA");
        assert!(report.no_trade_reason.is_none());

        let rec = report.recommendation.expect("recommendation");
        assert_eq!(rec.strategy, Strategy::ShortPut);
        assert_eq!(rec.strike, dec!(155));
        assert_eq!(rec.credit_est, dec!(3.10));
        assert!(rec.contract.starts_with("AAPL"));
        assert!(rec.contract.ends_with("P00155000"));
        assert!(rec.thesis.is_some());
        assert!(report.recommendation_id.is_some());
        assert!(!report.deduplicated);
    }

    #[tokio::test]
    async fn test_repeat_analysis_returns_same_recommendation_id() {
        let analyzer = analyzer_with(Arc::new(PassingProvider));
        let now = Utc::now();
        let first = analyzer.analyze("AAPL", now).await.unwrap();
        let second = analyzer.analyze("AAPL", now).await.unwrap();

        assert!(second.deduplicated);
        assert_eq!(first.recommendation_id, second.recommendation_id);
    }

    #[tokio::test]
    async fn test_default_mock_fails_efficiency_gate() {
        // 24% IV against a 2.39% NATR annualizes well below the 1.0 bar
        let analyzer =
            analyzer_with(Arc::new(crate::provider::mock::MockMarketDataProvider::new()));
        let report = analyzer.analyze("AAPL", Utc::now()).await.unwrap();

        assert!(report.recommendation.is_none());
        let reason = report.no_trade_reason.expect("reason");
        assert!(reason.contains("efficiency gate"), "got: {reason}");
    }

    #[tokio::test]
    async fn test_macro_event_blocks_entry() {
        struct BusyCalendar;

        #[async_trait]
        impl MacroCalendarProvider for BusyCalendar {
            async fn high_impact_events(
                &self,
                _within_hours: i64,
            ) -> Result<Vec<MacroEvent>, ProviderError> {
                Ok(vec![MacroEvent {
                    name: "FOMC Rate Decision".to_string(),
                    start_time: Utc::now() + ChronoDuration::hours(12),
                }])
            }
        }

        let config = Config::default();
        let analyzer = Analyzer::new(
            Arc::new(PassingProvider),
            Arc::new(BusyCalendar),
            Arc::new(RateLimiter::new(&config.rate_limit)),
            Arc::new(Mutex::new(Store::open_in_memory().unwrap())),
            Arc::new(StubSynthesizer),
            &config,
        );
        let report = analyzer.analyze("AAPL", Utc::now()).await.unwrap();
        let reason = report.no_trade_reason.expect("reason");
        assert!(reason.contains("FOMC"), "got: {reason}");
    }

    #[tokio::test]
    async fn test_fetch_error_surfaces_as_provider_error() {
        struct FailingProvider;

        #[async_trait]
        impl MarketDataProvider for FailingProvider {
            async fn get_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
                Err(ProviderError::NoData {
                    ticker: ticker.to_string(),
                    reason: "vendor outage".to_string(),
                })
            }

            async fn get_option_chain(&self, _: &str) -> Result<OptionChain, ProviderError> {
                unreachable!("snapshot fails first")
            }

            async fn get_position_quote(
                &self,
                _: &str,
                _: &str,
            ) -> Result<PositionQuote, ProviderError> {
                unreachable!()
            }
        }

        let analyzer = analyzer_with(Arc::new(FailingProvider));
        let err = analyzer.analyze("AAPL", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Provider(_)));
    }
}

//! HTTP surface for the collaborators: dashboard, approval UI, ops.
//!
//! Handlers stay thin. Everything numeric happens in `analysis`,
//! `store` and `watchman`; this layer only maps outcomes to status
//! codes and JSON bodies.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::alert::AlertLedger;
use crate::analysis::{AnalysisError, Analyzer};
use crate::config::{RiskRuleConfig, UniverseConfig};
use crate::provider::{occ_symbol, MarketDataProvider, OptionSide, ProviderError};
use crate::rate_limit::RateLimiter;
use crate::store::models::{
    ActivePosition, EntryData, Lineage, PositionStatus, LifecycleStage, RecommendationStatus,
    RiskRules, Strategy, TradeRecommendation,
};
use crate::store::positions::RollEntry;
use crate::store::{Store, StoreError};

pub struct AppState {
    pub analyzer: Analyzer,
    pub store: Arc<Mutex<Store>>,
    pub alerts: Arc<AlertLedger>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub limiter: Arc<RateLimiter>,
    pub risk: RiskRuleConfig,
    pub universe: UniverseConfig,
    pub mock_mode: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/heartbeat", get(heartbeat))
        .route("/analyze/:ticker", post(analyze_ticker))
        .route("/analyze/batch", post(analyze_batch))
        .route("/recommendations", get(list_recommendations))
        .route("/recommendations/:id/approve", post(approve_recommendation))
        .route("/recommendations/:id/reject", post(reject_recommendation))
        .route("/positions", get(list_positions))
        .route("/positions/manual", post(create_manual_position))
        .route("/positions/:id/roll", post(roll_position))
        .route("/positions/:id", delete(delete_position))
        .with_state(state)
}

#[derive(Debug)]
enum ApiError {
    Store(StoreError),
    Provider(ProviderError),
    Encode(serde_json::Error),
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Provider(p) => Self::Provider(p),
            AnalysisError::Store(s) => Self::Store(s),
            AnalysisError::Encode(j) => Self::Encode(j),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Store(StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.message())
            }
            Self::Store(StoreError::Conflict { .. }) => {
                (StatusCode::CONFLICT, self.message())
            }
            Self::Store(_) | Self::Encode(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.message())
            }
            Self::Provider(_) => (StatusCode::BAD_GATEWAY, self.message()),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.message()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl ApiError {
    fn message(&self) -> String {
        match self {
            Self::Store(e) => e.to_string(),
            Self::Provider(e) => e.to_string(),
            Self::Encode(e) => e.to_string(),
            Self::BadRequest(m) => m.clone(),
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let open = state.store.lock().await.list_open_positions()?.len();
    Ok(Json(json!({
        "status": "ok",
        "mock_mode": state.mock_mode,
        "open_positions": open,
    })))
}

async fn heartbeat(State(state): State<Arc<AppState>>) -> Response {
    match state.alerts.latest_heartbeat().await {
        Some(summary) => Json(summary).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no heartbeat emitted yet" })),
        )
            .into_response(),
    }
}

async fn analyze_ticker(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.analyzer.analyze(&ticker, Utc::now()).await?;
    Ok(Json(serde_json::to_value(report).map_err(ApiError::Encode)?))
}

async fn analyze_batch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state.analyzer.run_batch(&state.universe, Utc::now()).await?;
    Ok(Json(serde_json::to_value(report).map_err(ApiError::Encode)?))
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    status: Option<String>,
    #[serde(default)]
    check_stale: bool,
}

/// Live-market staleness annotation for a listed recommendation.
#[derive(Debug, Serialize)]
struct StaleCheck {
    #[serde(with = "rust_decimal::serde::str")]
    live_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    live_credit: Decimal,
    thesis_stale: bool,
}

#[derive(Debug, Serialize)]
struct RecommendationView {
    #[serde(flatten)]
    recommendation: TradeRecommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    stale_check: Option<StaleCheck>,
}

/// Stale when the underlying slid more than 5% below its level at
/// recommendation time, or the obtainable credit decayed more than 10%.
fn thesis_is_stale(
    rec_price: Decimal,
    rec_credit: Decimal,
    live_price: Decimal,
    live_credit: Decimal,
) -> bool {
    live_price < rec_price * dec!(0.95) || live_credit < rec_credit * dec!(0.90)
}

fn price_at_recommendation(rec: &TradeRecommendation) -> Option<Decimal> {
    rec.metrics
        .pointer("/analysis/price")
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
}

async fn list_recommendations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<Vec<RecommendationView>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            RecommendationStatus::from_str(raw)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
        None => None,
    };
    let recommendations = state.store.lock().await.list_recommendations(status)?;

    let mut out = Vec::with_capacity(recommendations.len());
    for rec in recommendations {
        let stale_check = if query.check_stale && rec.status == RecommendationStatus::Pending {
            annotate_staleness(&state, &rec).await
        } else {
            None
        };
        out.push(RecommendationView {
            recommendation: rec,
            stale_check,
        });
    }
    Ok(Json(out))
}

/// Fetch a live quote for the recommended contract. Quote failures
/// leave the row unannotated rather than failing the listing.
async fn annotate_staleness(
    state: &AppState,
    rec: &TradeRecommendation,
) -> Option<StaleCheck> {
    if state.limiter.acquire().await.is_err() {
        return None;
    }
    let quote = match state
        .provider
        .get_position_quote(&rec.ticker, &rec.contract)
        .await
    {
        Ok(q) => q,
        Err(e) => {
            warn!(ticker = %rec.ticker, error = %e, "stale check skipped, no live quote");
            return None;
        }
    };
    let rec_price = price_at_recommendation(rec)?;
    Some(StaleCheck {
        live_price: quote.underlying_price,
        live_credit: quote.option_mark,
        thesis_stale: thesis_is_stale(
            rec_price,
            rec.credit_est,
            quote.underlying_price,
            quote.option_mark,
        ),
    })
}

async fn approve_recommendation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActivePosition>, ApiError> {
    let mut store = state.store.lock().await;
    let rec = store.get_recommendation(id)?;
    let sector = rec
        .metrics
        .pointer("/analysis/sector")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let position = store.approve_recommendation(id, &state.risk, &sector, Utc::now())?;
    Ok(Json(position))
}

async fn reject_recommendation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store.lock().await.reject_recommendation(id)?;
    Ok(Json(json!({ "id": id, "status": "REJECTED" })))
}

async fn list_positions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ActivePosition>>, ApiError> {
    let positions = state.store.lock().await.list_open_positions()?;
    Ok(Json(positions))
}

/// Entry data supplied by the operator for a fill made outside the
/// engine. Risk rules are still derived, never supplied.
#[derive(Debug, Deserialize)]
pub struct ManualPositionRequest {
    pub ticker: String,
    pub strategy: Strategy,
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub short_strike: Decimal,
    pub expiry_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(default = "default_contracts")]
    pub contracts: u32,
    #[serde(default)]
    pub sector: Option<String>,
    /// Overrides the computed `strike x 100 x contracts` when supplied
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub capital_deployed: Option<Decimal>,
}

fn default_contracts() -> u32 {
    1
}

fn build_manual_position(
    request: &ManualPositionRequest,
    risk: &RiskRuleConfig,
    now: chrono::DateTime<Utc>,
) -> Result<ActivePosition, ApiError> {
    if request.entry_price <= Decimal::ZERO {
        return Err(ApiError::BadRequest("entry_price must be positive".into()));
    }
    if request.short_strike <= Decimal::ZERO {
        return Err(ApiError::BadRequest("short_strike must be positive".into()));
    }
    if request.contracts == 0 {
        return Err(ApiError::BadRequest("contracts must be at least 1".into()));
    }
    let today = now.date_naive();
    if request.expiry_date <= today {
        return Err(ApiError::BadRequest("expiry_date must be in the future".into()));
    }

    let ticker = request.ticker.trim().to_uppercase();
    let side = match request.strategy {
        Strategy::ShortCall => OptionSide::Call,
        Strategy::ShortPut => OptionSide::Put,
    };
    let contract = match &request.contract {
        Some(symbol) => symbol.clone(),
        None => occ_symbol(&ticker, request.expiry_date, side, request.short_strike),
    };

    let mut force_close = request.expiry_date - ChronoDuration::days(risk.max_dte_hold);
    if force_close < today {
        force_close = today;
    }

    let capital = request.capital_deployed.unwrap_or_else(|| {
        request.short_strike * Decimal::from(100u32) * Decimal::from(request.contracts)
    });
    let sector = request
        .sector
        .clone()
        .unwrap_or_else(|| "Unknown".to_string());

    let id = Uuid::new_v4();
    Ok(ActivePosition {
        id,
        ticker,
        status: PositionStatus::Open,
        lifecycle_stage: LifecycleStage::Monitoring,
        entry_data: EntryData {
            strategy: request.strategy,
            contract,
            short_strike: request.short_strike,
            expiry_date: request.expiry_date,
            entry_price: request.entry_price,
            entry_timestamp: now,
            contracts: request.contracts,
            capital_deployed: capital,
            sector,
        },
        risk_rules: RiskRules {
            stop_loss_price: request.entry_price * risk.stop_loss_multiple,
            take_profit_price: request.entry_price * risk.take_profit_multiple,
            max_dte_hold: risk.max_dte_hold,
            force_close_date: force_close,
        },
        last_heartbeat: None,
        lineage: Lineage {
            parent_position_id: None,
            root_position_id: id,
            roll_count: 0,
            realized_pnl_pre_roll: None,
        },
        created_at: now,
        updated_at: now,
    })
}

async fn create_manual_position(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ManualPositionRequest>,
) -> Result<(StatusCode, Json<ActivePosition>), ApiError> {
    let position = build_manual_position(&request, &state.risk, Utc::now())?;
    state.store.lock().await.insert_position(&position)?;
    Ok((StatusCode::CREATED, Json(position)))
}

/// The successor contract details for a roll, supplied by the operator
/// once the replacement fill is confirmed.
#[derive(Debug, Deserialize)]
pub struct RollRequest {
    #[serde(default)]
    pub contract: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub short_strike: Decimal,
    pub expiry_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
}

async fn roll_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<RollRequest>,
) -> Result<Json<ActivePosition>, ApiError> {
    if request.entry_price <= Decimal::ZERO {
        return Err(ApiError::BadRequest("entry_price must be positive".into()));
    }
    let mut store = state.store.lock().await;
    let parent = store.get_position(id)?;
    let side = match parent.entry_data.strategy {
        Strategy::ShortCall => OptionSide::Call,
        Strategy::ShortPut => OptionSide::Put,
    };
    let contract = match &request.contract {
        Some(symbol) => symbol.clone(),
        None => occ_symbol(&parent.ticker, request.expiry_date, side, request.short_strike),
    };
    let child = store.roll_position(
        id,
        RollEntry {
            contract,
            short_strike: request.short_strike,
            expiry_date: request.expiry_date,
            entry_price: request.entry_price,
        },
        &state.risk,
        request.realized_pnl,
        Utc::now(),
    )?;
    Ok(Json(child))
}

async fn delete_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.lock().await.delete_position(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::analysis::tests::{analyzer_for_store, PassingProvider};
    use crate::config::{AlertConfig, Config, RateLimitConfig};
    use crate::store::positions::tests::sample_position;

    fn state_with_provider(provider: Arc<dyn MarketDataProvider>) -> Arc<AppState> {
        let config = Config::default();
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default()));
        let alerts = Arc::new(AlertLedger::new(
            store.clone(),
            reqwest::Client::new(),
            AlertConfig::default(),
        ));
        let analyzer = analyzer_for_store(provider.clone(), store.clone());
        Arc::new(AppState {
            analyzer,
            store,
            alerts,
            provider,
            limiter,
            risk: config.risk.clone(),
            universe: config.universe.clone(),
            mock_mode: true,
        })
    }

    fn manual_request() -> ManualPositionRequest {
        ManualPositionRequest {
            ticker: "msft".to_string(),
            strategy: Strategy::ShortPut,
            contract: None,
            short_strike: dec!(400),
            expiry_date: Utc::now().date_naive() + ChronoDuration::days(40),
            entry_price: dec!(5.20),
            contracts: 2,
            sector: Some("Technology".to_string()),
            capital_deployed: None,
        }
    }

    #[test]
    fn test_thesis_stale_boundaries() {
        let rec_price = dec!(100);
        let rec_credit = dec!(3.00);
        // exactly at the 5% / 10% boundaries: not yet stale
        assert!(!thesis_is_stale(rec_price, rec_credit, dec!(95), dec!(2.70)));
        assert!(thesis_is_stale(rec_price, rec_credit, dec!(94.99), dec!(3.00)));
        assert!(thesis_is_stale(rec_price, rec_credit, dec!(100), dec!(2.69)));
    }

    #[test]
    fn test_manual_position_derives_risk_and_contract() {
        let config = Config::default();
        let now = Utc::now();
        let position = build_manual_position(&manual_request(), &config.risk, now).unwrap();

        assert_eq!(position.ticker, "MSFT");
        assert_eq!(position.risk_rules.stop_loss_price, dec!(15.60));
        assert_eq!(position.risk_rules.take_profit_price, dec!(2.60));
        assert_eq!(position.entry_data.capital_deployed, dec!(80000));
        assert!(position.entry_data.contract.starts_with("MSFT"));
        assert!(position.entry_data.contract.ends_with("P00400000"));
        assert_eq!(position.lineage.root_position_id, position.id);
    }

    #[test]
    fn test_manual_position_rejects_bad_input() {
        let config = Config::default();
        let now = Utc::now();
        let mut request = manual_request();
        request.entry_price = dec!(0);
        assert!(build_manual_position(&request, &config.risk, now).is_err());

        let mut request = manual_request();
        request.expiry_date = now.date_naive();
        assert!(build_manual_position(&request, &config.risk, now).is_err());

        let mut request = manual_request();
        request.contracts = 0;
        assert!(build_manual_position(&request, &config.risk, now).is_err());
    }

    #[tokio::test]
    async fn test_approve_flow_and_status_mapping() {
        let state = state_with_provider(Arc::new(PassingProvider));
        let report = state.analyzer.analyze("AAPL", Utc::now()).await.unwrap();
        let id = report.recommendation_id.unwrap();

        let position = approve_recommendation(State(state.clone()), Path(id))
            .await
            .unwrap();
        assert_eq!(position.0.ticker, "AAPL");
        assert_eq!(position.0.entry_data.sector, "Technology");

        // second approval conflicts
        let err = approve_recommendation(State(state.clone()), Path(id))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Store(StoreError::Conflict { .. })));

        // unknown id is not found
        let err = approve_recommendation(State(state), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_check_stale_annotates_pending_rows() {
        let state = state_with_provider(Arc::new(PassingProvider));
        state.analyzer.analyze("AAPL", Utc::now()).await.unwrap();

        let listed = list_recommendations(
            State(state),
            Query(RecommendationQuery {
                status: Some("PENDING".to_string()),
                check_stale: true,
            }),
        )
        .await
        .unwrap();

        assert_eq!(listed.0.len(), 1);
        let check = listed.0[0].stale_check.as_ref().expect("stale check");
        // PassingProvider quotes the underlying at its recommendation
        // price, so the thesis is intact
        assert!(!check.thesis_stale);
    }

    #[tokio::test]
    async fn test_delete_position_returns_no_content() {
        let state = state_with_provider(Arc::new(PassingProvider));
        let pos = sample_position("AAPL");
        state.store.lock().await.insert_position(&pos).unwrap();

        let code = delete_position(State(state.clone()), Path(pos.id))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::NO_CONTENT);
        assert!(state.store.lock().await.list_open_positions().unwrap().is_empty());
    }
}

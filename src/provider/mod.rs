//! Market data provider abstraction.
//!
//! Core logic never talks to a vendor directly. Everything flows through
//! [`MarketDataProvider`] and [`MacroCalendarProvider`] so the analysis
//! pipeline and the watchman run identically against the deterministic
//! mock and the Polygon adapter.

pub mod mock;
pub mod polygon;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::ProviderConfig;

/// Errors from outbound data fetches.
///
/// A fetch error for one ticker is an isolated event: batch runs and
/// monitoring cycles record it and move on to the next instrument.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status} for {endpoint}")]
    Api { status: u16, endpoint: String },

    #[error("failed to parse provider response: {0}")]
    Parse(String),

    #[error("no data available for {ticker}: {reason}")]
    NoData { ticker: String, reason: String },

    #[error("timed out waiting for a rate limiter slot")]
    RateLimitTimeout,
}

/// Latest technical state of one underlying.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub ticker: String,
    pub price: Decimal,
    pub sma_50: Option<Decimal>,
    pub sma_200: Option<Decimal>,
    pub atr_14: Decimal,
    pub rsi_14: Decimal,
    /// 30-day implied volatility as a fraction (0.24 = 24%)
    pub iv_30d: Decimal,
    /// 20-day average daily share volume, when the vendor supplies history
    pub average_daily_volume: Option<Decimal>,
    /// Next confirmed earnings date, if known
    pub earnings_date: Option<NaiveDate>,
    /// Timestamp of the quote backing this snapshot
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionSide {
    Put,
    Call,
}

impl OptionSide {
    pub fn occ_letter(&self) -> char {
        match self {
            OptionSide::Put => 'P',
            OptionSide::Call => 'C',
        }
    }
}

/// One listed contract from a chain.
#[derive(Debug, Clone)]
pub struct OptionContract {
    pub side: OptionSide,
    pub strike: Decimal,
    pub expiry: NaiveDate,
    /// Signed delta as quoted (puts negative)
    pub delta: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Contract-level implied volatility as a fraction
    pub iv: Decimal,
}

#[derive(Debug, Clone)]
pub struct OptionChain {
    pub ticker: String,
    pub contracts: Vec<OptionContract>,
}

/// Underlying price and option mark for an open position.
#[derive(Debug, Clone)]
pub struct PositionQuote {
    pub underlying_price: Decimal,
    pub option_mark: Decimal,
    pub as_of: DateTime<Utc>,
}

/// A scheduled high-impact macro release (CPI, NFP, FOMC).
#[derive(Debug, Clone)]
pub struct MacroEvent {
    pub name: String,
    pub start_time: DateTime<Utc>,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest technicals for one underlying.
    async fn get_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError>;

    /// Full option chain (puts and calls, all listed expirations).
    async fn get_option_chain(&self, ticker: &str) -> Result<OptionChain, ProviderError>;

    /// Underlying price and option mark for an OCC contract symbol.
    async fn get_position_quote(
        &self,
        ticker: &str,
        contract: &str,
    ) -> Result<PositionQuote, ProviderError>;
}

#[async_trait]
pub trait MacroCalendarProvider: Send + Sync {
    /// High-impact events starting within the next `within_hours`.
    async fn high_impact_events(&self, within_hours: i64)
        -> Result<Vec<MacroEvent>, ProviderError>;
}

/// OCC contract symbol, e.g. `AAPL250912P00155000`.
pub fn occ_symbol(ticker: &str, expiry: NaiveDate, side: OptionSide, strike: Decimal) -> String {
    use rust_decimal::prelude::ToPrimitive;
    let thousandths = (strike * Decimal::new(1000, 0))
        .trunc()
        .to_i64()
        .unwrap_or(0);
    format!(
        "{}{}{}{:08}",
        ticker.to_uppercase(),
        expiry.format("%y%m%d"),
        side.occ_letter(),
        thousandths
    )
}

/// Select the configured market data provider.
pub fn build_market_provider(
    config: &ProviderConfig,
    http: reqwest::Client,
) -> Arc<dyn MarketDataProvider> {
    if config.mock_mode || config.polygon_api_key.is_empty() {
        Arc::new(mock::MockMarketDataProvider::new())
    } else {
        Arc::new(polygon::PolygonProvider::new(
            http,
            config.polygon_api_key.clone(),
        ))
    }
}

/// Select the configured macro calendar provider.
///
/// Only the quiet mock exists today; a Trading Economics adapter slots in
/// behind the same trait once an API key is provisioned.
pub fn build_macro_provider(_config: &ProviderConfig) -> Arc<dyn MacroCalendarProvider> {
    Arc::new(mock::MockMacroCalendarProvider::default())
}

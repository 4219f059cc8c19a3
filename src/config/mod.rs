//! Configuration management for the advisory engine.
//!
//! Loads settings from environment variables and config files. Every
//! quantitative and risk threshold lives here; core logic never carries
//! a recompiled constant for an entry or exit rule.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server and database location
    #[serde(default)]
    pub server: ServerConfig,
    /// Data provider selection and credentials
    #[serde(default)]
    pub providers: ProviderConfig,
    /// Entry gates for the quantitative pipeline
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Per-position risk rules applied by the watchman
    #[serde(default)]
    pub risk: RiskRuleConfig,
    /// Scheduler cadence
    #[serde(default)]
    pub watchman: WatchmanConfig,
    /// Outbound provider-call throttling
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Alert/heartbeat webhook delivery
    #[serde(default)]
    pub alerts: AlertConfig,
    /// Narrative thesis synthesis
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Batch analysis universe
    #[serde(default)]
    pub universe: UniverseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Use deterministic mock data instead of a vendor (no API calls)
    #[serde(default = "default_true")]
    pub mock_mode: bool,
    /// Polygon.io API key (vendor adapter)
    #[serde(default)]
    pub polygon_api_key: String,
    /// Timeout for any single outbound data fetch, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Minimum IV/NATR ratio for the efficiency gate
    #[serde(default = "default_iv_natr_min_ratio")]
    pub iv_natr_min_ratio: Decimal,
    /// RSI above this is overbought
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: Decimal,
    /// RSI below this is oversold
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: Decimal,
    /// RSI must be below this for a short-put entry
    #[serde(default = "default_rsi_entry")]
    pub rsi_entry_threshold: Decimal,
    /// Minimum annualized credit yield (0.20 = 20%)
    #[serde(default = "default_min_annual_yield")]
    pub min_annual_yield: Decimal,
    /// Target DTE window for expirations
    #[serde(default = "default_dte_min")]
    pub dte_min: i64,
    #[serde(default = "default_dte_max")]
    pub dte_max: i64,
    /// Option liquidity gate: (ask - bid) / bid must stay below this
    #[serde(default = "default_max_spread_pct")]
    pub max_spread_pct: Decimal,
    /// Target |delta| band for strike selection
    #[serde(default = "default_delta_low")]
    pub delta_target_low: Decimal,
    #[serde(default = "default_delta_high")]
    pub delta_target_high: Decimal,
    /// Block short puts when |25-delta skew| exceeds this (IV points)
    #[serde(default = "default_max_skew")]
    pub max_skew_points: Decimal,
    /// Stock liquidity floor: average daily volume in shares
    #[serde(default = "default_min_adv")]
    pub min_adv: Decimal,
    /// Block new entries if a high-impact macro event starts within this window
    #[serde(default = "default_macro_lookahead")]
    pub macro_lookahead_hours: i64,
    /// Max share of deployed capital in a single sector (0.70 = 70%)
    #[serde(default = "default_max_sector_allocation")]
    pub max_sector_allocation: Decimal,
    /// Max number of open positions per sector
    #[serde(default = "default_max_positions_per_sector")]
    pub max_positions_per_sector: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRuleConfig {
    /// Stop loss at this multiple of entry credit (mark >= 3x entry)
    #[serde(default = "default_stop_loss_multiple")]
    pub stop_loss_multiple: Decimal,
    /// Take profit at this multiple of entry credit (mark <= 0.5x entry)
    #[serde(default = "default_take_profit_multiple")]
    pub take_profit_multiple: Decimal,
    /// Flag any position at or below this many days to expiration
    #[serde(default = "default_max_dte_hold")]
    pub max_dte_hold: i64,
    /// Roll trigger: in-the-money fraction of strike
    #[serde(default = "default_roll_itm_pct")]
    pub roll_itm_pct: Decimal,
    /// Roll trigger: DTE must be below this
    #[serde(default = "default_roll_dte_trigger")]
    pub roll_dte_trigger: i64,
    /// Quote age beyond this (minutes, during market hours) is stale
    #[serde(default = "default_data_stale_minutes")]
    pub data_stale_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchmanConfig {
    /// Cycle cadence during market hours, in seconds
    #[serde(default = "default_market_interval")]
    pub market_interval_secs: u64,
    /// Cycle cadence outside market hours (still a trading day), in seconds
    #[serde(default = "default_off_hours_interval")]
    pub off_hours_interval_secs: u64,
    /// Heartbeat emission cadence, in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Abort a cycle that runs longer than this, in seconds
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum provider calls per window
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Give up waiting for a slot after this many seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Webhook for risk alerts; empty disables outbound delivery
    #[serde(default)]
    pub alert_webhook_url: String,
    /// Webhook for the periodic heartbeat; empty disables outbound delivery
    #[serde(default)]
    pub heartbeat_webhook_url: String,
    /// Delivery attempts before the alert is recorded as sent anyway
    #[serde(default = "default_delivery_attempts")]
    pub delivery_attempts: u32,
    /// Timeout per delivery attempt, in seconds
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Use the external synthesizer; false renders the deterministic stub
    #[serde(default)]
    pub enabled: bool,
    /// Abandon synthesis after this many seconds and fall back to the stub
    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Tickers scanned by batch analysis; empty uses the built-in liquid set
    #[serde(default)]
    pub tickers: Vec<String>,
    /// Cap on tickers per batch run
    #[serde(default = "default_max_batch_tickers")]
    pub max_batch_tickers: usize,
}

// Default value functions

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> String {
    "data/sentinel.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_iv_natr_min_ratio() -> Decimal {
    Decimal::ONE
}

fn default_rsi_overbought() -> Decimal {
    Decimal::new(70, 0)
}

fn default_rsi_oversold() -> Decimal {
    Decimal::new(30, 0)
}

fn default_rsi_entry() -> Decimal {
    Decimal::new(40, 0)
}

fn default_min_annual_yield() -> Decimal {
    Decimal::new(20, 2) // 0.20 = 20% annualized
}

fn default_dte_min() -> i64 {
    30
}

fn default_dte_max() -> i64 {
    45
}

fn default_max_spread_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10 = 10% of bid
}

fn default_delta_low() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

fn default_delta_high() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_max_skew() -> Decimal {
    Decimal::new(10, 0) // 10 IV points
}

fn default_min_adv() -> Decimal {
    Decimal::new(5_000_000, 0)
}

fn default_macro_lookahead() -> i64 {
    48
}

fn default_max_sector_allocation() -> Decimal {
    Decimal::new(70, 2) // 0.70
}

fn default_max_positions_per_sector() -> usize {
    2
}

fn default_stop_loss_multiple() -> Decimal {
    Decimal::new(3, 0)
}

fn default_take_profit_multiple() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_max_dte_hold() -> i64 {
    21
}

fn default_roll_itm_pct() -> Decimal {
    Decimal::new(3, 2) // 0.03 = 3% through the strike
}

fn default_roll_dte_trigger() -> i64 {
    14
}

fn default_data_stale_minutes() -> i64 {
    60
}

fn default_market_interval() -> u64 {
    15 * 60
}

fn default_off_hours_interval() -> u64 {
    3600
}

fn default_heartbeat_interval() -> u64 {
    4 * 3600
}

fn default_cycle_timeout() -> u64 {
    120
}

fn default_max_calls() -> usize {
    5
}

fn default_window_ms() -> u64 {
    2000
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_delivery_attempts() -> u32 {
    2
}

fn default_dispatch_timeout() -> u64 {
    5
}

fn default_synthesis_timeout() -> u64 {
    10
}

fn default_max_batch_tickers() -> usize {
    20
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("SENTINEL"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.thresholds.dte_min > 0 && self.thresholds.dte_min < self.thresholds.dte_max,
            "dte window must satisfy 0 < dte_min < dte_max"
        );

        anyhow::ensure!(
            self.thresholds.delta_target_low > Decimal::ZERO
                && self.thresholds.delta_target_low < self.thresholds.delta_target_high
                && self.thresholds.delta_target_high < Decimal::ONE,
            "delta band must satisfy 0 < low < high < 1"
        );

        anyhow::ensure!(
            self.thresholds.max_sector_allocation > Decimal::ZERO
                && self.thresholds.max_sector_allocation <= Decimal::ONE,
            "max_sector_allocation must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.stop_loss_multiple > Decimal::ONE,
            "stop_loss_multiple must exceed 1x entry credit"
        );

        anyhow::ensure!(
            self.risk.take_profit_multiple > Decimal::ZERO
                && self.risk.take_profit_multiple < Decimal::ONE,
            "take_profit_multiple must be between 0 and 1"
        );

        anyhow::ensure!(
            self.rate_limit.max_calls > 0 && self.rate_limit.window_ms > 0,
            "rate limiter needs a positive call budget and window"
        );

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mock_mode: true,
            polygon_api_key: String::new(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            iv_natr_min_ratio: default_iv_natr_min_ratio(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
            rsi_entry_threshold: default_rsi_entry(),
            min_annual_yield: default_min_annual_yield(),
            dte_min: default_dte_min(),
            dte_max: default_dte_max(),
            max_spread_pct: default_max_spread_pct(),
            delta_target_low: default_delta_low(),
            delta_target_high: default_delta_high(),
            max_skew_points: default_max_skew(),
            min_adv: default_min_adv(),
            macro_lookahead_hours: default_macro_lookahead(),
            max_sector_allocation: default_max_sector_allocation(),
            max_positions_per_sector: default_max_positions_per_sector(),
        }
    }
}

impl Default for RiskRuleConfig {
    fn default() -> Self {
        Self {
            stop_loss_multiple: default_stop_loss_multiple(),
            take_profit_multiple: default_take_profit_multiple(),
            max_dte_hold: default_max_dte_hold(),
            roll_itm_pct: default_roll_itm_pct(),
            roll_dte_trigger: default_roll_dte_trigger(),
            data_stale_minutes: default_data_stale_minutes(),
        }
    }
}

impl Default for WatchmanConfig {
    fn default() -> Self {
        Self {
            market_interval_secs: default_market_interval(),
            off_hours_interval_secs: default_off_hours_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            cycle_timeout_secs: default_cycle_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_ms: default_window_ms(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_webhook_url: String::new(),
            heartbeat_webhook_url: String::new(),
            delivery_attempts: default_delivery_attempts(),
            dispatch_timeout_secs: default_dispatch_timeout(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_synthesis_timeout(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            max_batch_tickers: default_max_batch_tickers(),
        }
    }
}

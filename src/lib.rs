//! # Premium Sentinel
//!
//! A semi-autonomous advisory engine for premium-selling option setups.
//! It scans tickers for short-put/short-call candidates under deterministic
//! quantitative rules, queues recommendations for human approval, and
//! monitors every approved position against risk thresholds on a
//! supervised schedule.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `quant`: Pure deterministic options math (expected move, IV/NATR, indicators)
//! - `provider`: Market-data and macro-calendar capability interfaces (mock + vendor)
//! - `analysis`: Single-ticker pipeline, option selection, strategy gates, batch runner
//! - `rate_limit`: Shared sliding-window limiter for outbound provider calls
//! - `store`: SQLite-backed recommendation ledger, position store, alert log
//! - `watchman`: Supervised monitoring scheduler and risk rule evaluator
//! - `alert`: Idempotent alert dispatch and heartbeat emission
//! - `synthesis`: Narrative thesis generation behind a bounded-timeout capability
//! - `api`: HTTP surface for the dashboard and approval queue
//! - `utils`: Shared decimal arithmetic helpers

pub mod alert;
pub mod analysis;
pub mod api;
pub mod config;
pub mod provider;
pub mod quant;
pub mod rate_limit;
pub mod store;
pub mod synthesis;
pub mod utils;
pub mod watchman;

pub use config::Config;

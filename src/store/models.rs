//! Domain types shared by the store, the pipeline, and the HTTP API.
//!
//! Monetary and Greek values serialize as exact decimal strings, never
//! binary floats.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(Strategy, "strategy", {
    ShortPut => "SHORT_PUT",
    ShortCall => "SHORT_CALL",
});

string_enum!(RecommendationStatus, "recommendation status", {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

string_enum!(PositionStatus, "position status", {
    Open => "OPEN",
    Closed => "CLOSED",
});

string_enum!(LifecycleStage, "lifecycle stage", {
    PendingEntry => "PENDING_ENTRY",
    Monitoring => "MONITORING",
    ClosingUrgent => "CLOSING_URGENT",
    Closed => "CLOSED",
});

string_enum!(TriggerType, "trigger type", {
    DteLimit => "DTE_LIMIT",
    StrikeTouch => "STRIKE_TOUCH",
    StopLoss => "STOP_LOSS",
    TakeProfit => "TAKE_PROFIT",
    RollNeeded => "ROLL_NEEDED",
    CriticalDataStale => "CRITICAL_DATA_STALE",
});

string_enum!(FreshnessStatus, "freshness status", {
    Ok => "OK",
    Stale => "STALE",
});

/// An audited output of the analysis pipeline, queued for human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub id: Uuid,
    pub ticker: String,
    pub strategy: Strategy,
    /// OCC contract symbol
    pub contract: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub strike: Decimal,
    pub expiry: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub delta: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub credit_est: Decimal,
    pub status: RecommendationStatus,
    pub thesis: Option<String>,
    /// Full analysis snapshot at recommendation time
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Immutable facts of the fill, captured at approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryData {
    pub strategy: Strategy,
    pub contract: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub short_strike: Decimal,
    pub expiry_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    pub contracts: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub capital_deployed: Decimal,
    pub sector: String,
}

/// Exit thresholds derived from entry price at approval time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRules {
    #[serde(with = "rust_decimal::serde::str")]
    pub stop_loss_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub take_profit_price: Decimal,
    pub max_dte_hold: i64,
    pub force_close_date: NaiveDate,
}

/// Last watchman observation of the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub mark_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub underlying_price: Decimal,
    pub data_freshness_status: FreshnessStatus,
}

/// Roll ancestry. An opening trade is self-rooted with roll_count 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lineage {
    pub parent_position_id: Option<Uuid>,
    pub root_position_id: Uuid,
    pub roll_count: u32,
    /// P&L banked on the leg closed by the roll that opened this position
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub realized_pnl_pre_roll: Option<Decimal>,
}

/// A live short-premium position under watchman supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePosition {
    pub id: Uuid,
    pub ticker: String,
    pub status: PositionStatus,
    pub lifecycle_stage: LifecycleStage,
    pub entry_data: EntryData,
    pub risk_rules: RiskRules,
    pub last_heartbeat: Option<HeartbeatRecord>,
    pub lineage: Lineage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivePosition {
    /// Days to expiration as of `today`.
    pub fn dte(&self, today: NaiveDate) -> i64 {
        (self.entry_data.expiry_date - today).num_days()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLogEntry {
    pub id: Uuid,
    pub position_id: Uuid,
    pub trigger_type: TriggerType,
    pub triggered_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

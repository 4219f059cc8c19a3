//! Per-position risk rule evaluation. Pure: quote in, triggers out.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::RiskRuleConfig;
use crate::provider::PositionQuote;
use crate::store::models::{
    ActivePosition, FreshnessStatus, LifecycleStage, Strategy, TriggerType,
};
use crate::utils::decimal::safe_div;

use super::market_hours;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRaised {
    pub trigger: TriggerType,
    pub detail: String,
}

/// Verdict of one evaluation pass over one position.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub triggers: Vec<TriggerRaised>,
    pub stage: LifecycleStage,
    pub freshness: FreshnessStatus,
}

/// Run every risk rule against the freshest quote. Rules are independent:
/// several can raise in the same pass. The stage only ever escalates.
pub fn evaluate(
    position: &ActivePosition,
    quote: &PositionQuote,
    risk: &RiskRuleConfig,
    now: DateTime<Utc>,
) -> Evaluation {
    let mut triggers = Vec::new();
    let mut stage = position.lifecycle_stage;
    let entry = &position.entry_data;
    let strike = entry.short_strike;

    let quote_age_minutes = (now - quote.as_of).num_minutes();
    let stale = market_hours::is_market_hours(now) && quote_age_minutes > risk.data_stale_minutes;
    let freshness = if stale {
        triggers.push(TriggerRaised {
            trigger: TriggerType::CriticalDataStale,
            detail: format!(
                "quote is {quote_age_minutes} minutes old, threshold {} minutes",
                risk.data_stale_minutes
            ),
        });
        FreshnessStatus::Stale
    } else {
        FreshnessStatus::Ok
    };

    let touched = match entry.strategy {
        Strategy::ShortPut => quote.underlying_price <= strike,
        Strategy::ShortCall => quote.underlying_price >= strike,
    };
    if touched {
        triggers.push(TriggerRaised {
            trigger: TriggerType::StrikeTouch,
            detail: format!(
                "underlying {} crossed short strike {strike}",
                quote.underlying_price
            ),
        });
        stage = LifecycleStage::ClosingUrgent;
    }

    let dte = position.dte(now.date_naive());
    if dte <= position.risk_rules.max_dte_hold {
        triggers.push(TriggerRaised {
            trigger: TriggerType::DteLimit,
            detail: format!(
                "{dte} DTE at or below limit {}",
                position.risk_rules.max_dte_hold
            ),
        });
        stage = LifecycleStage::ClosingUrgent;
    }

    if quote.option_mark >= position.risk_rules.stop_loss_price {
        triggers.push(TriggerRaised {
            trigger: TriggerType::StopLoss,
            detail: format!(
                "mark {} at or above stop {}",
                quote.option_mark, position.risk_rules.stop_loss_price
            ),
        });
        stage = LifecycleStage::ClosingUrgent;
    }

    if quote.option_mark <= position.risk_rules.take_profit_price {
        triggers.push(TriggerRaised {
            trigger: TriggerType::TakeProfit,
            detail: format!(
                "mark {} at or below target {}",
                quote.option_mark, position.risk_rules.take_profit_price
            ),
        });
    }

    // income shield: how far through the strike the underlying sits,
    // measured on the losing side of this position
    let itm_fraction = match entry.strategy {
        Strategy::ShortPut => safe_div(strike - quote.underlying_price, strike),
        Strategy::ShortCall => safe_div(quote.underlying_price - strike, strike),
    };
    if itm_fraction >= risk.roll_itm_pct && dte < risk.roll_dte_trigger {
        triggers.push(TriggerRaised {
            trigger: TriggerType::RollNeeded,
            detail: format!(
                "{} in the money with {dte} DTE",
                percent_label(itm_fraction)
            ),
        });
    }

    Evaluation {
        triggers,
        stage,
        freshness,
    }
}

fn percent_label(fraction: Decimal) -> String {
    format!("{}%", crate::utils::decimal::round_half_up(fraction * Decimal::new(100, 0), 2))
}

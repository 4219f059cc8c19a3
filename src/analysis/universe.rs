//! Scan universe, sector mapping, and portfolio concentration gates.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::store::models::ActivePosition;
use crate::utils::decimal::safe_div;

/// Liquid large caps used when no universe is configured.
pub const DEFAULT_UNIVERSE: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "GOOGL", "AMZN", "META", "SPY", "TSLA", "JPM", "V",
];

/// Static GICS-style sector lookup for the default universe. Anything
/// unmapped lands in "Unknown", which still counts against the caps.
pub fn sector_of(ticker: &str) -> &'static str {
    match ticker {
        "AAPL" | "MSFT" | "NVDA" => "Technology",
        "GOOGL" | "META" => "Communication Services",
        "AMZN" | "TSLA" => "Consumer Discretionary",
        "JPM" | "V" => "Financials",
        "SPY" => "Index",
        _ => "Unknown",
    }
}

/// Hard earnings exclusion: no trade if a known earnings date falls
/// within [today, expiry].
pub fn earnings_blocks_trade(
    earnings_date: Option<NaiveDate>,
    expiry: NaiveDate,
    today: NaiveDate,
) -> bool {
    match earnings_date {
        None => false,
        Some(date) => date >= today && date <= expiry,
    }
}

/// Sector exposure cap: reject a new entry once the sector already holds
/// `max_allocation` or more of total deployed capital.
pub fn sector_exposure_allowed(
    open_positions: &[ActivePosition],
    sector: &str,
    max_allocation: Decimal,
) -> bool {
    let mut total = Decimal::ZERO;
    let mut in_sector = Decimal::ZERO;
    for pos in open_positions {
        total += pos.entry_data.capital_deployed;
        if pos.entry_data.sector == sector {
            in_sector += pos.entry_data.capital_deployed;
        }
    }
    if total <= Decimal::ZERO {
        return true;
    }
    safe_div(in_sector, total) < max_allocation
}

/// Sector correlation cap: at most `max_per_sector` open positions per
/// sector.
pub fn sector_count_allowed(
    open_positions: &[ActivePosition],
    sector: &str,
    max_per_sector: usize,
) -> bool {
    let count = open_positions
        .iter()
        .filter(|p| p.entry_data.sector == sector)
        .count();
    count < max_per_sector
}

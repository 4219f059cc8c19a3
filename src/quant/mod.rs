//! Deterministic quantitative rules for premium-selling entries.
//!
//! Every function here is pure: the same inputs always give the same
//! output, with no I/O and no hidden state. Thresholds are passed in
//! from [`crate::config::ThresholdConfig`] rather than baked in.

pub mod indicators;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::utils::decimal::{round_half_up, safe_div, sqrt};

/// Trading days per year, used to annualize realized volatility.
const TRADING_DAYS: Decimal = dec!(252);

/// Calendar days per year, used for expected-move and yield scaling.
const CALENDAR_DAYS: Decimal = dec!(365);

/// Price trend classification against the 50 and 200 day averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// Momentum regime from the 14-period RSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RsiRegime {
    Overbought,
    Oversold,
    Neutral,
}

/// Normalized ATR as a percentage of price.
///
/// Returns zero when price is zero rather than propagating a division error.
pub fn natr_pct(atr: Decimal, price: Decimal) -> Decimal {
    safe_div(atr, price) * dec!(100)
}

/// Volatility efficiency ratio: implied volatility (as a fraction, e.g.
/// 0.30) against annualized realized volatility proxied by NATR.
///
/// A ratio above 1.0 means the options market prices more movement than
/// the stock has recently delivered, which is the edge a premium seller
/// is paid for.
pub fn iv_natr_ratio(iv: Decimal, natr_pct: Decimal) -> Decimal {
    let iv_points = iv * dec!(100);
    let annualized_natr = natr_pct * sqrt(TRADING_DAYS);
    safe_div(iv_points, annualized_natr)
}

/// One-standard-deviation expected move in dollars over `dte` calendar days.
///
/// `price * iv * sqrt(dte / 365)`, quantized to four decimal places.
pub fn expected_move(price: Decimal, iv: Decimal, dte: i64) -> Decimal {
    if dte <= 0 {
        return Decimal::ZERO;
    }
    let time_fraction = safe_div(Decimal::from(dte), CALENDAR_DAYS);
    round_half_up(price * iv * sqrt(time_fraction), 4)
}

/// Classify the price trend against its moving averages.
///
/// Bullish only when price clears both the 50 and the 200; bearish the
/// moment price loses the 50; anything else (or missing averages) is
/// neutral.
pub fn classify_trend(
    price: Decimal,
    sma_50: Option<Decimal>,
    sma_200: Option<Decimal>,
) -> TrendDirection {
    if let (Some(sma_50), Some(sma_200)) = (sma_50, sma_200) {
        if price > sma_200 && price > sma_50 {
            return TrendDirection::Bullish;
        }
        if price < sma_50 {
            return TrendDirection::Bearish;
        }
    }
    TrendDirection::Neutral
}

/// Classify the RSI momentum regime against configured bounds.
pub fn classify_rsi(rsi: Decimal, overbought: Decimal, oversold: Decimal) -> RsiRegime {
    if rsi > overbought {
        RsiRegime::Overbought
    } else if rsi < oversold {
        RsiRegime::Oversold
    } else {
        RsiRegime::Neutral
    }
}

/// Annualized yield of a credit against the capital at risk (the strike).
///
/// `(credit / strike) * (365 / dte)`, as a fraction (0.20 = 20%).
pub fn annualized_yield(credit: Decimal, strike: Decimal, dte: i64) -> Decimal {
    if dte <= 0 {
        return Decimal::ZERO;
    }
    safe_div(credit, strike) * safe_div(CALENDAR_DAYS, Decimal::from(dte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iv_natr_ratio_below_one_when_stock_moves_more_than_implied() {
        // IV 30 points vs 2% NATR annualized to ~31.75 points
        let ratio = iv_natr_ratio(dec!(0.30), dec!(2.0));
        assert!(ratio > dec!(0.94) && ratio < dec!(0.95), "got {ratio}");
        assert!(ratio < Decimal::ONE);
    }

    #[test]
    fn test_iv_natr_ratio_zero_natr_is_zero_not_panic() {
        assert_eq!(iv_natr_ratio(dec!(0.30), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_expected_move_matches_hand_calc() {
        // 175.50 * 0.22 * sqrt(35/365) ~= 11.956
        let em = expected_move(dec!(175.50), dec!(0.22), 35);
        assert_eq!(round_half_up(em, 2), dec!(11.96));
    }

    #[test]
    fn test_expected_move_zero_dte() {
        assert_eq!(expected_move(dec!(100), dec!(0.30), 0), Decimal::ZERO);
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(
            classify_trend(dec!(110), Some(dec!(105)), Some(dec!(100))),
            TrendDirection::Bullish
        );
        assert_eq!(
            classify_trend(dec!(90), Some(dec!(95)), Some(dec!(100))),
            TrendDirection::Bearish
        );
        // above the 50 but still under the 200
        assert_eq!(
            classify_trend(dec!(99), Some(dec!(98)), Some(dec!(100))),
            TrendDirection::Neutral
        );
        // missing averages never classify
        assert_eq!(
            classify_trend(dec!(110), None, Some(dec!(100))),
            TrendDirection::Neutral
        );
    }

    #[test]
    fn test_rsi_regimes_are_exclusive_bounds() {
        let ob = dec!(70);
        let os = dec!(30);
        assert_eq!(classify_rsi(dec!(70), ob, os), RsiRegime::Neutral);
        assert_eq!(classify_rsi(dec!(70.1), ob, os), RsiRegime::Overbought);
        assert_eq!(classify_rsi(dec!(30), ob, os), RsiRegime::Neutral);
        assert_eq!(classify_rsi(dec!(29.9), ob, os), RsiRegime::Oversold);
    }

    #[test]
    fn test_annualized_yield() {
        // 3.50 credit on a 160 strike over 35 days: ~22.8% annualized
        let y = annualized_yield(dec!(3.50), dec!(160), 35);
        assert!(y > dec!(0.22) && y < dec!(0.23), "got {y}");
    }
}

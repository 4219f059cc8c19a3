//! Strategy choice from technical state and the market regime.

use crate::provider::MarketSnapshot;
use crate::quant::{RsiRegime, TrendDirection};
use crate::store::models::Strategy;

/// SPY against its own 200-day SMA. Short puts are only allowed while
/// the index holds the average.
#[derive(Debug, Clone)]
pub struct MarketRegime {
    pub allows_short_put: bool,
    pub label: String,
}

pub fn market_regime(spy: &MarketSnapshot) -> MarketRegime {
    match spy.sma_200 {
        None => MarketRegime {
            allows_short_put: true,
            label: "UNKNOWN_SPY".to_string(),
        },
        Some(sma_200) if spy.price >= sma_200 => MarketRegime {
            allows_short_put: true,
            label: "BULLISH_SPY_OVER_200SMA".to_string(),
        },
        Some(_) => MarketRegime {
            allows_short_put: false,
            label: "BEARISH_SPY_BELOW_200SMA".to_string(),
        },
    }
}

/// Map (trend, RSI regime, regime) to a strategy, or a reason why no
/// setup exists. A blocked short put is reported, never downgraded to a
/// different strategy.
pub fn select_strategy(
    trend: TrendDirection,
    rsi: RsiRegime,
    regime: &MarketRegime,
) -> Result<Strategy, String> {
    match (trend, rsi) {
        (TrendDirection::Bearish, _) => Ok(Strategy::ShortCall),
        (TrendDirection::Bullish, RsiRegime::Overbought) => {
            Err("no setup: bullish trend but RSI overbought".to_string())
        }
        (TrendDirection::Bullish, _) if regime.allows_short_put => Ok(Strategy::ShortPut),
        (TrendDirection::Bullish, _) => Err(format!(
            "regime filter: {} blocks short puts",
            regime.label
        )),
        (TrendDirection::Neutral, RsiRegime::Oversold) if regime.allows_short_put => {
            Ok(Strategy::ShortPut)
        }
        (TrendDirection::Neutral, RsiRegime::Oversold) => Err(format!(
            "regime filter: {} blocks short puts",
            regime.label
        )),
        (TrendDirection::Neutral, _) => {
            Err("no setup: neutral trend without an oversold RSI".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn spy(price: rust_decimal::Decimal, sma_200: Option<rust_decimal::Decimal>) -> MarketSnapshot {
        MarketSnapshot {
            ticker: "SPY".to_string(),
            price,
            sma_50: None,
            sma_200,
            atr_14: dec!(5),
            rsi_14: dec!(50),
            iv_30d: dec!(0.18),
            average_daily_volume: None,
            earnings_date: None,
            as_of: Utc::now(),
        }
    }

    #[test]
    fn test_regime_blocks_below_200sma() {
        let regime = market_regime(&spy(dec!(430), Some(dec!(450))));
        assert!(!regime.allows_short_put);
        assert_eq!(regime.label, "BEARISH_SPY_BELOW_200SMA");
    }

    #[test]
    fn test_regime_permissive_when_sma_unknown() {
        let regime = market_regime(&spy(dec!(430), None));
        assert!(regime.allows_short_put);
    }

    #[test]
    fn test_bullish_trend_yields_short_put_under_good_regime() {
        let regime = market_regime(&spy(dec!(470), Some(dec!(450))));
        let strategy =
            select_strategy(TrendDirection::Bullish, RsiRegime::Neutral, &regime).unwrap();
        assert_eq!(strategy, Strategy::ShortPut);
    }

    #[test]
    fn test_blocked_regime_is_reported_not_downgraded() {
        let regime = market_regime(&spy(dec!(430), Some(dec!(450))));
        let err =
            select_strategy(TrendDirection::Bullish, RsiRegime::Neutral, &regime).unwrap_err();
        assert!(err.contains("regime filter"), "got: {err}");
    }

    #[test]
    fn test_bearish_trend_maps_to_short_call() {
        let regime = market_regime(&spy(dec!(430), Some(dec!(450))));
        let strategy =
            select_strategy(TrendDirection::Bearish, RsiRegime::Overbought, &regime).unwrap();
        assert_eq!(strategy, Strategy::ShortCall);
    }

    #[test]
    fn test_neutral_needs_oversold_rsi() {
        let regime = market_regime(&spy(dec!(470), Some(dec!(450))));
        assert!(select_strategy(TrendDirection::Neutral, RsiRegime::Neutral, &regime).is_err());
        assert_eq!(
            select_strategy(TrendDirection::Neutral, RsiRegime::Oversold, &regime).unwrap(),
            Strategy::ShortPut
        );
    }
}

//! Technical indicators computed from daily bars.
//!
//! All functions return `None` when the series is too short for the
//! requested period instead of extrapolating from partial data.

use rust_decimal::Decimal;

use crate::utils::decimal::safe_div;

/// One daily OHLC bar, oldest-first in every series passed here.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Simple moving average of the last `period` closes.
pub fn sma(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let sum: Decimal = closes[closes.len() - period..].iter().sum();
    Some(sum / Decimal::from(period as u64))
}

/// Wilder-smoothed RSI over `period` bars.
///
/// Seeds with the simple average of the first `period` gains and losses,
/// then applies Wilder smoothing across the remainder of the series.
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;
    for w in closes[..period + 1].windows(2) {
        let change = w[1] - w[0];
        if change > Decimal::ZERO {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    let p = Decimal::from(period as u64);
    avg_gain /= p;
    avg_loss /= p;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > Decimal::ZERO {
            (change, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -change)
        };
        avg_gain = (avg_gain * (p - Decimal::ONE) + gain) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + loss) / p;
    }

    if avg_loss.is_zero() {
        return Some(Decimal::new(100, 0));
    }
    let rs = avg_gain / avg_loss;
    Some(Decimal::new(100, 0) - Decimal::new(100, 0) / (Decimal::ONE + rs))
}

/// Wilder-smoothed average true range over `period` bars.
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let c = &w[1];
            let hl = c.high - c.low;
            let hc = (c.high - prev_close).abs();
            let lc = (c.low - prev_close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    let p = Decimal::from(period as u64);
    let mut value: Decimal = true_ranges[..period].iter().sum::<Decimal>() / p;
    for tr in &true_ranges[period..] {
        value = (value * (p - Decimal::ONE) + *tr) / p;
    }
    Some(value)
}

/// Average daily share volume over the last `period` bars.
pub fn average_daily_volume(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let sum: Decimal = candles[candles.len() - period..]
        .iter()
        .map(|c| c.volume)
        .sum();
    Some(safe_div(sum, Decimal::from(period as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn flat_candles(n: usize, close: Decimal) -> Vec<Candle> {
        (0..n)
            .map(|_| Candle {
                high: close + dec!(1),
                low: close - dec!(1),
                close,
                volume: dec!(1000000),
            })
            .collect()
    }

    #[test]
    fn test_sma_needs_full_period() {
        let closes = vec![dec!(10), dec!(20), dec!(30)];
        assert_eq!(sma(&closes, 4), None);
        assert_eq!(sma(&closes, 3), Some(dec!(20)));
        assert_eq!(sma(&closes, 2), Some(dec!(25)));
    }

    #[test]
    fn test_rsi_all_gains_saturates_at_100() {
        let closes: Vec<Decimal> = (1..=20).map(Decimal::from).collect();
        assert_eq!(rsi(&closes, 14), Some(dec!(100)));
    }

    #[test]
    fn test_rsi_flat_series_has_no_losses() {
        let closes = vec![dec!(50); 20];
        // zero gain and zero loss resolves to the no-loss branch
        assert_eq!(rsi(&closes, 14), Some(dec!(100)));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let closes = vec![dec!(50); 14];
        assert_eq!(rsi(&closes, 14), None);
    }

    #[test]
    fn test_atr_flat_range() {
        // every bar has a 2-point range and no gaps, so ATR is exactly 2
        let candles = flat_candles(20, dec!(100));
        assert_eq!(atr(&candles, 14), Some(dec!(2)));
    }

    #[test]
    fn test_average_daily_volume() {
        let candles = flat_candles(25, dec!(100));
        assert_eq!(average_daily_volume(&candles, 20), Some(dec!(1000000)));
    }
}

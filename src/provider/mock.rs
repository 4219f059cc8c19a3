//! Deterministic providers for development and tests. No network calls.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use super::{
    MacroCalendarProvider, MacroEvent, MarketDataProvider, MarketSnapshot, OptionChain,
    OptionContract, OptionSide, PositionQuote, ProviderError,
};

/// Fixed snapshot and chain values, the same for every ticker.
///
/// The 24% IV against a ~2.4% NATR intentionally fails the efficiency
/// gate, so a default dev run exercises the rejection path end to end.
pub struct MockMarketDataProvider;

impl MockMarketDataProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MockMarketDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    async fn get_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
        Ok(MarketSnapshot {
            ticker: ticker.to_uppercase(),
            price: dec!(175.50),
            sma_50: Some(dec!(172.00)),
            sma_200: Some(dec!(165.00)),
            atr_14: dec!(4.20),
            rsi_14: dec!(28.5),
            iv_30d: dec!(0.24),
            average_daily_volume: Some(dec!(50000000)),
            earnings_date: None,
            as_of: Utc::now(),
        })
    }

    async fn get_option_chain(&self, ticker: &str) -> Result<OptionChain, ProviderError> {
        let expiry = (Utc::now() + Duration::days(35)).date_naive();
        let put = |strike, delta, bid, ask, iv| OptionContract {
            side: OptionSide::Put,
            strike,
            expiry,
            delta,
            bid,
            ask,
            iv,
        };
        let call = |strike, delta, bid, ask, iv| OptionContract {
            side: OptionSide::Call,
            strike,
            expiry,
            delta,
            bid,
            ask,
            iv,
        };
        Ok(OptionChain {
            ticker: ticker.to_uppercase(),
            contracts: vec![
                put(dec!(160), dec!(-0.30), dec!(3.80), dec!(4.00), dec!(0.34)),
                put(dec!(155), dec!(-0.22), dec!(2.90), dec!(3.10), dec!(0.33)),
                put(dec!(150), dec!(-0.18), dec!(2.10), dec!(2.30), dec!(0.32)),
                call(dec!(190), dec!(0.30), dec!(3.20), dec!(3.40), dec!(0.27)),
                call(dec!(195), dec!(0.25), dec!(2.50), dec!(2.65), dec!(0.26)),
                call(dec!(200), dec!(0.20), dec!(1.90), dec!(2.05), dec!(0.25)),
            ],
        })
    }

    async fn get_position_quote(
        &self,
        _ticker: &str,
        _contract: &str,
    ) -> Result<PositionQuote, ProviderError> {
        Ok(PositionQuote {
            underlying_price: dec!(175.50),
            option_mark: dec!(3.40),
            as_of: Utc::now(),
        })
    }
}

/// Quiet calendar: no upcoming events, so the macro gate always passes.
#[derive(Default)]
pub struct MockMacroCalendarProvider;

#[async_trait]
impl MacroCalendarProvider for MockMacroCalendarProvider {
    async fn high_impact_events(
        &self,
        _within_hours: i64,
    ) -> Result<Vec<MacroEvent>, ProviderError> {
        Ok(Vec::new())
    }
}

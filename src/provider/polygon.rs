//! Polygon.io adapter.
//!
//! Daily aggregates drive the indicator stack (SMA, RSI, ATR, ADV); the
//! option chain snapshot supplies greeks and per-contract IV. The 30-day
//! IV figure is proxied by the at-the-money contract nearest 35 DTE.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::quant::indicators::{self, Candle};

use super::{
    MarketDataProvider, MarketSnapshot, OptionChain, OptionContract, OptionSide, PositionQuote,
    ProviderError,
};

const BASE_URL: &str = "https://api.polygon.io";

pub struct PolygonProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl PolygonProvider {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(http: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            base_url,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn daily_candles(&self, ticker: &str) -> Result<Vec<Candle>, ProviderError> {
        let to = Utc::now().date_naive();
        let from = to - Duration::days(365);
        let path = format!(
            "/v2/aggs/ticker/{}/range/1/day/{}/{}?adjusted=true&sort=asc&limit=300",
            ticker.to_uppercase(),
            from,
            to
        );
        let body: AggsResponse = self.get_json(&path).await?;
        let results = body.results.unwrap_or_default();
        if results.is_empty() {
            return Err(ProviderError::NoData {
                ticker: ticker.to_uppercase(),
                reason: "no daily aggregates returned".to_string(),
            });
        }

        let candles = results
            .iter()
            .filter_map(|bar| {
                Some(Candle {
                    high: Decimal::from_f64(bar.h)?,
                    low: Decimal::from_f64(bar.l)?,
                    close: Decimal::from_f64(bar.c)?,
                    volume: Decimal::from_f64(bar.v)?,
                })
            })
            .collect();
        Ok(candles)
    }

    /// ATM contract IV nearest 35 DTE, as the constant-maturity proxy.
    fn atm_iv(chain: &OptionChain, today: NaiveDate) -> Option<Decimal> {
        let target_dte = 35i64;
        chain
            .contracts
            .iter()
            .filter(|c| c.iv > Decimal::ZERO)
            .min_by_key(|c| {
                let dte_distance = ((c.expiry - today).num_days() - target_dte).abs();
                let delta_distance = (c.delta.abs() - Decimal::new(50, 2)).abs();
                // DTE dominates; delta breaks ties within an expiry
                (dte_distance, delta_distance)
            })
            .map(|c| c.iv)
    }
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    async fn get_snapshot(&self, ticker: &str) -> Result<MarketSnapshot, ProviderError> {
        let candles = self.daily_candles(ticker).await?;
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let price = *closes.last().ok_or_else(|| ProviderError::NoData {
            ticker: ticker.to_uppercase(),
            reason: "empty close series".to_string(),
        })?;

        let atr_14 = indicators::atr(&candles, 14).ok_or_else(|| ProviderError::NoData {
            ticker: ticker.to_uppercase(),
            reason: "insufficient history for ATR(14)".to_string(),
        })?;
        let rsi_14 = indicators::rsi(&closes, 14).ok_or_else(|| ProviderError::NoData {
            ticker: ticker.to_uppercase(),
            reason: "insufficient history for RSI(14)".to_string(),
        })?;

        let chain = self.get_option_chain(ticker).await?;
        let today = Utc::now().date_naive();
        let iv_30d = Self::atm_iv(&chain, today).ok_or_else(|| ProviderError::NoData {
            ticker: ticker.to_uppercase(),
            reason: "no implied volatility in chain snapshot".to_string(),
        })?;

        debug!(ticker = %ticker.to_uppercase(), %price, %rsi_14, %iv_30d, "built snapshot from aggregates");

        Ok(MarketSnapshot {
            ticker: ticker.to_uppercase(),
            price,
            sma_50: indicators::sma(&closes, 50),
            sma_200: indicators::sma(&closes, 200),
            atr_14,
            rsi_14,
            iv_30d,
            average_daily_volume: indicators::average_daily_volume(&candles, 20),
            // TODO: wire the Benzinga earnings endpoint once the entitlement is active
            earnings_date: None,
            as_of: Utc::now(),
        })
    }

    async fn get_option_chain(&self, ticker: &str) -> Result<OptionChain, ProviderError> {
        let path = format!(
            "/v3/snapshot/options/{}?limit=250",
            ticker.to_uppercase()
        );
        let body: ChainSnapshotResponse = self.get_json(&path).await?;

        let contracts = body
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                let details = entry.details?;
                let side = match details.contract_type.as_str() {
                    "put" => OptionSide::Put,
                    "call" => OptionSide::Call,
                    _ => return None,
                };
                let quote = entry.last_quote.unwrap_or_default();
                Some(OptionContract {
                    side,
                    strike: Decimal::from_f64(details.strike_price)?,
                    expiry: details.expiration_date,
                    delta: Decimal::from_f64(entry.greeks.as_ref()?.delta)?,
                    bid: Decimal::from_f64(quote.bid).unwrap_or(Decimal::ZERO),
                    ask: Decimal::from_f64(quote.ask).unwrap_or(Decimal::ZERO),
                    iv: Decimal::from_f64(entry.implied_volatility.unwrap_or(0.0))
                        .unwrap_or(Decimal::ZERO),
                })
            })
            .collect();

        Ok(OptionChain {
            ticker: ticker.to_uppercase(),
            contracts,
        })
    }

    async fn get_position_quote(
        &self,
        ticker: &str,
        contract: &str,
    ) -> Result<PositionQuote, ProviderError> {
        let path = format!(
            "/v3/snapshot/options/{}/O:{}",
            ticker.to_uppercase(),
            contract
        );
        let body: SingleContractResponse = self.get_json(&path).await?;
        let result = body.results.ok_or_else(|| ProviderError::NoData {
            ticker: ticker.to_uppercase(),
            reason: format!("no snapshot for contract {contract}"),
        })?;

        let quote = result.last_quote.unwrap_or_default();
        // conservative mark for a short position: cost to buy back at the ask
        let mark = if quote.ask > 0.0 {
            quote.ask
        } else {
            result.day.as_ref().map(|d| d.close).unwrap_or(0.0)
        };
        let underlying = result
            .underlying_asset
            .and_then(|u| u.price)
            .ok_or_else(|| ProviderError::NoData {
                ticker: ticker.to_uppercase(),
                reason: "snapshot missing underlying price".to_string(),
            })?;

        Ok(PositionQuote {
            underlying_price: Decimal::from_f64(underlying).unwrap_or(Decimal::ZERO),
            option_mark: Decimal::from_f64(mark).unwrap_or(Decimal::ZERO),
            as_of: Utc::now(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    results: Option<Vec<AggBar>>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct ChainSnapshotResponse {
    results: Option<Vec<ChainEntry>>,
}

#[derive(Debug, Deserialize)]
struct ChainEntry {
    details: Option<ContractDetails>,
    greeks: Option<Greeks>,
    implied_volatility: Option<f64>,
    last_quote: Option<LastQuote>,
}

#[derive(Debug, Deserialize)]
struct ContractDetails {
    contract_type: String,
    strike_price: f64,
    expiration_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct Greeks {
    delta: f64,
}

#[derive(Debug, Default, Deserialize)]
struct LastQuote {
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
}

#[derive(Debug, Deserialize)]
struct SingleContractResponse {
    results: Option<SingleContract>,
}

#[derive(Debug, Deserialize)]
struct SingleContract {
    last_quote: Option<LastQuote>,
    day: Option<DayBar>,
    underlying_asset: Option<UnderlyingAsset>,
}

#[derive(Debug, Deserialize)]
struct DayBar {
    close: f64,
}

#[derive(Debug, Deserialize)]
struct UnderlyingAsset {
    price: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_chain_parses_puts_and_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v3/snapshot/options/AAPL$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {
                        "details": {
                            "contract_type": "put",
                            "strike_price": 155.0,
                            "expiration_date": "2025-10-17"
                        },
                        "greeks": { "delta": -0.22 },
                        "implied_volatility": 0.33,
                        "last_quote": { "bid": 2.90, "ask": 3.10 }
                    },
                    {
                        "details": {
                            "contract_type": "call",
                            "strike_price": 195.0,
                            "expiration_date": "2025-10-17"
                        },
                        "greeks": { "delta": 0.25 },
                        "implied_volatility": 0.26,
                        "last_quote": { "bid": 2.50, "ask": 2.65 }
                    }
                ]
            })))
            .mount(&server)
            .await;

        let provider = PolygonProvider::with_base_url(
            reqwest::Client::new(),
            "test-key".to_string(),
            server.uri(),
        );
        let chain = provider.get_option_chain("AAPL").await.unwrap();
        assert_eq!(chain.contracts.len(), 2);
        assert_eq!(chain.contracts[0].side, OptionSide::Put);
        assert_eq!(chain.contracts[0].strike, dec!(155));
        assert_eq!(chain.contracts[1].iv, dec!(0.26));
    }

    #[tokio::test]
    async fn test_api_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = PolygonProvider::with_base_url(
            reqwest::Client::new(),
            "test-key".to_string(),
            server.uri(),
        );
        let err = provider.get_option_chain("AAPL").await.unwrap_err();
        match err {
            ProviderError::Api { status, .. } => assert_eq!(status, 429),
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}

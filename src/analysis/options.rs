//! Option chain filtering and strike selection.
//!
//! Pricing convention: credit estimates use the bid (a seller's realistic
//! fill), buy-to-close estimates use the ask. Mid prices are never used.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::ThresholdConfig;
use crate::provider::{OptionChain, OptionContract, OptionSide};
use crate::store::models::Strategy;

/// Chain survivor chosen for a recommendation.
#[derive(Debug, Clone)]
pub struct SelectedContract {
    pub contract: OptionContract,
    /// Conservative credit estimate: the bid
    pub credit_est: Decimal,
    pub dte: i64,
    /// 25-delta skew in IV points, when both wings were quoted
    pub skew_points: Option<Decimal>,
}

impl Strategy {
    fn option_side(&self) -> OptionSide {
        match self {
            Strategy::ShortPut => OptionSide::Put,
            Strategy::ShortCall => OptionSide::Call,
        }
    }
}

/// `(ask - bid) / bid`, the spread gate input. Unquoted bids fail.
fn spread_fraction(contract: &OptionContract) -> Option<Decimal> {
    if contract.bid <= Decimal::ZERO {
        return None;
    }
    Some((contract.ask - contract.bid) / contract.bid)
}

/// 25-delta skew = IV(put, 25d) - IV(call, 25d) for one expiry, in IV
/// points. None when either wing has no quoted candidate.
pub fn skew_25_delta(chain: &OptionChain, expiry: NaiveDate) -> Option<Decimal> {
    let target = dec!(0.25);
    let nearest = |side: OptionSide| -> Option<&OptionContract> {
        chain
            .contracts
            .iter()
            .filter(|c| c.side == side && c.expiry == expiry && c.iv > Decimal::ZERO)
            .min_by_key(|c| (c.delta.abs() - target).abs())
    };
    let put = nearest(OptionSide::Put)?;
    let call = nearest(OptionSide::Call)?;
    Some((put.iv - call.iv) * dec!(100))
}

/// Apply the [dte_min, dte_max] window, the spread gate, the delta band,
/// and the skew gate; pick the survivor with delta nearest the band
/// midpoint. Errors carry the first gate that emptied the field.
pub fn select_contract(
    chain: &OptionChain,
    strategy: Strategy,
    today: NaiveDate,
    thresholds: &ThresholdConfig,
) -> Result<SelectedContract, String> {
    let side = strategy.option_side();

    let in_window: Vec<&OptionContract> = chain
        .contracts
        .iter()
        .filter(|c| {
            let dte = (c.expiry - today).num_days();
            c.side == side && dte >= thresholds.dte_min && dte <= thresholds.dte_max
        })
        .collect();
    if in_window.is_empty() {
        return Err(format!(
            "no {} expirations within {}-{} DTE",
            side_word(side),
            thresholds.dte_min,
            thresholds.dte_max
        ));
    }

    let liquid: Vec<&OptionContract> = in_window
        .iter()
        .copied()
        .filter(|c| matches!(spread_fraction(c), Some(s) if s < thresholds.max_spread_pct))
        .collect();
    if liquid.is_empty() {
        return Err(format!(
            "no {} passed the spread gate ((ask-bid)/bid < {})",
            side_word(side),
            thresholds.max_spread_pct
        ));
    }

    let low = thresholds.delta_target_low;
    let high = thresholds.delta_target_high;
    let midpoint = (low + high) / dec!(2);
    let selected = liquid
        .iter()
        .copied()
        .filter(|c| {
            let d = c.delta.abs();
            d >= low && d <= high
        })
        .min_by_key(|c| (c.delta.abs() - midpoint).abs())
        .ok_or_else(|| {
            format!(
                "no {} with |delta| in [{low}, {high}]",
                side_word(side)
            )
        })?;

    let skew_points = skew_25_delta(chain, selected.expiry);
    if strategy == Strategy::ShortPut {
        if let Some(skew) = skew_points {
            if skew.abs() > thresholds.max_skew_points {
                return Err(format!(
                    "25-delta skew {skew} IV points exceeds limit {}",
                    thresholds.max_skew_points
                ));
            }
        }
    }

    Ok(SelectedContract {
        credit_est: selected.bid,
        dte: (selected.expiry - today).num_days(),
        skew_points,
        contract: selected.clone(),
    })
}

fn side_word(side: OptionSide) -> &'static str {
    match side {
        OptionSide::Put => "puts",
        OptionSide::Call => "calls",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn contract(
        side: OptionSide,
        strike: Decimal,
        dte: i64,
        delta: Decimal,
        bid: Decimal,
        ask: Decimal,
        iv: Decimal,
    ) -> OptionContract {
        OptionContract {
            side,
            strike,
            expiry: today() + Duration::days(dte),
            delta,
            bid,
            ask,
            iv,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn chain(contracts: Vec<OptionContract>) -> OptionChain {
        OptionChain {
            ticker: "AAPL".to_string(),
            contracts,
        }
    }

    #[test]
    fn test_selection_prefers_delta_nearest_band_midpoint() {
        let c = chain(vec![
            contract(OptionSide::Put, dec!(160), 35, dec!(-0.30), dec!(3.80), dec!(4.00), dec!(0.34)),
            contract(OptionSide::Put, dec!(155), 35, dec!(-0.22), dec!(2.90), dec!(3.10), dec!(0.33)),
            contract(OptionSide::Put, dec!(150), 35, dec!(-0.18), dec!(2.10), dec!(2.30), dec!(0.32)),
        ]);
        let selected =
            select_contract(&c, Strategy::ShortPut, today(), &ThresholdConfig::default()).unwrap();
        // |-0.22| is 0.03 from the 0.25 midpoint; |-0.30| is 0.05 away
        assert_eq!(selected.contract.strike, dec!(155));
        assert_eq!(selected.credit_est, dec!(2.90));
        assert_eq!(selected.dte, 35);
    }

    #[test]
    fn test_dte_window_excludes_near_and_far_expiries() {
        let c = chain(vec![
            contract(OptionSide::Put, dec!(155), 20, dec!(-0.25), dec!(2.00), dec!(2.10), dec!(0.30)),
            contract(OptionSide::Put, dec!(155), 60, dec!(-0.25), dec!(4.00), dec!(4.20), dec!(0.30)),
        ]);
        let err =
            select_contract(&c, Strategy::ShortPut, today(), &ThresholdConfig::default()).unwrap_err();
        assert!(err.contains("30-45 DTE"), "got: {err}");
    }

    #[test]
    fn test_wide_spread_fails_gate() {
        // (2.40 - 2.00) / 2.00 = 0.20, above the 10% ceiling
        let c = chain(vec![contract(
            OptionSide::Put,
            dec!(155),
            35,
            dec!(-0.25),
            dec!(2.00),
            dec!(2.40),
            dec!(0.30),
        )]);
        let err =
            select_contract(&c, Strategy::ShortPut, today(), &ThresholdConfig::default()).unwrap_err();
        assert!(err.contains("spread gate"), "got: {err}");
    }

    #[test]
    fn test_zero_bid_never_passes() {
        let c = chain(vec![contract(
            OptionSide::Put,
            dec!(120),
            35,
            dec!(-0.25),
            dec!(0),
            dec!(0.05),
            dec!(0.30),
        )]);
        assert!(
            select_contract(&c, Strategy::ShortPut, today(), &ThresholdConfig::default()).is_err()
        );
    }

    #[test]
    fn test_steep_skew_blocks_short_put() {
        let c = chain(vec![
            contract(OptionSide::Put, dec!(155), 35, dec!(-0.25), dec!(2.90), dec!(3.10), dec!(0.40)),
            contract(OptionSide::Call, dec!(195), 35, dec!(0.25), dec!(2.50), dec!(2.65), dec!(0.26)),
        ]);
        // skew = (0.40 - 0.26) * 100 = 14 points
        let err =
            select_contract(&c, Strategy::ShortPut, today(), &ThresholdConfig::default()).unwrap_err();
        assert!(err.contains("skew"), "got: {err}");
    }

    #[test]
    fn test_skew_indifferent_for_short_call() {
        let c = chain(vec![
            contract(OptionSide::Put, dec!(155), 35, dec!(-0.25), dec!(2.90), dec!(3.10), dec!(0.40)),
            contract(OptionSide::Call, dec!(195), 35, dec!(0.25), dec!(2.50), dec!(2.65), dec!(0.26)),
        ]);
        let selected =
            select_contract(&c, Strategy::ShortCall, today(), &ThresholdConfig::default()).unwrap();
        assert_eq!(selected.contract.strike, dec!(195));
        assert_eq!(selected.skew_points, Some(dec!(14)));
    }

    #[test]
    fn test_skew_none_when_one_wing_unquoted() {
        let c = chain(vec![contract(
            OptionSide::Put,
            dec!(155),
            35,
            dec!(-0.25),
            dec!(2.90),
            dec!(3.10),
            dec!(0.33),
        )]);
        let selected =
            select_contract(&c, Strategy::ShortPut, today(), &ThresholdConfig::default()).unwrap();
        assert_eq!(selected.skew_points, None);
    }
}

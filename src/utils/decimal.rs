//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};

/// Round half-up to a specific number of decimal places.
///
/// Matches the rounding convention used for quoted prices and ratios
/// everywhere in the engine.
pub fn round_half_up(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

/// Square root; returns zero for negative inputs rather than panicking.
pub fn sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    value.sqrt().unwrap_or(Decimal::ZERO)
}

/// Safe division that returns zero if the divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

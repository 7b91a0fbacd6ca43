//! Decimal amount handling: parsing operator-supplied text, rendering it in
//! fixed-point form, and scaling it into on-chain base units.

use alloy::primitives::U256;
use anyhow::{bail, Context, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Fraction digits kept when normalising an amount.
pub const MAX_FRACTION_DIGITS: u32 = 18;

/// Decimals used by the chain's native currency.
pub const NATIVE_DECIMALS: u8 = 18;

/// Parses a decimal amount, accepting exponential notation such as `1e3` or `2.5E-4`.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("amount is empty");
    }

    let parsed = if raw.contains(['e', 'E']) {
        Decimal::from_scientific(raw)
    } else {
        Decimal::from_str(raw)
    };

    parsed.with_context(|| format!("invalid amount {raw:?}"))
}

/// Renders an amount in plain fixed-point notation with at most
/// [`MAX_FRACTION_DIGITS`] fraction digits and no trailing zeros.
pub fn render_fixed_point(amount: Decimal) -> String {
    amount
        .round_dp_with_strategy(MAX_FRACTION_DIGITS, RoundingStrategy::ToZero)
        .normalize()
        .to_string()
}

/// Scales a fixed-point amount into integer base units for an asset with
/// `decimals` fraction digits. Digits beyond `decimals` are truncated.
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256> {
    let value = parse_amount(amount)?;
    if value.is_sign_negative() {
        bail!("amount {amount} is negative");
    }

    let truncated = value.round_dp_with_strategy(u32::from(decimals), RoundingStrategy::ToZero);
    let mantissa = u128::try_from(truncated.mantissa())
        .with_context(|| format!("amount {amount} cannot be represented"))?;
    let shift = u32::from(decimals) - truncated.scale();

    let scale = U256::from(10u8).pow(U256::from(shift));
    U256::from(mantissa)
        .checked_mul(scale)
        .with_context(|| format!("amount {amount} overflows 256 bits"))
}

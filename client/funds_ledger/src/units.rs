//! Amount normalization between human-entered decimals and token base units.
//!
//! A token with `decimals = d` represents `1.0` as `10^d` base units.  Both
//! directions work on strings so no precision is lost to floating point:
//!
//! * [`to_base_units`] scales a decimal string up; digits finer than one
//!   base unit are dropped (floor).
//! * [`from_base_units`] renders a base-unit integer as the exact decimal it
//!   stands for, so `from_base_units(to_base_units(a, d)?, d)` is `a`
//!   truncated to `d` fractional digits.
//! * [`whole_units`] is plain integer division, for compact balance display.

use alloy_primitives::U256;

use crate::errors::{LedgerError, Result};

/// `10^decimals`, or `None` if it does not fit in 256 bits (decimals > 77).
pub fn scale(decimals: u8) -> Option<U256> {
    U256::from(10u8).checked_pow(U256::from(decimals))
}

/// Convert a human-entered decimal amount into token base units.
pub fn to_base_units(amount: &str, decimals: u8) -> Result<U256> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(LedgerError::InvalidAmount("amount is empty".to_string()));
    }
    if amount.starts_with('-') {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must not be negative: {amount}"
        )));
    }
    if scale(decimals).is_none() {
        return Err(LedgerError::InvalidAmount(format!(
            "unsupported token precision: {decimals} decimals"
        )));
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty())
        || !all_digits(int_part)
        || !all_digits(frac_part)
    {
        return Err(LedgerError::InvalidAmount(format!(
            "not a decimal number: {amount}"
        )));
    }

    let decimals = decimals as usize;
    let kept = &frac_part[..frac_part.len().min(decimals)];
    let mut digits = String::with_capacity(int_part.len() + decimals);
    digits.push_str(int_part);
    digits.push_str(kept);
    digits.extend(std::iter::repeat('0').take(decimals - kept.len()));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10)
        .map_err(|_| LedgerError::InvalidAmount(format!("amount overflows 256 bits: {amount}")))
}

/// Render a base-unit integer as a decimal string with up to `decimals`
/// fractional digits, trailing zeros removed.
pub fn from_base_units(value: U256, decimals: u8) -> String {
    let raw = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return raw;
    }

    let padded = if raw.len() <= decimals {
        format!("{}{raw}", "0".repeat(decimals + 1 - raw.len()))
    } else {
        raw
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Integer division by `10^decimals`; the fractional remainder is discarded.
pub fn whole_units(value: U256, decimals: u8) -> U256 {
    match scale(decimals) {
        Some(s) => value / s,
        None => U256::ZERO,
    }
}

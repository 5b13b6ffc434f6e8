//! Conversion between decimal display amounts and integer base units
//!
//! Amounts travel as decimal strings and are converted with exact integer
//! arithmetic over `u128`. Sub-unit precision beyond the protocol's decimal places is
//! truncated, never rounded up.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{Error, Result};

fn invalid(value: &str, reason: impl Into<String>) -> Error {
    Error::InvalidAmount {
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Convert a non-negative decimal string into base units at `decimal_places`
pub fn to_base_units(amount: &str, decimal_places: u32) -> Result<u128> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(invalid(amount, "empty amount"));
    }
    if trimmed.starts_with('-') {
        return Err(invalid(amount, "amount must not be negative"));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(invalid(amount, "not a decimal number"));
    }

    let too_large = || invalid(amount, format!("too large for {} decimal places", decimal_places));
    let kept = &fraction[..fraction.len().min(decimal_places as usize)];
    let scale = 10u128.checked_pow(decimal_places).ok_or_else(too_large)?;
    let padding = 10u128
        .checked_pow(decimal_places - kept.len() as u32)
        .ok_or_else(too_large)?;

    let whole = digits_value(whole).ok_or_else(too_large)?;
    let fraction = digits_value(kept)
        .and_then(|v| v.checked_mul(padding))
        .ok_or_else(too_large)?;
    whole
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(too_large)
}

// Caller guarantees ASCII digits only; empty is zero
fn digits_value(digits: &str) -> Option<u128> {
    digits.bytes().try_fold(0u128, |acc, b| {
        acc.checked_mul(10)?.checked_add(u128::from(b - b'0'))
    })
}

/// Like [`to_base_units`] but rejects zero
pub fn parse_positive_amount(amount: &str, decimal_places: u32) -> Result<u128> {
    let value = to_base_units(amount, decimal_places)?;
    if value == 0 {
        return Err(invalid(amount, "amount must be greater than zero"));
    }
    Ok(value)
}

/// Render base units as a decimal string fixed to `decimal_places` digits
pub fn from_base_units(value: u128, decimal_places: u32) -> Result<String> {
    let digits = value.to_string();
    let places = decimal_places as usize;
    if places == 0 {
        return Ok(digits);
    }
    let padded = format!("{:0>width$}", digits, width = places + 1);
    let (whole, fraction) = padded.split_at(padded.len() - places);
    Ok(format!("{}.{}", whole, fraction))
}

/// Numeric equality of two decimal strings, ignoring trailing zeros
pub fn decimal_eq(a: &str, b: &str) -> bool {
    match (Decimal::from_str(a), Decimal::from_str(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_base_units() {
        assert_eq!(to_base_units("0.01", 8).unwrap(), 1_000_000);
        assert_eq!(to_base_units("0.1", 18).unwrap(), 100_000_000_000_000_000);
        assert_eq!(to_base_units("12", 7).unwrap(), 120_000_000);
        assert_eq!(to_base_units("1.5", 6).unwrap(), 1_500_000);
        assert_eq!(to_base_units("10.25", 2).unwrap(), 1025);
        assert_eq!(to_base_units(".5", 2).unwrap(), 50);
        assert_eq!(to_base_units("0", 8).unwrap(), 0);
    }

    #[test]
    fn test_truncates_extra_precision() {
        assert_eq!(to_base_units("1.123456789", 8).unwrap(), 112_345_678);
        assert_eq!(to_base_units("0.019", 2).unwrap(), 1);
        assert_eq!(to_base_units("0.0000000000000000000000000000001", 18).unwrap(), 0);
    }

    #[test]
    fn test_rejects_invalid_amounts() {
        for bad in ["", "  ", "-1", "abc", "1e5", "1.2.3", ".", "+3", "0x10"] {
            let err = to_base_units(bad, 8).unwrap_err();
            assert!(matches!(err, Error::InvalidAmount { .. }), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_parse_positive_amount_rejects_zero() {
        assert!(parse_positive_amount("0.000", 8).is_err());
        assert!(parse_positive_amount("0.000000001", 8).is_err());
        assert_eq!(parse_positive_amount("0.00000001", 8).unwrap(), 1);
    }

    #[test]
    fn test_from_base_units_is_fixed_width() {
        assert_eq!(from_base_units(1_000_000, 8).unwrap(), "0.01000000");
        assert_eq!(from_base_units(2_021_223, 8).unwrap(), "0.02021223");
        assert_eq!(from_base_units(1025, 2).unwrap(), "10.25");
        assert_eq!(from_base_units(0, 6).unwrap(), "0.000000");
    }

    #[test]
    fn test_amounts_beyond_decimal_precision() {
        assert_eq!(to_base_units("100000000000", 18).unwrap(), 10u128.pow(29));
        assert_eq!(
            to_base_units("123456789012345678.5", 18).unwrap(),
            123_456_789_012_345_678_500_000_000_000_000_000
        );
        assert_eq!(
            from_base_units(10u128.pow(29), 18).unwrap(),
            "100000000000.000000000000000000"
        );
        assert_eq!(from_base_units(u128::MAX, 0).unwrap(), u128::MAX.to_string());
    }

    #[test]
    fn test_rejects_values_beyond_u128() {
        let err = to_base_units("1000000000000000000000", 18).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount { ref reason, .. } if reason.contains("too large")));
        assert!(to_base_units("1", 39).is_err());
        assert_eq!(to_base_units("0", 38).unwrap(), 0);
    }

    #[test]
    fn test_round_trip() {
        let cases = [("0.01", 8), ("0.1", 18), ("123.4567", 7), ("5", 6), ("99.99", 2), ("0.000001", 6)];
        for (amount, places) in cases {
            let base = to_base_units(amount, places).unwrap();
            let back = from_base_units(base, places).unwrap();
            assert!(decimal_eq(&back, amount), "{} -> {} -> {}", amount, base, back);
        }
    }
}

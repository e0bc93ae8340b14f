//! Signed usage between consecutive readings of a feed.
//!
//! Readings arrive as `f64`. They are converted through their shortest
//! round-trip decimal form, so `0.3 - 0.1` is `0.2` and not
//! `0.19999999999999998`. That form is exact up to the decimal's 28
//! fractional digits; finer digits are rounded away.

use super::error::ProcessError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Convert a meter value to a decimal.
///
/// Magnitudes below `1e-28` round to zero. Values beyond the decimal's
/// ~7.9e28 range are rejected as malformed.
pub fn to_decimal(value: f64) -> Result<Decimal, ProcessError> {
    if !value.is_finite() {
        return Err(ProcessError::malformed(format!("value {value} is not finite")));
    }
    Decimal::from_str(&value.to_string())
        .or_else(|_| Decimal::from_scientific(&format!("{value:e}")))
        .map_err(|e| ProcessError::malformed(format!("value {value} is out of range: {e}")))
}

/// Convert a decimal sum back for output records.
///
/// Goes through the decimal string so the nearest `f64` is chosen.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_string().parse().unwrap_or(f64::NAN)
}

/// `current - last`, or zero when there is no previous value.
///
/// Negative deltas (meter resets, corrections) are returned as is.
pub fn compute_delta(last: Option<Decimal>, current: Decimal) -> Result<Decimal, ProcessError> {
    match last {
        None => Ok(Decimal::ZERO),
        Some(last) => current.checked_sub(last).ok_or_else(|| {
            ProcessError::malformed(format!("delta {current} - {last} overflows"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_conversion_scale_limit() {
        assert_eq!(to_decimal(1e-28).unwrap(), dec("0.0000000000000000000000000001"));
        assert_eq!(to_decimal(1e-30).unwrap(), Decimal::ZERO);
        assert!(to_decimal(1e30).is_err());
    }

    #[test]
    fn test_first_delta_is_zero() {
        assert_eq!(compute_delta(None, dec("10")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_delta_is_signed() {
        assert_eq!(compute_delta(Some(dec("15")), dec("20")).unwrap(), dec("5"));
        assert_eq!(compute_delta(Some(dec("20")), dec("3")).unwrap(), dec("-17"));
    }

    #[test]
    fn test_decimal_subtraction_is_exact() {
        let last = to_decimal(0.1).unwrap();
        let current = to_decimal(0.3).unwrap();
        assert_eq!(compute_delta(Some(last), current).unwrap(), dec("0.2"));
        assert_eq!(to_f64(dec("0.2")), 0.2);
    }

    #[test]
    fn test_to_decimal_rejects_unusable_values() {
        assert!(to_decimal(f64::INFINITY).is_err());
        assert!(to_decimal(f64::NAN).is_err());
        assert!(to_decimal(1e40).is_err());
        assert_eq!(to_decimal(1234.5).unwrap(), dec("1234.5"));
        assert_eq!(to_decimal(-2.0).unwrap(), dec("-2"));
    }
}

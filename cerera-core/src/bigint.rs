//! Arbitrary-precision non-negative integer helpers.
//!
//! `gasPrice`, `value`, and account `balance` are [`BigUint`] throughout the
//! core. This module centralizes the two wire encodings used for them:
//!
//! - length-prefixed big-endian magnitude, for the account binary codec
//!   (§4.3) and the persistent storage-slot layout (§6),
//! - decimal-string, for transaction/block JSON (§6).
//!
//! It also carries the `CER <-> BigUint` unit-scale conversion used by the
//! (out-of-scope) external RPC surface.

use num_bigint::BigUint;
use num_traits::Zero;

/// Smallest-unit scale of the user-facing `CER` display unit: `1 CER = 10^7` units.
pub const CER_SCALE: u64 = 10_000_000;

/// Encodes `value` as a big-endian magnitude (empty vec for zero).
pub fn encode_biguint_be(value: &BigUint) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_bytes_be()
    }
}

/// Decodes a big-endian magnitude into a [`BigUint`] (empty slice = zero).
pub fn decode_biguint_be(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Renders `value` as a plain decimal string (no `0x` prefix), for JSON wire use.
pub fn to_decimal_string(value: &BigUint) -> String {
    value.to_str_radix(10)
}

/// Parses a plain decimal string into a [`BigUint`].
pub fn from_decimal_string(s: &str) -> Result<BigUint, BigIntParseError> {
    s.parse::<BigUint>()
        .map_err(|_| BigIntParseError(s.to_string()))
}

#[derive(Debug)]
pub struct BigIntParseError(pub String);

impl std::fmt::Display for BigIntParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid decimal big integer: {}", self.0)
    }
}
impl std::error::Error for BigIntParseError {}

/// Converts a floating-point `CER` amount into smallest units.
///
/// Negative or non-finite input is clamped to zero: the external RPC
/// surface this supports is the only caller, and it never needs to express
/// negative balances.
pub fn cer_to_units(cer: f64) -> BigUint {
    if !cer.is_finite() || cer <= 0.0 {
        return BigUint::zero();
    }
    let units = (cer * CER_SCALE as f64).round();
    BigUint::from(units as u128)
}

/// Converts smallest units back into a floating-point `CER` amount.
pub fn units_to_cer(units: &BigUint) -> f64 {
    let units_f: f64 = units.to_string().parse().unwrap_or(f64::MAX);
    units_f / CER_SCALE as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_encodes_as_empty_bytes() {
        assert!(encode_biguint_be(&BigUint::zero()).is_empty());
        assert_eq!(decode_biguint_be(&[]), BigUint::zero());
    }

    #[test]
    fn roundtrips_nonzero_values() {
        let v = BigUint::from(123_456_789_u64);
        let encoded = encode_biguint_be(&v);
        assert_eq!(decode_biguint_be(&encoded), v);
    }

    #[test]
    fn decimal_string_roundtrip() {
        let v = BigUint::from(9_999_999_999_u64);
        let s = to_decimal_string(&v);
        assert_eq!(from_decimal_string(&s).unwrap(), v);
    }

    #[test]
    fn cer_conversion_roundtrips_approximately() {
        let units = cer_to_units(1.5);
        assert_eq!(units, BigUint::from(15_000_000_u64));
        let back = units_to_cer(&units);
        assert!((back - 1.5).abs() < 1e-9);
    }
}

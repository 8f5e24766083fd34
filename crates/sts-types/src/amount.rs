//! uint256 magnitudes with an out-of-band sign bit.
//!
//! Balances are true uint256 magnitudes with a separate sign, preserving
//! the full 256-bit range: a fixed 32-byte big-endian magnitude plus a
//! one-bit sign. [`SignedU256`] is used both for a single
//! [`HolderDelta`](crate)'s `raw_delta` (always paired with its own sign)
//! and for the denormalised running balance, which can go negative when a
//! token's minting pattern doesn't match the `from == 0` convention.

use alloy_primitives::U256;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// The direction of one [`HolderDelta`](crate): `+1` for a credit, `-1` for a debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Credit,
    Debit,
}

impl Sign {
    pub fn is_credit(self) -> bool {
        matches!(self, Sign::Credit)
    }
}

/// A signed 256-bit magnitude: `(magnitude, sign)` with the convention that
/// `magnitude == 0` is always positive (there is no signed zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedU256 {
    magnitude: U256,
    negative: bool,
}

impl SignedU256 {
    pub const ZERO: SignedU256 = SignedU256 {
        magnitude: U256::ZERO,
        negative: false,
    };

    pub fn from_magnitude_and_sign(magnitude: U256, sign: Sign) -> Self {
        if magnitude.is_zero() {
            Self::ZERO
        } else {
            Self {
                magnitude,
                negative: matches!(sign, Sign::Debit),
            }
        }
    }

    pub fn magnitude(&self) -> U256 {
        self.magnitude
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    /// The 33-byte storage representation: a sign byte (`0x00` non-negative,
    /// `0x01` negative) followed by the 32-byte big-endian magnitude.
    pub fn to_storage_bytes(self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = if self.negative { 1 } else { 0 };
        out[1..].copy_from_slice(&self.magnitude.to_be_bytes::<32>());
        out
    }

    pub fn from_storage_bytes(bytes: &[u8; 33]) -> Self {
        let magnitude = U256::from_be_slice(&bytes[1..]);
        if magnitude.is_zero() {
            Self::ZERO
        } else {
            Self {
                magnitude,
                negative: bytes[0] != 0,
            }
        }
    }

    /// Adds a single signed delta, accumulating across the full 256-bit range.
    /// Implemented on a widened two's-complement-free representation: since
    /// both operands carry an explicit sign, addition falls back to
    /// magnitude arithmetic with a borrow when signs differ.
    pub fn checked_add(self, other: SignedU256) -> Option<SignedU256> {
        if self.negative == other.negative {
            let magnitude = self.magnitude.checked_add(other.magnitude)?;
            return Some(Self {
                magnitude,
                negative: self.negative && !magnitude.is_zero(),
            });
        }
        let (larger, smaller, sign_of_larger) = match self.magnitude.cmp(&other.magnitude) {
            Ordering::Less => (other, self, other.negative),
            _ => (self, other, self.negative),
        };
        let magnitude = larger.magnitude - smaller.magnitude;
        Some(if magnitude.is_zero() {
            Self::ZERO
        } else {
            Self {
                magnitude,
                negative: sign_of_larger,
            }
        })
    }

    /// Rounds/truncates into a native `i128` for `ORDER BY`-style sorting,
    /// saturating at the edges rather than wrapping.
    pub fn to_sortable_i128(self) -> i128 {
        let capped: u128 = self.magnitude.try_into().unwrap_or(u128::MAX);
        let capped = capped.min(i128::MAX as u128);
        if self.negative {
            -(capped as i128)
        } else {
            capped as i128
        }
    }
}

impl Default for SignedU256 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Display for SignedU256 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

impl From<(U256, Sign)> for SignedU256 {
    fn from((magnitude, sign): (U256, Sign)) -> Self {
        Self::from_magnitude_and_sign(magnitude, sign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_then_debit_of_same_amount_nets_zero() {
        let credit = SignedU256::from_magnitude_and_sign(U256::from(300u64), Sign::Credit);
        let debit = SignedU256::from_magnitude_and_sign(U256::from(300u64), Sign::Debit);
        let sum = credit.checked_add(debit).unwrap();
        assert!(sum.is_zero());
        assert!(!sum.is_negative());
    }

    #[test]
    fn debit_larger_than_credit_goes_negative() {
        let credit = SignedU256::from_magnitude_and_sign(U256::from(50u64), Sign::Credit);
        let debit = SignedU256::from_magnitude_and_sign(U256::from(80u64), Sign::Debit);
        let sum = credit.checked_add(debit).unwrap();
        assert!(sum.is_negative());
        assert_eq!(sum.magnitude(), U256::from(30u64));
    }

    #[test]
    fn max_u256_round_trips_through_storage_bytes() {
        let max = SignedU256::from_magnitude_and_sign(U256::MAX, Sign::Credit);
        let bytes = max.to_storage_bytes();
        let back = SignedU256::from_storage_bytes(&bytes);
        assert_eq!(max, back);
    }

    #[test]
    fn negative_storage_round_trips() {
        let v = SignedU256::from_magnitude_and_sign(U256::from(42u64), Sign::Debit);
        let bytes = v.to_storage_bytes();
        let back = SignedU256::from_storage_bytes(&bytes);
        assert_eq!(v, back);
        assert!(back.is_negative());
    }
}

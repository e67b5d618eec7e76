//! Amount type in minor units
//!
//! OpenMandate amounts are unsigned minor units (cents for USD) with
//! checked arithmetic. Negative totals are unrepresentable by construction,
//! which is how the "total/amount non-negative" invariant is enforced.

use crate::{MandateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A monetary amount in minor units (e.g. cents)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    /// Create an amount from minor units
    pub fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Create a zero amount
    pub fn zero() -> Self {
        Self(0)
    }

    /// Raw minor units
    pub fn cents(&self) -> u64 {
        self.0
    }

    /// Whether the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(MandateError::AmountOverflow)
    }

    /// Checked multiplication by a quantity
    pub fn checked_mul(self, quantity: u32) -> Result<Amount> {
        self.0
            .checked_mul(quantity as u64)
            .map(Amount)
            .ok_or(MandateError::AmountOverflow)
    }

    /// Sum a sequence of amounts with overflow checking
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Result<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::zero(), |acc, a| acc.checked_add(a))
    }

    /// Fraction of this amount over a reference cap, clamped to [0, 1]
    pub fn ratio_of(&self, cap: Amount) -> f64 {
        if cap.is_zero() {
            return 1.0;
        }
        (self.0 as f64 / cap.0 as f64).clamp(0.0, 1.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_minor_units() {
        assert_eq!(Amount::from_cents(78_900).to_string(), "789.00");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn test_checked_add_overflow() {
        let max = Amount::from_cents(u64::MAX);
        assert!(matches!(
            max.checked_add(Amount::from_cents(1)),
            Err(MandateError::AmountOverflow)
        ));
    }

    #[test]
    fn test_checked_sum() {
        let total = Amount::checked_sum([
            Amount::from_cents(100),
            Amount::from_cents(250),
            Amount::from_cents(5),
        ])
        .unwrap();
        assert_eq!(total, Amount::from_cents(355));
    }

    #[test]
    fn test_ratio_clamped() {
        let amount = Amount::from_cents(200);
        assert_eq!(amount.ratio_of(Amount::from_cents(400)), 0.5);
        assert_eq!(amount.ratio_of(Amount::from_cents(100)), 1.0);
        assert_eq!(amount.ratio_of(Amount::zero()), 1.0);
    }
}

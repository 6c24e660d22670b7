//! Money value object.
//!
//! Amounts are held in paise (minor units) to keep every price, tax and refund
//! computation exact. Percentages truncate toward zero.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents money in paise to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero rupees
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from paise
    #[must_use]
    pub const fn from_paise(paise: u64) -> Self {
        Self(paise)
    }

    /// Creates a `Money` value from whole rupees
    ///
    /// # Panics
    ///
    /// Panics if the conversion would overflow (rupees * 100 > `u64::MAX`).
    /// Use `checked_from_rupees` for non-panicking conversion.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn from_rupees(rupees: u64) -> Self {
        match rupees.checked_mul(100) {
            Some(paise) => Self(paise),
            None => panic!("Money::from_rupees overflow"),
        }
    }

    /// Creates a `Money` value from whole rupees with overflow checking
    #[must_use]
    pub const fn checked_from_rupees(rupees: u64) -> Option<Self> {
        match rupees.checked_mul(100) {
            Some(paise) => Some(Self(paise)),
            None => None,
        }
    }

    /// Returns the amount in paise
    #[must_use]
    pub const fn paise(&self) -> u64 {
        self.0
    }

    /// Returns the amount in rupees (rounded down)
    #[must_use]
    pub const fn rupees(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Subtracts, stopping at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Returns `percent`% of this amount, truncated to whole paise
    #[must_use]
    pub const fn checked_percent(self, percent: u32) -> Option<Self> {
        match self.0.checked_mul(percent as u64) {
            Some(product) => Some(Self(product / 100)),
            None => None,
        }
    }

    /// Returns `self * numerator / denominator`, truncated.
    ///
    /// Used to split an order-level amount across its lines. Returns `None`
    /// when `denominator` is zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // result <= self when numerator <= denominator
    pub const fn checked_share(self, numerator: Self, denominator: Self) -> Option<Self> {
        if denominator.0 == 0 {
            return None;
        }
        let scaled = (self.0 as u128) * (numerator.0 as u128) / (denominator.0 as u128);
        if scaled > u64::MAX as u128 {
            None
        } else {
            Some(Self(scaled as u64))
        }
    }

    /// Sums an iterator of amounts, `None` on overflow
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "₹{}.{:02}", self.rupees(), self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rupees_and_paise() {
        let amount = Money::from_rupees(2000);
        assert_eq!(amount.paise(), 200_000);
        assert_eq!(amount.rupees(), 2000);
        assert_eq!(amount.to_string(), "₹2000.00");
        assert_eq!(Money::from_paise(12_345).to_string(), "₹123.45");
    }

    #[test]
    fn percent_truncates() {
        assert_eq!(
            Money::from_rupees(2000).checked_percent(18),
            Some(Money::from_rupees(360))
        );
        assert_eq!(Money::from_paise(99).checked_percent(18), Some(Money::from_paise(17)));
    }

    #[test]
    fn share_splits_proportionally() {
        let coupon = Money::from_rupees(100);
        let share = coupon
            .checked_share(Money::from_rupees(800), Money::from_rupees(1200))
            .unwrap_or_default();
        assert_eq!(share, Money::from_paise(6_666));
        assert_eq!(coupon.checked_share(Money::ZERO, Money::ZERO), None);
    }

    #[test]
    fn subtraction_never_goes_negative() {
        let small = Money::from_rupees(1);
        let large = Money::from_rupees(2);
        assert_eq!(small.checked_sub(large), None);
        assert_eq!(small.saturating_sub(large), Money::ZERO);
    }

    #[test]
    fn checked_sum_detects_overflow() {
        assert_eq!(
            Money::checked_sum([Money::from_rupees(1), Money::from_rupees(2)]),
            Some(Money::from_rupees(3))
        );
        assert_eq!(Money::checked_sum([Money::from_paise(u64::MAX), Money::from_paise(1)]), None);
    }
}

//! Pricing policy.
//!
//! Every literal the checkout pipeline prices with lives here, and every
//! total is derived through [`Breakdown`] so orders, refunds and coupon
//! corrections agree on one formula:
//!
//! ```text
//! unit price   = sale - regular * offer% / 100
//! sub_total    = Σ unit price * qty
//! tax          = Σ floor(line sub_total * 18 / 100)
//! shipping     = 0 if sub_total > 1000 (or nothing left to ship), else 100
//! total        = sub_total + tax + shipping - coupon discount
//! ```
//!
//! Shipping never counts toward a discount total.

use crate::error::ValidationError;
use crate::money::Money;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Goods and services tax applied to each line's discounted sale total.
pub const TAX_RATE_PERCENT: u32 = 18;

/// Orders whose sub-total exceeds this ship for free.
pub const FREE_SHIPPING_THRESHOLD: Money = Money::from_rupees(1000);

/// Flat shipping fee below the threshold.
pub const FLAT_SHIPPING_FEE: Money = Money::from_rupees(100);

/// Cart lines are clamped to stock once stock falls under this many units.
pub const LOW_STOCK_THRESHOLD: u32 = 3;

/// Promised delivery window from the order date.
#[must_use]
pub const fn delivery_window() -> Duration {
    Duration::days(7)
}

/// How long after delivery a return may be requested.
#[must_use]
pub const fn return_window() -> Duration {
    Duration::days(7)
}

/// Unit price after the best running offer.
///
/// The offer is a percentage of the regular price taken off the sale price;
/// the result never drops below zero.
#[must_use]
pub fn effective_unit_price(regular: Money, sale: Money, offer_percent: u32) -> Money {
    let offer = regular.checked_percent(offer_percent.min(100)).unwrap_or(regular);
    sale.saturating_sub(offer)
}

/// Tax owed on a discounted sale amount.
///
/// # Errors
///
/// Returns [`ValidationError::AmountOverflow`] on arithmetic overflow.
pub fn tax_on(sub_total: Money) -> Result<Money, ValidationError> {
    sub_total
        .checked_percent(TAX_RATE_PERCENT)
        .ok_or(ValidationError::AmountOverflow)
}

/// Shipping charge for an order whose active lines sum to `sub_total`.
#[must_use]
pub fn shipping_for(sub_total: Money) -> Money {
    if sub_total.is_zero() || sub_total > FREE_SHIPPING_THRESHOLD {
        Money::ZERO
    } else {
        FLAT_SHIPPING_FEE
    }
}

/// Priced view of one line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePrice {
    /// Catalog list price per unit
    pub unit_regular: Money,
    /// Price per unit after offers
    pub unit_price: Money,
    /// Units
    pub quantity: u32,
    /// `unit_price * quantity`
    pub sub_total: Money,
    /// `(unit_regular - unit_price) * quantity`
    pub product_discount: Money,
    /// Tax on `sub_total`
    pub tax: Money,
}

impl LinePrice {
    /// Prices `quantity` units.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ZeroQuantity`] for an empty line and
    /// [`ValidationError::AmountOverflow`] if the amounts do not fit.
    pub fn new(
        unit_regular: Money,
        unit_sale: Money,
        offer_percent: u32,
        quantity: u32,
    ) -> Result<Self, ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        let unit_price = effective_unit_price(unit_regular, unit_sale, offer_percent);
        let sub_total = unit_price
            .checked_multiply(quantity)
            .ok_or(ValidationError::AmountOverflow)?;
        let regular_total = unit_regular
            .checked_multiply(quantity)
            .ok_or(ValidationError::AmountOverflow)?;
        Ok(Self {
            unit_regular,
            unit_price,
            quantity,
            sub_total,
            product_discount: regular_total.saturating_sub(sub_total),
            tax: tax_on(sub_total)?,
        })
    }

    /// What the line costs before any coupon share.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] on overflow.
    pub fn gross(&self) -> Result<Money, ValidationError> {
        self.sub_total
            .checked_add(self.tax)
            .ok_or(ValidationError::AmountOverflow)
    }
}

/// Order-level price summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    /// Σ line sub-totals (after offers, before coupon)
    pub sub_total: Money,
    /// Σ line product discounts
    pub product_discount: Money,
    /// Σ line tax
    pub tax: Money,
    /// Shipping charge for `sub_total`
    pub shipping: Money,
    /// Coupon discount applied to the order
    pub coupon_discount: Money,
    /// Amount payable
    pub total: Money,
}

impl Breakdown {
    /// Summarises `lines` with an optional coupon discount.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] if a sum overflows.
    pub fn from_lines<'a, I>(lines: I, coupon_discount: Money) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = &'a LinePrice>,
    {
        let mut sub_total = Money::ZERO;
        let mut product_discount = Money::ZERO;
        let mut tax = Money::ZERO;
        for line in lines {
            sub_total = sub_total
                .checked_add(line.sub_total)
                .ok_or(ValidationError::AmountOverflow)?;
            product_discount = product_discount
                .checked_add(line.product_discount)
                .ok_or(ValidationError::AmountOverflow)?;
            tax = tax
                .checked_add(line.tax)
                .ok_or(ValidationError::AmountOverflow)?;
        }
        Self::from_totals(sub_total, product_discount, tax, coupon_discount)
    }

    /// Builds a breakdown from already-summed amounts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] if the total overflows.
    pub fn from_totals(
        sub_total: Money,
        product_discount: Money,
        tax: Money,
        coupon_discount: Money,
    ) -> Result<Self, ValidationError> {
        let shipping = shipping_for(sub_total);
        let total = sub_total
            .checked_add(tax)
            .and_then(|amount| amount.checked_add(shipping))
            .ok_or(ValidationError::AmountOverflow)?
            .saturating_sub(coupon_discount);
        Ok(Self {
            sub_total,
            product_discount,
            tax,
            shipping,
            coupon_discount,
            total,
        })
    }

    /// Product discount plus coupon discount. Shipping is not a discount.
    #[must_use]
    pub const fn total_discount(&self) -> Money {
        Money::from_paise(
            self.product_discount
                .paise()
                .saturating_add(self.coupon_discount.paise()),
        )
    }
}

/// Splits `amount` across `weights` proportionally.
///
/// Each share is truncated; the last non-zero weight absorbs the rounding
/// remainder so the shares always sum to `amount`.
///
/// # Errors
///
/// Returns [`ValidationError::AmountOverflow`] if the weights overflow.
pub fn allocate(amount: Money, weights: &[Money]) -> Result<Vec<Money>, ValidationError> {
    let total = Money::checked_sum(weights.iter().copied()).ok_or(ValidationError::AmountOverflow)?;
    if total.is_zero() || amount.is_zero() {
        return Ok(vec![Money::ZERO; weights.len()]);
    }
    let mut shares: Vec<Money> = weights
        .iter()
        .map(|weight| amount.checked_share(*weight, total).unwrap_or(Money::ZERO))
        .collect();
    let allocated = Money::checked_sum(shares.iter().copied()).ok_or(ValidationError::AmountOverflow)?;
    let remainder = amount.saturating_sub(allocated);
    if let Some(index) = weights.iter().rposition(|weight| !weight.is_zero()) {
        shares[index] = shares[index]
            .checked_add(remainder)
            .ok_or(ValidationError::AmountOverflow)?;
    }
    Ok(shares)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn offer_comes_off_the_sale_price() {
        let unit = effective_unit_price(Money::from_rupees(2500), Money::from_rupees(2000), 10);
        assert_eq!(unit, Money::from_rupees(1750));
        assert_eq!(
            effective_unit_price(Money::from_rupees(100), Money::from_rupees(50), 90),
            Money::ZERO
        );
    }

    #[test]
    fn single_unit_above_threshold_ships_free() {
        let line = LinePrice::new(Money::from_rupees(2400), Money::from_rupees(2000), 0, 1).unwrap();
        let breakdown = Breakdown::from_lines([&line], Money::ZERO).unwrap();

        assert_eq!(breakdown.tax, Money::from_rupees(360));
        assert_eq!(breakdown.shipping, Money::ZERO);
        assert_eq!(breakdown.total, Money::from_rupees(2360));
        assert_eq!(breakdown.product_discount, Money::from_rupees(400));
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(shipping_for(Money::from_rupees(1000)), FLAT_SHIPPING_FEE);
        assert_eq!(shipping_for(Money::from_paise(100_001)), Money::ZERO);
        assert_eq!(shipping_for(Money::ZERO), Money::ZERO);
    }

    #[test]
    fn coupon_reduces_total_not_tax() {
        let a = LinePrice::new(Money::from_rupees(800), Money::from_rupees(800), 0, 1).unwrap();
        let b = LinePrice::new(Money::from_rupees(400), Money::from_rupees(400), 0, 1).unwrap();
        let breakdown = Breakdown::from_lines([&a, &b], Money::from_rupees(100)).unwrap();

        assert_eq!(breakdown.sub_total, Money::from_rupees(1200));
        assert_eq!(breakdown.tax, Money::from_rupees(216));
        assert_eq!(breakdown.total, Money::from_rupees(1316));
        assert_eq!(breakdown.total_discount(), Money::from_rupees(100));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert_eq!(
            LinePrice::new(Money::from_rupees(1), Money::from_rupees(1), 0, 0),
            Err(ValidationError::ZeroQuantity)
        );
    }

    #[test]
    fn allocation_sums_to_amount() {
        let shares = allocate(
            Money::from_rupees(100),
            &[Money::from_rupees(800), Money::from_rupees(400)],
        )
        .unwrap();
        assert_eq!(shares[0], Money::from_paise(6_666));
        assert_eq!(shares[1], Money::from_paise(3_334));

        let none = allocate(Money::from_rupees(100), &[Money::ZERO]).unwrap();
        assert_eq!(none, vec![Money::ZERO]);
    }

    proptest::proptest! {
        #[test]
        fn allocation_is_exact(
            amount in 0u64..10_000_000,
            weights in proptest::collection::vec(0u64..1_000_000, 1..8),
        ) {
            let weights: Vec<Money> = weights.into_iter().map(Money::from_paise).collect();
            let shares = allocate(Money::from_paise(amount), &weights).unwrap();
            let allocated = Money::checked_sum(shares.iter().copied()).unwrap();
            if weights.iter().all(|w| w.is_zero()) {
                proptest::prop_assert!(allocated.is_zero());
            } else {
                proptest::prop_assert_eq!(allocated, Money::from_paise(amount));
            }
        }
    }
}

//! Coupon definitions and the rules of the coupon usage ledger.
//!
//! A coupon's `users_used_count` is a shared counter: the reservation path
//! claims a slot (`used < max_use_count`, conditionally, inside the checkout
//! transaction) and compensation hands it back exactly once. The rules below
//! decide whether a cart may claim a slot at all and how much it saves.

use crate::error::{CommerceError, ConflictError, ValidationError};
use crate::ids::CouponId;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a coupon discounts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponKind {
    /// Flat amount off
    Fixed(Money),
    /// Percentage of the purchase, capped
    Percentage {
        /// Percent off
        percent: u32,
        /// Upper bound on the discount
        max_discount: Money,
    },
}

/// Lifecycle of a coupon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CouponStatus {
    /// Created with a future start date
    Scheduled,
    /// Redeemable
    Active,
    /// Past its expiration date
    Expired,
    /// Withdrawn by an admin
    Deleted,
}

impl CouponStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        }
    }

    /// Parse from the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which products a coupon may be used on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponScope {
    /// Any cart
    AllProducts,
    /// Only carts made up entirely of this category
    Category(String),
}

/// A coupon definition plus its usage counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Identifier
    pub id: CouponId,
    /// Upper-case redemption code, unique
    pub code: String,
    /// Shown to the shopper
    pub description: String,
    /// Discount rule
    pub kind: CouponKind,
    /// Purchase floor (after offers) required to redeem
    pub min_order_value: Money,
    /// Global cap on redemptions
    pub max_use_count: u32,
    /// Redemptions claimed so far, including outstanding reservations
    pub users_used_count: u32,
    /// Start of the redemption window
    pub valid_from: DateTime<Utc>,
    /// End of the redemption window
    pub expires_at: DateTime<Utc>,
    /// Lifecycle state
    pub status: CouponStatus,
    /// Product scope
    pub scope: CouponScope,
}

/// Admin input for a new coupon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCoupon {
    /// Code, any case
    pub code: String,
    /// Shown to the shopper
    pub description: String,
    /// Discount rule
    pub kind: CouponKind,
    /// Purchase floor
    pub min_order_value: Money,
    /// Global cap
    pub max_use_count: u32,
    /// Window start
    pub valid_from: DateTime<Utc>,
    /// Window end
    pub expires_at: DateTime<Utc>,
    /// Product scope
    pub scope: CouponScope,
}

impl NewCoupon {
    /// Validates the definition and builds the stored coupon.
    ///
    /// The coupon starts `Scheduled` when its window opens in the future.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCoupon`] for an empty code, a zero cap,
    /// an inverted window or a percentage outside `1..=100`.
    pub fn into_coupon(self, now: DateTime<Utc>) -> Result<Coupon, ValidationError> {
        let code = self.code.trim().to_uppercase();
        if code.is_empty() {
            return Err(ValidationError::InvalidCoupon("code is required".into()));
        }
        if self.max_use_count == 0 {
            return Err(ValidationError::InvalidCoupon(
                "max use count must be positive".into(),
            ));
        }
        if self.expires_at <= self.valid_from {
            return Err(ValidationError::InvalidCoupon(
                "expiration must be after the start date".into(),
            ));
        }
        match self.kind {
            CouponKind::Percentage { percent, .. } if percent == 0 || percent > 100 => {
                return Err(ValidationError::InvalidCoupon(
                    "percentage must be between 1 and 100".into(),
                ));
            }
            CouponKind::Fixed(amount) if amount.is_zero() => {
                return Err(ValidationError::InvalidCoupon(
                    "discount must be positive".into(),
                ));
            }
            _ => {}
        }
        let status = if self.valid_from > now {
            CouponStatus::Scheduled
        } else {
            CouponStatus::Active
        };
        Ok(Coupon {
            id: CouponId::new(),
            code,
            description: self.description,
            kind: self.kind,
            min_order_value: self.min_order_value,
            max_use_count: self.max_use_count,
            users_used_count: 0,
            valid_from: self.valid_from,
            expires_at: self.expires_at,
            status,
            scope: self.scope,
        })
    }
}

impl Coupon {
    /// Discount this coupon grants on `purchase`, never more than `purchase`.
    #[must_use]
    pub fn discount_for(&self, purchase: Money) -> Money {
        let discount = match self.kind {
            CouponKind::Fixed(amount) => amount,
            CouponKind::Percentage {
                percent,
                max_discount,
            } => purchase
                .checked_percent(percent)
                .map_or(max_discount, |amount| amount.min(max_discount)),
        };
        discount.min(purchase)
    }

    /// Whether a remaining purchase of `purchase` still qualifies.
    #[must_use]
    pub fn meets_minimum(&self, purchase: Money) -> bool {
        purchase >= self.min_order_value
    }

    /// Checks that a cart may redeem this coupon and returns its discount.
    ///
    /// `categories` holds the category of every cart line; `purchase` is the
    /// cart's sub-total after offers.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownCoupon`] when the coupon is deleted
    /// - [`ConflictError::CouponExpired`] past the window or when marked expired
    /// - [`ConflictError::CouponExhausted`] when every slot is taken
    /// - [`ConflictError::CouponNotStarted`] before the window opens
    /// - [`ConflictError::CouponCategoryMismatch`] for out-of-scope lines
    /// - [`ConflictError::CouponMinimumNotMet`] below the purchase floor
    pub fn redeem_check<'a, I>(
        &self,
        now: DateTime<Utc>,
        categories: I,
        purchase: Money,
    ) -> Result<Money, CommerceError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self.status {
            CouponStatus::Deleted => {
                return Err(ValidationError::UnknownCoupon(self.code.clone()).into());
            }
            CouponStatus::Expired => {
                return Err(ConflictError::CouponExpired(self.code.clone()).into());
            }
            CouponStatus::Scheduled | CouponStatus::Active => {}
        }
        if self.users_used_count >= self.max_use_count {
            return Err(ConflictError::CouponExhausted(self.code.clone()).into());
        }
        if now > self.expires_at {
            return Err(ConflictError::CouponExpired(self.code.clone()).into());
        }
        if now < self.valid_from || self.status == CouponStatus::Scheduled {
            return Err(ConflictError::CouponNotStarted(self.code.clone()).into());
        }
        if let CouponScope::Category(category) = &self.scope {
            if categories.into_iter().any(|c| c != category.as_str()) {
                return Err(ConflictError::CouponCategoryMismatch {
                    code: self.code.clone(),
                    category: category.clone(),
                }
                .into());
            }
        }
        if !self.meets_minimum(purchase) {
            return Err(ConflictError::CouponMinimumNotMet {
                code: self.code.clone(),
                minimum: self.min_order_value,
            }
            .into());
        }
        Ok(self.discount_for(purchase))
    }

    /// The status the calendar says this coupon should have, if it differs.
    ///
    /// Scheduled coupons open once `valid_from` passes; live coupons expire
    /// after `expires_at`. Deleted and expired coupons never change.
    #[must_use]
    pub fn scheduled_transition(&self, now: DateTime<Utc>) -> Option<CouponStatus> {
        match self.status {
            CouponStatus::Scheduled | CouponStatus::Active if now > self.expires_at => {
                Some(CouponStatus::Expired)
            }
            CouponStatus::Scheduled if now >= self.valid_from => Some(CouponStatus::Active),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn coupon(kind: CouponKind) -> Coupon {
        NewCoupon {
            code: "save100".into(),
            description: "Flat 100 off".into(),
            kind,
            min_order_value: Money::from_rupees(1000),
            max_use_count: 2,
            valid_from: now() - Duration::days(1),
            expires_at: now() + Duration::days(30),
            scope: CouponScope::AllProducts,
        }
        .into_coupon(now())
        .unwrap()
    }

    #[test]
    fn new_coupon_is_normalised() {
        let c = coupon(CouponKind::Fixed(Money::from_rupees(100)));
        assert_eq!(c.code, "SAVE100");
        assert_eq!(c.status, CouponStatus::Active);
        assert_eq!(c.users_used_count, 0);
    }

    #[test]
    fn future_window_starts_scheduled() {
        let c = NewCoupon {
            code: "LATER".into(),
            description: String::new(),
            kind: CouponKind::Fixed(Money::from_rupees(50)),
            min_order_value: Money::ZERO,
            max_use_count: 1,
            valid_from: now() + Duration::days(2),
            expires_at: now() + Duration::days(3),
            scope: CouponScope::AllProducts,
        }
        .into_coupon(now())
        .unwrap();

        assert_eq!(c.status, CouponStatus::Scheduled);
        assert_eq!(c.scheduled_transition(now()), None);
        assert_eq!(
            c.scheduled_transition(now() + Duration::days(2)),
            Some(CouponStatus::Active)
        );
        assert_eq!(
            c.scheduled_transition(now() + Duration::days(4)),
            Some(CouponStatus::Expired)
        );
    }

    #[test]
    fn percentage_is_capped() {
        let c = coupon(CouponKind::Percentage {
            percent: 20,
            max_discount: Money::from_rupees(150),
        });
        assert_eq!(c.discount_for(Money::from_rupees(500)), Money::from_rupees(100));
        assert_eq!(c.discount_for(Money::from_rupees(5000)), Money::from_rupees(150));
    }

    #[test]
    fn redeem_check_enforces_minimum() {
        let c = coupon(CouponKind::Fixed(Money::from_rupees(100)));
        let discount = c
            .redeem_check(now(), ["Shirts"], Money::from_rupees(1200))
            .unwrap();
        assert_eq!(discount, Money::from_rupees(100));

        let err = c
            .redeem_check(now(), ["Shirts"], Money::from_rupees(999))
            .unwrap_err();
        assert!(matches!(
            err,
            CommerceError::Conflict(ConflictError::CouponMinimumNotMet { .. })
        ));
    }

    #[test]
    fn redeem_check_rejects_exhausted_and_expired() {
        let mut c = coupon(CouponKind::Fixed(Money::from_rupees(100)));
        c.users_used_count = 2;
        assert!(matches!(
            c.redeem_check(now(), [], Money::from_rupees(2000)),
            Err(CommerceError::Conflict(ConflictError::CouponExhausted(_)))
        ));

        c.users_used_count = 0;
        assert!(matches!(
            c.redeem_check(now() + Duration::days(31), [], Money::from_rupees(2000)),
            Err(CommerceError::Conflict(ConflictError::CouponExpired(_)))
        ));

        c.status = CouponStatus::Deleted;
        assert!(matches!(
            c.redeem_check(now(), [], Money::from_rupees(2000)),
            Err(CommerceError::Validation(ValidationError::UnknownCoupon(_)))
        ));
    }

    #[test]
    fn category_coupon_needs_single_category_cart() {
        let mut c = coupon(CouponKind::Fixed(Money::from_rupees(100)));
        c.scope = CouponScope::Category("Shoes".into());

        assert!(c
            .redeem_check(now(), ["Shoes", "Shoes"], Money::from_rupees(2000))
            .is_ok());
        assert!(matches!(
            c.redeem_check(now(), ["Shoes", "Shirts"], Money::from_rupees(2000)),
            Err(CommerceError::Conflict(
                ConflictError::CouponCategoryMismatch { .. }
            ))
        ));
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let bad = NewCoupon {
            code: "  ".into(),
            description: String::new(),
            kind: CouponKind::Fixed(Money::from_rupees(10)),
            min_order_value: Money::ZERO,
            max_use_count: 1,
            valid_from: now(),
            expires_at: now() + Duration::days(1),
            scope: CouponScope::AllProducts,
        };
        assert!(bad.into_coupon(now()).is_err());
    }
}

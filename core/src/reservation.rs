//! Stock and coupon holds.
//!
//! A reservation set is every [`ReservedStock`] row written by one checkout
//! attempt plus at most one [`ReservedCoupon`]. Holds are never flipped to a
//! "confirmed" state: settlement and compensation both dispose of a hold by
//! deleting its rows, and the absence of the rows is the release signal.
//!
//! ```text
//!            reserve
//!   cart ─────────────▶ ReservedStock* (+ ReservedCoupon?)
//!                              │
//!            ┌─────────────────┼──────────────────┐
//!            ▼ settle          ▼ release           ▼ sweep (reserve_till < now)
//!   Order + OrderItems   stock/coupon credited   stock/coupon credited
//!   (rows deleted)       (rows deleted)          (rows deleted)
//! ```

use crate::catalog::CartItem;
use crate::ids::{CouponId, ReservationId, ReservedCouponId, ReservedStockId, UserId, VariantId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provisional stock debit for one variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedStock {
    /// Row identifier
    pub id: ReservedStockId,
    /// Set this row belongs to
    pub reservation_id: ReservationId,
    /// Owner of the checkout
    pub user_id: UserId,
    /// Variant held
    pub variant_id: VariantId,
    /// Units debited from stock
    pub quantity: u32,
    /// When the hold was taken
    pub reserved_at: DateTime<Utc>,
    /// Hold expiry; the sweeper releases rows past it
    pub reserve_till: DateTime<Utc>,
    /// Coupon hold shared by the set, if any
    pub reserved_coupon_id: Option<ReservedCouponId>,
}

impl ReservedStock {
    /// Whether the hold has lapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reserve_till < now
    }
}

/// Coupon slot claimed by a reservation set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedCoupon {
    /// Row identifier
    pub id: ReservedCouponId,
    /// Set this hold belongs to
    pub reservation_id: ReservationId,
    /// Owner of the checkout
    pub user_id: UserId,
    /// Coupon whose used-count was incremented
    pub coupon_id: CouponId,
    /// Code as redeemed
    pub coupon_code: String,
    /// Description at redemption time
    pub description: String,
    /// Discount computed at reservation time
    pub discount_amount: Money,
    /// When the slot was claimed
    pub reserved_at: DateTime<Utc>,
}

/// All rows of one reservation set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSet {
    /// Set identifier
    pub id: ReservationId,
    /// Owner
    pub user_id: UserId,
    /// Stock holds, one per variant
    pub lines: Vec<ReservedStock>,
    /// Coupon hold
    pub coupon: Option<ReservedCoupon>,
}

impl ReservationSet {
    /// Reserved units keyed by variant.
    #[must_use]
    pub fn quantities(&self) -> BTreeMap<VariantId, u32> {
        let mut map = BTreeMap::new();
        for line in &self.lines {
            *map.entry(line.variant_id).or_insert(0) += line.quantity;
        }
        map
    }

    /// Earliest expiry across the set.
    #[must_use]
    pub fn reserve_till(&self) -> Option<DateTime<Utc>> {
        self.lines.iter().map(|line| line.reserve_till).min()
    }

    /// True when the reserved variants and quantities are exactly the cart's.
    #[must_use]
    pub fn matches_cart(&self, cart: &[CartItem]) -> bool {
        let mut wanted = BTreeMap::new();
        for item in cart {
            *wanted.entry(item.variant_id).or_insert(0) += item.quantity;
        }
        wanted == self.quantities()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(set: ReservationId, user: UserId, variant: VariantId, qty: u32) -> ReservedStock {
        let now = Utc::now();
        ReservedStock {
            id: ReservedStockId::new(),
            reservation_id: set,
            user_id: user,
            variant_id: variant,
            quantity: qty,
            reserved_at: now,
            reserve_till: now + Duration::minutes(15),
            reserved_coupon_id: None,
        }
    }

    #[test]
    fn cart_consistency_requires_same_variants_and_quantities() {
        let user = UserId::new();
        let set_id = ReservationId::new();
        let (a, b) = (VariantId::new(), VariantId::new());
        let set = ReservationSet {
            id: set_id,
            user_id: user,
            lines: vec![row(set_id, user, a, 1), row(set_id, user, b, 2)],
            coupon: None,
        };
        let line = |variant_id: VariantId, quantity: u32| CartItem {
            user_id: user,
            variant_id,
            quantity,
            added_at: Utc::now(),
        };
        let cart = |qa: u32, qb: u32| vec![line(a, qa), line(b, qb)];

        assert!(set.matches_cart(&cart(1, 2)));
        assert!(!set.matches_cart(&cart(1, 3)));
        assert!(!set.matches_cart(&cart(1, 2)[..1]));
    }

    #[test]
    fn expiry_is_strict() {
        let line = row(ReservationId::new(), UserId::new(), VariantId::new(), 1);
        assert!(!line.is_expired(line.reserve_till));
        assert!(line.is_expired(line.reserve_till + Duration::seconds(1)));
    }
}

//! Orders, order items and the per-item lifecycle.
//!
//! # Item state machine
//!
//! ```text
//!  NotPlaced ──retry paid──▶ Confirmed
//!      │
//!      └──grace elapsed──▶ Failed
//!
//!  Pending ─▶ Confirmed ─▶ Shipped ─▶ OutForDelivery ─▶ Delivered ─return─▶ Returned
//!     │           │           │             │
//!     └───────────┴───────────┴─────────────┴──cancel──▶ Cancelled
//! ```
//!
//! `Cancelled`, `Failed` and `Returned` are absorbing. `Delivered` only leaves
//! through an approved return.

use crate::catalog::ShippingAddress;
use crate::error::{ConflictError, ValidationError};
use crate::ids::{CouponId, OrderId, OrderItemId, UserId, VariantId};
use crate::money::Money;
use crate::payment::PaymentMethod;
use crate::pricing::LinePrice;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one order item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Gateway payment failed; stock is still held for a retry
    NotPlaced,
    /// Placed, awaiting confirmation (cash on delivery)
    Pending,
    /// Paid or accepted
    Confirmed,
    /// Handed to the carrier
    Shipped,
    /// Last mile
    OutForDelivery,
    /// Received by the customer
    Delivered,
    /// Cancelled by the customer or an admin
    Cancelled,
    /// Abandoned after a failed payment
    Failed,
    /// Returned after delivery
    Returned,
}

impl ItemStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotPlaced => "not_placed",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Shipped => "shipped",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Returned => "returned",
        }
    }

    /// Parse from the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_placed" => Some(Self::NotPlaced),
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "shipped" => Some(Self::Shipped),
            "out_for_delivery" => Some(Self::OutForDelivery),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            "returned" => Some(Self::Returned),
            _ => None,
        }
    }

    /// Position on the fulfilment chain, `None` off it.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Confirmed => Some(1),
            Self::Shipped => Some(2),
            Self::OutForDelivery => Some(3),
            Self::Delivered => Some(4),
            Self::NotPlaced | Self::Cancelled | Self::Failed | Self::Returned => None,
        }
    }

    /// No transition leaves this state.
    #[must_use]
    pub const fn is_absorbing(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed | Self::Returned)
    }

    /// Customer or admin may cancel from here.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Confirmed | Self::Shipped | Self::OutForDelivery
        )
    }

    /// Part of a live order: counted when pricing what the order costs.
    #[must_use]
    pub const fn is_active(self) -> bool {
        self.rank().is_some()
    }

    /// Still owns the stock it debited.
    #[must_use]
    pub const fn holds_stock(self) -> bool {
        self.is_active() || matches!(self, Self::NotPlaced)
    }

    /// Checks an admin move along the fulfilment chain.
    ///
    /// Only strictly forward moves are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::InvalidTransition`] for any other move.
    pub fn advance_to(self, next: Self) -> Result<Self, ConflictError> {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) if to > from => Ok(next),
            _ => Err(ConflictError::InvalidTransition {
                from: self,
                to: next,
            }),
        }
    }

    /// Checks a cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::InvalidTransition`] from delivered, unplaced or
    /// absorbing states.
    pub fn cancel(self) -> Result<Self, ConflictError> {
        if self.is_cancellable() {
            Ok(Self::Cancelled)
        } else {
            Err(ConflictError::InvalidTransition {
                from: self,
                to: Self::Cancelled,
            })
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotPlaced => "Order Not Placed",
            Self::Pending => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Shipped => "Shipped",
            Self::OutForDelivery => "Out for Delivery",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
            Self::Returned => "Returned",
        };
        f.write_str(label)
    }
}

/// Coupon attached to an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    /// Coupon redeemed
    pub coupon_id: CouponId,
    /// Code as redeemed
    pub code: String,
    /// Description at redemption time
    pub description: String,
    /// Discount granted
    pub discount: Money,
    /// Purchase floor the order must keep meeting
    pub min_order_value: Money,
}

/// A committed order and its financial snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier
    pub id: OrderId,
    /// Display number, `#ddd-ddddddd-ddddddd`
    pub uid: String,
    /// Buyer
    pub user_id: UserId,
    /// Σ active line sub-totals after offers
    pub sub_total: Money,
    /// Σ product discounts
    pub product_discount: Money,
    /// Σ line tax
    pub tax: Money,
    /// Shipping charge
    pub shipping_charge: Money,
    /// Amount payable
    pub total_amount: Money,
    /// Coupon, while the order still qualifies
    pub coupon: Option<AppliedCoupon>,
    /// How the order is paid
    pub payment_method: PaymentMethod,
    /// Delivery snapshot
    pub shipping_address: ShippingAddress,
    /// When the order was committed
    pub ordered_at: DateTime<Utc>,
    /// Promised delivery date
    pub expected_delivery: DateTime<Utc>,
}

impl Order {
    /// Whether a coupon is still applied.
    #[must_use]
    pub const fn is_coupon_applied(&self) -> bool {
        self.coupon.is_some()
    }

    /// Coupon discount currently applied.
    #[must_use]
    pub fn coupon_discount(&self) -> Money {
        self.coupon
            .as_ref()
            .map_or(Money::ZERO, |coupon| coupon.discount)
    }

    /// Product discount plus coupon discount.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] on overflow.
    pub fn total_discount(&self) -> Result<Money, ValidationError> {
        self.product_discount
            .checked_add(self.coupon_discount())
            .ok_or(ValidationError::AmountOverflow)
    }
}

/// Generates a display number such as `#402-1739021-5821930`.
pub fn generate_order_uid<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "#{:03}-{:07}-{:07}",
        rng.gen_range(0..1_000),
        rng.gen_range(0..10_000_000),
        rng.gen_range(0..10_000_000)
    )
}

/// One line of an order with its catalog snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Identifier
    pub id: OrderItemId,
    /// Parent order
    pub order_id: OrderId,
    /// Buyer
    pub user_id: UserId,
    /// Variant bought
    pub variant_id: VariantId,
    /// Product name at purchase time
    pub product_name: String,
    /// Category at purchase time
    pub category: String,
    /// Image at purchase time
    pub image: Option<String>,
    /// List price per unit at purchase time
    pub unit_regular_price: Money,
    /// Price per unit after offers at purchase time
    pub unit_price: Money,
    /// Units
    pub quantity: u32,
    /// `unit_price * quantity`
    pub sub_total: Money,
    /// Offer discount on the line
    pub product_discount: Money,
    /// Tax on `sub_total`
    pub tax: Money,
    /// Part of the order coupon carried by this line
    pub coupon_share: Money,
    /// `sub_total + tax - coupon_share`
    pub total: Money,
    /// Lifecycle status
    pub status: ItemStatus,
    /// Cancellation or return reason
    pub reason: Option<String>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Set on `Shipped`
    pub shipped_at: Option<DateTime<Utc>>,
    /// Set on `Delivered`
    pub delivered_at: Option<DateTime<Utc>>,
    /// Set on `Cancelled`
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set on `Returned`
    pub returned_at: Option<DateTime<Utc>>,
    /// Last day a return may be requested
    pub return_deadline: Option<DateTime<Utc>>,
}

impl OrderItem {
    /// Pricing snapshot of the line.
    #[must_use]
    pub const fn line_price(&self) -> LinePrice {
        LinePrice {
            unit_regular: self.unit_regular_price,
            unit_price: self.unit_price,
            quantity: self.quantity,
            sub_total: self.sub_total,
            product_discount: self.product_discount,
            tax: self.tax,
        }
    }

    /// Line cost before any coupon share.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] on overflow.
    pub fn gross(&self) -> Result<Money, ValidationError> {
        self.sub_total
            .checked_add(self.tax)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Moves the item to `status`, stamping the matching timestamp.
    pub fn set_status(&mut self, status: ItemStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
        match status {
            ItemStatus::Shipped => self.shipped_at = Some(now),
            ItemStatus::Delivered => {
                self.delivered_at = Some(now);
                self.return_deadline = Some(now + crate::pricing::return_window());
            }
            ItemStatus::Cancelled => self.cancelled_at = Some(now),
            ItemStatus::Returned => self.returned_at = Some(now),
            _ => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn forward_chain_only() {
        assert_eq!(
            ItemStatus::Pending.advance_to(ItemStatus::Confirmed),
            Ok(ItemStatus::Confirmed)
        );
        assert_eq!(
            ItemStatus::Confirmed.advance_to(ItemStatus::Delivered),
            Ok(ItemStatus::Delivered)
        );
        assert!(ItemStatus::Shipped.advance_to(ItemStatus::Confirmed).is_err());
        assert!(ItemStatus::Cancelled.advance_to(ItemStatus::Shipped).is_err());
        assert!(ItemStatus::NotPlaced.advance_to(ItemStatus::Shipped).is_err());
    }

    #[test]
    fn cancel_rejected_from_terminal_states() {
        for status in [
            ItemStatus::Delivered,
            ItemStatus::Cancelled,
            ItemStatus::Failed,
            ItemStatus::Returned,
            ItemStatus::NotPlaced,
        ] {
            assert!(status.cancel().is_err(), "{status} should not cancel");
        }
        for status in [
            ItemStatus::Pending,
            ItemStatus::Confirmed,
            ItemStatus::Shipped,
            ItemStatus::OutForDelivery,
        ] {
            assert_eq!(status.cancel(), Ok(ItemStatus::Cancelled));
        }
    }

    #[test]
    fn status_round_trips_through_storage_name() {
        for status in [
            ItemStatus::NotPlaced,
            ItemStatus::OutForDelivery,
            ItemStatus::Returned,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("lost"), None);
    }

    #[test]
    fn order_uid_has_expected_shape() {
        let uid = generate_order_uid(&mut rand::thread_rng());
        let parts: Vec<&str> = uid.trim_start_matches('#').split('-').collect();
        assert!(uid.starts_with('#'));
        assert_eq!(parts.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![3, 7, 7]);
    }
}

//! Error taxonomy for the checkout pipeline.
//!
//! Five families, each mapped to a caller-visible outcome:
//!
//! - [`ValidationError`]: the request itself is malformed or names something
//!   that does not exist. Nothing was written.
//! - [`ConflictError`]: the request is well formed but the current state forbids
//!   it (stock gone, coupon exhausted, cart changed under a hold). The attempt's
//!   transaction is rolled back.
//! - [`PaymentError`]: a payment adapter refused. The reservation stays held.
//! - [`CommerceError::Settlement`]: settlement could not commit. The hold and its
//!   stock debit remain for the sweeper.
//! - [`CommerceError::Sweep`]: a sweep aborted. Nothing was credited; the next
//!   tick retries.
//!
//! Data-layer failures travel as [`StoreError`].

use crate::ids::{OrderId, OrderItemId, ReservationId, VariantId};
use crate::money::Money;
use crate::order::ItemStatus;
use thiserror::Error;

/// Errors raised by a [`crate::store::CommerceStore`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be mapped back onto the domain model
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// The request is malformed or refers to unknown records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Checkout attempted with nothing in the cart
    #[error("cart is empty")]
    EmptyCart,

    /// Quantity must be at least one
    #[error("quantity must be positive")]
    ZeroQuantity,

    /// No coupon with this code (or it was deleted)
    #[error("coupon {0} not found")]
    UnknownCoupon(String),

    /// Coupon definition rejected on creation
    #[error("invalid coupon: {0}")]
    InvalidCoupon(String),

    /// Variant does not exist
    #[error("product variant {0} not found")]
    UnknownVariant(VariantId),

    /// Address does not exist or belongs to someone else
    #[error("address not found")]
    UnknownAddress,

    /// Order does not exist or belongs to someone else
    #[error("order {0} not found")]
    UnknownOrder(OrderId),

    /// Order item does not exist or belongs to someone else
    #[error("order item {0} not found")]
    UnknownOrderItem(OrderItemId),

    /// Return request does not exist
    #[error("return request not found")]
    UnknownReturnRequest,

    /// Reservation set does not belong to the caller
    #[error("reservation {0} not found")]
    UnknownReservation(ReservationId),

    /// An amount computation overflowed
    #[error("amount out of range")]
    AmountOverflow,

    /// Free-form rejection of an input field
    #[error("{0}")]
    Invalid(String),
}

/// The current state forbids the operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Not enough units left to cover the request
    #[error("stock unavailable for {product} (requested {requested}, available {available})")]
    StockUnavailable {
        /// Variant short on stock
        variant_id: VariantId,
        /// Product name for the user-facing message
        product: String,
        /// Units requested
        requested: u32,
        /// Units on hand
        available: u32,
    },

    /// Coupon is past its expiry date or marked expired
    #[error("coupon {0} has expired")]
    CouponExpired(String),

    /// Coupon reached its global usage cap
    #[error("coupon {0} is no longer available")]
    CouponExhausted(String),

    /// Coupon window has not opened yet
    #[error("coupon {0} is not active yet")]
    CouponNotStarted(String),

    /// Category coupon used on a mixed or foreign cart
    #[error("coupon {code} only applies to {category} products")]
    CouponCategoryMismatch {
        /// Coupon code
        code: String,
        /// Category the coupon is restricted to
        category: String,
    },

    /// Purchase amount below the coupon's floor
    #[error("coupon {code} requires a minimum order of {minimum}")]
    CouponMinimumNotMet {
        /// Coupon code
        code: String,
        /// Required minimum
        minimum: Money,
    },

    /// Coupon code already taken
    #[error("coupon {0} already exists")]
    DuplicateCoupon(String),

    /// Reserved lines no longer match the cart
    #[error("cart changed during checkout; please retry")]
    CartChanged,

    /// The hold is gone: settled, released or swept
    #[error("reservation {0} is no longer held")]
    ReservationReleased(ReservationId),

    /// State machine refuses the move
    #[error("cannot move item from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: ItemStatus,
        /// Requested status
        to: ItemStatus,
    },

    /// Nothing in the order can be cancelled
    #[error("order {0} has no cancellable items")]
    NothingToCancel(OrderId),

    /// Gateway callback already processed
    #[error("payment for gateway order {0} was already processed")]
    AlreadyProcessed(String),

    /// Return outside the allowed window
    #[error("return window has closed")]
    ReturnWindowClosed,

    /// A return request is already open or resolved for this item
    #[error("a return request already exists for this item")]
    ReturnAlreadyRequested,
}

/// A payment adapter refused to authorize.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Wallet cannot cover the amount
    #[error("insufficient wallet balance (required {required}, available {available})")]
    InsufficientWalletBalance {
        /// Amount needed
        required: Money,
        /// Current balance
        available: Money,
    },

    /// At least one line cannot be paid on delivery
    #[error("cash on delivery is not available for {0}")]
    CashOnDeliveryUnavailable(String),

    /// Gateway unreachable or returned an error
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Callback signature did not verify
    #[error("payment signature mismatch")]
    SignatureMismatch,

    /// Callback names a gateway order we never issued
    #[error("unknown gateway order {0}")]
    UnknownGatewayOrder(String),
}

/// Umbrella error returned by every pipeline operation.
#[derive(Error, Debug)]
pub enum CommerceError {
    /// Bad input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// State conflict
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Payment adapter refusal
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Settlement could not commit; the hold is untouched
    #[error("settlement of reservation {reservation_id} failed: {source}")]
    Settlement {
        /// Reservation set being settled
        reservation_id: ReservationId,
        /// Underlying cause
        #[source]
        source: Box<CommerceError>,
    },

    /// Sweep aborted; retried next tick
    #[error("reservation sweep failed: {0}")]
    Sweep(#[source] Box<CommerceError>),

    /// Data layer failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CommerceError {
    /// Wraps an error raised while settling `reservation_id`.
    ///
    /// Validation, conflict and payment errors pass through unchanged so callers
    /// still see the actionable cause; anything else becomes a settlement error.
    #[must_use]
    pub fn settlement(reservation_id: ReservationId, source: Self) -> Self {
        match source {
            Self::Store(_) | Self::Sweep(_) => Self::Settlement {
                reservation_id,
                source: Box::new(source),
            },
            other => other,
        }
    }

    /// True for errors the caller can fix by retrying with different input.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Conflict(_) | Self::Payment(_)
        )
    }
}

/// Convenience alias used across the pipeline.
pub type CommerceResult<T> = Result<T, CommerceError>;

//! Strongly typed identifiers.
//!
//! Every entity is keyed by a random v4 `Uuid` wrapped in its own newtype so a
//! `VariantId` can never be passed where an `OrderItemId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Authenticated shopper. Issued by the identity layer and trusted as-is.
    UserId
);
define_id!(
    /// A purchasable product variant (the unit that carries stock).
    VariantId
);
define_id!(
    /// A coupon definition.
    CouponId
);
define_id!(
    /// Groups every hold row written by one checkout attempt.
    ReservationId
);
define_id!(
    /// One reserved-stock row.
    ReservedStockId
);
define_id!(
    /// The coupon hold paired with a reservation set.
    ReservedCouponId
);
define_id!(
    /// A saved delivery address.
    AddressId
);
define_id!(
    /// A committed order.
    OrderId
);
define_id!(
    /// One line of a committed order.
    OrderItemId
);
define_id!(
    /// Payment record of one order item.
    PaymentId
);
define_id!(
    /// Wallet ledger row.
    WalletTransactionId
);
define_id!(
    /// Return request for a delivered item.
    ReturnRequestId
);

//! Payment records and gateway sessions.

use crate::ids::{AddressId, OrderId, OrderItemId, PaymentId, ReservationId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an order is paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// Collected by the courier
    CashOnDelivery,
    /// Debited from the in-store wallet
    Wallet,
    /// Captured by the hosted payment gateway
    Gateway,
}

impl PaymentMethod {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CashOnDelivery => "cod",
            Self::Wallet => "wallet",
            Self::Gateway => "gateway",
        }
    }

    /// Parse from the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cod" => Some(Self::CashOnDelivery),
            "wallet" => Some(Self::Wallet),
            "gateway" => Some(Self::Gateway),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CashOnDelivery => "Cash On Delivery",
            Self::Wallet => "Wallet",
            Self::Gateway => "Online Payment",
        })
    }
}

/// Status of one item's payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Not collected yet
    Pending,
    /// Money received
    Completed,
    /// Gateway reported failure
    Failed,
    /// Voided before money moved
    Cancelled,
    /// Money returned to the wallet
    Refunded,
}

impl PaymentStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Parse from the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// Payment row of one order item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetail {
    /// Identifier
    pub id: PaymentId,
    /// Parent order
    pub order_id: OrderId,
    /// Item paid for
    pub order_item_id: OrderItemId,
    /// Payer
    pub user_id: UserId,
    /// Method used
    pub method: PaymentMethod,
    /// Amount attributed to the item
    pub amount: Money,
    /// Status
    pub status: PaymentStatus,
    /// Wallet or gateway transaction reference
    pub transaction_id: Option<String>,
    /// Gateway order, for gateway payments
    pub gateway_order_id: Option<String>,
    /// Gateway payment, once captured
    pub gateway_payment_id: Option<String>,
    /// Receipt reference
    pub receipt: String,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

/// What a gateway session pays for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPurpose {
    /// Settles a held reservation into a new order
    Checkout {
        /// Reservation to settle
        reservation_id: ReservationId,
        /// Delivery address chosen at checkout
        address_id: AddressId,
    },
    /// Pays again for an order whose first payment failed
    RetryOrder {
        /// Order being paid
        order_id: OrderId,
    },
    /// Adds money to the wallet
    WalletTopUp,
}

impl SessionPurpose {
    /// Database representation of the purpose kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Checkout { .. } => "checkout",
            Self::RetryOrder { .. } => "retry_order",
            Self::WalletTopUp => "wallet_top_up",
        }
    }
}

/// An in-flight gateway order.
///
/// Carries the gateway order id together with what it pays for, so concurrent
/// checkouts never share state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Gateway-issued order id
    pub gateway_order_id: String,
    /// Payer
    pub user_id: UserId,
    /// Amount requested from the gateway
    pub amount: Money,
    /// Receipt sent with the gateway order
    pub receipt: String,
    /// What the payment settles
    pub purpose: SessionPurpose,
    /// Set once a callback has been acted on
    pub consumed: bool,
    /// Created
    pub created_at: DateTime<Utc>,
}

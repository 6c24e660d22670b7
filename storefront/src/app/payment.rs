//! Payment adapters.
//!
//! Adapters only decide how an order is paid for. They never create orders;
//! the settlement engine turns their [`PaymentOutcome`] into item and payment
//! statuses.
//!
//! | Adapter | Outcome | Item status | Payment status |
//! |---|---|---|---|
//! | Cash on delivery | `Deferred` | Pending | Pending |
//! | Wallet | `Captured` | Confirmed | Completed |
//! | Gateway (verified callback) | `Captured` | Confirmed | Completed |
//! | Gateway (reported failure) | `Failed` | NotPlaced | Failed |

use super::reservation::PricedLine;
use super::wallet::{WalletMovement, apply_movement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::ids::{OrderId, UserId};
use storefront_core::order::ItemStatus;
use storefront_core::payment::{PaymentMethod, PaymentStatus};
use storefront_core::store::CommerceTx;
use storefront_core::wallet::{WalletTransactionKind, generate_transaction_id};
use storefront_core::{CommerceResult, Money, PaymentError};

/// How the customer pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentAdapter {
    /// Pay the courier
    CashOnDelivery,
    /// Pay from the wallet balance
    Wallet,
    /// Paid through the hosted gateway; only built from a verified callback
    Gateway {
        /// Gateway order id
        gateway_order_id: String,
        /// Gateway payment id
        gateway_payment_id: String,
    },
}

/// What an adapter is asked to authorize.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    /// Payer
    pub user_id: UserId,
    /// Id the order will be created with
    pub order_id: OrderId,
    /// Amount owed
    pub amount: Money,
    /// Lines being bought
    pub lines: &'a [PricedLine],
}

/// Adapter decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Collected later (cash on delivery)
    Deferred,
    /// Money has been taken
    Captured {
        /// Our transaction reference
        transaction_id: String,
        /// Gateway order id, for gateway payments
        gateway_order_id: Option<String>,
        /// Gateway payment id, for gateway payments
        gateway_payment_id: Option<String>,
    },
    /// The gateway reported the payment failed
    Failed {
        /// Gateway order id of the failed attempt
        gateway_order_id: String,
    },
}

impl PaymentOutcome {
    /// Status the order items start in.
    #[must_use]
    pub const fn item_status(&self) -> ItemStatus {
        match self {
            Self::Deferred => ItemStatus::Pending,
            Self::Captured { .. } => ItemStatus::Confirmed,
            Self::Failed { .. } => ItemStatus::NotPlaced,
        }
    }

    /// Status of each item's payment row.
    #[must_use]
    pub const fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::Deferred => PaymentStatus::Pending,
            Self::Captured { .. } => PaymentStatus::Completed,
            Self::Failed { .. } => PaymentStatus::Failed,
        }
    }

    pub(crate) fn transaction_id(&self) -> Option<String> {
        match self {
            Self::Captured { transaction_id, .. } => Some(transaction_id.clone()),
            Self::Deferred | Self::Failed { .. } => None,
        }
    }

    pub(crate) fn gateway_ids(&self) -> (Option<String>, Option<String>) {
        match self {
            Self::Captured {
                gateway_order_id,
                gateway_payment_id,
                ..
            } => (gateway_order_id.clone(), gateway_payment_id.clone()),
            Self::Failed { gateway_order_id } => (Some(gateway_order_id.clone()), None),
            Self::Deferred => (None, None),
        }
    }
}

impl PaymentAdapter {
    /// Method recorded on the order.
    #[must_use]
    pub const fn method(&self) -> PaymentMethod {
        match self {
            Self::CashOnDelivery => PaymentMethod::CashOnDelivery,
            Self::Wallet => PaymentMethod::Wallet,
            Self::Gateway { .. } => PaymentMethod::Gateway,
        }
    }

    /// Authorizes `request` inside the settlement transaction.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::CashOnDeliveryUnavailable`] naming the first line that
    ///   cannot be paid on delivery
    /// - [`PaymentError::InsufficientWalletBalance`]
    pub(crate) async fn authorize(
        &self,
        tx: &mut dyn CommerceTx,
        request: AuthorizationRequest<'_>,
        now: DateTime<Utc>,
    ) -> CommerceResult<PaymentOutcome> {
        match self {
            Self::CashOnDelivery => {
                if let Some(line) = request.lines.iter().find(|line| !line.variant.cod_available) {
                    return Err(
                        PaymentError::CashOnDeliveryUnavailable(line.variant.product_name.clone())
                            .into(),
                    );
                }
                Ok(PaymentOutcome::Deferred)
            }
            Self::Wallet => {
                let entry = apply_movement(
                    tx,
                    WalletMovement {
                        user_id: request.user_id,
                        kind: WalletTransactionKind::Debit,
                        amount: request.amount,
                        description: "Order payment".to_string(),
                        order_id: Some(request.order_id),
                        payment_method: PaymentMethod::Wallet.as_str(),
                    },
                    now,
                )
                .await?;
                Ok(PaymentOutcome::Captured {
                    transaction_id: entry.transaction_id,
                    gateway_order_id: None,
                    gateway_payment_id: None,
                })
            }
            Self::Gateway {
                gateway_order_id,
                gateway_payment_id,
            } => Ok(PaymentOutcome::Captured {
                transaction_id: generate_transaction_id(now, &mut rand::thread_rng()),
                gateway_order_id: Some(gateway_order_id.clone()),
                gateway_payment_id: Some(gateway_payment_id.clone()),
            }),
        }
    }
}

//! Hosted gateway flows.
//!
//! ```text
//!  begin_*  ──▶ create remote order ──▶ PaymentSession (not consumed)
//!                                             │
//!            callback (signature verified) ───┤
//!                                             ▼
//!     Checkout    : settle the hold, or refund to wallet if it is gone
//!     RetryOrder  : NotPlaced items ─▶ Confirmed, or refund if swept
//!     WalletTopUp : credit the wallet
//!                                             │
//!                                  session marked consumed
//! ```
//!
//! The remote call is made with no transaction open. A session is consumed in
//! the same transaction as its effect, so a duplicate callback is a conflict
//! and settlement runs at most once.

use super::Storefront;
use super::cancellation::ensure_owner;
use super::payment::{PaymentAdapter, PaymentOutcome};
use super::reservation::{ReleaseTally, release_set};
use super::settlement::{OrderDetails, load_details, prepare, settled, write_order};
use super::wallet::{WalletMovement, apply_movement};
use crate::metrics;
use crate::payment_gateway::verify_payment_signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::ids::{AddressId, OrderId, ReservationId, UserId};
use storefront_core::order::ItemStatus;
use storefront_core::payment::{PaymentMethod, PaymentSession, PaymentStatus, SessionPurpose};
use storefront_core::store::CommerceTx;
use storefront_core::wallet::{WalletTransactionKind, generate_receipt};
use storefront_core::{
    CommerceError, CommerceResult, ConflictError, Money, PaymentError, ValidationError,
};

/// What the client needs to open the gateway widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayCheckout {
    /// Public key id
    pub key_id: String,
    /// Remote order to pay
    pub gateway_order_id: String,
    /// Amount in minor units
    pub amount: Money,
    /// Currency code
    pub currency: String,
}

/// Parameters the gateway posts back after a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayCallback {
    /// Remote order id
    pub gateway_order_id: String,
    /// Remote payment id
    pub gateway_payment_id: String,
    /// Hex HMAC-SHA256 of `"{order}|{payment}"`
    pub signature: String,
}

/// Effect of a verified callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GatewayConfirmation {
    /// The hold became an order
    Settled(OrderDetails),
    /// A failed order was paid for and confirmed
    Retried(OrderDetails),
    /// The money could not be applied and went to the wallet
    Refunded {
        /// Amount credited
        amount: Money,
    },
    /// Wallet top-up credited
    ToppedUp {
        /// Amount credited
        amount: Money,
    },
}

impl Storefront {
    /// Opens a gateway payment for a held cart.
    ///
    /// # Errors
    ///
    /// The pre-payment checks of settlement (hold present, cart unchanged,
    /// address known), and [`PaymentError::Gateway`] if the remote order could
    /// not be created.
    pub async fn begin_gateway_checkout(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
        address_id: AddressId,
    ) -> CommerceResult<GatewayCheckout> {
        let amount = {
            let mut tx = self.store.begin().await?;
            let set = super::reservation::load_set(&mut *tx, user_id, reservation_id).await?;
            prepare(&mut *tx, set, address_id).await?.quote.total()
        };
        self.open_session(
            user_id,
            amount,
            SessionPurpose::Checkout {
                reservation_id,
                address_id,
            },
        )
        .await
    }

    /// Opens a gateway payment for an order whose first payment failed.
    ///
    /// # Errors
    ///
    /// [`ConflictError::InvalidTransition`] when no item is awaiting payment
    /// (already paid, or swept to `Failed`).
    pub async fn begin_retry_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> CommerceResult<GatewayCheckout> {
        let amount = {
            let mut tx = self.store.begin().await?;
            let order = tx
                .order(order_id)
                .await?
                .filter(|order| order.user_id == user_id)
                .ok_or(ValidationError::UnknownOrder(order_id))?;
            let items = tx.order_items(order_id).await?;
            let Some(first) = items.first() else {
                return Err(ValidationError::UnknownOrder(order_id).into());
            };
            if !items.iter().any(|item| item.status == ItemStatus::NotPlaced) {
                return Err(ConflictError::InvalidTransition {
                    from: first.status,
                    to: ItemStatus::Confirmed,
                }
                .into());
            }
            order.total_amount
        };
        self.open_session(user_id, amount, SessionPurpose::RetryOrder { order_id })
            .await
    }

    /// Opens a gateway payment that tops the wallet up.
    ///
    /// # Errors
    ///
    /// [`ValidationError::Invalid`] for a zero amount.
    pub async fn begin_wallet_top_up(
        &self,
        user_id: UserId,
        amount: Money,
    ) -> CommerceResult<GatewayCheckout> {
        self.open_session(user_id, amount, SessionPurpose::WalletTopUp)
            .await
    }

    async fn open_session(
        &self,
        user_id: UserId,
        amount: Money,
        purpose: SessionPurpose,
    ) -> CommerceResult<GatewayCheckout> {
        if amount.is_zero() {
            return Err(ValidationError::Invalid("nothing to pay".into()).into());
        }
        let receipt = generate_receipt();
        let remote = self
            .gateway
            .create_order(amount, &self.settings.currency, &receipt)
            .await?;

        let session = PaymentSession {
            gateway_order_id: remote.id.clone(),
            user_id,
            amount,
            receipt,
            purpose,
            consumed: false,
            created_at: self.clock.now(),
        };
        let mut tx = self.store.begin().await?;
        tx.insert_payment_session(&session).await?;
        tx.commit().await?;

        tracing::info!(
            %user_id,
            gateway_order_id = %session.gateway_order_id,
            purpose = session.purpose.kind(),
            amount = %amount,
            "Gateway session opened"
        );

        Ok(GatewayCheckout {
            key_id: self.settings.gateway_key_id.clone(),
            gateway_order_id: remote.id,
            amount,
            currency: self.settings.currency.clone(),
        })
    }

    /// Applies a successful gateway payment.
    ///
    /// The signature is checked before anything is read. A checkout whose hold
    /// has gone (expired, released, cart changed, repriced) is refunded to the
    /// wallet instead of settled.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::SignatureMismatch`]; nothing changes
    /// - [`PaymentError::UnknownGatewayOrder`]
    /// - [`ConflictError::AlreadyProcessed`] for a repeated callback
    pub async fn confirm_gateway_payment(
        &self,
        callback: &GatewayCallback,
    ) -> CommerceResult<GatewayConfirmation> {
        verify_payment_signature(
            &self.settings.gateway_key_secret,
            &callback.gateway_order_id,
            &callback.gateway_payment_id,
            &callback.signature,
        )
        .inspect_err(|_| {
            tracing::warn!(
                gateway_order_id = %callback.gateway_order_id,
                "Rejected gateway callback with bad signature"
            );
        })?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let session = open_session_row(&mut *tx, &callback.gateway_order_id).await?;
        let adapter = PaymentAdapter::Gateway {
            gateway_order_id: callback.gateway_order_id.clone(),
            gateway_payment_id: callback.gateway_payment_id.clone(),
        };

        let confirmation = match session.purpose.clone() {
            SessionPurpose::Checkout {
                reservation_id,
                address_id,
            } => {
                confirm_checkout(&mut *tx, &session, reservation_id, address_id, &adapter, now)
                    .await
                    .map_err(|e| CommerceError::settlement(reservation_id, e))?
            }
            SessionPurpose::RetryOrder { order_id } => {
                confirm_retry(&mut *tx, &session, order_id, &adapter, now).await?
            }
            SessionPurpose::WalletTopUp => {
                apply_movement(
                    &mut *tx,
                    WalletMovement {
                        user_id: session.user_id,
                        kind: WalletTransactionKind::Credit,
                        amount: session.amount,
                        description: "Wallet top-up".to_string(),
                        order_id: None,
                        payment_method: PaymentMethod::Gateway.as_str(),
                    },
                    now,
                )
                .await?;
                GatewayConfirmation::ToppedUp {
                    amount: session.amount,
                }
            }
        };

        tx.mark_session_consumed(&session.gateway_order_id).await?;
        tx.commit().await?;

        match &confirmation {
            GatewayConfirmation::Settled(details) => {
                if let SessionPurpose::Checkout { reservation_id, .. } = session.purpose {
                    settled(details, reservation_id);
                }
            }
            GatewayConfirmation::Refunded { amount } => metrics::record_refund(*amount),
            GatewayConfirmation::Retried(_) | GatewayConfirmation::ToppedUp { .. } => {}
        }
        tracing::info!(
            user_id = %session.user_id,
            gateway_order_id = %session.gateway_order_id,
            purpose = session.purpose.kind(),
            "Gateway payment confirmed"
        );
        Ok(confirmation)
    }

    /// Records a gateway payment failure for a checkout.
    ///
    /// The order is committed with every item `NotPlaced` and every payment
    /// `Failed`; the hold and the cart are disposed of and the stock now
    /// belongs to the unplaced items until they are paid for or swept.
    ///
    /// The session stays open, now paying for the unplaced order: the gateway
    /// may still capture a later attempt against the same gateway order, and
    /// that callback confirms the items (or refunds, once they are swept).
    /// Failures of retry and top-up sessions change nothing and return `None`.
    ///
    /// # Errors
    ///
    /// [`PaymentError::UnknownGatewayOrder`] for a session of another user, and
    /// the pre-payment checks of settlement.
    pub async fn record_gateway_failure(
        &self,
        user_id: UserId,
        gateway_order_id: &str,
    ) -> CommerceResult<Option<OrderDetails>> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let session = open_session_row(&mut *tx, gateway_order_id).await?;
        if session.user_id != user_id {
            return Err(PaymentError::UnknownGatewayOrder(gateway_order_id.to_string()).into());
        }
        let SessionPurpose::Checkout {
            reservation_id,
            address_id,
        } = session.purpose
        else {
            tracing::info!(
                %user_id,
                gateway_order_id,
                purpose = session.purpose.kind(),
                "Gateway failure needs no settlement"
            );
            return Ok(None);
        };

        let outcome = PaymentOutcome::Failed {
            gateway_order_id: gateway_order_id.to_string(),
        };
        let details = async {
            let set = super::reservation::load_set(&mut *tx, user_id, reservation_id).await?;
            let prepared = prepare(&mut *tx, set, address_id).await?;
            write_order(&mut *tx, prepared, PaymentMethod::Gateway, &outcome, now).await
        }
        .await
        .map_err(|e| CommerceError::settlement(reservation_id, e))?;

        tx.repurpose_session(
            gateway_order_id,
            &SessionPurpose::RetryOrder {
                order_id: details.order.id,
            },
        )
        .await?;
        tx.commit().await?;

        metrics::record_gateway_failure();
        tracing::warn!(
            %user_id,
            order_id = %details.order.id,
            gateway_order_id,
            "Gateway payment failed; order recorded as not placed"
        );
        Ok(Some(details))
    }
}

async fn open_session_row(
    tx: &mut dyn CommerceTx,
    gateway_order_id: &str,
) -> CommerceResult<PaymentSession> {
    let session = tx
        .payment_session(gateway_order_id)
        .await?
        .ok_or_else(|| PaymentError::UnknownGatewayOrder(gateway_order_id.to_string()))?;
    if session.consumed {
        return Err(ConflictError::AlreadyProcessed(gateway_order_id.to_string()).into());
    }
    Ok(session)
}

async fn confirm_checkout(
    tx: &mut dyn CommerceTx,
    session: &PaymentSession,
    reservation_id: ReservationId,
    address_id: AddressId,
    adapter: &PaymentAdapter,
    now: DateTime<Utc>,
) -> CommerceResult<GatewayConfirmation> {
    let held = tx
        .reservation_set(reservation_id)
        .await?
        .filter(|set| set.user_id == session.user_id);

    let Some(set) = held else {
        tracing::warn!(%reservation_id, "Payment arrived after the hold was released");
        return refund_session(tx, session, None, now).await;
    };

    let prepared = match prepare(tx, set.clone(), address_id).await {
        Ok(prepared) if prepared.quote.total() == session.amount => prepared,
        Ok(prepared) => {
            tracing::warn!(
                %reservation_id,
                paid = %session.amount,
                owed = %prepared.quote.total(),
                "Paid amount no longer matches the hold"
            );
            let mut tally = ReleaseTally::default();
            release_set(tx, set, &mut tally).await?;
            return refund_session(tx, session, None, now).await;
        }
        Err(e) if e.is_user_facing() => {
            tracing::warn!(%reservation_id, error = %e, "Hold cannot be settled");
            let mut tally = ReleaseTally::default();
            release_set(tx, set, &mut tally).await?;
            return refund_session(tx, session, None, now).await;
        }
        Err(e) => return Err(e),
    };

    let outcome = adapter.authorize(tx, prepared.request(), now).await?;
    let details = write_order(tx, prepared, PaymentMethod::Gateway, &outcome, now).await?;
    Ok(GatewayConfirmation::Settled(details))
}

async fn confirm_retry(
    tx: &mut dyn CommerceTx,
    session: &PaymentSession,
    order_id: OrderId,
    adapter: &PaymentAdapter,
    now: DateTime<Utc>,
) -> CommerceResult<GatewayConfirmation> {
    let order = tx
        .order(order_id)
        .await?
        .ok_or(ValidationError::UnknownOrder(order_id))?;
    ensure_owner(order.user_id, session.user_id, order_id)?;

    let items = tx.order_items(order_id).await?;
    if !items.iter().any(|item| item.status == ItemStatus::NotPlaced) {
        tracing::warn!(%order_id, "Retry paid after the order was swept");
        return refund_session(tx, session, Some(order_id), now).await;
    }

    let outcome = adapter
        .authorize(
            tx,
            super::payment::AuthorizationRequest {
                user_id: session.user_id,
                order_id,
                amount: session.amount,
                lines: &[],
            },
            now,
        )
        .await?;
    let (gateway_order_id, gateway_payment_id) = outcome.gateway_ids();

    for mut item in items {
        if item.status != ItemStatus::NotPlaced {
            continue;
        }
        item.set_status(outcome.item_status(), now);
        tx.update_order_item(&item).await?;
        if let Some(mut payment) = tx.payment_for_item(item.id).await? {
            payment.status = PaymentStatus::Completed;
            payment.transaction_id = outcome.transaction_id();
            payment.gateway_order_id.clone_from(&gateway_order_id);
            payment.gateway_payment_id.clone_from(&gateway_payment_id);
            payment.updated_at = now;
            tx.update_payment(&payment).await?;
        }
    }

    let details = load_details(tx, order).await?;
    tracing::info!(%order_id, "Unplaced order confirmed after retry");
    Ok(GatewayConfirmation::Retried(details))
}

async fn refund_session(
    tx: &mut dyn CommerceTx,
    session: &PaymentSession,
    order_id: Option<OrderId>,
    now: DateTime<Utc>,
) -> CommerceResult<GatewayConfirmation> {
    apply_movement(
        tx,
        WalletMovement {
            user_id: session.user_id,
            kind: WalletTransactionKind::Refund,
            amount: session.amount,
            description: "Refund for payment that could not be applied".to_string(),
            order_id,
            payment_method: PaymentMethod::Gateway.as_str(),
        },
        now,
    )
    .await?;
    Ok(GatewayConfirmation::Refunded {
        amount: session.amount,
    })
}

//! Order settlement engine.
//!
//! Settlement is the only writer of orders. In one transaction it:
//!
//! 1. Locks the reservation rows (absent rows mean released or settled)
//! 2. Checks the cart still matches the hold
//! 3. Prices the hold and snapshots the shipping address
//! 4. Authorizes payment
//! 5. Writes the order, its items and one payment row per item
//! 6. Deletes the hold rows and clears the cart
//!
//! Stock is never touched here: it was debited when the hold was taken and now
//! belongs to the order items. If anything fails the transaction rolls back,
//! the hold stays debited, and the sweeper reclaims it on expiry.

use super::Storefront;
use super::payment::{AuthorizationRequest, PaymentAdapter, PaymentOutcome};
use super::reservation::{Quote, load_set, price_set};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use storefront_core::catalog::Address;
use storefront_core::ids::{AddressId, OrderId, OrderItemId, PaymentId, ReservationId, UserId};
use storefront_core::order::{AppliedCoupon, Order, OrderItem, generate_order_uid};
use storefront_core::payment::{PaymentDetail, PaymentMethod};
use storefront_core::pricing::{allocate, delivery_window};
use storefront_core::reservation::ReservationSet;
use storefront_core::store::CommerceTx;
use storefront_core::wallet::generate_receipt;
use storefront_core::{CommerceError, CommerceResult, ConflictError, Money, ValidationError};

/// An order with its items and their payment rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    /// The order
    pub order: Order,
    /// Items in insertion order
    pub items: Vec<OrderItem>,
    /// One payment row per item, same order as `items`
    pub payments: Vec<PaymentDetail>,
}

/// A hold that passed every pre-payment check.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub order_id: OrderId,
    pub quote: Quote,
    pub address: Address,
}

impl Prepared {
    pub(crate) fn request(&self) -> AuthorizationRequest<'_> {
        AuthorizationRequest {
            user_id: self.quote.user_id,
            order_id: self.order_id,
            amount: self.quote.total(),
            lines: &self.quote.lines,
        }
    }
}

/// Cart consistency check.
///
/// # Errors
///
/// [`ConflictError::CartChanged`] if the cart no longer holds exactly the
/// reserved variants and quantities.
pub(crate) async fn verify_matches_cart(
    tx: &mut dyn CommerceTx,
    set: &ReservationSet,
) -> CommerceResult<()> {
    let cart = tx.cart_items(set.user_id).await?;
    if set.matches_cart(&cart) {
        Ok(())
    } else {
        Err(ConflictError::CartChanged.into())
    }
}

/// Runs the checks that precede payment and prices the hold.
pub(crate) async fn prepare(
    tx: &mut dyn CommerceTx,
    set: ReservationSet,
    address_id: AddressId,
) -> CommerceResult<Prepared> {
    verify_matches_cart(tx, &set).await?;
    let address = tx
        .address(set.user_id, address_id)
        .await?
        .ok_or(ValidationError::UnknownAddress)?;
    let quote = price_set(tx, set).await?;
    Ok(Prepared {
        order_id: OrderId::new(),
        quote,
        address,
    })
}

/// Writes the order for a prepared hold and disposes of the hold.
pub(crate) async fn write_order(
    tx: &mut dyn CommerceTx,
    prepared: Prepared,
    method: PaymentMethod,
    outcome: &PaymentOutcome,
    now: DateTime<Utc>,
) -> CommerceResult<OrderDetails> {
    let Prepared {
        order_id,
        quote,
        address,
    } = prepared;
    let user_id = quote.user_id;
    let breakdown = quote.breakdown;

    let coupon = match &quote.coupon {
        Some(hold) => {
            let min_order_value = tx
                .coupon(hold.coupon_id)
                .await?
                .map_or(Money::ZERO, |coupon| coupon.min_order_value);
            Some(AppliedCoupon {
                coupon_id: hold.coupon_id,
                code: hold.coupon_code.clone(),
                description: hold.description.clone(),
                discount: breakdown.coupon_discount,
                min_order_value,
            })
        }
        None => None,
    };

    let order = Order {
        id: order_id,
        uid: generate_order_uid(&mut rand::thread_rng()),
        user_id,
        sub_total: breakdown.sub_total,
        product_discount: breakdown.product_discount,
        tax: breakdown.tax,
        shipping_charge: breakdown.shipping,
        total_amount: breakdown.total,
        coupon,
        payment_method: method,
        shipping_address: (&address).into(),
        ordered_at: now,
        expected_delivery: now + delivery_window(),
    };
    tx.insert_order(&order).await?;

    let weights: Vec<Money> = quote.lines.iter().map(|line| line.price.sub_total).collect();
    let shares = allocate(breakdown.coupon_discount, &weights)?;
    let receipt = generate_receipt();
    let (gateway_order_id, gateway_payment_id) = outcome.gateway_ids();

    let mut items = Vec::with_capacity(quote.lines.len());
    let mut payments = Vec::with_capacity(quote.lines.len());
    for (line, share) in quote.lines.iter().zip(shares) {
        let item = OrderItem {
            id: OrderItemId::new(),
            order_id,
            user_id,
            variant_id: line.variant.id,
            product_name: line.variant.product_name.clone(),
            category: line.variant.category.clone(),
            image: line.variant.image.clone(),
            unit_regular_price: line.price.unit_regular,
            unit_price: line.price.unit_price,
            quantity: line.price.quantity,
            sub_total: line.price.sub_total,
            product_discount: line.price.product_discount,
            tax: line.price.tax,
            coupon_share: share,
            total: line.price.gross()?.saturating_sub(share),
            status: outcome.item_status(),
            reason: None,
            created_at: now,
            updated_at: now,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            returned_at: None,
            return_deadline: None,
        };
        tx.insert_order_item(&item).await?;

        let payment = PaymentDetail {
            id: PaymentId::new(),
            order_id,
            order_item_id: item.id,
            user_id,
            method,
            amount: item.total,
            status: outcome.payment_status(),
            transaction_id: outcome.transaction_id(),
            gateway_order_id: gateway_order_id.clone(),
            gateway_payment_id: gateway_payment_id.clone(),
            receipt: receipt.clone(),
            created_at: now,
            updated_at: now,
        };
        tx.insert_payment(&payment).await?;

        items.push(item);
        payments.push(payment);
    }

    for line in &quote.lines {
        if !tx.delete_reserved_stock(line.hold.id).await? {
            return Err(ConflictError::ReservationReleased(quote.reservation_id).into());
        }
    }
    if let Some(hold) = &quote.coupon {
        tx.delete_reserved_coupon(hold.id).await?;
    }
    tx.clear_cart(user_id).await?;

    Ok(OrderDetails {
        order,
        items,
        payments,
    })
}

impl Storefront {
    /// Settles a held cart with cash on delivery or the wallet.
    ///
    /// Gateway payments settle through
    /// [`confirm_gateway_payment`](Storefront::confirm_gateway_payment) once the
    /// callback signature is verified.
    ///
    /// # Errors
    ///
    /// - [`ConflictError::ReservationReleased`] if the hold is gone
    /// - [`ConflictError::CartChanged`] if the cart no longer matches the hold
    /// - [`ValidationError::UnknownAddress`]
    /// - any [`PaymentError`](storefront_core::PaymentError) from the adapter;
    ///   the hold stays in place
    /// - [`CommerceError::Settlement`] if the write could not commit
    pub async fn checkout(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
        address_id: AddressId,
        adapter: &PaymentAdapter,
    ) -> CommerceResult<OrderDetails> {
        if matches!(adapter, PaymentAdapter::Gateway { .. }) {
            return Err(ValidationError::Invalid(
                "gateway payments settle through the verified callback".into(),
            )
            .into());
        }
        self.settle(user_id, reservation_id, address_id, adapter)
            .await
            .map_err(|e| CommerceError::settlement(reservation_id, e))
    }

    async fn settle(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
        address_id: AddressId,
        adapter: &PaymentAdapter,
    ) -> CommerceResult<OrderDetails> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let set = load_set(&mut *tx, user_id, reservation_id).await?;
        let prepared = prepare(&mut *tx, set, address_id).await?;
        let outcome = adapter.authorize(&mut *tx, prepared.request(), now).await?;
        let details = write_order(&mut *tx, prepared, adapter.method(), &outcome, now).await?;
        tx.commit().await?;

        settled(&details, reservation_id);
        Ok(details)
    }

    /// An order with its items and payments.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownOrder`] if the order does not exist or
    /// belongs to someone else.
    pub async fn order_details(&self, user_id: UserId, order_id: OrderId) -> CommerceResult<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(ValidationError::UnknownOrder(order_id))?;
        load_details(&mut *tx, order).await
    }

    /// Every order the user placed.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn orders(&self, user_id: UserId) -> CommerceResult<Vec<Order>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.orders_for_user(user_id).await?)
    }
}

pub(crate) async fn load_details(tx: &mut dyn CommerceTx, order: Order) -> CommerceResult<OrderDetails> {
    let items = tx.order_items(order.id).await?;
    let mut payments = Vec::with_capacity(items.len());
    for item in &items {
        if let Some(payment) = tx.payment_for_item(item.id).await? {
            payments.push(payment);
        }
    }
    Ok(OrderDetails {
        order,
        items,
        payments,
    })
}

pub(crate) fn settled(details: &OrderDetails, reservation_id: ReservationId) {
    metrics::record_order_settled(details.order.payment_method, details.order.total_amount);
    tracing::info!(
        user_id = %details.order.user_id,
        order_id = %details.order.id,
        order_uid = %details.order.uid,
        %reservation_id,
        method = details.order.payment_method.as_str(),
        items = details.items.len(),
        total = %details.order.total_amount,
        "Order settled"
    );
}

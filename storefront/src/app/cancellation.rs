//! Item cancellation and the refund computation shared with returns.
//!
//! Withdrawing items from an order (cancel or approved return) reprices what
//! is left with the same policy used at checkout:
//!
//! ```text
//! before = breakdown(active items, current coupon)
//! after  = breakdown(remaining active items, coupon if still eligible)
//! refund = before.total - after.total        (prepaid items only)
//! ```
//!
//! The coupon survives only while active items remain and their sub-total
//! still meets its minimum; otherwise its use is handed back and the discount
//! disappears from every remaining item. A negative refund is deducted from
//! the wallet.

use super::Storefront;
use super::wallet::{WalletMovement, apply_movement};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use storefront_core::ids::{OrderId, OrderItemId, UserId};
use storefront_core::order::{ItemStatus, Order, OrderItem};
use storefront_core::payment::PaymentStatus;
use storefront_core::pricing::{Breakdown, allocate};
use storefront_core::store::CommerceTx;
use storefront_core::wallet::WalletTransactionKind;
use storefront_core::{CommerceResult, ConflictError, Money, ValidationError};

/// Money movements and totals after items left an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationReceipt {
    /// Order the items belonged to
    pub order_id: OrderId,
    /// Items withdrawn by this call
    pub items: Vec<OrderItemId>,
    /// Credited to the wallet
    pub refunded: Money,
    /// Taken from the wallet because the remaining items lost a discount
    pub deducted: Money,
    /// Whether the order's coupon was stripped
    pub coupon_removed: bool,
    /// Order total after the change
    pub order_total: Money,
}

/// Returns [`ValidationError::UnknownOrder`] unless `caller` owns the order.
pub(crate) fn ensure_owner(owner: UserId, caller: UserId, order_id: OrderId) -> CommerceResult<()> {
    if owner == caller {
        Ok(())
    } else {
        Err(ValidationError::UnknownOrder(order_id).into())
    }
}

fn breakdown_of<'a, I>(items: I, coupon_discount: Money) -> CommerceResult<Breakdown>
where
    I: IntoIterator<Item = &'a OrderItem>,
{
    let mut sub_total = Money::ZERO;
    let mut product_discount = Money::ZERO;
    let mut tax = Money::ZERO;
    for item in items {
        sub_total = sub_total
            .checked_add(item.sub_total)
            .ok_or(ValidationError::AmountOverflow)?;
        product_discount = product_discount
            .checked_add(item.product_discount)
            .ok_or(ValidationError::AmountOverflow)?;
        tax = tax
            .checked_add(item.tax)
            .ok_or(ValidationError::AmountOverflow)?;
    }
    Ok(Breakdown::from_totals(
        sub_total,
        product_discount,
        tax,
        coupon_discount,
    )?)
}

/// Moves `targets` to `status` (`Cancelled` or `Returned`), reprices the rest
/// of the order and settles the difference with the wallet.
pub(crate) async fn withdraw_items(
    tx: &mut dyn CommerceTx,
    mut order: Order,
    mut items: Vec<OrderItem>,
    targets: &[OrderItemId],
    status: ItemStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> CommerceResult<CancellationReceipt> {
    if let Some(missing) = targets
        .iter()
        .find(|id| !items.iter().any(|item| item.id == **id))
    {
        return Err(ValidationError::UnknownOrderItem(*missing).into());
    }

    let before = breakdown_of(
        items.iter().filter(|item| item.status.is_active()),
        order.coupon_discount(),
    )?;

    for item in items.iter_mut().filter(|item| targets.contains(&item.id)) {
        let next = match status {
            ItemStatus::Returned if item.status == ItemStatus::Delivered => ItemStatus::Returned,
            ItemStatus::Cancelled => item.status.cancel()?,
            other => {
                return Err(ConflictError::InvalidTransition {
                    from: item.status,
                    to: other,
                }
                .into());
            }
        };
        item.set_status(next, now);
        item.reason = Some(reason.to_string());
        tx.credit_stock(item.variant_id, item.quantity).await?;
    }

    let remaining: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.status.is_active())
        .map(|(index, _)| index)
        .collect();
    let weights: Vec<Money> = remaining.iter().map(|&i| items[i].sub_total).collect();
    let remaining_sub_total =
        Money::checked_sum(weights.iter().copied()).ok_or(ValidationError::AmountOverflow)?;

    let keep_coupon = order.coupon.as_ref().is_some_and(|coupon| {
        !remaining.is_empty() && remaining_sub_total >= coupon.min_order_value
    });
    let mut coupon_removed = false;
    if !keep_coupon {
        if let Some(coupon) = order.coupon.take() {
            tx.release_coupon_use(coupon.coupon_id).await?;
            coupon_removed = true;
        }
    }
    if let Some(coupon) = order.coupon.as_mut() {
        coupon.discount = coupon.discount.min(remaining_sub_total);
    }

    let shares = allocate(order.coupon_discount(), &weights)?;
    for (&index, share) in remaining.iter().zip(shares) {
        let item = &mut items[index];
        item.coupon_share = share;
        item.total = item.gross()?.saturating_sub(share);
        item.updated_at = now;
    }

    let mut prepaid = false;
    for item in &items {
        let is_target = targets.contains(&item.id);
        if !is_target && !item.status.is_active() {
            continue;
        }
        tx.update_order_item(item).await?;

        let Some(mut payment) = tx.payment_for_item(item.id).await? else {
            continue;
        };
        if is_target {
            payment.status = match payment.status {
                PaymentStatus::Completed => {
                    prepaid = true;
                    PaymentStatus::Refunded
                }
                PaymentStatus::Pending | PaymentStatus::Failed => PaymentStatus::Cancelled,
                settled @ (PaymentStatus::Cancelled | PaymentStatus::Refunded) => settled,
            };
        } else if payment.status == PaymentStatus::Pending {
            payment.amount = item.total;
        } else {
            continue;
        }
        payment.updated_at = now;
        tx.update_payment(&payment).await?;
    }

    let after = breakdown_of(
        remaining.iter().map(|&i| &items[i]),
        order.coupon_discount(),
    )?;
    order.sub_total = after.sub_total;
    order.product_discount = after.product_discount;
    order.tax = after.tax;
    order.shipping_charge = after.shipping;
    order.total_amount = after.total;
    tx.update_order(&order).await?;

    let (mut refunded, mut deducted) = (Money::ZERO, Money::ZERO);
    if prepaid {
        if before.total >= after.total {
            refunded = before.total.saturating_sub(after.total);
        } else {
            deducted = after.total.saturating_sub(before.total);
        }
    }
    let description = match status {
        ItemStatus::Returned => "Refund for returned item",
        _ => "Refund for cancelled item",
    };
    if !refunded.is_zero() {
        apply_movement(
            tx,
            WalletMovement {
                user_id: order.user_id,
                kind: WalletTransactionKind::Refund,
                amount: refunded,
                description: description.to_string(),
                order_id: Some(order.id),
                payment_method: order.payment_method.as_str(),
            },
            now,
        )
        .await?;
    }
    if !deducted.is_zero() {
        apply_movement(
            tx,
            WalletMovement {
                user_id: order.user_id,
                kind: WalletTransactionKind::Deduct,
                amount: deducted,
                description: "Coupon discount withdrawn after cancellation".to_string(),
                order_id: Some(order.id),
                payment_method: order.payment_method.as_str(),
            },
            now,
        )
        .await?;
    }

    Ok(CancellationReceipt {
        order_id: order.id,
        items: targets.to_vec(),
        refunded,
        deducted,
        coupon_removed,
        order_total: order.total_amount,
    })
}

/// Cancels one item; `caller` is `None` for admin cancellations.
pub(crate) async fn cancel_in(
    tx: &mut dyn CommerceTx,
    item_id: OrderItemId,
    caller: Option<UserId>,
    reason: &str,
    now: DateTime<Utc>,
) -> CommerceResult<CancellationReceipt> {
    let item = tx
        .order_item(item_id)
        .await?
        .ok_or(ValidationError::UnknownOrderItem(item_id))?;
    if caller.is_some_and(|user| user != item.user_id) {
        return Err(ValidationError::UnknownOrderItem(item_id).into());
    }
    let order = tx
        .order(item.order_id)
        .await?
        .ok_or(ValidationError::UnknownOrder(item.order_id))?;
    let items = tx.order_items(order.id).await?;
    withdraw_items(tx, order, items, &[item_id], ItemStatus::Cancelled, reason, now).await
}

pub(crate) fn withdrawn(receipt: &CancellationReceipt, what: &'static str) {
    if !receipt.refunded.is_zero() {
        metrics::record_refund(receipt.refunded);
    }
    tracing::info!(
        order_id = %receipt.order_id,
        items = receipt.items.len(),
        refunded = %receipt.refunded,
        deducted = %receipt.deducted,
        coupon_removed = receipt.coupon_removed,
        order_total = %receipt.order_total,
        "{what}"
    );
}

impl Storefront {
    /// Cancels one item of the caller's order.
    ///
    /// # Errors
    ///
    /// - [`ConflictError::InvalidTransition`] from `Delivered`, `NotPlaced`
    ///   or an absorbing status
    /// - [`PaymentError::InsufficientWalletBalance`](storefront_core::PaymentError::InsufficientWalletBalance)
    ///   when losing the coupon leaves the user owing more than the wallet holds
    pub async fn cancel_item(
        &self,
        user_id: UserId,
        item_id: OrderItemId,
        reason: &str,
    ) -> CommerceResult<CancellationReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let receipt = cancel_in(&mut *tx, item_id, Some(user_id), reason, now).await?;
        tx.commit().await?;
        withdrawn(&receipt, "Order item cancelled");
        Ok(receipt)
    }

    /// Cancels every still-cancellable item of an order.
    ///
    /// Items already cancelled, failed or returned are skipped.
    ///
    /// # Errors
    ///
    /// - [`ConflictError::InvalidTransition`] if any item is `Delivered` or
    ///   `NotPlaced`
    /// - [`ConflictError::NothingToCancel`] if no item is cancellable
    pub async fn cancel_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
        reason: &str,
    ) -> CommerceResult<CancellationReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let order = tx
            .order(order_id)
            .await?
            .ok_or(ValidationError::UnknownOrder(order_id))?;
        ensure_owner(order.user_id, user_id, order_id)?;

        let items = tx.order_items(order_id).await?;
        if let Some(blocking) = items
            .iter()
            .find(|item| matches!(item.status, ItemStatus::Delivered | ItemStatus::NotPlaced))
        {
            return Err(ConflictError::InvalidTransition {
                from: blocking.status,
                to: ItemStatus::Cancelled,
            }
            .into());
        }
        let targets: Vec<OrderItemId> = items
            .iter()
            .filter(|item| item.status.is_cancellable())
            .map(|item| item.id)
            .collect();
        if targets.is_empty() {
            return Err(ConflictError::NothingToCancel(order_id).into());
        }

        let receipt = withdraw_items(
            &mut *tx,
            order,
            items,
            &targets,
            ItemStatus::Cancelled,
            reason,
            now,
        )
        .await?;
        tx.commit().await?;
        withdrawn(&receipt, "Order cancelled");
        Ok(receipt)
    }
}

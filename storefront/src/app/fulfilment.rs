//! Admin status transitions and the return workflow.

use super::Storefront;
use super::cancellation::{CancellationReceipt, cancel_in, withdraw_items, withdrawn};
use storefront_core::ids::{OrderItemId, ReturnRequestId, UserId};
use storefront_core::order::{ItemStatus, OrderItem};
use storefront_core::payment::PaymentStatus;
use storefront_core::returns::{ReturnRequest, ReturnStatus};
use storefront_core::wallet::generate_transaction_id;
use storefront_core::{CommerceResult, ConflictError, ValidationError};

const ADMIN_CANCEL_REASON: &str = "cancelled by admin";

impl Storefront {
    /// Moves an item forward along
    /// `Pending → Confirmed → Shipped → OutForDelivery → Delivered`.
    ///
    /// `Cancelled` goes through the regular cancel path, refund included.
    /// Delivering a cash-on-delivery item marks its payment completed.
    ///
    /// # Errors
    ///
    /// [`ConflictError::InvalidTransition`] for backward moves, moves out of
    /// absorbing states, and `Returned` (use the return workflow).
    pub async fn advance_item_status(
        &self,
        item_id: OrderItemId,
        next: ItemStatus,
    ) -> CommerceResult<OrderItem> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        if next == ItemStatus::Cancelled {
            let receipt = cancel_in(&mut *tx, item_id, None, ADMIN_CANCEL_REASON, now).await?;
            let item = tx
                .order_item(item_id)
                .await?
                .ok_or(ValidationError::UnknownOrderItem(item_id))?;
            tx.commit().await?;
            withdrawn(&receipt, "Order item cancelled by admin");
            return Ok(item);
        }

        let mut item = tx
            .order_item(item_id)
            .await?
            .ok_or(ValidationError::UnknownOrderItem(item_id))?;
        let from = item.status;
        let to = from.advance_to(next)?;
        item.set_status(to, now);
        tx.update_order_item(&item).await?;

        if to == ItemStatus::Delivered {
            if let Some(mut payment) = tx.payment_for_item(item_id).await? {
                if payment.status == PaymentStatus::Pending {
                    payment.status = PaymentStatus::Completed;
                    payment.transaction_id = Some(generate_transaction_id(now, &mut rand::thread_rng()));
                    payment.updated_at = now;
                    tx.update_payment(&payment).await?;
                }
            }
        }
        tx.commit().await?;

        tracing::info!(%item_id, %from, %to, "Order item status updated");
        Ok(item)
    }

    /// Opens a return request for a delivered item.
    ///
    /// # Errors
    ///
    /// - [`ConflictError::InvalidTransition`] unless the item is `Delivered`
    /// - [`ConflictError::ReturnWindowClosed`] after the return deadline
    /// - [`ConflictError::ReturnAlreadyRequested`] for a second request
    pub async fn request_return(
        &self,
        user_id: UserId,
        item_id: OrderItemId,
        reason: &str,
    ) -> CommerceResult<ReturnRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let item = tx
            .order_item(item_id)
            .await?
            .filter(|item| item.user_id == user_id)
            .ok_or(ValidationError::UnknownOrderItem(item_id))?;

        if item.status != ItemStatus::Delivered {
            return Err(ConflictError::InvalidTransition {
                from: item.status,
                to: ItemStatus::Returned,
            }
            .into());
        }
        if item.return_deadline.is_none_or(|deadline| now > deadline) {
            return Err(ConflictError::ReturnWindowClosed.into());
        }
        if tx.return_request_for_item(item_id).await?.is_some() {
            return Err(ConflictError::ReturnAlreadyRequested.into());
        }

        let request = ReturnRequest {
            id: ReturnRequestId::new(),
            order_item_id: item_id,
            user_id,
            reason: reason.trim().to_string(),
            status: ReturnStatus::Pending,
            requested_at: now,
            resolved_at: None,
        };
        tx.insert_return_request(&request).await?;
        tx.commit().await?;

        tracing::info!(%user_id, %item_id, request_id = %request.id, "Return requested");
        Ok(request)
    }

    /// Approves a pending return: the item becomes `Returned`, stock comes
    /// back and the refund is computed as for a cancellation.
    ///
    /// # Errors
    ///
    /// [`ConflictError::AlreadyProcessed`] if the request was already resolved.
    pub async fn approve_return(
        &self,
        request_id: ReturnRequestId,
    ) -> CommerceResult<CancellationReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut request = pending_request(&mut *tx, request_id).await?;

        let item = tx
            .order_item(request.order_item_id)
            .await?
            .ok_or(ValidationError::UnknownOrderItem(request.order_item_id))?;
        let order = tx
            .order(item.order_id)
            .await?
            .ok_or(ValidationError::UnknownOrder(item.order_id))?;
        let items = tx.order_items(order.id).await?;
        let reason = request.reason.clone();
        let receipt = withdraw_items(
            &mut *tx,
            order,
            items,
            &[item.id],
            ItemStatus::Returned,
            &reason,
            now,
        )
        .await?;

        request.status = ReturnStatus::Approved;
        request.resolved_at = Some(now);
        tx.update_return_request(&request).await?;
        tx.commit().await?;

        withdrawn(&receipt, "Return approved");
        Ok(receipt)
    }

    /// Rejects a pending return; the item stays delivered.
    ///
    /// # Errors
    ///
    /// [`ConflictError::AlreadyProcessed`] if the request was already resolved.
    pub async fn reject_return(&self, request_id: ReturnRequestId) -> CommerceResult<ReturnRequest> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut request = pending_request(&mut *tx, request_id).await?;
        request.status = ReturnStatus::Rejected;
        request.resolved_at = Some(now);
        tx.update_return_request(&request).await?;
        tx.commit().await?;

        tracing::info!(%request_id, item_id = %request.order_item_id, "Return rejected");
        Ok(request)
    }
}

async fn pending_request(
    tx: &mut dyn storefront_core::store::CommerceTx,
    request_id: ReturnRequestId,
) -> CommerceResult<ReturnRequest> {
    let request = tx
        .return_request(request_id)
        .await?
        .ok_or(ValidationError::UnknownReturnRequest)?;
    if request.status == ReturnStatus::Pending {
        Ok(request)
    } else {
        Err(ConflictError::AlreadyProcessed(request_id.to_string()).into())
    }
}

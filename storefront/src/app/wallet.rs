//! Wallet balance, ledger reads and the single write path for balance moves.

use super::Storefront;
use chrono::{DateTime, Utc};
use storefront_core::ids::{OrderId, UserId, WalletTransactionId};
use storefront_core::store::CommerceTx;
use storefront_core::wallet::{
    WalletTransaction, WalletTransactionKind, generate_receipt, generate_transaction_id,
};
use storefront_core::{CommerceResult, Money, PaymentError, ValidationError};

/// One balance change, written together with its ledger row.
#[derive(Debug, Clone)]
pub(crate) struct WalletMovement {
    pub user_id: UserId,
    pub kind: WalletTransactionKind,
    pub amount: Money,
    pub description: String,
    pub order_id: Option<OrderId>,
    pub payment_method: &'static str,
}

/// Applies `movement` to the locked wallet row and appends the ledger entry.
///
/// Outflows never take the balance below zero.
pub(crate) async fn apply_movement(
    tx: &mut dyn CommerceTx,
    movement: WalletMovement,
    now: DateTime<Utc>,
) -> CommerceResult<WalletTransaction> {
    let mut wallet = tx.lock_wallet(movement.user_id, now).await?;
    let last_balance = wallet.balance;

    wallet.balance = if movement.kind.is_inflow() {
        wallet
            .balance
            .checked_add(movement.amount)
            .ok_or(ValidationError::AmountOverflow)?
    } else {
        wallet
            .balance
            .checked_sub(movement.amount)
            .ok_or(PaymentError::InsufficientWalletBalance {
                required: movement.amount,
                available: wallet.balance,
            })?
    };
    wallet.updated_at = now;
    tx.save_wallet(&wallet).await?;

    let entry = WalletTransaction {
        id: WalletTransactionId::new(),
        user_id: movement.user_id,
        kind: movement.kind,
        amount: movement.amount,
        description: movement.description,
        order_id: movement.order_id,
        receipt: generate_receipt(),
        transaction_id: generate_transaction_id(now, &mut rand::thread_rng()),
        payment_method: movement.payment_method.to_string(),
        last_balance,
        created_at: now,
    };
    tx.insert_wallet_transaction(&entry).await?;

    tracing::debug!(
        user_id = %entry.user_id,
        kind = entry.kind.as_str(),
        amount = %entry.amount,
        balance = %wallet.balance,
        "Wallet updated"
    );
    Ok(entry)
}

impl Storefront {
    /// Current wallet balance; zero for users without a wallet row.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn wallet_balance(&self, user_id: UserId) -> CommerceResult<Money> {
        let mut tx = self.store.begin().await?;
        Ok(tx
            .wallet(user_id)
            .await?
            .map_or(Money::ZERO, |wallet| wallet.balance))
    }

    /// Ledger rows, oldest first.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn wallet_history(&self, user_id: UserId) -> CommerceResult<Vec<WalletTransaction>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.wallet_transactions(user_id).await?)
    }
}

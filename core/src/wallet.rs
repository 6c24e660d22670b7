//! Wallet balance and its append-only ledger.

use crate::ids::{OrderId, UserId, WalletTransactionId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's wallet. Created lazily on first use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner
    pub user_id: UserId,
    /// Spendable balance
    pub balance: Money,
    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// An empty wallet for `user_id`.
    #[must_use]
    pub const fn empty(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Money::ZERO,
            updated_at: now,
        }
    }
}

/// Direction and cause of a wallet movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletTransactionKind {
    /// Money added (top-up)
    Credit,
    /// Money spent on an order
    Debit,
    /// Money returned for a cancelled or returned item
    Refund,
    /// Money clawed back (coupon no longer earned)
    Deduct,
}

impl WalletTransactionKind {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::Refund => "refund",
            Self::Deduct => "deduct",
        }
    }

    /// Parse from the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            "refund" => Some(Self::Refund),
            "deduct" => Some(Self::Deduct),
            _ => None,
        }
    }

    /// Whether the movement increases the balance.
    #[must_use]
    pub const fn is_inflow(&self) -> bool {
        matches!(self, Self::Credit | Self::Refund)
    }
}

/// Immutable ledger row. `last_balance` is the balance before the movement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Identifier
    pub id: WalletTransactionId,
    /// Owner
    pub user_id: UserId,
    /// Movement kind
    pub kind: WalletTransactionKind,
    /// Amount moved
    pub amount: Money,
    /// Human-readable description
    pub description: String,
    /// Order the movement relates to
    pub order_id: Option<OrderId>,
    /// Receipt reference, `rcpt_<uuid>`
    pub receipt: String,
    /// Transaction reference, `TXN-<nanos>-<random>`
    pub transaction_id: String,
    /// Payment method of the originating payment
    pub payment_method: String,
    /// Balance before this movement
    pub last_balance: Money,
    /// Recorded at
    pub created_at: DateTime<Utc>,
}

/// Receipt reference for ledger rows and gateway orders.
#[must_use]
pub fn generate_receipt() -> String {
    format!("rcpt_{}", Uuid::new_v4())
}

/// Transaction reference such as `TXN-1735689600000000000-4821`.
pub fn generate_transaction_id<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros());
    format!("TXN-{nanos}-{:04}", rng.gen_range(0..10_000)).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_have_expected_prefixes() {
        assert!(generate_receipt().starts_with("rcpt_"));
        let txn = generate_transaction_id(Utc::now(), &mut rand::thread_rng());
        assert!(txn.starts_with("TXN-"));
        assert_eq!(txn.split('-').count(), 3);
    }

    #[test]
    fn inflow_kinds() {
        assert!(WalletTransactionKind::Refund.is_inflow());
        assert!(WalletTransactionKind::Credit.is_inflow());
        assert!(!WalletTransactionKind::Deduct.is_inflow());
        assert!(!WalletTransactionKind::Debit.is_inflow());
    }
}

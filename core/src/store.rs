//! Transactional persistence seam.
//!
//! Every multi-row mutation of the pipeline runs inside one [`CommerceTx`]:
//! the caller opens it with [`CommerceStore::begin`], performs reads and
//! writes, and calls [`CommerceTx::commit`]. Dropping a transaction without
//! committing discards every write made through it, so an early `?` return
//! is always a rollback.
//!
//! # Locking contract
//!
//! Implementations must give at least read-committed isolation and must lock
//! the rows a transaction reads for modification:
//!
//! - reads documented as *locking* keep the returned rows locked until the
//!   transaction ends (`SELECT ... FOR UPDATE` in `PostgreSQL`);
//! - [`CommerceTx::debit_stock`] and [`CommerceTx::claim_coupon_use`] are
//!   conditional updates that never let a counter cross its bound, however
//!   many transactions race on it.
//!
//! # Implementations
//!
//! - `PgCommerceStore` (in `storefront-postgres`): production
//! - `InMemoryCommerceStore` (in `storefront-testing`): tests and demos

use crate::catalog::{Address, CartItem, Variant};
use crate::coupon::{Coupon, CouponStatus};
use crate::error::StoreError;
use crate::ids::{
    AddressId, CouponId, OrderId, OrderItemId, ReservationId, ReservedCouponId, ReservedStockId,
    ReturnRequestId, UserId, VariantId,
};
use crate::order::{Order, OrderItem};
use crate::payment::{PaymentDetail, PaymentSession, SessionPurpose};
use crate::reservation::{ReservationSet, ReservedCoupon, ReservedStock};
use crate::returns::ReturnRequest;
use crate::wallet::{Wallet, WalletTransaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Opens transactions.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection is available.
    async fn begin(&self) -> StoreResult<Box<dyn CommerceTx>>;
}

/// One open transaction.
///
/// All methods return [`StoreError`] on data-layer failure; after an error the
/// transaction should be dropped.
#[allow(missing_docs)] // method names are the documentation for plain CRUD
#[async_trait]
pub trait CommerceTx: Send {
    // ------------------------------------------------------------------
    // Inventory ledger
    // ------------------------------------------------------------------

    /// Loads a variant, locking its stock counter.
    async fn variant(&mut self, id: VariantId) -> StoreResult<Option<Variant>>;

    /// Removes `quantity` units if at least that many are on hand.
    ///
    /// Returns `false` (and changes nothing) when stock is short.
    async fn debit_stock(&mut self, id: VariantId, quantity: u32) -> StoreResult<bool>;

    /// Puts `quantity` units back.
    async fn credit_stock(&mut self, id: VariantId, quantity: u32) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Cart and addresses
    // ------------------------------------------------------------------

    /// The user's cart lines, oldest first.
    async fn cart_items(&mut self, user_id: UserId) -> StoreResult<Vec<CartItem>>;

    /// Inserts or replaces the line for `(user_id, variant_id)`.
    async fn put_cart_item(&mut self, item: &CartItem) -> StoreResult<()>;

    async fn delete_cart_item(&mut self, user_id: UserId, variant_id: VariantId)
    -> StoreResult<()>;

    async fn clear_cart(&mut self, user_id: UserId) -> StoreResult<()>;

    /// An address owned by `user_id`.
    async fn address(&mut self, user_id: UserId, id: AddressId) -> StoreResult<Option<Address>>;

    // ------------------------------------------------------------------
    // Coupon usage ledger
    // ------------------------------------------------------------------

    /// Looks a coupon up by its upper-case code (locking).
    async fn coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>>;

    /// Loads a coupon (locking).
    async fn coupon(&mut self, id: CouponId) -> StoreResult<Option<Coupon>>;

    /// Coupons in `Scheduled` or `Active` status (locking).
    async fn live_coupons(&mut self) -> StoreResult<Vec<Coupon>>;

    async fn insert_coupon(&mut self, coupon: &Coupon) -> StoreResult<()>;

    async fn set_coupon_status(&mut self, id: CouponId, status: CouponStatus) -> StoreResult<()>;

    /// Increments the used count if it is below the cap.
    ///
    /// Returns `false` (and changes nothing) when the coupon is exhausted.
    async fn claim_coupon_use(&mut self, id: CouponId) -> StoreResult<bool>;

    /// Decrements the used count, never below zero.
    async fn release_coupon_use(&mut self, id: CouponId) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------

    async fn insert_reserved_coupon(&mut self, hold: &ReservedCoupon) -> StoreResult<()>;

    async fn insert_reserved_stock(&mut self, hold: &ReservedStock) -> StoreResult<()>;

    /// Every row of a reservation set (locking). `None` once disposed of.
    async fn reservation_set(&mut self, id: ReservationId) -> StoreResult<Option<ReservationSet>>;

    /// Sets with rows still outstanding for `user_id`.
    async fn user_reservations(&mut self, user_id: UserId) -> StoreResult<Vec<ReservationId>>;

    /// Stock holds with `reserve_till < now` (locking).
    async fn expired_reserved_stock(&mut self, now: DateTime<Utc>)
    -> StoreResult<Vec<ReservedStock>>;

    async fn reserved_coupon(&mut self, id: ReservedCouponId)
    -> StoreResult<Option<ReservedCoupon>>;

    /// Returns `false` when the row was already gone.
    async fn delete_reserved_stock(&mut self, id: ReservedStockId) -> StoreResult<bool>;

    /// Returns `false` when the row was already gone.
    async fn delete_reserved_coupon(&mut self, id: ReservedCouponId) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Inserts the order and its shipping address snapshot.
    async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Rewrites the order's financial and coupon fields.
    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Loads an order (locking).
    async fn order(&mut self, id: OrderId) -> StoreResult<Option<Order>>;

    async fn orders_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Order>>;

    async fn insert_order_item(&mut self, item: &OrderItem) -> StoreResult<()>;

    async fn update_order_item(&mut self, item: &OrderItem) -> StoreResult<()>;

    /// Loads an item (locking).
    async fn order_item(&mut self, id: OrderItemId) -> StoreResult<Option<OrderItem>>;

    /// Items of an order in insertion order (locking).
    async fn order_items(&mut self, order_id: OrderId) -> StoreResult<Vec<OrderItem>>;

    /// `NotPlaced` items created before `cutoff` (locking).
    async fn stale_unplaced_items(&mut self, cutoff: DateTime<Utc>)
    -> StoreResult<Vec<OrderItem>>;

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    async fn insert_payment(&mut self, payment: &PaymentDetail) -> StoreResult<()>;

    async fn update_payment(&mut self, payment: &PaymentDetail) -> StoreResult<()>;

    /// Payment of an item (locking).
    async fn payment_for_item(&mut self, item_id: OrderItemId)
    -> StoreResult<Option<PaymentDetail>>;

    async fn insert_payment_session(&mut self, session: &PaymentSession) -> StoreResult<()>;

    /// Session by gateway order id (locking).
    async fn payment_session(&mut self, gateway_order_id: &str)
    -> StoreResult<Option<PaymentSession>>;

    async fn mark_session_consumed(&mut self, gateway_order_id: &str) -> StoreResult<()>;

    /// Points an open session at something else to pay for.
    async fn repurpose_session(
        &mut self,
        gateway_order_id: &str,
        purpose: &SessionPurpose,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Wallet
    // ------------------------------------------------------------------

    /// Loads a wallet (locking).
    async fn wallet(&mut self, user_id: UserId) -> StoreResult<Option<Wallet>>;

    /// Locks the user's wallet for a balance change, creating an empty one on
    /// first use so concurrent first movements queue on the same row.
    async fn lock_wallet(&mut self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<Wallet>;

    /// Inserts or replaces the wallet row.
    async fn save_wallet(&mut self, wallet: &Wallet) -> StoreResult<()>;

    async fn insert_wallet_transaction(&mut self, entry: &WalletTransaction) -> StoreResult<()>;

    /// Ledger rows of a user, oldest first.
    async fn wallet_transactions(&mut self, user_id: UserId)
    -> StoreResult<Vec<WalletTransaction>>;

    // ------------------------------------------------------------------
    // Returns
    // ------------------------------------------------------------------

    async fn insert_return_request(&mut self, request: &ReturnRequest) -> StoreResult<()>;

    async fn update_return_request(&mut self, request: &ReturnRequest) -> StoreResult<()>;

    /// Loads a return request (locking).
    async fn return_request(&mut self, id: ReturnRequestId)
    -> StoreResult<Option<ReturnRequest>>;

    async fn return_request_for_item(&mut self, item_id: OrderItemId)
    -> StoreResult<Option<ReturnRequest>>;

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Makes every write durable.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

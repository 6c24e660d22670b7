//! In-memory transactional store.
//!
//! A transaction takes the store's async mutex for its whole lifetime and
//! works on a copy of the data; `commit` swaps the copy in, dropping the
//! transaction throws it away. Transactions are therefore serializable, which
//! makes the conditional stock and coupon updates trivially race-free while
//! still exercising the same call sequence as the `PostgreSQL` store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use storefront_core::catalog::{Address, CartItem, Variant};
use storefront_core::coupon::{Coupon, CouponStatus};
use storefront_core::error::StoreError;
use storefront_core::ids::{
    AddressId, CouponId, OrderId, OrderItemId, ReservationId, ReservedCouponId, ReservedStockId,
    ReturnRequestId, UserId, VariantId,
};
use storefront_core::order::{Order, OrderItem};
use storefront_core::payment::{PaymentDetail, PaymentSession, SessionPurpose};
use storefront_core::reservation::{ReservationSet, ReservedCoupon, ReservedStock};
use storefront_core::returns::ReturnRequest;
use storefront_core::store::{CommerceStore, CommerceTx, StoreResult};
use storefront_core::wallet::{Wallet, WalletTransaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Every table of the store.
///
/// Public so tests can assert on the exact rows a workflow left behind.
#[derive(Clone, Debug, Default)]
pub struct CommerceData {
    /// Catalog and stock counters
    pub variants: HashMap<VariantId, Variant>,
    /// Cart lines keyed by owner and variant
    pub cart: BTreeMap<(UserId, VariantId), CartItem>,
    /// Saved addresses
    pub addresses: HashMap<AddressId, Address>,
    /// Coupons
    pub coupons: HashMap<CouponId, Coupon>,
    /// Outstanding stock holds
    pub reserved_stock: HashMap<ReservedStockId, ReservedStock>,
    /// Outstanding coupon holds
    pub reserved_coupons: HashMap<ReservedCouponId, ReservedCoupon>,
    /// Orders
    pub orders: HashMap<OrderId, Order>,
    /// Order items in insertion order
    pub order_items: Vec<OrderItem>,
    /// Payments in insertion order
    pub payments: Vec<PaymentDetail>,
    /// Gateway sessions keyed by gateway order id
    pub sessions: HashMap<String, PaymentSession>,
    /// Wallets
    pub wallets: HashMap<UserId, Wallet>,
    /// Wallet ledger in insertion order
    pub wallet_transactions: Vec<WalletTransaction>,
    /// Return requests in insertion order
    pub return_requests: Vec<ReturnRequest>,
}

impl CommerceData {
    /// Stock on hand for a variant.
    #[must_use]
    pub fn stock_of(&self, id: VariantId) -> u32 {
        self.variants.get(&id).map_or(0, |variant| variant.stock_quantity)
    }

    /// Units of a variant held by outstanding reservations.
    #[must_use]
    pub fn reserved_units(&self, id: VariantId) -> u32 {
        self.reserved_stock
            .values()
            .filter(|hold| hold.variant_id == id)
            .map(|hold| hold.quantity)
            .sum()
    }

    /// Units of a variant owned by order items that still hold stock.
    #[must_use]
    pub fn ordered_units(&self, id: VariantId) -> u32 {
        self.order_items
            .iter()
            .filter(|item| item.variant_id == id && item.status.holds_stock())
            .map(|item| item.quantity)
            .sum()
    }

    /// Current used-count of a coupon.
    #[must_use]
    pub fn coupon_uses(&self, id: CouponId) -> u32 {
        self.coupons.get(&id).map_or(0, |coupon| coupon.users_used_count)
    }

    /// Wallet balance of a user (zero without a wallet).
    #[must_use]
    pub fn wallet_balance(&self, user_id: UserId) -> storefront_core::Money {
        self.wallets
            .get(&user_id)
            .map_or(storefront_core::Money::ZERO, |wallet| wallet.balance)
    }

    /// Items of an order in insertion order.
    #[must_use]
    pub fn items_of(&self, order_id: OrderId) -> Vec<&OrderItem> {
        self.order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .collect()
    }

    /// Payment row of an item.
    #[must_use]
    pub fn payment_of(&self, item_id: OrderItemId) -> Option<&PaymentDetail> {
        self.payments
            .iter()
            .find(|payment| payment.order_item_id == item_id)
    }
}

/// In-memory [`CommerceStore`] for fast, deterministic testing.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCommerceStore {
    data: Arc<Mutex<CommerceData>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryCommerceStore {
    /// Create a new empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `commit` fail as if the database dropped the connection.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Copy of every table, for assertions.
    pub async fn snapshot(&self) -> CommerceData {
        self.data.lock().await.clone()
    }

    /// Seeds a catalog variant.
    pub async fn insert_variant(&self, variant: Variant) {
        self.data.lock().await.variants.insert(variant.id, variant);
    }

    /// Overwrites a variant's stock counter.
    pub async fn set_stock(&self, id: VariantId, stock: u32) {
        if let Some(variant) = self.data.lock().await.variants.get_mut(&id) {
            variant.stock_quantity = stock;
        }
    }

    /// Seeds a saved address.
    pub async fn insert_address(&self, address: Address) {
        self.data.lock().await.addresses.insert(address.id, address);
    }

    /// Seeds a coupon.
    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.data.lock().await.coupons.insert(coupon.id, coupon);
    }

    /// Seeds a wallet.
    pub async fn insert_wallet(&self, wallet: Wallet) {
        self.data.lock().await.wallets.insert(wallet.user_id, wallet);
    }

    /// Seeds a cart line.
    pub async fn put_cart_item(&self, item: CartItem) {
        self.data
            .lock()
            .await
            .cart
            .insert((item.user_id, item.variant_id), item);
    }
}

#[async_trait]
impl CommerceStore for InMemoryCommerceStore {
    async fn begin(&self) -> StoreResult<Box<dyn CommerceTx>> {
        let guard = Arc::clone(&self.data).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_commit: Arc::clone(&self.fail_next_commit),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<CommerceData>,
    working: CommerceData,
    fail_commit: Arc<AtomicBool>,
}

impl MemoryTx {
    fn sorted_holds<'a, I>(holds: I) -> Vec<ReservedStock>
    where
        I: Iterator<Item = &'a ReservedStock>,
    {
        let mut rows: Vec<ReservedStock> = holds.cloned().collect();
        rows.sort_by_key(|row| (row.reserved_at, *row.id.as_uuid()));
        rows
    }
}

#[async_trait]
impl CommerceTx for MemoryTx {
    async fn variant(&mut self, id: VariantId) -> StoreResult<Option<Variant>> {
        Ok(self.working.variants.get(&id).cloned())
    }

    async fn debit_stock(&mut self, id: VariantId, quantity: u32) -> StoreResult<bool> {
        match self.working.variants.get_mut(&id) {
            Some(variant) if variant.stock_quantity >= quantity => {
                variant.stock_quantity -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_stock(&mut self, id: VariantId, quantity: u32) -> StoreResult<()> {
        let variant = self
            .working
            .variants
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("variant {id} missing")))?;
        variant.stock_quantity = variant.stock_quantity.saturating_add(quantity);
        Ok(())
    }

    async fn cart_items(&mut self, user_id: UserId) -> StoreResult<Vec<CartItem>> {
        let mut items: Vec<CartItem> = self
            .working
            .cart
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.added_at);
        Ok(items)
    }

    async fn put_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        self.working
            .cart
            .insert((item.user_id, item.variant_id), item.clone());
        Ok(())
    }

    async fn delete_cart_item(
        &mut self,
        user_id: UserId,
        variant_id: VariantId,
    ) -> StoreResult<()> {
        self.working.cart.remove(&(user_id, variant_id));
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> StoreResult<()> {
        self.working.cart.retain(|(owner, _), _| *owner != user_id);
        Ok(())
    }

    async fn address(&mut self, user_id: UserId, id: AddressId) -> StoreResult<Option<Address>> {
        Ok(self
            .working
            .addresses
            .get(&id)
            .filter(|address| address.user_id == user_id)
            .cloned())
    }

    async fn coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self
            .working
            .coupons
            .values()
            .find(|coupon| coupon.code == code)
            .cloned())
    }

    async fn coupon(&mut self, id: CouponId) -> StoreResult<Option<Coupon>> {
        Ok(self.working.coupons.get(&id).cloned())
    }

    async fn live_coupons(&mut self) -> StoreResult<Vec<Coupon>> {
        Ok(self
            .working
            .coupons
            .values()
            .filter(|coupon| {
                matches!(coupon.status, CouponStatus::Scheduled | CouponStatus::Active)
            })
            .cloned()
            .collect())
    }

    async fn insert_coupon(&mut self, coupon: &Coupon) -> StoreResult<()> {
        if self.working.coupons.values().any(|c| c.code == coupon.code) {
            return Err(StoreError::Database(format!(
                "duplicate coupon code {}",
                coupon.code
            )));
        }
        self.working.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn set_coupon_status(&mut self, id: CouponId, status: CouponStatus) -> StoreResult<()> {
        if let Some(coupon) = self.working.coupons.get_mut(&id) {
            coupon.status = status;
        }
        Ok(())
    }

    async fn claim_coupon_use(&mut self, id: CouponId) -> StoreResult<bool> {
        match self.working.coupons.get_mut(&id) {
            Some(coupon) if coupon.users_used_count < coupon.max_use_count => {
                coupon.users_used_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_coupon_use(&mut self, id: CouponId) -> StoreResult<()> {
        if let Some(coupon) = self.working.coupons.get_mut(&id) {
            coupon.users_used_count = coupon.users_used_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn insert_reserved_coupon(&mut self, hold: &ReservedCoupon) -> StoreResult<()> {
        self.working.reserved_coupons.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn insert_reserved_stock(&mut self, hold: &ReservedStock) -> StoreResult<()> {
        self.working.reserved_stock.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn reservation_set(&mut self, id: ReservationId) -> StoreResult<Option<ReservationSet>> {
        let lines = Self::sorted_holds(
            self.working
                .reserved_stock
                .values()
                .filter(|hold| hold.reservation_id == id),
        );
        let coupon = self
            .working
            .reserved_coupons
            .values()
            .find(|hold| hold.reservation_id == id)
            .cloned();
        let Some(user_id) = lines
            .first()
            .map(|line| line.user_id)
            .or_else(|| coupon.as_ref().map(|hold| hold.user_id))
        else {
            return Ok(None);
        };
        Ok(Some(ReservationSet {
            id,
            user_id,
            lines,
            coupon,
        }))
    }

    async fn user_reservations(&mut self, user_id: UserId) -> StoreResult<Vec<ReservationId>> {
        let mut ids: Vec<ReservationId> = self
            .working
            .reserved_stock
            .values()
            .filter(|hold| hold.user_id == user_id)
            .map(|hold| hold.reservation_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn expired_reserved_stock(
        &mut self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ReservedStock>> {
        Ok(Self::sorted_holds(
            self.working
                .reserved_stock
                .values()
                .filter(|hold| hold.reserve_till < now),
        ))
    }

    async fn reserved_coupon(
        &mut self,
        id: ReservedCouponId,
    ) -> StoreResult<Option<ReservedCoupon>> {
        Ok(self.working.reserved_coupons.get(&id).cloned())
    }

    async fn delete_reserved_stock(&mut self, id: ReservedStockId) -> StoreResult<bool> {
        Ok(self.working.reserved_stock.remove(&id).is_some())
    }

    async fn delete_reserved_coupon(&mut self, id: ReservedCouponId) -> StoreResult<bool> {
        Ok(self.working.reserved_coupons.remove(&id).is_some())
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        self.working.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        match self.working.orders.get_mut(&order.id) {
            Some(stored) => {
                *stored = order.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("order {} missing", order.id))),
        }
    }

    async fn order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|order| std::cmp::Reverse(order.ordered_at));
        Ok(orders)
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> StoreResult<()> {
        self.working.order_items.push(item.clone());
        Ok(())
    }

    async fn update_order_item(&mut self, item: &OrderItem) -> StoreResult<()> {
        match self
            .working
            .order_items
            .iter_mut()
            .find(|stored| stored.id == item.id)
        {
            Some(stored) => {
                *stored = item.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("order item {} missing", item.id))),
        }
    }

    async fn order_item(&mut self, id: OrderItemId) -> StoreResult<Option<OrderItem>> {
        Ok(self
            .working
            .order_items
            .iter()
            .find(|item| item.id == id)
            .cloned())
    }

    async fn order_items(&mut self, order_id: OrderId) -> StoreResult<Vec<OrderItem>> {
        Ok(self
            .working
            .order_items
            .iter()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn stale_unplaced_items(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<OrderItem>> {
        Ok(self
            .working
            .order_items
            .iter()
            .filter(|item| {
                item.status == storefront_core::order::ItemStatus::NotPlaced
                    && item.created_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn insert_payment(&mut self, payment: &PaymentDetail) -> StoreResult<()> {
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &PaymentDetail) -> StoreResult<()> {
        match self
            .working
            .payments
            .iter_mut()
            .find(|stored| stored.id == payment.id)
        {
            Some(stored) => {
                *stored = payment.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("payment {} missing", payment.id))),
        }
    }

    async fn payment_for_item(
        &mut self,
        item_id: OrderItemId,
    ) -> StoreResult<Option<PaymentDetail>> {
        Ok(self
            .working
            .payments
            .iter()
            .find(|payment| payment.order_item_id == item_id)
            .cloned())
    }

    async fn insert_payment_session(&mut self, session: &PaymentSession) -> StoreResult<()> {
        self.working
            .sessions
            .insert(session.gateway_order_id.clone(), session.clone());
        Ok(())
    }

    async fn payment_session(
        &mut self,
        gateway_order_id: &str,
    ) -> StoreResult<Option<PaymentSession>> {
        Ok(self.working.sessions.get(gateway_order_id).cloned())
    }

    async fn mark_session_consumed(&mut self, gateway_order_id: &str) -> StoreResult<()> {
        if let Some(session) = self.working.sessions.get_mut(gateway_order_id) {
            session.consumed = true;
        }
        Ok(())
    }

    async fn repurpose_session(
        &mut self,
        gateway_order_id: &str,
        purpose: &SessionPurpose,
    ) -> StoreResult<()> {
        if let Some(session) = self.working.sessions.get_mut(gateway_order_id) {
            session.purpose = purpose.clone();
        }
        Ok(())
    }

    async fn wallet(&mut self, user_id: UserId) -> StoreResult<Option<Wallet>> {
        Ok(self.working.wallets.get(&user_id).cloned())
    }

    async fn lock_wallet(&mut self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<Wallet> {
        Ok(self
            .working
            .wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::empty(user_id, now))
            .clone())
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> StoreResult<()> {
        self.working.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }

    async fn insert_wallet_transaction(&mut self, entry: &WalletTransaction) -> StoreResult<()> {
        self.working.wallet_transactions.push(entry.clone());
        Ok(())
    }

    async fn wallet_transactions(
        &mut self,
        user_id: UserId,
    ) -> StoreResult<Vec<WalletTransaction>> {
        Ok(self
            .working
            .wallet_transactions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_return_request(&mut self, request: &ReturnRequest) -> StoreResult<()> {
        self.working.return_requests.push(request.clone());
        Ok(())
    }

    async fn update_return_request(&mut self, request: &ReturnRequest) -> StoreResult<()> {
        match self
            .working
            .return_requests
            .iter_mut()
            .find(|stored| stored.id == request.id)
        {
            Some(stored) => {
                *stored = request.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt("return request missing".into())),
        }
    }

    async fn return_request(
        &mut self,
        id: ReturnRequestId,
    ) -> StoreResult<Option<ReturnRequest>> {
        Ok(self
            .working
            .return_requests
            .iter()
            .find(|request| request.id == id)
            .cloned())
    }

    async fn return_request_for_item(
        &mut self,
        item_id: OrderItemId,
    ) -> StoreResult<Option<ReturnRequest>> {
        Ok(self
            .working
            .return_requests
            .iter()
            .find(|request| request.order_item_id == item_id)
            .cloned())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected commit failure".into()));
        }
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryCommerceStore::new();
        let variant = fixtures::variant("Mug", 300, 4);
        store.insert_variant(variant.clone()).await;

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.debit_stock(variant.id, 3).await.unwrap());
        }
        assert_eq!(store.snapshot().await.stock_of(variant.id), 4);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.debit_stock(variant.id, 3).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().await.stock_of(variant.id), 1);
    }

    #[tokio::test]
    async fn conditional_debit_never_oversubscribes() {
        let store = InMemoryCommerceStore::new();
        let variant = fixtures::variant("Mug", 300, 2);
        store.insert_variant(variant.clone()).await;

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.debit_stock(variant.id, 3).await.unwrap());
        assert!(tx.debit_stock(variant.id, 2).await.unwrap());
        assert!(!tx.debit_stock(variant.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn injected_failure_discards_writes() {
        let store = InMemoryCommerceStore::new();
        let variant = fixtures::variant("Mug", 300, 2);
        store.insert_variant(variant.clone()).await;
        store.fail_next_commit();

        let mut tx = store.begin().await.unwrap();
        tx.credit_stock(variant.id, 5).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.snapshot().await.stock_of(variant.id), 2);
    }

    #[tokio::test]
    async fn coupon_claims_stop_at_cap() {
        let store = InMemoryCommerceStore::new();
        let mut coupon = fixtures::fixed_coupon("ONCE", 50, 0);
        coupon.max_use_count = 1;
        store.insert_coupon(coupon.clone()).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.claim_coupon_use(coupon.id).await.unwrap());
        assert!(!tx.claim_coupon_use(coupon.id).await.unwrap());
        tx.release_coupon_use(coupon.id).await.unwrap();
        tx.release_coupon_use(coupon.id).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().await.coupon_uses(coupon.id), 0);
    }
}

//! `PostgreSQL` commerce store for the storefront pipeline.
//!
//! [`PgCommerceStore`] implements [`CommerceStore`] on top of a sqlx connection
//! pool. Every [`CommerceTx`] wraps one database transaction:
//!
//! - locking reads are `SELECT ... FOR UPDATE`;
//! - stock debits and coupon claims are single conditional `UPDATE`s whose
//!   `WHERE` clause carries the bound, so concurrent checkouts can never
//!   oversubscribe a counter;
//! - the sweeper's scans use `FOR UPDATE SKIP LOCKED` so rows a settlement is
//!   holding are left for that settlement to delete.
//!
//! # Example
//!
//! ```no_run
//! use storefront_postgres::PgCommerceStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgCommerceStore::connect("postgres://localhost/storefront", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rows::{db, paise, units};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use storefront_core::catalog::{Address, CartItem, Variant};
use storefront_core::coupon::{Coupon, CouponScope, CouponStatus};
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

const ORDER_SELECT: &str = r"
    SELECT o.*,
           s.name AS ship_name, s.phone AS ship_phone, s.line AS ship_line,
           s.landmark AS ship_landmark, s.city AS ship_city, s.state AS ship_state,
           s.pincode AS ship_pincode
    FROM orders o
    JOIN shipping_addresses s ON s.order_id = o.id
";

/// `PostgreSQL`-backed [`CommerceStore`].
#[derive(Clone, Debug)]
pub struct PgCommerceStore {
    pool: PgPool,
}

impl PgCommerceStore {
    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool of at most `max_connections` connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db)?;
        Ok(Self { pool })
    }

    /// Applies the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or refreshes a catalog variant.
    ///
    /// The catalog is owned elsewhere; this is the sync hook it writes through.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    pub async fn upsert_variant(&self, variant: &Variant) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO variants (
                id, product_name, category, image, regular_price, sale_price,
                offer_percent, stock_quantity, cod_available
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                product_name = EXCLUDED.product_name,
                category = EXCLUDED.category,
                image = EXCLUDED.image,
                regular_price = EXCLUDED.regular_price,
                sale_price = EXCLUDED.sale_price,
                offer_percent = EXCLUDED.offer_percent,
                stock_quantity = EXCLUDED.stock_quantity,
                cod_available = EXCLUDED.cod_available
            ",
        )
        .bind(variant.id.as_uuid())
        .bind(&variant.product_name)
        .bind(&variant.category)
        .bind(&variant.image)
        .bind(paise(variant.regular_price)?)
        .bind(paise(variant.sale_price)?)
        .bind(units(variant.offer_percent)?)
        .bind(units(variant.stock_quantity)?)
        .bind(variant.cod_available)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    /// Saves an address from the account service.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    pub async fn insert_address(&self, address: &Address) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO addresses (id, user_id, name, phone, line, landmark, city, state, pincode)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(address.id.as_uuid())
        .bind(address.user_id.as_uuid())
        .bind(&address.name)
        .bind(&address.phone)
        .bind(&address.line)
        .bind(&address.landmark)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.pincode)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }
}

#[async_trait]
impl CommerceStore for PgCommerceStore {
    async fn begin(&self) -> StoreResult<Box<dyn CommerceTx>> {
        let tx = self.pool.begin().await.map_err(db)?;
        Ok(Box::new(PgCommerceTx { tx }))
    }
}

/// One open `PostgreSQL` transaction.
///
/// Dropping it without [`CommerceTx::commit`] rolls back.
pub struct PgCommerceTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CommerceTx for PgCommerceTx {
    async fn variant(&mut self, id: VariantId) -> StoreResult<Option<Variant>> {
        let row = sqlx::query("SELECT * FROM variants WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::variant).transpose()
    }

    async fn debit_stock(&mut self, id: VariantId, quantity: u32) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE variants SET stock_quantity = stock_quantity - $2
            WHERE id = $1 AND stock_quantity >= $2
            ",
        )
        .bind(id.as_uuid())
        .bind(units(quantity)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit_stock(&mut self, id: VariantId, quantity: u32) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE variants SET stock_quantity = stock_quantity + $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(units(quantity)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("variant {id} missing")));
        }
        Ok(())
    }

    async fn cart_items(&mut self, user_id: UserId) -> StoreResult<Vec<CartItem>> {
        let rows = sqlx::query(
            "SELECT * FROM cart_items WHERE user_id = $1 ORDER BY added_at, variant_id FOR UPDATE",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
        rows.iter().map(rows::cart_item).collect()
    }

    async fn put_cart_item(&mut self, item: &CartItem) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO cart_items (user_id, variant_id, quantity, added_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, variant_id) DO UPDATE SET quantity = EXCLUDED.quantity
            ",
        )
        .bind(item.user_id.as_uuid())
        .bind(item.variant_id.as_uuid())
        .bind(units(item.quantity)?)
        .bind(item.added_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn delete_cart_item(
        &mut self,
        user_id: UserId,
        variant_id: VariantId,
    ) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND variant_id = $2")
            .bind(user_id.as_uuid())
            .bind(variant_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn clear_cart(&mut self, user_id: UserId) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn address(&mut self, user_id: UserId, id: AddressId) -> StoreResult<Option<Address>> {
        let row = sqlx::query("SELECT * FROM addresses WHERE id = $1 AND user_id = $2")
            .bind(id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::address).transpose()
    }

    async fn coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query("SELECT * FROM coupons WHERE code = $1 FOR UPDATE")
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::coupon).transpose()
    }

    async fn coupon(&mut self, id: CouponId) -> StoreResult<Option<Coupon>> {
        let row = sqlx::query("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::coupon).transpose()
    }

    async fn live_coupons(&mut self) -> StoreResult<Vec<Coupon>> {
        let rows = sqlx::query(
            "SELECT * FROM coupons WHERE status IN ('scheduled', 'active') FOR UPDATE SKIP LOCKED",
        )
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
        rows.iter().map(rows::coupon).collect()
    }

    async fn insert_coupon(&mut self, coupon: &Coupon) -> StoreResult<()> {
        let kind = rows::coupon_kind_columns(&coupon.kind)?;
        let category = match &coupon.scope {
            CouponScope::AllProducts => None,
            CouponScope::Category(category) => Some(category.as_str()),
        };
        sqlx::query(
            r"
            INSERT INTO coupons (
                id, code, description, kind, discount_value, percent, max_discount,
                min_order_value, max_use_count, users_used_count, valid_from, expires_at,
                status, category
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(coupon.id.as_uuid())
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(kind.kind)
        .bind(kind.discount_value)
        .bind(kind.percent)
        .bind(kind.max_discount)
        .bind(paise(coupon.min_order_value)?)
        .bind(units(coupon.max_use_count)?)
        .bind(units(coupon.users_used_count)?)
        .bind(coupon.valid_from)
        .bind(coupon.expires_at)
        .bind(coupon.status.as_str())
        .bind(category)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return StoreError::Database(format!("duplicate coupon code {}", coupon.code));
                }
            }
            db(e)
        })?;
        Ok(())
    }

    async fn set_coupon_status(&mut self, id: CouponId, status: CouponStatus) -> StoreResult<()> {
        sqlx::query("UPDATE coupons SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn claim_coupon_use(&mut self, id: CouponId) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE coupons SET users_used_count = users_used_count + 1
            WHERE id = $1 AND users_used_count < max_use_count
            ",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_coupon_use(&mut self, id: CouponId) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE coupons SET users_used_count = GREATEST(users_used_count - 1, 0)
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn insert_reserved_coupon(&mut self, hold: &ReservedCoupon) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO reserved_coupons (
                id, reservation_id, user_id, coupon_id, coupon_code, description,
                discount_amount, reserved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(hold.id.as_uuid())
        .bind(hold.reservation_id.as_uuid())
        .bind(hold.user_id.as_uuid())
        .bind(hold.coupon_id.as_uuid())
        .bind(&hold.coupon_code)
        .bind(&hold.description)
        .bind(paise(hold.discount_amount)?)
        .bind(hold.reserved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn insert_reserved_stock(&mut self, hold: &ReservedStock) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO reserved_stock (
                id, reservation_id, user_id, variant_id, quantity, reserved_at,
                reserve_till, reserved_coupon_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(hold.id.as_uuid())
        .bind(hold.reservation_id.as_uuid())
        .bind(hold.user_id.as_uuid())
        .bind(hold.variant_id.as_uuid())
        .bind(units(hold.quantity)?)
        .bind(hold.reserved_at)
        .bind(hold.reserve_till)
        .bind(hold.reserved_coupon_id.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn reservation_set(&mut self, id: ReservationId) -> StoreResult<Option<ReservationSet>> {
        let line_rows = sqlx::query(
            r"
            SELECT * FROM reserved_stock WHERE reservation_id = $1
            ORDER BY variant_id
            FOR UPDATE
            ",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
        let lines = line_rows
            .iter()
            .map(rows::reserved_stock)
            .collect::<StoreResult<Vec<_>>>()?;

        let coupon_row =
            sqlx::query("SELECT * FROM reserved_coupons WHERE reservation_id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(db)?;
        let coupon = coupon_row.as_ref().map(rows::reserved_coupon).transpose()?;

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
        let ids: Vec<(uuid::Uuid,)> = sqlx::query_as(
            r"
            SELECT DISTINCT reservation_id FROM reserved_stock
            WHERE user_id = $1
            ORDER BY reservation_id
            ",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(ids
            .into_iter()
            .map(|(id,)| ReservationId::from_uuid(id))
            .collect())
    }

    async fn expired_reserved_stock(
        &mut self,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<ReservedStock>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM reserved_stock WHERE reserve_till < $1
            ORDER BY reserved_at, id
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
        rows.iter().map(rows::reserved_stock).collect()
    }

    async fn reserved_coupon(
        &mut self,
        id: ReservedCouponId,
    ) -> StoreResult<Option<ReservedCoupon>> {
        let row = sqlx::query("SELECT * FROM reserved_coupons WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::reserved_coupon).transpose()
    }

    async fn delete_reserved_stock(&mut self, id: ReservedStockId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM reserved_stock WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_reserved_coupon(&mut self, id: ReservedCouponId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM reserved_coupons WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
        let coupon = order.coupon.as_ref();
        sqlx::query(
            r"
            INSERT INTO orders (
                id, uid, user_id, sub_total, product_discount, tax, shipping_charge,
                total_amount, coupon_id, coupon_code, coupon_description, coupon_discount,
                coupon_min_order_value, payment_method, ordered_at, expected_delivery
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(&order.uid)
        .bind(order.user_id.as_uuid())
        .bind(paise(order.sub_total)?)
        .bind(paise(order.product_discount)?)
        .bind(paise(order.tax)?)
        .bind(paise(order.shipping_charge)?)
        .bind(paise(order.total_amount)?)
        .bind(coupon.map(|c| *c.coupon_id.as_uuid()))
        .bind(coupon.map(|c| c.code.as_str()))
        .bind(coupon.map(|c| c.description.as_str()))
        .bind(paise(order.coupon_discount())?)
        .bind(paise(coupon.map_or(storefront_core::Money::ZERO, |c| c.min_order_value))?)
        .bind(order.payment_method.as_str())
        .bind(order.ordered_at)
        .bind(order.expected_delivery)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;

        let address = &order.shipping_address;
        sqlx::query(
            r"
            INSERT INTO shipping_addresses (
                order_id, name, phone, line, landmark, city, state, pincode
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(&address.name)
        .bind(&address.phone)
        .bind(&address.line)
        .bind(&address.landmark)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.pincode)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        let coupon = order.coupon.as_ref();
        let result = sqlx::query(
            r"
            UPDATE orders SET
                sub_total = $2, product_discount = $3, tax = $4, shipping_charge = $5,
                total_amount = $6, coupon_id = $7, coupon_code = $8,
                coupon_description = $9, coupon_discount = $10, coupon_min_order_value = $11
            WHERE id = $1
            ",
        )
        .bind(order.id.as_uuid())
        .bind(paise(order.sub_total)?)
        .bind(paise(order.product_discount)?)
        .bind(paise(order.tax)?)
        .bind(paise(order.shipping_charge)?)
        .bind(paise(order.total_amount)?)
        .bind(coupon.map(|c| *c.coupon_id.as_uuid()))
        .bind(coupon.map(|c| c.code.as_str()))
        .bind(coupon.map(|c| c.description.as_str()))
        .bind(paise(order.coupon_discount())?)
        .bind(paise(coupon.map_or(storefront_core::Money::ZERO, |c| c.min_order_value))?)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("order {} missing", order.id)));
        }
        Ok(())
    }

    async fn order(&mut self, id: OrderId) -> StoreResult<Option<Order>> {
        let sql = format!("{ORDER_SELECT} WHERE o.id = $1 FOR UPDATE OF o");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::order).transpose()
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> StoreResult<Vec<Order>> {
        let sql = format!("{ORDER_SELECT} WHERE o.user_id = $1 ORDER BY o.ordered_at DESC");
        let rows = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?;
        rows.iter().map(rows::order).collect()
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO order_items (
                id, order_id, user_id, variant_id, product_name, category, image,
                unit_regular_price, unit_price, quantity, sub_total, product_discount, tax,
                coupon_share, total, status, reason, created_at, updated_at, shipped_at,
                delivered_at, cancelled_at, returned_at, return_deadline
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24
            )
            ",
        )
        .bind(item.id.as_uuid())
        .bind(item.order_id.as_uuid())
        .bind(item.user_id.as_uuid())
        .bind(item.variant_id.as_uuid())
        .bind(&item.product_name)
        .bind(&item.category)
        .bind(&item.image)
        .bind(paise(item.unit_regular_price)?)
        .bind(paise(item.unit_price)?)
        .bind(units(item.quantity)?)
        .bind(paise(item.sub_total)?)
        .bind(paise(item.product_discount)?)
        .bind(paise(item.tax)?)
        .bind(paise(item.coupon_share)?)
        .bind(paise(item.total)?)
        .bind(item.status.as_str())
        .bind(&item.reason)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.shipped_at)
        .bind(item.delivered_at)
        .bind(item.cancelled_at)
        .bind(item.returned_at)
        .bind(item.return_deadline)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn update_order_item(&mut self, item: &OrderItem) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE order_items SET
                tax = $2, coupon_share = $3, total = $4, status = $5, reason = $6,
                updated_at = $7, shipped_at = $8, delivered_at = $9, cancelled_at = $10,
                returned_at = $11, return_deadline = $12
            WHERE id = $1
            ",
        )
        .bind(item.id.as_uuid())
        .bind(paise(item.tax)?)
        .bind(paise(item.coupon_share)?)
        .bind(paise(item.total)?)
        .bind(item.status.as_str())
        .bind(&item.reason)
        .bind(item.updated_at)
        .bind(item.shipped_at)
        .bind(item.delivered_at)
        .bind(item.cancelled_at)
        .bind(item.returned_at)
        .bind(item.return_deadline)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("order item {} missing", item.id)));
        }
        Ok(())
    }

    async fn order_item(&mut self, id: OrderItemId) -> StoreResult<Option<OrderItem>> {
        let row = sqlx::query("SELECT * FROM order_items WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::order_item).transpose()
    }

    async fn order_items(&mut self, order_id: OrderId) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query("SELECT * FROM order_items WHERE order_id = $1 ORDER BY seq FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?;
        rows.iter().map(rows::order_item).collect()
    }

    async fn stale_unplaced_items(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<OrderItem>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM order_items
            WHERE status = 'not_placed' AND created_at < $1
            ORDER BY seq
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(cutoff)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db)?;
        rows.iter().map(rows::order_item).collect()
    }

    async fn insert_payment(&mut self, payment: &PaymentDetail) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO payment_details (
                id, order_id, order_item_id, user_id, method, amount, status,
                transaction_id, gateway_order_id, gateway_payment_id, receipt,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.order_item_id.as_uuid())
        .bind(payment.user_id.as_uuid())
        .bind(payment.method.as_str())
        .bind(paise(payment.amount)?)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id)
        .bind(&payment.receipt)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &PaymentDetail) -> StoreResult<()> {
        let result = sqlx::query(
            r"
            UPDATE payment_details SET
                amount = $2, status = $3, transaction_id = $4, gateway_order_id = $5,
                gateway_payment_id = $6, updated_at = $7
            WHERE id = $1
            ",
        )
        .bind(payment.id.as_uuid())
        .bind(paise(payment.amount)?)
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Corrupt(format!("payment {} missing", payment.id)));
        }
        Ok(())
    }

    async fn payment_for_item(
        &mut self,
        item_id: OrderItemId,
    ) -> StoreResult<Option<PaymentDetail>> {
        let row = sqlx::query("SELECT * FROM payment_details WHERE order_item_id = $1 FOR UPDATE")
            .bind(item_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::payment).transpose()
    }

    async fn insert_payment_session(&mut self, session: &PaymentSession) -> StoreResult<()> {
        let (purpose, reservation_id, address_id, order_id) =
            rows::purpose_columns(&session.purpose);
        sqlx::query(
            r"
            INSERT INTO payment_sessions (
                gateway_order_id, user_id, amount, receipt, purpose, reservation_id,
                address_id, order_id, consumed, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&session.gateway_order_id)
        .bind(session.user_id.as_uuid())
        .bind(paise(session.amount)?)
        .bind(&session.receipt)
        .bind(purpose)
        .bind(reservation_id)
        .bind(address_id)
        .bind(order_id)
        .bind(session.consumed)
        .bind(session.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn payment_session(
        &mut self,
        gateway_order_id: &str,
    ) -> StoreResult<Option<PaymentSession>> {
        let row =
            sqlx::query("SELECT * FROM payment_sessions WHERE gateway_order_id = $1 FOR UPDATE")
                .bind(gateway_order_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(db)?;
        row.as_ref().map(rows::session).transpose()
    }

    async fn mark_session_consumed(&mut self, gateway_order_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE payment_sessions SET consumed = TRUE WHERE gateway_order_id = $1")
            .bind(gateway_order_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn repurpose_session(
        &mut self,
        gateway_order_id: &str,
        purpose: &SessionPurpose,
    ) -> StoreResult<()> {
        let (kind, reservation_id, address_id, order_id) = rows::purpose_columns(purpose);
        sqlx::query(
            r"
            UPDATE payment_sessions
            SET purpose = $2, reservation_id = $3, address_id = $4, order_id = $5
            WHERE gateway_order_id = $1
            ",
        )
        .bind(gateway_order_id)
        .bind(kind)
        .bind(reservation_id)
        .bind(address_id)
        .bind(order_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn wallet(&mut self, user_id: UserId) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::wallet).transpose()
    }

    async fn lock_wallet(&mut self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<Wallet> {
        // A concurrent first insert blocks here on the primary key until the
        // other transaction ends, so the SELECT below sees its committed row.
        sqlx::query(
            r"
            INSERT INTO wallets (user_id, balance, updated_at) VALUES ($1, 0, $2)
            ON CONFLICT (user_id) DO NOTHING
            ",
        )
        .bind(user_id.as_uuid())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;

        let row = sqlx::query("SELECT * FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db)?;
        rows::wallet(&row)
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO wallets (user_id, balance, updated_at) VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                balance = EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(wallet.user_id.as_uuid())
        .bind(paise(wallet.balance)?)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn insert_wallet_transaction(&mut self, entry: &WalletTransaction) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO wallet_transactions (
                id, user_id, kind, amount, description, order_id, receipt,
                transaction_id, payment_method, last_balance, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(paise(entry.amount)?)
        .bind(&entry.description)
        .bind(entry.order_id.map(|id| *id.as_uuid()))
        .bind(&entry.receipt)
        .bind(&entry.transaction_id)
        .bind(&entry.payment_method)
        .bind(paise(entry.last_balance)?)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn wallet_transactions(
        &mut self,
        user_id: UserId,
    ) -> StoreResult<Vec<WalletTransaction>> {
        let rows = sqlx::query("SELECT * FROM wallet_transactions WHERE user_id = $1 ORDER BY seq")
            .bind(user_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?;
        rows.iter().map(rows::wallet_transaction).collect()
    }

    async fn insert_return_request(&mut self, request: &ReturnRequest) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO return_requests (
                id, order_item_id, user_id, reason, status, requested_at, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(request.id.as_uuid())
        .bind(request.order_item_id.as_uuid())
        .bind(request.user_id.as_uuid())
        .bind(&request.reason)
        .bind(request.status.as_str())
        .bind(request.requested_at)
        .bind(request.resolved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn update_return_request(&mut self, request: &ReturnRequest) -> StoreResult<()> {
        sqlx::query("UPDATE return_requests SET status = $2, resolved_at = $3 WHERE id = $1")
            .bind(request.id.as_uuid())
            .bind(request.status.as_str())
            .bind(request.resolved_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn return_request(
        &mut self,
        id: ReturnRequestId,
    ) -> StoreResult<Option<ReturnRequest>> {
        let row = sqlx::query("SELECT * FROM return_requests WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::return_request).transpose()
    }

    async fn return_request_for_item(
        &mut self,
        item_id: OrderItemId,
    ) -> StoreResult<Option<ReturnRequest>> {
        let row = sqlx::query("SELECT * FROM return_requests WHERE order_item_id = $1")
            .bind(item_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db)?;
        row.as_ref().map(rows::return_request).transpose()
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(|e| {
            tracing::warn!(error = %e, "Commerce transaction failed to commit");
            metrics::counter!("store.commit.failed").increment(1);
            db(e)
        })
    }
}

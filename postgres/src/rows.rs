//! Mapping between `PostgreSQL` rows and domain records.
//!
//! Amounts are stored as `BIGINT` paise and unit counts as `INTEGER`; both are
//! range-checked on the way in and on the way out.

use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};
use storefront_core::Money;
use storefront_core::catalog::{Address, CartItem, ShippingAddress, Variant};
use storefront_core::coupon::{Coupon, CouponKind, CouponScope, CouponStatus};
use storefront_core::error::StoreError;
use storefront_core::ids::{
    AddressId, CouponId, OrderId, OrderItemId, PaymentId, ReservationId, ReservedCouponId,
    ReservedStockId, ReturnRequestId, UserId, VariantId, WalletTransactionId,
};
use storefront_core::order::{AppliedCoupon, ItemStatus, Order, OrderItem};
use storefront_core::payment::{
    PaymentDetail, PaymentMethod, PaymentSession, PaymentStatus, SessionPurpose,
};
use storefront_core::reservation::{ReservedCoupon, ReservedStock};
use storefront_core::returns::{ReturnRequest, ReturnStatus};
use storefront_core::store::StoreResult;
use storefront_core::wallet::{Wallet, WalletTransaction, WalletTransactionKind};
use uuid::Uuid;

pub(crate) fn db(error: sqlx::Error) -> StoreError {
    StoreError::Database(error.to_string())
}

pub(crate) fn paise(amount: Money) -> StoreResult<i64> {
    i64::try_from(amount.paise())
        .map_err(|_| StoreError::Corrupt(format!("amount {amount} does not fit BIGINT")))
}

pub(crate) fn units(count: u32) -> StoreResult<i32> {
    i32::try_from(count)
        .map_err(|_| StoreError::Corrupt(format!("count {count} does not fit INTEGER")))
}

fn col<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(db)
}

fn money(row: &PgRow, column: &str) -> StoreResult<Money> {
    let raw: i64 = col(row, column)?;
    u64::try_from(raw)
        .map(Money::from_paise)
        .map_err(|_| StoreError::Corrupt(format!("negative amount in {column}")))
}

fn opt_money(row: &PgRow, column: &str) -> StoreResult<Option<Money>> {
    let raw: Option<i64> = col(row, column)?;
    raw.map(|value| {
        u64::try_from(value)
            .map(Money::from_paise)
            .map_err(|_| StoreError::Corrupt(format!("negative amount in {column}")))
    })
    .transpose()
}

fn count(row: &PgRow, column: &str) -> StoreResult<u32> {
    let raw: i32 = col(row, column)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative count in {column}")))
}

fn parsed<T>(row: &PgRow, column: &str, parse: fn(&str) -> Option<T>) -> StoreResult<T> {
    let raw: String = col(row, column)?;
    parse(&raw).ok_or_else(|| StoreError::Corrupt(format!("unknown {column} value {raw:?}")))
}

pub(crate) fn variant(row: &PgRow) -> StoreResult<Variant> {
    Ok(Variant {
        id: VariantId::from_uuid(col(row, "id")?),
        product_name: col(row, "product_name")?,
        category: col(row, "category")?,
        image: col(row, "image")?,
        regular_price: money(row, "regular_price")?,
        sale_price: money(row, "sale_price")?,
        offer_percent: count(row, "offer_percent")?,
        stock_quantity: count(row, "stock_quantity")?,
        cod_available: col(row, "cod_available")?,
    })
}

pub(crate) fn cart_item(row: &PgRow) -> StoreResult<CartItem> {
    Ok(CartItem {
        user_id: UserId::from_uuid(col(row, "user_id")?),
        variant_id: VariantId::from_uuid(col(row, "variant_id")?),
        quantity: count(row, "quantity")?,
        added_at: col(row, "added_at")?,
    })
}

pub(crate) fn address(row: &PgRow) -> StoreResult<Address> {
    Ok(Address {
        id: AddressId::from_uuid(col(row, "id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        name: col(row, "name")?,
        phone: col(row, "phone")?,
        line: col(row, "line")?,
        landmark: col(row, "landmark")?,
        city: col(row, "city")?,
        state: col(row, "state")?,
        pincode: col(row, "pincode")?,
    })
}

/// Column values for a coupon's discount rule.
pub(crate) struct CouponKindColumns {
    pub kind: &'static str,
    pub discount_value: i64,
    pub percent: Option<i32>,
    pub max_discount: Option<i64>,
}

pub(crate) fn coupon_kind_columns(kind: &CouponKind) -> StoreResult<CouponKindColumns> {
    Ok(match kind {
        CouponKind::Fixed(amount) => CouponKindColumns {
            kind: "fixed",
            discount_value: paise(*amount)?,
            percent: None,
            max_discount: None,
        },
        CouponKind::Percentage {
            percent,
            max_discount,
        } => CouponKindColumns {
            kind: "percentage",
            discount_value: 0,
            percent: Some(units(*percent)?),
            max_discount: Some(paise(*max_discount)?),
        },
    })
}

pub(crate) fn coupon(row: &PgRow) -> StoreResult<Coupon> {
    let kind_name: String = col(row, "kind")?;
    let kind = match kind_name.as_str() {
        "fixed" => CouponKind::Fixed(money(row, "discount_value")?),
        "percentage" => {
            let percent: Option<i32> = col(row, "percent")?;
            let percent = percent
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| StoreError::Corrupt("percentage coupon without percent".into()))?;
            CouponKind::Percentage {
                percent,
                max_discount: opt_money(row, "max_discount")?.unwrap_or(Money::ZERO),
            }
        }
        other => return Err(StoreError::Corrupt(format!("unknown coupon kind {other:?}"))),
    };
    let category: Option<String> = col(row, "category")?;
    Ok(Coupon {
        id: CouponId::from_uuid(col(row, "id")?),
        code: col(row, "code")?,
        description: col(row, "description")?,
        kind,
        min_order_value: money(row, "min_order_value")?,
        max_use_count: count(row, "max_use_count")?,
        users_used_count: count(row, "users_used_count")?,
        valid_from: col(row, "valid_from")?,
        expires_at: col(row, "expires_at")?,
        status: parsed(row, "status", CouponStatus::parse)?,
        scope: category.map_or(CouponScope::AllProducts, CouponScope::Category),
    })
}

pub(crate) fn reserved_stock(row: &PgRow) -> StoreResult<ReservedStock> {
    let coupon: Option<Uuid> = col(row, "reserved_coupon_id")?;
    Ok(ReservedStock {
        id: ReservedStockId::from_uuid(col(row, "id")?),
        reservation_id: ReservationId::from_uuid(col(row, "reservation_id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        variant_id: VariantId::from_uuid(col(row, "variant_id")?),
        quantity: count(row, "quantity")?,
        reserved_at: col(row, "reserved_at")?,
        reserve_till: col(row, "reserve_till")?,
        reserved_coupon_id: coupon.map(ReservedCouponId::from_uuid),
    })
}

pub(crate) fn reserved_coupon(row: &PgRow) -> StoreResult<ReservedCoupon> {
    Ok(ReservedCoupon {
        id: ReservedCouponId::from_uuid(col(row, "id")?),
        reservation_id: ReservationId::from_uuid(col(row, "reservation_id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        coupon_id: CouponId::from_uuid(col(row, "coupon_id")?),
        coupon_code: col(row, "coupon_code")?,
        description: col(row, "description")?,
        discount_amount: money(row, "discount_amount")?,
        reserved_at: col(row, "reserved_at")?,
    })
}

/// Expects the order's columns joined with its `shipping_addresses` row
/// (address columns prefixed `ship_`).
pub(crate) fn order(row: &PgRow) -> StoreResult<Order> {
    let coupon_id: Option<Uuid> = col(row, "coupon_id")?;
    let coupon = match coupon_id {
        Some(id) => Some(AppliedCoupon {
            coupon_id: CouponId::from_uuid(id),
            code: col::<Option<String>>(row, "coupon_code")?.unwrap_or_default(),
            description: col::<Option<String>>(row, "coupon_description")?.unwrap_or_default(),
            discount: money(row, "coupon_discount")?,
            min_order_value: money(row, "coupon_min_order_value")?,
        }),
        None => None,
    };
    Ok(Order {
        id: OrderId::from_uuid(col(row, "id")?),
        uid: col(row, "uid")?,
        user_id: UserId::from_uuid(col(row, "user_id")?),
        sub_total: money(row, "sub_total")?,
        product_discount: money(row, "product_discount")?,
        tax: money(row, "tax")?,
        shipping_charge: money(row, "shipping_charge")?,
        total_amount: money(row, "total_amount")?,
        coupon,
        payment_method: parsed(row, "payment_method", PaymentMethod::parse)?,
        shipping_address: ShippingAddress {
            name: col(row, "ship_name")?,
            phone: col(row, "ship_phone")?,
            line: col(row, "ship_line")?,
            landmark: col(row, "ship_landmark")?,
            city: col(row, "ship_city")?,
            state: col(row, "ship_state")?,
            pincode: col(row, "ship_pincode")?,
        },
        ordered_at: col(row, "ordered_at")?,
        expected_delivery: col(row, "expected_delivery")?,
    })
}

pub(crate) fn order_item(row: &PgRow) -> StoreResult<OrderItem> {
    Ok(OrderItem {
        id: OrderItemId::from_uuid(col(row, "id")?),
        order_id: OrderId::from_uuid(col(row, "order_id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        variant_id: VariantId::from_uuid(col(row, "variant_id")?),
        product_name: col(row, "product_name")?,
        category: col(row, "category")?,
        image: col(row, "image")?,
        unit_regular_price: money(row, "unit_regular_price")?,
        unit_price: money(row, "unit_price")?,
        quantity: count(row, "quantity")?,
        sub_total: money(row, "sub_total")?,
        product_discount: money(row, "product_discount")?,
        tax: money(row, "tax")?,
        coupon_share: money(row, "coupon_share")?,
        total: money(row, "total")?,
        status: parsed(row, "status", ItemStatus::parse)?,
        reason: col(row, "reason")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
        shipped_at: col(row, "shipped_at")?,
        delivered_at: col(row, "delivered_at")?,
        cancelled_at: col(row, "cancelled_at")?,
        returned_at: col(row, "returned_at")?,
        return_deadline: col(row, "return_deadline")?,
    })
}

pub(crate) fn payment(row: &PgRow) -> StoreResult<PaymentDetail> {
    Ok(PaymentDetail {
        id: PaymentId::from_uuid(col(row, "id")?),
        order_id: OrderId::from_uuid(col(row, "order_id")?),
        order_item_id: OrderItemId::from_uuid(col(row, "order_item_id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        method: parsed(row, "method", PaymentMethod::parse)?,
        amount: money(row, "amount")?,
        status: parsed(row, "status", PaymentStatus::parse)?,
        transaction_id: col(row, "transaction_id")?,
        gateway_order_id: col(row, "gateway_order_id")?,
        gateway_payment_id: col(row, "gateway_payment_id")?,
        receipt: col(row, "receipt")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

/// Purpose columns: `(kind, reservation_id, address_id, order_id)`.
pub(crate) fn purpose_columns(
    purpose: &SessionPurpose,
) -> (&'static str, Option<Uuid>, Option<Uuid>, Option<Uuid>) {
    match purpose {
        SessionPurpose::Checkout {
            reservation_id,
            address_id,
        } => (
            purpose.kind(),
            Some(*reservation_id.as_uuid()),
            Some(*address_id.as_uuid()),
            None,
        ),
        SessionPurpose::RetryOrder { order_id } => {
            (purpose.kind(), None, None, Some(*order_id.as_uuid()))
        }
        SessionPurpose::WalletTopUp => (purpose.kind(), None, None, None),
    }
}

pub(crate) fn session(row: &PgRow) -> StoreResult<PaymentSession> {
    let kind: String = col(row, "purpose")?;
    let reservation: Option<Uuid> = col(row, "reservation_id")?;
    let address: Option<Uuid> = col(row, "address_id")?;
    let order: Option<Uuid> = col(row, "order_id")?;
    let purpose = match (kind.as_str(), reservation, address, order) {
        ("checkout", Some(reservation), Some(address), _) => SessionPurpose::Checkout {
            reservation_id: ReservationId::from_uuid(reservation),
            address_id: AddressId::from_uuid(address),
        },
        ("retry_order", _, _, Some(order)) => SessionPurpose::RetryOrder {
            order_id: OrderId::from_uuid(order),
        },
        ("wallet_top_up", ..) => SessionPurpose::WalletTopUp,
        _ => {
            return Err(StoreError::Corrupt(format!(
                "payment session purpose {kind:?} is missing its references"
            )));
        }
    };
    Ok(PaymentSession {
        gateway_order_id: col(row, "gateway_order_id")?,
        user_id: UserId::from_uuid(col(row, "user_id")?),
        amount: money(row, "amount")?,
        receipt: col(row, "receipt")?,
        purpose,
        consumed: col(row, "consumed")?,
        created_at: col(row, "created_at")?,
    })
}

pub(crate) fn wallet(row: &PgRow) -> StoreResult<Wallet> {
    Ok(Wallet {
        user_id: UserId::from_uuid(col(row, "user_id")?),
        balance: money(row, "balance")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(crate) fn wallet_transaction(row: &PgRow) -> StoreResult<WalletTransaction> {
    let order: Option<Uuid> = col(row, "order_id")?;
    Ok(WalletTransaction {
        id: WalletTransactionId::from_uuid(col(row, "id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        kind: parsed(row, "kind", WalletTransactionKind::parse)?,
        amount: money(row, "amount")?,
        description: col(row, "description")?,
        order_id: order.map(OrderId::from_uuid),
        receipt: col(row, "receipt")?,
        transaction_id: col(row, "transaction_id")?,
        payment_method: col(row, "payment_method")?,
        last_balance: money(row, "last_balance")?,
        created_at: col(row, "created_at")?,
    })
}

pub(crate) fn return_request(row: &PgRow) -> StoreResult<ReturnRequest> {
    Ok(ReturnRequest {
        id: ReturnRequestId::from_uuid(col(row, "id")?),
        order_item_id: OrderItemId::from_uuid(col(row, "order_item_id")?),
        user_id: UserId::from_uuid(col(row, "user_id")?),
        reason: col(row, "reason")?,
        status: parsed(row, "status", ReturnStatus::parse)?,
        requested_at: col(row, "requested_at")?,
        resolved_at: col(row, "resolved_at")?,
    })
}

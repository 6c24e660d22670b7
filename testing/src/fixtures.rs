//! Builders for seed data.
//!
//! Prices are given in whole rupees; every record is valid around
//! [`crate::test_epoch`].

use chrono::Duration;
use storefront_core::Money;
use storefront_core::catalog::{Address, CartItem, Variant};
use storefront_core::coupon::{Coupon, CouponKind, CouponScope, CouponStatus};
use storefront_core::ids::{AddressId, CouponId, UserId, VariantId};
use storefront_core::wallet::Wallet;

/// Default category for [`variant`].
pub const DEFAULT_CATEGORY: &str = "Apparel";

/// A variant selling at its list price, cash on delivery allowed.
#[must_use]
pub fn variant(name: &str, price_rupees: u64, stock: u32) -> Variant {
    variant_in(DEFAULT_CATEGORY, name, price_rupees, stock)
}

/// Same as [`variant`], in a given category.
#[must_use]
pub fn variant_in(category: &str, name: &str, price_rupees: u64, stock: u32) -> Variant {
    let price = Money::from_rupees(price_rupees);
    Variant {
        id: VariantId::new(),
        product_name: name.to_string(),
        category: category.to_string(),
        image: Some(format!("https://cdn.example.test/{}.jpg", name.to_lowercase())),
        regular_price: price,
        sale_price: price,
        offer_percent: 0,
        stock_quantity: stock,
        cod_available: true,
    }
}

/// A saved address for `user_id`.
#[must_use]
pub fn address(user_id: UserId) -> Address {
    Address {
        id: AddressId::new(),
        user_id,
        name: "Asha Menon".into(),
        phone: "9876543210".into(),
        line: "12 MG Road".into(),
        landmark: Some("Opposite City Mall".into()),
        city: "Kochi".into(),
        state: "Kerala".into(),
        pincode: "682016".into(),
    }
}

/// An active fixed-amount coupon valid for a year around the test epoch.
#[must_use]
pub fn fixed_coupon(code: &str, discount_rupees: u64, min_order_rupees: u64) -> Coupon {
    coupon(
        code,
        CouponKind::Fixed(Money::from_rupees(discount_rupees)),
        min_order_rupees,
    )
}

/// An active percentage coupon capped at `max_rupees`.
#[must_use]
pub fn percentage_coupon(code: &str, percent: u32, max_rupees: u64) -> Coupon {
    coupon(
        code,
        CouponKind::Percentage {
            percent,
            max_discount: Money::from_rupees(max_rupees),
        },
        0,
    )
}

fn coupon(code: &str, kind: CouponKind, min_order_rupees: u64) -> Coupon {
    let epoch = crate::test_epoch();
    Coupon {
        id: CouponId::new(),
        code: code.to_uppercase(),
        description: format!("{code} test coupon"),
        kind,
        min_order_value: Money::from_rupees(min_order_rupees),
        max_use_count: 100,
        users_used_count: 0,
        valid_from: epoch - Duration::days(30),
        expires_at: epoch + Duration::days(365),
        status: CouponStatus::Active,
        scope: CouponScope::AllProducts,
    }
}

/// A wallet holding `balance_rupees`.
#[must_use]
pub fn wallet(user_id: UserId, balance_rupees: u64) -> Wallet {
    Wallet {
        user_id,
        balance: Money::from_rupees(balance_rupees),
        updated_at: crate::test_epoch(),
    }
}

/// A cart line added at the test epoch.
#[must_use]
pub fn cart_item(user_id: UserId, variant_id: VariantId, quantity: u32) -> CartItem {
    CartItem {
        user_id,
        variant_id,
        quantity,
        added_at: crate::test_epoch(),
    }
}

//! Reservation and settlement through the cash-on-delivery and wallet adapters.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::Duration;
use common::Harness;
use std::sync::Arc;
use storefront::PaymentAdapter;
use storefront_core::error::{CommerceError, ConflictError, PaymentError, ValidationError};
use storefront_core::ids::UserId;
use storefront_core::order::ItemStatus;
use storefront_core::payment::{PaymentMethod, PaymentStatus};
use storefront_core::wallet::WalletTransactionKind;
use storefront_core::Money;
use storefront_testing::fixtures;

#[tokio::test]
async fn cod_checkout_creates_pending_order() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;

    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    assert_eq!(h.stock(&shirt).await, 4);

    let details = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap();

    let order = &details.order;
    assert_eq!(order.sub_total, Money::from_rupees(2000));
    assert_eq!(order.tax, Money::from_rupees(360));
    assert_eq!(order.shipping_charge, Money::ZERO);
    assert_eq!(order.total_amount, Money::from_rupees(2360));
    assert_eq!(order.payment_method, PaymentMethod::CashOnDelivery);
    assert_eq!(order.shipping_address.city, "Kochi");
    assert_eq!(order.expected_delivery - order.ordered_at, Duration::days(7));
    assert!(order.uid.starts_with('#'));

    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].status, ItemStatus::Pending);
    assert_eq!(details.payments[0].status, PaymentStatus::Pending);
    assert_eq!(details.payments[0].amount, Money::from_rupees(2360));

    let data = h.data().await;
    assert!(data.reserved_stock.is_empty());
    assert!(data.cart.is_empty());
    assert_eq!(data.stock_of(shirt.id), 4);
    assert_eq!(data.ordered_units(shirt.id), 1);
}

#[tokio::test]
async fn small_orders_pay_flat_shipping() {
    let h = Harness::new().await;
    let socks = h.variant("Socks", 500, 10).await;
    h.cart(&[(&socks, 1)]).await;

    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let quote = h.storefront.quote(h.user, hold.id).await.unwrap();

    assert_eq!(quote.breakdown.tax, Money::from_rupees(90));
    assert_eq!(quote.breakdown.shipping, Money::from_rupees(100));
    assert_eq!(quote.total(), Money::from_rupees(690));
}

#[tokio::test]
async fn wallet_checkout_debits_balance_and_confirms() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.wallet(3000).await;
    h.cart(&[(&shirt, 1)]).await;

    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let details = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::Wallet)
        .await
        .unwrap();

    assert_eq!(details.items[0].status, ItemStatus::Confirmed);
    assert_eq!(details.payments[0].status, PaymentStatus::Completed);
    assert!(details.payments[0].transaction_id.is_some());
    assert_eq!(
        h.storefront.wallet_balance(h.user).await.unwrap(),
        Money::from_rupees(640)
    );

    let history = h.storefront.wallet_history(h.user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, WalletTransactionKind::Debit);
    assert_eq!(history[0].amount, Money::from_rupees(2360));
    assert_eq!(history[0].last_balance, Money::from_rupees(3000));
    assert_eq!(history[0].order_id, Some(details.order.id));
}

#[tokio::test]
async fn insufficient_wallet_keeps_the_hold() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.wallet(1000).await;
    h.cart(&[(&shirt, 1)]).await;

    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let err = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::Wallet)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommerceError::Payment(PaymentError::InsufficientWalletBalance { required, available })
            if required == Money::from_rupees(2360) && available == Money::from_rupees(1000)
    ));
    let data = h.data().await;
    assert!(data.orders.is_empty());
    assert_eq!(data.reserved_units(shirt.id), 1);
    assert_eq!(data.stock_of(shirt.id), 4);
    assert_eq!(data.wallet_balance(h.user), Money::from_rupees(1000));
}

#[tokio::test]
async fn cod_is_refused_for_excluded_variants() {
    let h = Harness::new().await;
    let mut tv = fixtures::variant("Television", 30_000, 2);
    tv.cod_available = false;
    h.store.insert_variant(tv.clone()).await;
    h.cart(&[(&tv, 1)]).await;

    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let err = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommerceError::Payment(PaymentError::CashOnDeliveryUnavailable(ref name)) if name == "Television"
    ));
    assert_eq!(h.data().await.reserved_units(tv.id), 1);
}

#[tokio::test]
async fn cart_edits_after_reserving_abort_settlement() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();

    h.storefront.add_to_cart(h.user, shirt.id).await.unwrap();

    let err = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Conflict(ConflictError::CartChanged)));
    assert!(h.data().await.orders.is_empty());
}

#[tokio::test]
async fn a_hold_settles_exactly_once() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();

    h.storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap();
    let second = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap_err();
    assert!(matches!(
        second,
        CommerceError::Conflict(ConflictError::ReservationReleased(id)) if id == hold.id
    ));

    let release = h.storefront.release(h.user, hold.id).await.unwrap_err();
    assert!(matches!(
        release,
        CommerceError::Conflict(ConflictError::ReservationReleased(_))
    ));

    let data = h.data().await;
    assert_eq!(data.orders.len(), 1);
    assert_eq!(data.stock_of(shirt.id), 4);
}

#[tokio::test]
async fn failed_commit_leaves_the_hold_for_the_sweeper() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 2)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();

    h.store.fail_next_commit();
    let err = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Settlement { reservation_id, .. } if reservation_id == hold.id));
    assert!(!err.is_user_facing());

    let data = h.data().await;
    assert!(data.orders.is_empty());
    assert_eq!(data.reserved_units(shirt.id), 2);
    assert_eq!(data.stock_of(shirt.id), 3);

    h.clock.advance(Duration::minutes(16));
    let report = h.storefront.sweep().await.unwrap();
    assert_eq!(report.units_restocked, 2);
    assert_eq!(h.stock(&shirt).await, 5);
}

#[tokio::test]
async fn reserving_again_replaces_the_previous_hold() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    let coupon = h.coupon(fixtures::fixed_coupon("WELCOME", 100, 0)).await;
    h.cart(&[(&shirt, 2)]).await;

    let first = h.storefront.reserve(h.user, Some("WELCOME")).await.unwrap();
    assert_eq!(h.data().await.coupon_uses(coupon.id), 1);

    let second = h.storefront.reserve(h.user, None).await.unwrap();

    let data = h.data().await;
    assert_ne!(first.id, second.id);
    assert_eq!(data.stock_of(shirt.id), 3);
    assert_eq!(data.reserved_units(shirt.id), 2);
    assert_eq!(data.coupon_uses(coupon.id), 0);
    assert!(data.reserved_coupons.is_empty());
    assert!(data.reserved_stock.values().all(|row| row.reservation_id == second.id));
}

#[tokio::test]
async fn short_stock_rolls_back_the_whole_batch() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    let scarf = h.variant("Silk Scarf", 900, 1).await;
    h.cart(&[(&shirt, 2), (&scarf, 3)]).await;

    let err = h.storefront.reserve(h.user, None).await.unwrap_err();
    match err {
        CommerceError::Conflict(ConflictError::StockUnavailable {
            product,
            requested,
            available,
            ..
        }) => {
            assert_eq!(product, "Silk Scarf");
            assert_eq!(requested, 3);
            assert_eq!(available, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let data = h.data().await;
    assert_eq!(data.stock_of(shirt.id), 5);
    assert_eq!(data.stock_of(scarf.id), 1);
    assert!(data.reserved_stock.is_empty());
}

#[tokio::test]
async fn empty_cart_cannot_be_reserved() {
    let h = Harness::new().await;
    let err = h.storefront.reserve(h.user, None).await.unwrap_err();
    assert!(matches!(err, CommerceError::Validation(ValidationError::EmptyCart)));
}

#[tokio::test]
async fn coupon_discount_is_held_with_the_stock() {
    let h = Harness::new().await;
    let lamp = h.variant("Lamp", 800, 5).await;
    let rug = h.variant("Rug", 400, 5).await;
    let coupon = h.coupon(fixtures::fixed_coupon("SAVE100", 100, 1000)).await;
    h.cart(&[(&lamp, 1), (&rug, 1)]).await;

    let hold = h.storefront.reserve(h.user, Some(" save100 ")).await.unwrap();
    let held = hold.coupon.as_ref().unwrap();
    assert_eq!(held.discount_amount, Money::from_rupees(100));
    assert!(hold.lines.iter().all(|line| line.reserved_coupon_id == Some(held.id)));
    assert_eq!(h.data().await.coupon_uses(coupon.id), 1);

    let quote = h.storefront.quote(h.user, hold.id).await.unwrap();
    assert_eq!(quote.total(), Money::from_rupees(1316));

    let details = h
        .storefront
        .checkout(h.user, hold.id, h.address.id, &PaymentAdapter::CashOnDelivery)
        .await
        .unwrap();
    let applied = details.order.coupon.as_ref().unwrap();
    assert_eq!(applied.code, "SAVE100");
    assert_eq!(applied.min_order_value, Money::from_rupees(1000));
    let shares: Money = Money::checked_sum(details.items.iter().map(|item| item.coupon_share)).unwrap();
    assert_eq!(shares, Money::from_rupees(100));
    assert_eq!(h.data().await.coupon_uses(coupon.id), 1);
}

#[tokio::test]
async fn percentage_coupons_are_capped() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.coupon(fixtures::percentage_coupon("TENOFF", 10, 150)).await;
    h.cart(&[(&shirt, 1)]).await;

    let hold = h.storefront.reserve(h.user, Some("TENOFF")).await.unwrap();
    let quote = h.storefront.quote(h.user, hold.id).await.unwrap();
    assert_eq!(quote.breakdown.coupon_discount, Money::from_rupees(150));
    assert_eq!(quote.total(), Money::from_rupees(2210));
}

#[tokio::test]
async fn coupon_rules_reject_without_holding_anything() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    let mut exhausted = fixtures::fixed_coupon("GONE", 50, 0);
    exhausted.max_use_count = 1;
    exhausted.users_used_count = 1;
    h.coupon(exhausted).await;
    h.coupon(fixtures::fixed_coupon("BIGSPEND", 50, 5000)).await;
    h.cart(&[(&shirt, 1)]).await;

    let err = h.storefront.reserve(h.user, Some("GONE")).await.unwrap_err();
    assert!(matches!(err, CommerceError::Conflict(ConflictError::CouponExhausted(_))));

    let err = h.storefront.reserve(h.user, Some("BIGSPEND")).await.unwrap_err();
    assert!(matches!(
        err,
        CommerceError::Conflict(ConflictError::CouponMinimumNotMet { .. })
    ));

    let err = h.storefront.reserve(h.user, Some("NOPE")).await.unwrap_err();
    assert!(matches!(err, CommerceError::Validation(ValidationError::UnknownCoupon(_))));

    let data = h.data().await;
    assert_eq!(data.stock_of(shirt.id), 5);
    assert!(data.reserved_stock.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let h = Harness::new().await;
    let sneaker = h.variant("Sneaker", 3000, 3).await;
    let users: Vec<UserId> = (0..10).map(|_| UserId::new()).collect();
    for user in &users {
        h.cart_for(*user, &[(&sneaker, 1)]).await;
    }

    let storefront = Arc::new(h.storefront.clone());
    let handles: Vec<_> = users
        .iter()
        .map(|user| {
            let storefront = Arc::clone(&storefront);
            let user = *user;
            tokio::spawn(async move { storefront.reserve(user, None).await })
        })
        .collect();

    let mut held = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => held += 1,
            Err(CommerceError::Conflict(ConflictError::StockUnavailable { .. })) => refused += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(held, 3);
    assert_eq!(refused, 7);

    let data = h.data().await;
    assert_eq!(data.stock_of(sneaker.id), 0);
    assert_eq!(data.reserved_units(sneaker.id), 3);
}

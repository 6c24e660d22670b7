//! Gateway-paid checkouts, retries and wallet top-ups through the mock gateway.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::Duration;
use common::{Harness, signed_callback};
use storefront::GatewayConfirmation;
use storefront_core::error::{CommerceError, ConflictError, PaymentError, ValidationError};
use storefront_core::order::ItemStatus;
use storefront_core::payment::{PaymentMethod, PaymentStatus};
use storefront_core::wallet::WalletTransactionKind;
use storefront_core::Money;
use storefront_testing::fixtures;

#[tokio::test]
async fn verified_callback_settles_the_hold() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();

    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    assert_eq!(checkout.key_id, "rzp_test_key");
    assert_eq!(checkout.gateway_order_id, "order_mock_1");
    assert_eq!(checkout.amount, Money::from_rupees(2360));
    assert_eq!(checkout.currency, "INR");

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&checkout.gateway_order_id, "pay_1"))
        .await
        .unwrap();

    let GatewayConfirmation::Settled(details) = confirmation else {
        panic!("expected a settled order, got {confirmation:?}");
    };
    assert_eq!(details.order.payment_method, PaymentMethod::Gateway);
    assert_eq!(details.items[0].status, ItemStatus::Confirmed);
    let payment = &details.payments[0];
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.gateway_order_id.as_deref(), Some("order_mock_1"));
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_1"));

    let data = h.data().await;
    assert!(data.reserved_stock.is_empty());
    assert!(data.sessions["order_mock_1"].consumed);
    assert_eq!(data.stock_of(shirt.id), 4);
}

#[tokio::test]
async fn forged_signature_changes_nothing() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();

    let mut callback = signed_callback(&checkout.gateway_order_id, "pay_1");
    callback.gateway_payment_id = "pay_2".into();
    let err = h.storefront.confirm_gateway_payment(&callback).await.unwrap_err();

    assert!(matches!(err, CommerceError::Payment(PaymentError::SignatureMismatch)));
    let data = h.data().await;
    assert!(data.orders.is_empty());
    assert!(!data.sessions[&checkout.gateway_order_id].consumed);
    assert_eq!(data.reserved_units(shirt.id), 1);
}

#[tokio::test]
async fn repeated_callback_is_rejected() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    let callback = signed_callback(&checkout.gateway_order_id, "pay_1");

    h.storefront.confirm_gateway_payment(&callback).await.unwrap();
    let err = h.storefront.confirm_gateway_payment(&callback).await.unwrap_err();

    assert!(matches!(
        err,
        CommerceError::Conflict(ConflictError::AlreadyProcessed(ref id)) if id == "order_mock_1"
    ));
    assert_eq!(h.data().await.orders.len(), 1);
}

#[tokio::test]
async fn unknown_gateway_order_is_rejected() {
    let h = Harness::new().await;
    let err = h
        .storefront
        .confirm_gateway_payment(&signed_callback("order_elsewhere", "pay_1"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommerceError::Payment(PaymentError::UnknownGatewayOrder(_))
    ));
}

#[tokio::test]
async fn gateway_outage_opens_no_session() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();

    h.gateway.set_unavailable(true);
    let err = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap_err();

    assert!(matches!(err, CommerceError::Payment(PaymentError::Gateway(_))));
    let data = h.data().await;
    assert!(data.sessions.is_empty());
    assert_eq!(data.reserved_units(shirt.id), 1);
}

#[tokio::test]
async fn payment_after_expiry_is_refunded_to_the_wallet() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(16));
    h.storefront.sweep().await.unwrap();
    assert_eq!(h.stock(&shirt).await, 5);

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&checkout.gateway_order_id, "pay_1"))
        .await
        .unwrap();

    assert_eq!(
        confirmation,
        GatewayConfirmation::Refunded {
            amount: Money::from_rupees(2360)
        }
    );
    let data = h.data().await;
    assert!(data.orders.is_empty());
    assert_eq!(data.wallet_balance(h.user), Money::from_rupees(2360));
    assert_eq!(data.wallet_transactions[0].kind, WalletTransactionKind::Refund);
    assert!(data.sessions[&checkout.gateway_order_id].consumed);
}

#[tokio::test]
async fn payment_for_a_changed_cart_releases_and_refunds() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    let scarf = h.variant("Silk Scarf", 900, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();

    h.storefront.add_to_cart(h.user, scarf.id).await.unwrap();
    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&checkout.gateway_order_id, "pay_1"))
        .await
        .unwrap();

    assert!(matches!(confirmation, GatewayConfirmation::Refunded { .. }));
    let data = h.data().await;
    assert!(data.reserved_stock.is_empty());
    assert_eq!(data.stock_of(shirt.id), 5);
    assert_eq!(data.wallet_balance(h.user), Money::from_rupees(2360));
}

#[tokio::test]
async fn failed_payment_leaves_an_unplaced_order_that_can_be_retried() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let first = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();

    let failed = h
        .storefront
        .record_gateway_failure(h.user, &first.gateway_order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.items[0].status, ItemStatus::NotPlaced);
    assert_eq!(failed.payments[0].status, PaymentStatus::Failed);
    let data = h.data().await;
    assert!(data.reserved_stock.is_empty());
    assert!(data.cart.is_empty());
    assert_eq!(data.stock_of(shirt.id), 4);

    let retry = h
        .storefront
        .begin_retry_payment(h.user, failed.order.id)
        .await
        .unwrap();
    assert_eq!(retry.amount, Money::from_rupees(2360));
    assert_ne!(retry.gateway_order_id, first.gateway_order_id);

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&retry.gateway_order_id, "pay_retry"))
        .await
        .unwrap();
    let GatewayConfirmation::Retried(details) = confirmation else {
        panic!("expected a retried order, got {confirmation:?}");
    };
    assert_eq!(details.items[0].status, ItemStatus::Confirmed);
    assert_eq!(details.payments[0].status, PaymentStatus::Completed);
    assert_eq!(details.payments[0].gateway_payment_id.as_deref(), Some("pay_retry"));

    let err = h
        .storefront
        .begin_retry_payment(h.user, failed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommerceError::Conflict(ConflictError::InvalidTransition {
            from: ItemStatus::Confirmed,
            ..
        })
    ));
}

#[tokio::test]
async fn swept_orders_cannot_be_retried() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    let failed = h
        .storefront
        .record_gateway_failure(h.user, &checkout.gateway_order_id)
        .await
        .unwrap()
        .unwrap();

    h.clock.advance(Duration::minutes(31));
    let report = h.storefront.sweep().await.unwrap();
    assert_eq!(report.items_failed, 1);
    assert_eq!(h.stock(&shirt).await, 5);

    let item = h.item_of(failed.order.id, &shirt).await;
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.reason.as_deref(), Some("payment not completed"));
    assert_eq!(
        h.data().await.payment_of(item.id).unwrap().status,
        PaymentStatus::Cancelled
    );

    let err = h
        .storefront
        .begin_retry_payment(h.user, failed.order.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommerceError::Conflict(ConflictError::InvalidTransition {
            from: ItemStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn retry_paid_after_the_sweep_is_refunded() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    let failed = h
        .storefront
        .record_gateway_failure(h.user, &checkout.gateway_order_id)
        .await
        .unwrap()
        .unwrap();
    let retry = h
        .storefront
        .begin_retry_payment(h.user, failed.order.id)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(31));
    h.storefront.sweep().await.unwrap();

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&retry.gateway_order_id, "pay_late"))
        .await
        .unwrap();
    assert_eq!(
        confirmation,
        GatewayConfirmation::Refunded {
            amount: Money::from_rupees(2360)
        }
    );
    let data = h.data().await;
    assert_eq!(data.wallet_balance(h.user), Money::from_rupees(2360));
    assert_eq!(data.wallet_transactions[0].order_id, Some(failed.order.id));
}

#[tokio::test]
async fn payment_captured_after_a_reported_failure_confirms_the_order() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    let failed = h
        .storefront
        .record_gateway_failure(h.user, &checkout.gateway_order_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!h.data().await.sessions[&checkout.gateway_order_id].consumed);

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&checkout.gateway_order_id, "pay_2"))
        .await
        .unwrap();
    let GatewayConfirmation::Retried(details) = confirmation else {
        panic!("expected the unplaced order to be confirmed, got {confirmation:?}");
    };
    assert_eq!(details.order.id, failed.order.id);
    assert_eq!(details.items[0].status, ItemStatus::Confirmed);
    assert_eq!(details.payments[0].status, PaymentStatus::Completed);
    assert_eq!(details.payments[0].gateway_payment_id.as_deref(), Some("pay_2"));
    assert!(h.data().await.wallet_balance(h.user).is_zero());

    let again = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&checkout.gateway_order_id, "pay_2"))
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        CommerceError::Conflict(ConflictError::AlreadyProcessed(_))
    ));

    h.clock.advance(Duration::minutes(31));
    let report = h.storefront.sweep().await.unwrap();
    assert_eq!(report.items_failed, 0);
    assert_eq!(h.stock(&shirt).await, 4);
}

#[tokio::test]
async fn payment_captured_after_failure_and_sweep_is_refunded() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, None).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    let failed = h
        .storefront
        .record_gateway_failure(h.user, &checkout.gateway_order_id)
        .await
        .unwrap()
        .unwrap();

    h.clock.advance(Duration::minutes(31));
    h.storefront.sweep().await.unwrap();
    assert_eq!(h.stock(&shirt).await, 5);

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&checkout.gateway_order_id, "pay_2"))
        .await
        .unwrap();
    assert_eq!(
        confirmation,
        GatewayConfirmation::Refunded {
            amount: Money::from_rupees(2360)
        }
    );
    let data = h.data().await;
    assert_eq!(data.wallet_balance(h.user), Money::from_rupees(2360));
    assert_eq!(data.wallet_transactions[0].order_id, Some(failed.order.id));
    assert_eq!(
        h.item_of(failed.order.id, &shirt).await.status,
        ItemStatus::Failed
    );
}

#[tokio::test]
async fn failed_coupon_order_returns_its_slot_when_swept() {
    let h = Harness::new().await;
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    let coupon = h.coupon(fixtures::fixed_coupon("WELCOME", 100, 0)).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = h.storefront.reserve(h.user, Some("WELCOME")).await.unwrap();
    let checkout = h
        .storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();
    h.storefront
        .record_gateway_failure(h.user, &checkout.gateway_order_id)
        .await
        .unwrap();
    assert_eq!(h.data().await.coupon_uses(coupon.id), 1);

    h.clock.advance(Duration::minutes(31));
    let report = h.storefront.sweep().await.unwrap();

    assert_eq!(report.coupons_reversed, 1);
    assert_eq!(h.data().await.coupon_uses(coupon.id), 0);
}

#[tokio::test]
async fn top_up_credits_the_wallet() {
    let h = Harness::new().await;
    let top_up = h
        .storefront
        .begin_wallet_top_up(h.user, Money::from_rupees(500))
        .await
        .unwrap();

    let confirmation = h
        .storefront
        .confirm_gateway_payment(&signed_callback(&top_up.gateway_order_id, "pay_topup"))
        .await
        .unwrap();
    assert_eq!(
        confirmation,
        GatewayConfirmation::ToppedUp {
            amount: Money::from_rupees(500)
        }
    );

    let history = h.storefront.wallet_history(h.user).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, WalletTransactionKind::Credit);
    assert!(history[0].last_balance.is_zero());
    assert_eq!(
        h.storefront.wallet_balance(h.user).await.unwrap(),
        Money::from_rupees(500)
    );

    let failure = h
        .storefront
        .record_gateway_failure(h.user, "order_mock_1")
        .await
        .unwrap_err();
    assert!(matches!(
        failure,
        CommerceError::Conflict(ConflictError::AlreadyProcessed(_))
    ));
}

#[tokio::test]
async fn failed_top_up_changes_nothing() {
    let h = Harness::new().await;
    let top_up = h
        .storefront
        .begin_wallet_top_up(h.user, Money::from_rupees(500))
        .await
        .unwrap();

    let outcome = h
        .storefront
        .record_gateway_failure(h.user, &top_up.gateway_order_id)
        .await
        .unwrap();
    assert!(outcome.is_none());
    assert_eq!(h.data().await.wallet_balance(h.user), Money::ZERO);
}

#[tokio::test]
async fn zero_top_up_is_refused() {
    let h = Harness::new().await;
    let err = h
        .storefront
        .begin_wallet_top_up(h.user, Money::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, CommerceError::Validation(ValidationError::Invalid(_))));
}

//! `HttpGatewayClient` against a stubbed orders API.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{Harness, KEY_SECRET};
use serde_json::json;
use std::sync::Arc;
use storefront::payment_gateway::GatewayClient;
use storefront::{HttpGatewayClient, Settings, Storefront};
use storefront_core::Money;
use storefront_core::error::{CommerceError, PaymentError};
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASIC_AUTH: &str = "Basic cnpwX3Rlc3Rfa2V5Ondoc2VjX3Rlc3Rfc2VjcmV0";

fn client(server: &MockServer) -> HttpGatewayClient {
    HttpGatewayClient::new(format!("{}/", server.uri()), "rzp_test_key", KEY_SECRET)
}

#[tokio::test]
async fn creates_an_order_in_minor_units() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(header("authorization", BASIC_AUTH))
        .and(body_json(json!({
            "amount": 236_000,
            "currency": "INR",
            "receipt": "rcpt_42"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_Live123",
            "entity": "order",
            "amount": 236_000,
            "currency": "INR",
            "status": "created"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let order = client(&server)
        .create_order(Money::from_rupees(2360), "INR", "rcpt_42")
        .await
        .unwrap();

    assert_eq!(order.id, "order_Live123");
    assert_eq!(order.amount, Money::from_rupees(2360));
    assert_eq!(order.currency, "INR");
    assert_eq!(order.receipt, "rcpt_42");
}

#[tokio::test]
async fn rejected_requests_surface_as_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "BAD_REQUEST_ERROR", "description": "Authentication failed" }
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_order(Money::from_rupees(100), "INR", "rcpt_1")
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Gateway(ref message) if message.contains("401")));
}

#[tokio::test]
async fn malformed_bodies_are_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .create_order(Money::from_rupees(100), "INR", "rcpt_1")
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Gateway(_)));
}

#[tokio::test]
async fn checkout_opens_a_session_for_the_remote_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(body_partial_json(json!({ "amount": 236_000, "currency": "INR" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "order_Live123" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = Harness::new().await;
    let storefront = Storefront::new(
        Arc::new(h.store.clone()),
        Arc::new(h.clock.clone()),
        Arc::new(client(&server)),
        Settings {
            gateway_key_id: "rzp_test_key".into(),
            gateway_key_secret: KEY_SECRET.into(),
            ..Settings::default()
        },
    );
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = storefront.reserve(h.user, None).await.unwrap();

    let checkout = storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap();

    assert_eq!(checkout.gateway_order_id, "order_Live123");
    let data = h.data().await;
    let session = &data.sessions["order_Live123"];
    assert_eq!(session.amount, Money::from_rupees(2360));
    assert!(!session.consumed);
}

#[tokio::test]
async fn unreachable_gateway_keeps_the_hold() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let h = Harness::new().await;
    let storefront = Storefront::new(
        Arc::new(h.store.clone()),
        Arc::new(h.clock.clone()),
        Arc::new(HttpGatewayClient::new(uri, "rzp_test_key", KEY_SECRET)),
        Settings::default(),
    );
    let shirt = h.variant("Linen Shirt", 2000, 5).await;
    h.cart(&[(&shirt, 1)]).await;
    let hold = storefront.reserve(h.user, None).await.unwrap();

    let err = storefront
        .begin_gateway_checkout(h.user, hold.id, h.address.id)
        .await
        .unwrap_err();

    assert!(matches!(err, CommerceError::Payment(PaymentError::Gateway(_))));
    let data = h.data().await;
    assert!(data.sessions.is_empty());
    assert_eq!(data.reserved_units(shirt.id), 1);
}

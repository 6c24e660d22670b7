//! Payment gateway client and callback signatures.
//!
//! The gateway is a hosted redirect flow: the server creates a remote order for
//! the amount owed, the client completes payment in the gateway's widget, and the
//! gateway calls back with `(order id, payment id, signature)`. The signature is
//! a hex HMAC-SHA256 over `"{order_id}|{payment_id}"` keyed with the account
//! secret.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use storefront_core::Money;
use storefront_core::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// A remote order created at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    /// Gateway-issued order id
    pub id: String,
    /// Amount in minor units
    pub amount: Money,
    /// Currency code
    pub currency: String,
    /// Our receipt reference
    pub receipt: String,
}

/// Gateway seam.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Creates a remote order for `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Gateway`] if the gateway is unreachable or
    /// rejects the request.
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, PaymentError>;
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    id: String,
}

/// HTTP client for the hosted gateway's orders API.
#[derive(Clone, Debug)]
pub struct HttpGatewayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpGatewayClient {
    /// Creates a client authenticating with `key_id` / `key_secret`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        }
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, PaymentError> {
        let url = format!("{}/v1/orders", self.base_url);
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderRequest {
                amount: amount.paise(),
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "Gateway rejected order creation");
            return Err(PaymentError::Gateway(format!("gateway returned {status}")));
        }

        let created: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Gateway(format!("malformed response: {e}")))?;

        tracing::info!(
            gateway_order_id = %created.id,
            amount = amount.paise(),
            receipt,
            "Gateway order created"
        );

        Ok(GatewayOrder {
            id: created.id,
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        })
    }
}

/// In-process gateway for development and testing.
///
/// Issues sequential `order_mock_<n>` ids and can be told to fail.
#[derive(Clone, Debug, Default)]
pub struct MockGatewayClient {
    next_id: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl MockGatewayClient {
    /// Creates a new mock gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn GatewayClient> {
        Arc::new(Self::new())
    }

    /// Makes every following `create_order` fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayClient for MockGatewayClient {
    async fn create_order(
        &self,
        amount: Money,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError::Gateway("mock gateway unavailable".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("order_mock_{n}");
        tracing::debug!(gateway_order_id = %id, amount = amount.paise(), "Mock gateway order created");
        Ok(GatewayOrder {
            id,
            amount,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        })
    }
}

/// Signature the gateway attaches to a successful payment.
///
/// # Errors
///
/// Returns [`PaymentError::Gateway`] if the secret is unusable as an HMAC key.
pub fn sign_payment(
    key_secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
) -> Result<String, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(key_secret.as_bytes())
        .map_err(|e| PaymentError::Gateway(format!("invalid signing key: {e}")))?;
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a callback signature in constant time.
///
/// # Errors
///
/// Returns [`PaymentError::SignatureMismatch`] unless `signature` is the hex
/// HMAC of `"{gateway_order_id}|{gateway_payment_id}"`.
pub fn verify_payment_signature(
    key_secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> Result<(), PaymentError> {
    let expected = hex::decode(signature).map_err(|_| PaymentError::SignatureMismatch)?;
    let mut mac = HmacSha256::new_from_slice(key_secret.as_bytes())
        .map_err(|e| PaymentError::Gateway(format!("invalid signing key: {e}")))?;
    mac.update(format!("{gateway_order_id}|{gateway_payment_id}").as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| PaymentError::SignatureMismatch)
}

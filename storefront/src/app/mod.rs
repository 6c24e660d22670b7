//! Application services.
//!
//! [`Storefront`] owns the injected dependencies (store, clock, gateway) and
//! exposes every pipeline operation as an async method. Each operation:
//!
//! 1. Reads the clock once
//! 2. Opens one [`CommerceTx`](storefront_core::store::CommerceTx)
//! 3. Applies the rules from `storefront-core`
//! 4. Commits, then logs and records metrics
//!
//! Any `?` before the commit drops the transaction, which rolls it back.
//!
//! Operations are grouped by concern in the submodules; helpers that work on an
//! already-open transaction are `pub(crate)` so operations can compose them
//! without opening a second transaction.

pub mod cancellation;
pub mod cart;
pub mod coupons;
pub mod fulfilment;
pub mod gateway;
pub mod payment;
pub mod reservation;
pub mod settlement;
pub mod sweeper;
pub mod wallet;

use crate::config::{CheckoutConfig, Config, GatewayConfig};
use crate::payment_gateway::GatewayClient;
use chrono::Duration;
use std::sync::Arc;
use storefront_core::environment::Clock;
use storefront_core::store::CommerceStore;

pub use cancellation::CancellationReceipt;
pub use cart::CartView;
pub use gateway::{GatewayCallback, GatewayCheckout};
pub use payment::{AuthorizationRequest, PaymentAdapter, PaymentOutcome};
pub use reservation::{PricedLine, Quote};
pub use settlement::OrderDetails;
pub use sweeper::{SweepReport, spawn_sweeper};

/// Tunables the services read on every call.
#[derive(Clone)]
pub struct Settings {
    /// How long a reservation holds stock
    pub reservation_hold: Duration,
    /// How long a payment-failed order keeps its stock
    pub abandoned_order_grace: Duration,
    /// Public gateway key handed to clients
    pub gateway_key_id: String,
    /// Secret for callback signatures
    pub gateway_key_secret: String,
    /// Currency sent with gateway orders
    pub currency: String,
}

impl Settings {
    /// Builds settings from the loaded configuration.
    #[must_use]
    pub fn new(checkout: &CheckoutConfig, gateway: &GatewayConfig) -> Self {
        Self {
            reservation_hold: Duration::minutes(checkout.reservation_hold_minutes),
            abandoned_order_grace: Duration::minutes(checkout.abandoned_order_grace_minutes),
            gateway_key_id: gateway.key_id.clone(),
            gateway_key_secret: gateway.key_secret.clone(),
            currency: gateway.currency.clone(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("reservation_hold", &self.reservation_hold)
            .field("abandoned_order_grace", &self.abandoned_order_grace)
            .field("gateway_key_id", &self.gateway_key_id)
            .field("gateway_key_secret", &"<redacted>")
            .field("currency", &self.currency)
            .finish()
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self::new(&config.checkout, &config.gateway)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(
            &CheckoutConfig::default(),
            &GatewayConfig {
                key_id: String::new(),
                key_secret: String::new(),
                base_url: String::new(),
                currency: "INR".to_string(),
            },
        )
    }
}

/// The checkout pipeline.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Clone)]
pub struct Storefront {
    store: Arc<dyn CommerceStore>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn GatewayClient>,
    settings: Settings,
}

impl Storefront {
    /// Wires the pipeline to its dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn CommerceStore>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn GatewayClient>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            clock,
            gateway,
            settings,
        }
    }

    /// Active settings
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

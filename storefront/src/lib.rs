//! Storefront checkout pipeline.
//!
//! Turns a shopping cart into a settled order while keeping three shared
//! counters consistent under concurrency: variant stock, coupon usage and
//! wallet balances.
//!
//! # Architecture
//!
//! ```text
//!                      ┌───────────────────────┐
//!   cart ──reserve───▶ │  Reservation Manager  │ ──hold rows──┐
//!                      └───────────────────────┘              │
//!                                                              ▼
//!   COD / wallet ──────────────────────────────▶ ┌───────────────────────┐
//!   gateway callback ──verify signature────────▶ │  Settlement Engine    │ ─▶ Order
//!                                                └───────────────────────┘    + Items
//!                                                                             + Payments
//!                      ┌───────────────────────┐
//!   every minute ────▶ │  Reservation Sweeper  │ ─▶ stock / coupon slots back
//!                      └───────────────────────┘
//! ```
//!
//! Every operation runs in one [`CommerceTx`](storefront_core::store::CommerceTx)
//! against the [`CommerceStore`](storefront_core::store::CommerceStore) seam;
//! `storefront-postgres` provides the production backend and
//! `storefront-testing` an in-memory one.
//!
//! # Usage
//!
//! ```ignore
//! let storefront = Storefront::new(store, Arc::new(SystemClock), gateway, Settings::from(&config));
//! let hold = storefront.reserve(user_id, Some("WELCOME10")).await?;
//! let order = storefront
//!     .checkout(user_id, hold.id, address_id, &PaymentAdapter::CashOnDelivery)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod metrics;
pub mod payment_gateway;

pub use app::{
    CancellationReceipt, CartView, GatewayCallback, GatewayCheckout, OrderDetails, PaymentAdapter,
    PaymentOutcome, Quote, Settings, Storefront, SweepReport, spawn_sweeper,
};
pub use app::gateway::GatewayConfirmation;
pub use config::Config;
pub use payment_gateway::{GatewayClient, HttpGatewayClient, MockGatewayClient};

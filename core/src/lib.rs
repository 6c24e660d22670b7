//! # Storefront Core
//!
//! Domain model of the storefront checkout pipeline: the value types, the
//! pricing policy, the coupon and order-item rules, the error taxonomy and the
//! transactional store seam every service runs against.
//!
//! ## Pipeline
//!
//! ```text
//!   cart ──reserve──▶ hold (stock + coupon) ──authorize──▶ payment outcome
//!                        │                                      │
//!                        │ expired / released                   │ settle
//!                        ▼                                      ▼
//!                  compensation                     Order + OrderItems + PaymentDetails
//!                  (stock, coupon credited)         (hold rows deleted, cart cleared)
//! ```
//!
//! Nothing in this crate performs I/O. Services live in the `storefront`
//! crate; storage backends implement [`store::CommerceStore`].

pub mod catalog;
pub mod coupon;
pub mod error;
pub mod ids;
pub mod money;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod reservation;
pub mod returns;
pub mod store;
pub mod wallet;

pub use error::{CommerceError, CommerceResult, ConflictError, PaymentError, StoreError, ValidationError};
pub use money::Money;

/// Environment traits injected into services.
///
/// All external dependencies are abstracted behind traits so tests can pin
/// time and swap storage.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

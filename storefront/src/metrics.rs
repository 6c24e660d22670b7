//! Business metrics for the checkout pipeline.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `storefront_reservations_total{status}` - Reservation sets by outcome
//!   (created, settled, released, expired)
//! - `storefront_orders_total{method}` - Orders settled per payment method
//! - `storefront_order_revenue_paise_total` - Settled order value
//! - `storefront_gateway_failures_total` - Checkouts committed as not placed
//! - `storefront_refunds_paise_total` - Money returned to wallets
//! - `storefront_sweeper_runs_total{result}` - Sweeper runs (ok, failed)
//! - `storefront_sweeper_units_restocked_total` - Units the sweeper put back

use metrics::describe_counter;
use storefront_core::Money;
use storefront_core::payment::PaymentMethod;

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "storefront_reservations_total",
        "Reservation sets by outcome (created, settled, released, expired)"
    );
    describe_counter!(
        "storefront_orders_total",
        "Orders settled, labelled by payment method"
    );
    describe_counter!(
        "storefront_order_revenue_paise_total",
        "Total value of settled orders in paise"
    );
    describe_counter!(
        "storefront_gateway_failures_total",
        "Gateway checkouts recorded as not placed"
    );
    describe_counter!(
        "storefront_refunds_paise_total",
        "Refunds credited to wallets in paise"
    );
    describe_counter!(
        "storefront_sweeper_runs_total",
        "Sweeper runs by result (ok, failed)"
    );
    describe_counter!(
        "storefront_sweeper_units_restocked_total",
        "Units returned to stock by the sweeper"
    );

    tracing::info!("Business metrics registered");
}

/// Record a reservation set created.
pub fn record_reservation_created(lines: usize) {
    metrics::counter!("storefront_reservations_total", "status" => "created").increment(1);
    tracing::debug!(lines, "Recorded reservation_created metric");
}

/// Record reservation sets given back, either by their owner or by expiry.
pub fn record_reservations_released(count: usize, expired: bool) {
    let status = if expired { "expired" } else { "released" };
    metrics::counter!("storefront_reservations_total", "status" => status)
        .increment(count as u64);
}

/// Record a settled order.
pub fn record_order_settled(method: PaymentMethod, total: Money) {
    metrics::counter!("storefront_reservations_total", "status" => "settled").increment(1);
    metrics::counter!("storefront_orders_total", "method" => method.as_str()).increment(1);
    metrics::counter!("storefront_order_revenue_paise_total").increment(total.paise());
    tracing::debug!(method = %method, total = %total, "Recorded order_settled metric");
}

/// Record a gateway checkout committed as not placed.
pub fn record_gateway_failure() {
    metrics::counter!("storefront_gateway_failures_total").increment(1);
}

/// Record money credited back to a wallet.
pub fn record_refund(amount: Money) {
    metrics::counter!("storefront_refunds_paise_total").increment(amount.paise());
}

/// Record the outcome of one sweeper run.
pub fn record_sweep(ok: bool, units_restocked: u64) {
    let result = if ok { "ok" } else { "failed" };
    metrics::counter!("storefront_sweeper_runs_total", "result" => result).increment(1);
    metrics::counter!("storefront_sweeper_units_restocked_total").increment(units_restocked);
}

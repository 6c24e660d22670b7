//! Reservation sweeper.
//!
//! The backstop that returns stock and coupon slots nobody is going to use.
//! One run is one transaction:
//!
//! 1. Expired hold rows are released (coupon slot once per coupon hold, row
//!    deleted, stock credited)
//! 2. `NotPlaced` items older than the abandoned-order grace are failed and
//!    their stock credited; an order left with nothing holding stock hands
//!    its coupon slot back
//! 3. Coupon statuses follow their validity dates
//!
//! Rows already disposed of are simply absent, so running it twice is
//! harmless. Runs never overlap: the loop awaits each run before the next
//! tick.

use super::Storefront;
use super::reservation::{ReleaseTally, release_rows};
use crate::metrics;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use storefront_core::coupon::CouponStatus;
use storefront_core::order::ItemStatus;
use storefront_core::payment::PaymentStatus;
use storefront_core::{CommerceError, CommerceResult};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Reservation sets with at least one expired row
    pub reservations_expired: usize,
    /// Hold rows deleted
    pub rows_released: usize,
    /// Units put back on the shelf (holds and failed items)
    pub units_restocked: u64,
    /// Coupon uses handed back
    pub coupons_reversed: usize,
    /// Unpaid items moved to `Failed`
    pub items_failed: usize,
    /// Scheduled coupons that became active
    pub coupons_activated: usize,
    /// Coupons that passed their expiration date
    pub coupons_expired: usize,
}

impl SweepReport {
    /// True when the run found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Storefront {
    /// Runs one sweep.
    ///
    /// # Errors
    ///
    /// [`CommerceError::Sweep`] wrapping the cause; nothing was changed and the
    /// next run retries.
    pub async fn sweep(&self) -> CommerceResult<SweepReport> {
        let result = self.sweep_once().await;
        match &result {
            Ok(report) => metrics::record_sweep(true, report.units_restocked),
            Err(_) => metrics::record_sweep(false, 0),
        }
        result.map_err(|e| CommerceError::Sweep(Box::new(e)))
    }

    async fn sweep_once(&self) -> CommerceResult<SweepReport> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut report = SweepReport::default();

        let expired = tx.expired_reserved_stock(now).await?;
        let mut tally = ReleaseTally::default();
        release_rows(&mut *tx, expired, &mut tally).await?;
        report.reservations_expired = tally.sets.len();
        report.rows_released = tally.rows;
        report.units_restocked = tally.units;
        report.coupons_reversed = tally.coupons_reversed;

        let cutoff = now - self.settings.abandoned_order_grace;
        let mut touched_orders = BTreeSet::new();
        for mut item in tx.stale_unplaced_items(cutoff).await? {
            tx.credit_stock(item.variant_id, item.quantity).await?;
            item.set_status(ItemStatus::Failed, now);
            item.reason = Some("payment not completed".to_string());
            tx.update_order_item(&item).await?;
            if let Some(mut payment) = tx.payment_for_item(item.id).await? {
                payment.status = PaymentStatus::Cancelled;
                payment.updated_at = now;
                tx.update_payment(&payment).await?;
            }
            report.items_failed += 1;
            report.units_restocked += u64::from(item.quantity);
            touched_orders.insert(item.order_id);
        }
        for order_id in touched_orders {
            let Some(order) = tx.order(order_id).await? else {
                continue;
            };
            let Some(coupon) = &order.coupon else {
                continue;
            };
            let items = tx.order_items(order_id).await?;
            if !items.iter().any(|item| item.status.holds_stock()) {
                tx.release_coupon_use(coupon.coupon_id).await?;
                report.coupons_reversed += 1;
            }
        }

        for coupon in tx.live_coupons().await? {
            match coupon.scheduled_transition(now) {
                Some(status @ CouponStatus::Active) => {
                    tx.set_coupon_status(coupon.id, status).await?;
                    report.coupons_activated += 1;
                }
                Some(status) => {
                    tx.set_coupon_status(coupon.id, status).await?;
                    report.coupons_expired += 1;
                }
                None => {}
            }
        }

        tx.commit().await?;
        if report.reservations_expired > 0 {
            metrics::record_reservations_released(report.reservations_expired, true);
        }
        Ok(report)
    }
}

/// Runs [`Storefront::sweep`] every `period` until the task is aborted.
///
/// Ticks missed while a sweep is running are skipped rather than bunched up.
pub fn spawn_sweeper(storefront: Arc<Storefront>, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(period_secs = period.as_secs(), "Reservation sweeper started");

        loop {
            ticker.tick().await;
            match storefront.sweep().await {
                Ok(report) if report.is_empty() => tracing::trace!("Sweep found nothing to do"),
                Ok(report) => tracing::info!(
                    reservations_expired = report.reservations_expired,
                    rows_released = report.rows_released,
                    units_restocked = report.units_restocked,
                    coupons_reversed = report.coupons_reversed,
                    items_failed = report.items_failed,
                    coupons_activated = report.coupons_activated,
                    coupons_expired = report.coupons_expired,
                    "Sweep completed"
                ),
                Err(e) => tracing::error!(error = %e, "Sweep failed; retrying next tick"),
            }
        }
    })
}

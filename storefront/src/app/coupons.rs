//! Coupon administration.
//!
//! Date-driven status changes (scheduled → active → expired) are applied by
//! the sweeper.

use super::Storefront;
use storefront_core::coupon::{Coupon, CouponStatus, NewCoupon};
use storefront_core::ids::CouponId;
use storefront_core::{CommerceResult, ConflictError, ValidationError};

impl Storefront {
    /// Creates a coupon. The code is stored upper-case.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidCoupon`] for a malformed definition
    /// - [`ConflictError::DuplicateCoupon`] if the code is taken
    pub async fn create_coupon(&self, definition: NewCoupon) -> CommerceResult<Coupon> {
        let now = self.clock.now();
        let coupon = definition.into_coupon(now)?;

        let mut tx = self.store.begin().await?;
        if tx.coupon_by_code(&coupon.code).await?.is_some() {
            return Err(ConflictError::DuplicateCoupon(coupon.code).into());
        }
        tx.insert_coupon(&coupon).await?;
        tx.commit().await?;

        tracing::info!(
            coupon_id = %coupon.id,
            code = %coupon.code,
            status = %coupon.status,
            "Coupon created"
        );
        Ok(coupon)
    }

    /// Soft-deletes a coupon. Holds and orders that already use it keep it.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownCoupon`] if it does not exist.
    pub async fn delete_coupon(&self, coupon_id: CouponId) -> CommerceResult<()> {
        let mut tx = self.store.begin().await?;
        let coupon = tx
            .coupon(coupon_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownCoupon(coupon_id.to_string()))?;
        tx.set_coupon_status(coupon.id, CouponStatus::Deleted).await?;
        tx.commit().await?;

        tracing::info!(%coupon_id, code = %coupon.code, "Coupon deleted");
        Ok(())
    }
}

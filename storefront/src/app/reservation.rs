//! Reservation manager: turns a cart into held stock and a held coupon slot.
//!
//! Every path that gives a hold back (owner release, a newer reservation, the
//! sweeper) goes through [`release_rows`], which deletes the row first and only
//! credits stock when the delete succeeded. A row disposed of by a concurrent
//! settlement is therefore never credited twice.

use super::Storefront;
use crate::metrics;
use serde::Serialize;
use std::collections::HashSet;
use storefront_core::catalog::Variant;
use storefront_core::ids::{ReservationId, ReservedCouponId, ReservedStockId, UserId};
use storefront_core::pricing::{Breakdown, LinePrice};
use storefront_core::reservation::{ReservationSet, ReservedCoupon, ReservedStock};
use storefront_core::store::CommerceTx;
use storefront_core::{CommerceResult, ConflictError, Money, ValidationError};

/// A held line priced at current catalog prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    /// The hold row
    pub hold: ReservedStock,
    /// Catalog snapshot
    pub variant: Variant,
    /// Line price
    pub price: LinePrice,
}

/// What a reservation set costs right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Reservation set
    pub reservation_id: ReservationId,
    /// Owner
    pub user_id: UserId,
    /// Priced lines in hold order
    pub lines: Vec<PricedLine>,
    /// Held coupon, if any
    pub coupon: Option<ReservedCoupon>,
    /// Order-level totals
    pub breakdown: Breakdown,
}

impl Quote {
    /// Amount the customer pays.
    #[must_use]
    pub const fn total(&self) -> Money {
        self.breakdown.total
    }
}

/// Counts of what a release pass gave back.
#[derive(Debug, Default)]
pub(crate) struct ReleaseTally {
    pub sets: HashSet<ReservationId>,
    pub rows: usize,
    pub units: u64,
    pub coupons_reversed: usize,
    seen_coupons: HashSet<ReservedCouponId>,
}

impl Storefront {
    /// Holds the user's whole cart (and optionally a coupon) for
    /// `reservation_hold`.
    ///
    /// Any outstanding set of the same user is released first, in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyCart`], unknown variant or coupon
    /// - [`ConflictError::StockUnavailable`] naming the first short line
    /// - any coupon rule failure from [`Coupon::redeem_check`](storefront_core::coupon::Coupon::redeem_check)
    ///
    /// Nothing is held when an error is returned.
    pub async fn reserve(
        &self,
        user_id: UserId,
        coupon_code: Option<&str>,
    ) -> CommerceResult<ReservationSet> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let mut cart = tx.cart_items(user_id).await?;
        if cart.is_empty() {
            return Err(ValidationError::EmptyCart.into());
        }

        let mut tally = ReleaseTally::default();
        for previous in tx.user_reservations(user_id).await? {
            if let Some(set) = tx.reservation_set(previous).await? {
                release_set(&mut *tx, set, &mut tally).await?;
            }
        }

        // Variant rows are locked in id order so overlapping carts queue
        // instead of deadlocking.
        cart.sort_by_key(|item| item.variant_id);
        let mut held: Vec<(Variant, LinePrice)> = Vec::with_capacity(cart.len());
        for item in &cart {
            let variant = tx
                .variant(item.variant_id)
                .await?
                .ok_or(ValidationError::UnknownVariant(item.variant_id))?;
            let price = variant.price(item.quantity)?;
            if !tx.debit_stock(variant.id, item.quantity).await? {
                return Err(ConflictError::StockUnavailable {
                    variant_id: variant.id,
                    product: variant.product_name.clone(),
                    requested: item.quantity,
                    available: variant.stock_quantity,
                }
                .into());
            }
            held.push((variant, price));
        }

        let reservation_id = ReservationId::new();
        let coupon = match coupon_code.map(str::trim).filter(|code| !code.is_empty()) {
            Some(code) => {
                let code = code.to_uppercase();
                let coupon = tx
                    .coupon_by_code(&code)
                    .await?
                    .ok_or_else(|| ValidationError::UnknownCoupon(code.clone()))?;
                let purchase = Money::checked_sum(held.iter().map(|(_, price)| price.sub_total))
                    .ok_or(ValidationError::AmountOverflow)?;
                let discount = coupon.redeem_check(
                    now,
                    held.iter().map(|(variant, _)| variant.category.as_str()),
                    purchase,
                )?;
                if !tx.claim_coupon_use(coupon.id).await? {
                    return Err(ConflictError::CouponExhausted(coupon.code).into());
                }
                let hold = ReservedCoupon {
                    id: ReservedCouponId::new(),
                    reservation_id,
                    user_id,
                    coupon_id: coupon.id,
                    coupon_code: coupon.code,
                    description: coupon.description,
                    discount_amount: discount,
                    reserved_at: now,
                };
                tx.insert_reserved_coupon(&hold).await?;
                Some(hold)
            }
            None => None,
        };

        let reserve_till = now + self.settings.reservation_hold;
        let mut lines = Vec::with_capacity(cart.len());
        for item in &cart {
            let row = ReservedStock {
                id: ReservedStockId::new(),
                reservation_id,
                user_id,
                variant_id: item.variant_id,
                quantity: item.quantity,
                reserved_at: now,
                reserve_till,
                reserved_coupon_id: coupon.as_ref().map(|hold| hold.id),
            };
            tx.insert_reserved_stock(&row).await?;
            lines.push(row);
        }

        tx.commit().await?;

        if !tally.sets.is_empty() {
            metrics::record_reservations_released(tally.sets.len(), false);
        }
        metrics::record_reservation_created(lines.len());
        tracing::info!(
            %user_id,
            %reservation_id,
            lines = lines.len(),
            coupon = coupon.as_ref().map(|hold| hold.coupon_code.as_str()),
            %reserve_till,
            replaced = tally.sets.len(),
            "Reservation created"
        );

        Ok(ReservationSet {
            id: reservation_id,
            user_id,
            lines,
            coupon,
        })
    }

    /// Gives a reservation set back: stock is credited and the coupon slot
    /// returned.
    ///
    /// # Errors
    ///
    /// [`ConflictError::ReservationReleased`] if the set was already settled,
    /// released or swept.
    pub async fn release(&self, user_id: UserId, reservation_id: ReservationId) -> CommerceResult<()> {
        let mut tx = self.store.begin().await?;
        let set = load_set(&mut *tx, user_id, reservation_id).await?;
        let mut tally = ReleaseTally::default();
        release_set(&mut *tx, set, &mut tally).await?;
        tx.commit().await?;

        metrics::record_reservations_released(1, false);
        tracing::info!(
            %user_id,
            %reservation_id,
            units = tally.units,
            coupons = tally.coupons_reversed,
            "Reservation released"
        );
        Ok(())
    }

    /// Prices a held set at current catalog prices.
    ///
    /// # Errors
    ///
    /// [`ConflictError::ReservationReleased`] once the set is gone.
    pub async fn quote(&self, user_id: UserId, reservation_id: ReservationId) -> CommerceResult<Quote> {
        let mut tx = self.store.begin().await?;
        let set = load_set(&mut *tx, user_id, reservation_id).await?;
        price_set(&mut *tx, set).await
    }
}

/// Loads a set owned by `user_id` (locking).
pub(crate) async fn load_set(
    tx: &mut dyn CommerceTx,
    user_id: UserId,
    reservation_id: ReservationId,
) -> CommerceResult<ReservationSet> {
    match tx.reservation_set(reservation_id).await? {
        Some(set) if set.user_id == user_id => Ok(set),
        Some(_) => Err(ValidationError::UnknownReservation(reservation_id).into()),
        None => Err(ConflictError::ReservationReleased(reservation_id).into()),
    }
}

pub(crate) async fn price_set(tx: &mut dyn CommerceTx, set: ReservationSet) -> CommerceResult<Quote> {
    let mut lines = Vec::with_capacity(set.lines.len());
    for hold in set.lines {
        let variant = tx
            .variant(hold.variant_id)
            .await?
            .ok_or(ValidationError::UnknownVariant(hold.variant_id))?;
        let price = variant.price(hold.quantity)?;
        lines.push(PricedLine {
            hold,
            variant,
            price,
        });
    }
    let discount = set
        .coupon
        .as_ref()
        .map_or(Money::ZERO, |hold| hold.discount_amount);
    let breakdown = Breakdown::from_lines(lines.iter().map(|line| &line.price), discount)?;
    Ok(Quote {
        reservation_id: set.id,
        user_id: set.user_id,
        lines,
        coupon: set.coupon,
        breakdown,
    })
}

pub(crate) async fn release_set(
    tx: &mut dyn CommerceTx,
    set: ReservationSet,
    tally: &mut ReleaseTally,
) -> CommerceResult<()> {
    if let Some(hold) = &set.coupon {
        reverse_coupon(tx, hold.id, tally).await?;
    }
    release_rows(tx, set.lines, tally).await
}

/// Compensation for hold rows: coupon slot back (once per coupon hold), row
/// deleted, stock credited.
pub(crate) async fn release_rows(
    tx: &mut dyn CommerceTx,
    mut rows: Vec<ReservedStock>,
    tally: &mut ReleaseTally,
) -> CommerceResult<()> {
    rows.sort_by_key(|row| row.variant_id);
    for row in rows {
        if let Some(coupon_hold) = row.reserved_coupon_id {
            reverse_coupon(tx, coupon_hold, tally).await?;
        }
        if tx.delete_reserved_stock(row.id).await? {
            tx.credit_stock(row.variant_id, row.quantity).await?;
            tally.rows += 1;
            tally.units += u64::from(row.quantity);
            tally.sets.insert(row.reservation_id);
        }
    }
    Ok(())
}

async fn reverse_coupon(
    tx: &mut dyn CommerceTx,
    id: ReservedCouponId,
    tally: &mut ReleaseTally,
) -> CommerceResult<()> {
    if !tally.seen_coupons.insert(id) {
        return Ok(());
    }
    if let Some(hold) = tx.reserved_coupon(id).await? {
        if tx.delete_reserved_coupon(id).await? {
            tx.release_coupon_use(hold.coupon_id).await?;
            tally.coupons_reversed += 1;
        }
    }
    Ok(())
}

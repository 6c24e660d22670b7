//! Cart edits and the priced cart view.

use super::Storefront;
use serde::Serialize;
use storefront_core::catalog::{CartItem, CartLine};
use storefront_core::ids::{UserId, VariantId};
use storefront_core::pricing::{Breakdown, LOW_STOCK_THRESHOLD};
use storefront_core::{CommerceResult, ConflictError, Money, ValidationError};

/// The cart priced at current catalog prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    /// Lines, oldest first
    pub lines: Vec<CartLine>,
    /// Totals before any coupon
    pub breakdown: Breakdown,
    /// Lines clamped or removed because stock ran low
    pub adjusted: Vec<VariantId>,
}

impl Storefront {
    /// Adds one unit of a variant.
    ///
    /// # Errors
    ///
    /// [`ConflictError::StockUnavailable`] when the line would exceed stock.
    pub async fn add_to_cart(&self, user_id: UserId, variant_id: VariantId) -> CommerceResult<CartItem> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let variant = tx
            .variant(variant_id)
            .await?
            .ok_or(ValidationError::UnknownVariant(variant_id))?;

        let existing = tx
            .cart_items(user_id)
            .await?
            .into_iter()
            .find(|item| item.variant_id == variant_id);
        let item = match existing {
            Some(mut item) => {
                item.quantity = item.quantity.saturating_add(1);
                item
            }
            None => CartItem {
                user_id,
                variant_id,
                quantity: 1,
                added_at: now,
            },
        };
        if !variant.has_stock_for(item.quantity) {
            return Err(ConflictError::StockUnavailable {
                variant_id,
                product: variant.product_name,
                requested: item.quantity,
                available: variant.stock_quantity,
            }
            .into());
        }
        tx.put_cart_item(&item).await?;
        tx.commit().await?;

        tracing::debug!(%user_id, %variant_id, quantity = item.quantity, "Cart line added");
        Ok(item)
    }

    /// Removes one unit; the line disappears at zero.
    ///
    /// Returns the remaining line, if any.
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownVariant`] if the variant is not in the cart.
    pub async fn decrease_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
    ) -> CommerceResult<Option<CartItem>> {
        let mut tx = self.store.begin().await?;
        let mut item = tx
            .cart_items(user_id)
            .await?
            .into_iter()
            .find(|item| item.variant_id == variant_id)
            .ok_or(ValidationError::UnknownVariant(variant_id))?;

        let remaining = if item.quantity > 1 {
            item.quantity -= 1;
            tx.put_cart_item(&item).await?;
            Some(item)
        } else {
            tx.delete_cart_item(user_id, variant_id).await?;
            None
        };
        tx.commit().await?;
        Ok(remaining)
    }

    /// Drops a line from the cart.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn remove_from_cart(&self, user_id: UserId, variant_id: VariantId) -> CommerceResult<()> {
        let mut tx = self.store.begin().await?;
        tx.delete_cart_item(user_id, variant_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Prices the cart.
    ///
    /// Lines whose variant is gone or out of stock are removed; when stock is
    /// below the low-stock threshold a line is clamped to what is left. Both
    /// adjustments are persisted.
    ///
    /// # Errors
    ///
    /// Store failures only.
    pub async fn view_cart(&self, user_id: UserId) -> CommerceResult<CartView> {
        let mut tx = self.store.begin().await?;
        let mut lines = Vec::new();
        let mut adjusted = Vec::new();

        for mut item in tx.cart_items(user_id).await? {
            let variant = match tx.variant(item.variant_id).await? {
                Some(variant) if variant.stock_quantity > 0 => variant,
                _ => {
                    tx.delete_cart_item(user_id, item.variant_id).await?;
                    adjusted.push(item.variant_id);
                    continue;
                }
            };
            if variant.stock_quantity < LOW_STOCK_THRESHOLD && item.quantity > variant.stock_quantity {
                item.quantity = variant.stock_quantity;
                tx.put_cart_item(&item).await?;
                adjusted.push(item.variant_id);
            }
            let price = variant.price(item.quantity)?;
            lines.push(CartLine {
                item,
                variant,
                price,
            });
        }

        let breakdown = Breakdown::from_lines(lines.iter().map(|line| &line.price), Money::ZERO)?;
        tx.commit().await?;

        if !adjusted.is_empty() {
            tracing::info!(%user_id, adjusted = adjusted.len(), "Cart adjusted to available stock");
        }
        Ok(CartView {
            lines,
            breakdown,
            adjusted,
        })
    }
}

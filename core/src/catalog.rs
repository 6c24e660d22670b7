//! Catalog, cart and address records the pipeline reads.

use crate::error::ValidationError;
use crate::ids::{AddressId, UserId, VariantId};
use crate::money::Money;
use crate::pricing::{self, LinePrice};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A purchasable variant and its stock counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant identifier
    pub id: VariantId,
    /// Display name
    pub product_name: String,
    /// Category name (coupon scoping uses it)
    pub category: String,
    /// Primary image URL
    pub image: Option<String>,
    /// List price
    pub regular_price: Money,
    /// Selling price before offers
    pub sale_price: Money,
    /// Best running offer (product or category), in percent
    pub offer_percent: u32,
    /// Units on hand, excluding reservations
    pub stock_quantity: u32,
    /// Whether cash on delivery may be used
    pub cod_available: bool,
}

impl Variant {
    /// Price after offers for one unit.
    #[must_use]
    pub fn unit_price(&self) -> Money {
        pricing::effective_unit_price(self.regular_price, self.sale_price, self.offer_percent)
    }

    /// Prices `quantity` units of this variant.
    ///
    /// # Errors
    ///
    /// See [`LinePrice::new`].
    pub fn price(&self, quantity: u32) -> Result<LinePrice, ValidationError> {
        LinePrice::new(self.regular_price, self.sale_price, self.offer_percent, quantity)
    }

    /// Whether `quantity` units can be taken right now.
    #[must_use]
    pub const fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock_quantity >= quantity
    }
}

/// One cart line. A user has a single cart; lines are keyed by variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Cart owner
    pub user_id: UserId,
    /// Variant in the cart
    pub variant_id: VariantId,
    /// Requested units
    pub quantity: u32,
    /// When the line was first added
    pub added_at: DateTime<Utc>,
}

/// Cart line as presented to the shopper after stock clamping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// The stored line (quantity already clamped)
    pub item: CartItem,
    /// Current catalog view of the variant
    pub variant: Variant,
    /// Line pricing at current prices
    pub price: LinePrice,
}

/// A user's saved delivery address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Address identifier
    pub id: AddressId,
    /// Owner
    pub user_id: UserId,
    /// Recipient name
    pub name: String,
    /// Contact number
    pub phone: String,
    /// Street and house
    pub line: String,
    /// Nearby landmark
    pub landmark: Option<String>,
    /// City
    pub city: String,
    /// State
    pub state: String,
    /// Postal code
    pub pincode: String,
}

/// Address copied onto an order so later edits do not rewrite history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    /// Recipient name
    pub name: String,
    /// Contact number
    pub phone: String,
    /// Street and house
    pub line: String,
    /// Nearby landmark
    pub landmark: Option<String>,
    /// City
    pub city: String,
    /// State
    pub state: String,
    /// Postal code
    pub pincode: String,
}

impl From<&Address> for ShippingAddress {
    fn from(address: &Address) -> Self {
        Self {
            name: address.name.clone(),
            phone: address.phone.clone(),
            line: address.line.clone(),
            landmark: address.landmark.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            pincode: address.pincode.clone(),
        }
    }
}

//! Shared setup for the pipeline tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use std::sync::Arc;
use storefront::payment_gateway::sign_payment;
use storefront::{GatewayCallback, MockGatewayClient, Settings, Storefront};
use storefront_core::catalog::{Address, CartItem, Variant};
use storefront_core::coupon::Coupon;
use storefront_core::ids::{OrderId, UserId};
use storefront_core::order::OrderItem;
use storefront_testing::{CommerceData, InMemoryCommerceStore, ManualClock, fixtures, test_epoch};

pub const KEY_SECRET: &str = "whsec_test_secret";

pub struct Harness {
    pub store: InMemoryCommerceStore,
    pub clock: ManualClock,
    pub gateway: MockGatewayClient,
    pub storefront: Storefront,
    pub user: UserId,
    pub address: Address,
}

impl Harness {
    pub async fn new() -> Self {
        storefront_testing::init_test_tracing();
        let store = InMemoryCommerceStore::new();
        let clock = ManualClock::starting_at(test_epoch());
        let gateway = MockGatewayClient::new();
        let settings = Settings {
            gateway_key_id: "rzp_test_key".into(),
            gateway_key_secret: KEY_SECRET.into(),
            ..Settings::default()
        };
        let storefront = Storefront::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Arc::new(gateway.clone()),
            settings,
        );
        let user = UserId::new();
        let address = fixtures::address(user);
        store.insert_address(address.clone()).await;
        Self {
            store,
            clock,
            gateway,
            storefront,
            user,
            address,
        }
    }

    /// Seeds a variant and returns it.
    pub async fn variant(&self, name: &str, price_rupees: u64, stock: u32) -> Variant {
        let variant = fixtures::variant(name, price_rupees, stock);
        self.store.insert_variant(variant.clone()).await;
        variant
    }

    pub async fn coupon(&self, coupon: Coupon) -> Coupon {
        self.store.insert_coupon(coupon.clone()).await;
        coupon
    }

    pub async fn wallet(&self, rupees: u64) {
        self.store.insert_wallet(fixtures::wallet(self.user, rupees)).await;
    }

    /// Puts `lines` in `user`'s cart, oldest first in the given order.
    pub async fn cart_for(&self, user: UserId, lines: &[(&Variant, u32)]) {
        for (offset, (variant, quantity)) in (0_i64..).zip(lines) {
            self.store
                .put_cart_item(CartItem {
                    user_id: user,
                    variant_id: variant.id,
                    quantity: *quantity,
                    added_at: test_epoch() + Duration::seconds(offset),
                })
                .await;
        }
    }

    pub async fn cart(&self, lines: &[(&Variant, u32)]) {
        self.cart_for(self.user, lines).await;
    }

    pub async fn data(&self) -> CommerceData {
        self.store.snapshot().await
    }

    pub async fn stock(&self, variant: &Variant) -> u32 {
        self.data().await.stock_of(variant.id)
    }

    pub async fn item_of(&self, order_id: OrderId, variant: &Variant) -> OrderItem {
        self.data()
            .await
            .items_of(order_id)
            .into_iter()
            .find(|item| item.variant_id == variant.id)
            .cloned()
            .expect("order item for variant")
    }
}

/// A callback signed the way the gateway signs it.
pub fn signed_callback(gateway_order_id: &str, gateway_payment_id: &str) -> GatewayCallback {
    GatewayCallback {
        gateway_order_id: gateway_order_id.to_string(),
        gateway_payment_id: gateway_payment_id.to_string(),
        signature: sign_payment(KEY_SECRET, gateway_order_id, gateway_payment_id).unwrap(),
    }
}

//! Storefront checkout server
//!
//! This binary:
//! - Connects to `PostgreSQL` and applies migrations
//! - Installs the Prometheus exporter when `METRICS_ADDR` is set
//! - Wires the checkout pipeline to the payment gateway
//! - Runs the reservation sweeper until Ctrl+C
//!
//! # Usage
//!
//! ```bash
//! # Start PostgreSQL
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin server
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storefront::payment_gateway::GatewayClient;
use storefront::{Config, HttpGatewayClient, MockGatewayClient, Settings, Storefront, spawn_sweeper};
use storefront_core::environment::SystemClock;
use storefront_postgres::PgCommerceStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        max_connections = config.postgres.max_connections,
        hold_minutes = config.checkout.reservation_hold_minutes,
        sweep_interval_secs = config.checkout.sweep_interval_secs,
        "Configuration loaded"
    );

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        tracing::info!(%addr, "Metrics exporter listening");
    }
    storefront::metrics::register_business_metrics();

    let store = PgCommerceStore::connect(&config.postgres.url, config.postgres.max_connections).await?;
    store.migrate().await?;
    tracing::info!("✓ Database ready");

    let gateway: Arc<dyn GatewayClient> = if config.gateway_configured() {
        Arc::new(HttpGatewayClient::new(
            config.gateway.base_url.clone(),
            config.gateway.key_id.clone(),
            config.gateway.key_secret.clone(),
        ))
    } else {
        tracing::warn!("GATEWAY_KEY_ID / GATEWAY_KEY_SECRET not set; using the mock gateway");
        MockGatewayClient::shared()
    };

    let storefront = Arc::new(Storefront::new(
        Arc::new(store),
        Arc::new(SystemClock),
        gateway,
        Settings::from(&config),
    ));
    let sweeper = spawn_sweeper(
        Arc::clone(&storefront),
        Duration::from_secs(config.checkout.sweep_interval_secs.max(1)),
    );

    tracing::info!("Storefront is running. Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down gracefully...");
    sweeper.abort();
    Ok(())
}

//! # Roomcast Server
//!
//! Room relay with an HTTP control plane.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (0.0.0.0:3000)
//! roomcast
//!
//! # Run with environment variables
//! PORT=8080 ROOMCAST_HOST=127.0.0.1 roomcast
//!
//! # Emit to everyone in a room
//! curl -X POST localhost:3000/emit \
//!   -H 'content-type: application/json' \
//!   -d '{"room":"orders","event":"order-updated","data":{"id":1}}'
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Roomcast server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await
}

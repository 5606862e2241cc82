//! # Parley Server
//!
//! Realtime chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (parley.toml if present)
//! parley
//!
//! # Run with environment overrides
//! PARLEY_PORT=8080 PARLEY_JWT_SECRET=change-me parley
//! ```

use anyhow::Result;
use parley_server::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    parley_server::run(config).await
}

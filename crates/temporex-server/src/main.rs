//! # temporex
//!
//! Realtime multiplayer match server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! temporex
//!
//! # Run with a config file (TOML, or JSON with a `.json` extension)
//! TEMPOREX_CONFIG=/path/to/temporex.toml temporex
//!
//! # Run with environment variables
//! TEMPOREX_PORT=8080 TEMPOREX_HOST=0.0.0.0 temporex
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "temporex=debug,temporex_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        players_per_match = config.players_per_match(),
        "Starting temporex on {}:{}",
        config.host,
        config.port
    );

    handlers::run_server(config).await?;

    Ok(())
}

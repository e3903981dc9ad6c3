//! # Herald Server
//!
//! Multi-device presence and message routing over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (in-memory stores)
//! herald
//!
//! # Run with custom config
//! herald --config /path/to/herald.toml
//!
//! # Run with environment variables
//! HERALD_PORT=8080 HERALD_HOST=0.0.0.0 HERALD_STORES__PRESENCE=redis herald
//! ```

mod backends;
mod config;
mod handlers;
mod metrics;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Path given with `--config`, if any.
fn config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            match args.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("{arg} requires a path"),
            }
        }
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_server=debug,herald_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(config_path()?.as_deref())?;

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Connect stores
    let backends = backends::connect(&config.stores).await?;

    // Start the server
    handlers::run_server(config, backends).await?;

    Ok(())
}

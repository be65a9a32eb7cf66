//! # Quarry
//!
//! Main entry point: loads the configuration, opens the world and keeps it
//! saved until shutdown.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use anyhow::Result;
use quarry_engine::config::{EngineConfig, CONFIG_FILE};
use quarry_engine::host;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("quarry=info".parse()?))
        .init();

    info!("Quarry starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    let mut config = EngineConfig::load_from(&config_path);
    config.validate();

    host::run(&config)?;

    info!("Quarry shut down cleanly");
    Ok(())
}

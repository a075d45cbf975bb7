//! # Graft App Plugin Backend Binary
//!
//! Entry point launched by the dashboard host. Telemetry providers are built
//! and stored before the serving loop starts, so the host's default
//! instrumentation cannot replace them.

use anyhow::{Context, Result};
use tracing::{error, info};

use graft_backend::host::{self, ServeOpts};
use graft_backend::{GraftAppFactory, GraftConfig, Telemetry};
use telemetry_common::{OtelConfig, DEFAULT_SERVICE_NAME};

/// Main entry point for the plugin backend
#[tokio::main]
async fn main() -> Result<()> {
    let config = GraftConfig::from_env().context("Failed to load GRAFT_* configuration")?;
    let listen_addr = config.listen_addr()?;

    let otel_config = OtelConfig::from_env(DEFAULT_SERVICE_NAME, env!("CARGO_PKG_VERSION"))
        .with_shutdown_timeout(config.shutdown_timeout());

    // Providers must be in the registry before the host sees the plugin
    let telemetry = Telemetry::bootstrap(&otel_config);

    info!("🌟 Starting plugin server...");
    info!("Plugin ID: {}", config.plugin_id);
    info!("Listen address: {}", listen_addr);

    let factory = GraftAppFactory::new(telemetry.registry());
    let served = host::serve(&config.plugin_id, factory, ServeOpts { listen_addr }).await;

    if let Err(e) = &served {
        error!(error = %e, "Plugin server failed");
    }

    info!("🔄 Flushing telemetry...");
    telemetry.shutdown().await;

    served.context("Plugin server error")?;

    info!("👋 Graft plugin backend stopped");
    Ok(())
}

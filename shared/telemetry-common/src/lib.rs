//! Telemetry Common - OpenTelemetry bootstrap for dashboard plugin backends
//!
//! Plugin hosts tend to configure their own tracing defaults when a plugin
//! starts serving. This crate builds the plugin's own pipeline *without*
//! installing it globally and hands the providers out through an explicit
//! [`ProviderRegistry`], so the host's defaults can never replace them:
//!
//! - **Provider registry**: custom trace/meter providers with a deterministic
//!   fallback to the ambient (global) providers when none were installed
//! - **OTLP pipeline**: gRPC span and metric exporters, batching span
//!   processor, periodic metric reader, deadline-bounded shutdown
//! - **Plugin instruments**: chat, LLM and resource-request instruments
//! - **Logging**: `tracing` subscriber writing to stderr, bridged into the
//!   custom tracer once the pipeline is built
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use telemetry_common::{setup_otel_without_global, OtelConfig, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OtelConfig::from_env("graft-plugin-backend", env!("CARGO_PKG_VERSION"));
//!     let registry = Arc::new(ProviderRegistry::new());
//!
//!     let pipeline = match setup_otel_without_global(&config) {
//!         Ok(pipeline) => {
//!             registry.set(
//!                 Some(pipeline.tracer_provider().clone()),
//!                 Some(pipeline.meter_provider().clone()),
//!             );
//!             Some(pipeline)
//!         }
//!         Err(_) => {
//!             // Observability must not take the plugin down
//!             registry.set(None, None);
//!             None
//!         }
//!     };
//!
//!     // ... serve requests, resolving providers through `registry` ...
//!
//!     if let Some(pipeline) = pipeline {
//!         pipeline.shutdown(config.shutdown_timeout).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Environment
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - collector endpoint (default `otel-lgtm:4317`)
//! - `OTEL_SERVICE_NAME` - overrides the service name resource attribute
//! - `RUST_LOG` - log filter

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod logging;
pub mod otel;

// Re-exports for convenient access
pub use error::TelemetryError;
pub use logging::{init_logging, LogHandle};
pub use otel::{
    setup_otel, setup_otel_without_global, ChatOutcome, MeterSource, OtelConfig, PluginMetrics,
    PluginTracer, ProviderRegistry, TelemetryPipeline, TracerSource, DEFAULT_OTLP_ENDPOINT,
    DEFAULT_SERVICE_NAME,
};

/// Result alias for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

//! OpenTelemetry integration for plugin backends.
//!
//! The pipeline is built without touching the global providers; the plugin
//! installs it into a [`ProviderRegistry`] before the host serving loop
//! starts, and every consumer resolves its tracer and meter through that
//! registry.

pub mod init;
pub mod metrics;
pub mod registry;

pub use init::{
    setup_otel, setup_otel_without_global, OtelConfig, TelemetryPipeline, DEFAULT_OTLP_ENDPOINT,
    DEFAULT_SERVICE_NAME,
};
pub use metrics::{ChatOutcome, PluginMetrics};
pub use registry::{MeterSource, PluginTracer, ProviderRegistry, TracerSource};

//! Process startup and teardown of the telemetry stack.
//!
//! The custom providers must be stored in the [`ProviderRegistry`] before the
//! host serving loop starts, otherwise the first app instance would resolve
//! the ambient fallback. A pipeline that fails to build is not fatal: the
//! registry is cleared and the plugin keeps running on ambient providers.

use crate::app::INSTRUMENTATION_NAME;
use std::sync::Arc;
use std::time::Duration;
use telemetry_common::{
    init_logging, setup_otel_without_global, OtelConfig, ProviderRegistry, TelemetryPipeline,
};
use tracing::{error, info, warn};

/// Target whose logs default to debug level
const LOG_TARGET: &str = "graft-backend";

/// Store the pipeline's providers in `registry`, or clear it when the
/// pipeline failed to build.
///
/// Returns the pipeline so the caller can shut it down on exit.
pub fn install_providers(
    registry: &ProviderRegistry,
    pipeline: telemetry_common::Result<TelemetryPipeline>,
) -> Option<TelemetryPipeline> {
    match pipeline {
        Ok(pipeline) => {
            registry.set(
                Some(pipeline.tracer_provider().clone()),
                Some(pipeline.meter_provider().clone()),
            );
            info!("✓ OpenTelemetry providers stored");
            Some(pipeline)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize OTel SDK");
            registry.set(None, None);
            None
        }
    }
}

/// Telemetry state owned by the plugin process
pub struct Telemetry {
    registry: Arc<ProviderRegistry>,
    pipeline: Option<TelemetryPipeline>,
    shutdown_timeout: Duration,
}

impl Telemetry {
    /// Install the log subscriber, build the pipeline and fill the registry.
    ///
    /// Must run inside a tokio runtime; the exporters' gRPC channels are
    /// created on it.
    pub fn bootstrap(config: &OtelConfig) -> Self {
        let logs = match init_logging(LOG_TARGET) {
            Ok(handle) => Some(handle),
            Err(e) => {
                // A subscriber was already installed; keep it
                warn!(error = %e, "Log subscriber not installed");
                None
            }
        };

        info!(
            endpoint = %config.endpoint,
            service = %config.service_name,
            "Initializing OpenTelemetry SDK..."
        );
        let pipeline = setup_otel_without_global(config);

        if let (Some(logs), Ok(pipeline)) = (&logs, &pipeline) {
            if let Err(e) = logs.attach_tracer(pipeline.tracer(INSTRUMENTATION_NAME)) {
                warn!(error = %e, "Spans will not be bridged into OpenTelemetry");
            }
        }

        let registry = Arc::new(ProviderRegistry::new());
        let pipeline = install_providers(&registry, pipeline);
        if pipeline.is_some() {
            info!("✓ OpenTelemetry SDK initialized successfully");
        }

        Self {
            registry,
            pipeline,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Registry handed to the app factory
    pub fn registry(&self) -> Arc<ProviderRegistry> {
        Arc::clone(&self.registry)
    }

    /// Whether the custom pipeline is running
    pub fn is_custom(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Flush and stop the pipeline within the configured deadline.
    ///
    /// Failures are logged, never returned: telemetry must not change the
    /// process exit status.
    pub async fn shutdown(self) {
        let Some(pipeline) = self.pipeline else {
            warn!("No custom OpenTelemetry pipeline to shut down");
            return;
        };

        match pipeline.shutdown(self.shutdown_timeout).await {
            Ok(()) => info!("OpenTelemetry SDK shutdown successfully"),
            Err(e) => error!(error = %e, "Failed to shutdown OTel SDK"),
        }
    }
}

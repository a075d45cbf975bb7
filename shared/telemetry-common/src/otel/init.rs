//! OpenTelemetry pipeline construction for plugin backends.
//!
//! Builds OTLP/gRPC exporters for traces and metrics, wraps them in a
//! batching span processor and a periodic metric reader, and tags everything
//! with the plugin's service resource attributes.

use crate::{Result, TelemetryError};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider, Tracer as SdkTracer},
    Resource,
};
use opentelemetry_semantic_conventions as semconv;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Collector endpoint used when `OTEL_EXPORTER_OTLP_ENDPOINT` is not set
pub const DEFAULT_OTLP_ENDPOINT: &str = "otel-lgtm:4317";

/// Service name reported when `OTEL_SERVICE_NAME` is not set
pub const DEFAULT_SERVICE_NAME: &str = "graft-plugin-backend";

/// Configuration for the telemetry pipeline
#[derive(Debug, Clone)]
pub struct OtelConfig {
    /// Service name resource attribute
    pub service_name: String,
    /// Service version resource attribute
    pub service_version: String,
    /// OTLP gRPC endpoint, always carrying a scheme
    pub endpoint: String,
    /// How often the periodic reader exports metrics
    pub metrics_interval: Duration,
    /// Per-export timeout for both exporters
    pub export_timeout: Duration,
    /// Deadline for flushing and shutting the pipeline down
    pub shutdown_timeout: Duration,
}

impl OtelConfig {
    /// Create config from environment variables.
    ///
    /// `service_name` is only used when `OTEL_SERVICE_NAME` is unset.
    pub fn from_env(service_name: &str, service_version: &str) -> Self {
        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| service_name.to_string()),
            service_version: service_version.to_string(),
            endpoint: normalize_endpoint(&endpoint),
            ..Self::default()
        }
    }

    /// Override the collector endpoint
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = normalize_endpoint(endpoint);
        self
    }

    /// Override the shutdown deadline
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([KeyValue::new(
                semconv::resource::SERVICE_VERSION,
                self.service_version.clone(),
            )])
            .build()
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: "0.0.0".to_string(),
            endpoint: normalize_endpoint(DEFAULT_OTLP_ENDPOINT),
            metrics_interval: Duration::from_secs(10),
            export_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Prefix scheme-less `host:port` endpoints with `http://`.
///
/// The collector is reached over plaintext gRPC, and tonic needs a full URI.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

/// A constructed trace + metrics pipeline.
///
/// Dropping the pipeline does not flush it; call [`TelemetryPipeline::shutdown`]
/// before the process exits.
pub struct TelemetryPipeline {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    shut_down: AtomicBool,
}

impl TelemetryPipeline {
    /// Assemble a pipeline from already-built providers.
    pub fn from_providers(
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
    ) -> Self {
        Self {
            tracer_provider,
            meter_provider,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The batching tracer provider
    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// The periodic-reader meter provider
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    /// A tracer from the custom provider, e.g. for bridging `tracing` spans
    pub fn tracer(&self, name: &'static str) -> SdkTracer {
        self.tracer_provider.tracer(name)
    }

    /// Flush and shut down both providers, bounded by `deadline`.
    ///
    /// The tracer provider is shut down first, then the meter provider; both
    /// are attempted even if the first fails, and the first error is
    /// returned. Calls after the first are no-ops. Failures are not retried.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Telemetry pipeline already shut down");
            return Ok(());
        }

        let tracer_provider = self.tracer_provider.clone();
        let meter_provider = self.meter_provider.clone();

        // Provider shutdown blocks until the batch/periodic workers drain
        let task = tokio::task::spawn_blocking(move || {
            let traces = tracer_provider
                .shutdown()
                .map_err(|e| TelemetryError::Shutdown {
                    component: "tracer provider",
                    message: e.to_string(),
                });
            let metrics = meter_provider
                .shutdown()
                .map_err(|e| TelemetryError::Shutdown {
                    component: "meter provider",
                    message: e.to_string(),
                });
            traces.and(metrics)
        });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(TelemetryError::Shutdown {
                component: "telemetry pipeline",
                message: join_err.to_string(),
            }),
            Err(_) => Err(TelemetryError::ShutdownTimeout { deadline }),
        }
    }

    /// Whether [`TelemetryPipeline::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Build the telemetry pipeline WITHOUT installing global providers.
///
/// The host's serving loop may configure the global tracer on its own, so the
/// providers returned here are meant to go into a
/// [`ProviderRegistry`](crate::ProviderRegistry) instead.
///
/// Must be called from within a Tokio runtime; the gRPC channels are created
/// lazily on it.
pub fn setup_otel_without_global(config: &OtelConfig) -> Result<TelemetryPipeline> {
    info!(
        service = %config.service_name,
        endpoint = %config.endpoint,
        "Initializing OTel exporter"
    );

    let resource = config.resource();

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.clone())
        .with_timeout(config.export_timeout)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "trace",
            message: e.to_string(),
        })?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_resource(resource.clone())
        .with_sampler(Sampler::AlwaysOn)
        .build();

    debug!("OpenTelemetry TracerProvider created");

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.endpoint.clone())
        .with_timeout(config.export_timeout)
        .build()
        .map_err(|e| TelemetryError::Exporter {
            signal: "metrics",
            message: e.to_string(),
        })?;

    let reader = PeriodicReader::builder(metric_exporter)
        .with_interval(config.metrics_interval)
        .build();

    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    debug!(
        interval_secs = config.metrics_interval.as_secs(),
        "OpenTelemetry MeterProvider created"
    );

    Ok(TelemetryPipeline::from_providers(tracer_provider, meter_provider))
}

/// Build the telemetry pipeline and install it globally.
///
/// Also installs the W3C trace-context propagator. Only use this when no host
/// component will configure globals afterwards.
pub fn setup_otel(config: &OtelConfig) -> Result<TelemetryPipeline> {
    let pipeline = setup_otel_without_global(config)?;

    global::set_tracer_provider(pipeline.tracer_provider().clone());
    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_meter_provider(pipeline.meter_provider().clone());

    info!("OpenTelemetry providers installed globally");
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otel_config_from_env() {
        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        std::env::remove_var("OTEL_SERVICE_NAME");

        let config = OtelConfig::from_env("test-service", "1.0.0");
        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.service_version, "1.0.0");
        assert_eq!(config.endpoint, "http://otel-lgtm:4317");
        assert_eq!(config.metrics_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));

        std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "https://collector.internal:4317");
        std::env::set_var("OTEL_SERVICE_NAME", "renamed");
        let config = OtelConfig::from_env("test-service", "1.0.0");
        assert_eq!(config.endpoint, "https://collector.internal:4317");
        assert_eq!(config.service_name, "renamed");

        // Blank values fall back to defaults
        std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "  ");
        let config = OtelConfig::from_env("test-service", "1.0.0");
        assert_eq!(config.endpoint, "http://otel-lgtm:4317");

        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        std::env::remove_var("OTEL_SERVICE_NAME");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("otel-lgtm:4317"), "http://otel-lgtm:4317");
        assert_eq!(normalize_endpoint(" localhost:4317 "), "http://localhost:4317");
        assert_eq!(normalize_endpoint("http://127.0.0.1:4317"), "http://127.0.0.1:4317");
        assert_eq!(normalize_endpoint("https://otlp.example:443"), "https://otlp.example:443");
    }

    #[tokio::test]
    async fn test_pipeline_shutdown_is_idempotent() {
        let pipeline = TelemetryPipeline::from_providers(
            SdkTracerProvider::builder().build(),
            SdkMeterProvider::builder().build(),
        );

        assert!(!pipeline.is_shut_down());
        pipeline
            .shutdown(Duration::from_secs(5))
            .await
            .expect("first shutdown succeeds");
        assert!(pipeline.is_shut_down());

        // A second call must not hit the SDK's "already shut down" error
        pipeline
            .shutdown(Duration::from_secs(5))
            .await
            .expect("second shutdown is a no-op");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipeline_against_unreachable_collector() {
        use opentelemetry::metrics::MeterProvider as _;
        use opentelemetry::trace::{Span as _, Tracer as _};

        let config = OtelConfig::default().with_endpoint("127.0.0.1:1");
        assert_eq!(config.endpoint, "http://127.0.0.1:1");

        let pipeline = setup_otel_without_global(&config).expect("exporters connect lazily");

        let mut span = pipeline.tracer("graft-plugin").start("unexported");
        span.end();
        pipeline
            .meter_provider()
            .meter("graft-plugin")
            .u64_counter("graft.test.counter")
            .build()
            .add(1, &[]);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            pipeline.shutdown(Duration::from_secs(3)),
        )
        .await
        .expect("shutdown is bounded by its deadline");

        assert!(result.is_err());
        assert!(pipeline.is_shut_down());
    }
}

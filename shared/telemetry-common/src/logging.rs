//! Log subscriber setup for plugin backends.
//!
//! Plugin processes talk to their host over stdout, so all log output goes
//! to stderr. The subscriber is installed before the telemetry pipeline is
//! built so pipeline bootstrap logs are visible; once a custom tracer exists
//! it is attached through [`LogHandle`] and `tracing` spans are bridged into it.

use crate::{Result, TelemetryError};
use opentelemetry_sdk::trace::Tracer as SdkTracer;
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

type OtelLayer = OpenTelemetryLayer<Registry, SdkTracer>;

/// Handle to the installed subscriber's OpenTelemetry bridge
#[derive(Clone)]
pub struct LogHandle {
    otel: reload::Handle<Option<OtelLayer>, Registry>,
}

impl LogHandle {
    /// Start bridging `tracing` spans into `tracer`.
    ///
    /// Replaces any previously attached tracer.
    pub fn attach_tracer(&self, tracer: SdkTracer) -> Result<()> {
        self.otel
            .reload(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
            .map_err(|e| TelemetryError::Subscriber(e.to_string()))
    }
}

/// Install the process-wide `tracing` subscriber.
///
/// Honors `RUST_LOG`; otherwise logs at `info` with `crate_target` at `debug`.
/// No spans are bridged into OpenTelemetry until
/// [`LogHandle::attach_tracer`] is called.
///
/// # Arguments
/// * `crate_target` - Crate name whose logs default to debug level
pub fn init_logging(crate_target: &str) -> Result<LogHandle> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(crate_target));

    let (subscriber, handle) = build_subscriber(env_filter);
    subscriber
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    Ok(handle)
}

fn build_subscriber(env_filter: EnvFilter) -> (impl Subscriber + Send + Sync + 'static, LogHandle) {
    let (otel_layer, otel) = reload::Layer::new(None::<OtelLayer>);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter)
        .with(fmt_layer);

    (subscriber, LogHandle { otel })
}

fn default_filter(crate_target: &str) -> EnvFilter {
    let filter = EnvFilter::new("info");
    match format!("{}=debug", crate_target.replace('-', "_")).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};

    #[test]
    fn test_default_filter() {
        let filter = default_filter("graft-backend");
        assert!(filter.to_string().contains("graft_backend=debug"));

        // An unparsable target leaves the base filter alone
        let filter = default_filter("bad target[");
        assert!(filter.to_string().contains("info"));
    }

    #[test]
    fn test_tracer_attached_after_subscriber_is_live() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        let (subscriber, handle) = build_subscriber(EnvFilter::new("info"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info_span!("before_attach").in_scope(|| {
                tracing::info!("logged before the pipeline exists");
            });

            handle
                .attach_tracer(provider.tracer("graft-plugin"))
                .unwrap();

            tracing::info_span!("after_attach").in_scope(|| {});
        });

        let names: Vec<String> = exporter
            .get_finished_spans()
            .unwrap()
            .into_iter()
            .map(|span| span.name.to_string())
            .collect();
        assert_eq!(names, vec!["after_attach".to_string()]);
    }
}

//! OpenTelemetry instruments emitted by the Graft plugin backend.
//!
//! Instruments are created from whichever meter the registry resolved, so the
//! same code records into the custom pipeline or into the ambient no-op meter.

use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use std::time::Duration;
use tracing::debug;

/// Outcome of one chat exchange, as reported by the plugin frontend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOutcome {
    /// Wall-clock duration of the whole exchange
    pub duration: Duration,
    /// Tokens generated in the response, if known
    pub tokens_generated: Option<u64>,
    /// Time until the first streamed token, if streaming was used
    pub first_token_latency: Option<Duration>,
    /// Whether the exchange completed without error
    pub success: bool,
    /// Model identifier, used as a metric label
    pub model: Option<String>,
}

/// Instruments for chat, LLM and resource-request telemetry.
pub struct PluginMetrics {
    /// Total chat requests counter
    chat_requests_total: Counter<u64>,
    /// Failed chat requests counter
    chat_request_errors: Counter<u64>,
    /// Chat duration histogram (seconds)
    chat_duration: Histogram<f64>,
    /// Tokens generated per response
    llm_tokens_generated: Histogram<u64>,
    /// Time to first token (seconds)
    llm_first_token_latency: Histogram<f64>,
    /// Resource requests handled by the backend
    resource_requests_total: Counter<u64>,
    /// Resource requests answered with a 4xx/5xx status
    resource_request_errors: Counter<u64>,
    /// Resource request duration histogram (seconds)
    resource_duration: Histogram<f64>,
}

impl PluginMetrics {
    /// Create all instruments on `meter`.
    pub fn new(meter: &Meter) -> Self {
        let chat_requests_total = meter
            .u64_counter("graft.chat.requests.total")
            .with_description("Total number of chat requests")
            .with_unit("{request}")
            .build();

        let chat_request_errors = meter
            .u64_counter("graft.chat.requests.errors")
            .with_description("Total number of failed chat requests")
            .with_unit("{error}")
            .build();

        let chat_duration = meter
            .f64_histogram("graft.chat.duration")
            .with_description("Duration of chat requests in seconds")
            .with_unit("s")
            .build();

        let llm_tokens_generated = meter
            .u64_histogram("graft.llm.tokens.generated")
            .with_description("Number of tokens generated per response")
            .with_unit("{token}")
            .build();

        let llm_first_token_latency = meter
            .f64_histogram("graft.llm.first_token_latency")
            .with_description("Time to first token in seconds")
            .with_unit("s")
            .build();

        let resource_requests_total = meter
            .u64_counter("graft.resource.requests.total")
            .with_description("Total number of resource requests")
            .with_unit("{request}")
            .build();

        let resource_request_errors = meter
            .u64_counter("graft.resource.requests.errors")
            .with_description("Resource requests answered with an error status")
            .with_unit("{error}")
            .build();

        let resource_duration = meter
            .f64_histogram("graft.resource.duration")
            .with_description("Duration of resource requests in seconds")
            .with_unit("s")
            .build();

        debug!("Plugin metrics initialized");

        Self {
            chat_requests_total,
            chat_request_errors,
            chat_duration,
            llm_tokens_generated,
            llm_first_token_latency,
            resource_requests_total,
            resource_request_errors,
            resource_duration,
        }
    }

    /// Record a finished chat exchange.
    pub fn record_chat(&self, outcome: &ChatOutcome) {
        let labels = match &outcome.model {
            Some(model) => vec![KeyValue::new("model", model.clone())],
            None => Vec::new(),
        };

        self.chat_requests_total.add(1, &labels);
        if !outcome.success {
            self.chat_request_errors.add(1, &labels);
        }
        self.chat_duration
            .record(outcome.duration.as_secs_f64(), &labels);

        if let Some(tokens) = outcome.tokens_generated {
            self.llm_tokens_generated.record(tokens, &labels);
        }
        if let Some(latency) = outcome.first_token_latency {
            self.llm_first_token_latency
                .record(latency.as_secs_f64(), &labels);
        }
    }

    /// Record one handled resource request.
    ///
    /// # Arguments
    /// * `route` - Matched resource path, e.g. `/settings`
    /// * `method` - HTTP method
    /// * `status` - Response status code
    /// * `elapsed` - Time spent handling the request
    pub fn record_resource_request(&self, route: &str, method: &str, status: u16, elapsed: Duration) {
        let labels = [
            KeyValue::new("route", route.to_string()),
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", i64::from(status)),
        ];

        self.resource_requests_total.add(1, &labels);
        if status >= 400 {
            self.resource_request_errors.add(1, &labels);
        }
        self.resource_duration
            .record(elapsed.as_secs_f64(), &labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    fn recording_metrics() -> (PluginMetrics, SdkMeterProvider, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        let metrics = PluginMetrics::new(&provider.meter("graft-plugin"));
        (metrics, provider, exporter)
    }

    /// Flush and return the latest cumulative export
    fn flushed_names(provider: &SdkMeterProvider, exporter: &InMemoryMetricExporter) -> Vec<String> {
        provider.force_flush().unwrap();
        let finished = exporter.get_finished_metrics().unwrap();
        let Some(latest) = finished.last() else {
            return Vec::new();
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .map(|metric| metric.name().to_string())
            .collect()
    }

    /// Sum of a u64 counter in the latest export; absent counters read as 0
    fn counter_total(exporter: &InMemoryMetricExporter, name: &str) -> u64 {
        let finished = exporter.get_finished_metrics().unwrap();
        let Some(latest) = finished.last() else {
            return 0;
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == name)
            .map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                    sum.data_points().map(|point| point.value()).sum()
                }
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_resource_errors_count_error_statuses_only() {
        let (metrics, provider, exporter) = recording_metrics();

        metrics.record_resource_request("/ping", "GET", 200, Duration::from_millis(2));
        let names = flushed_names(&provider, &exporter);
        assert!(names.contains(&"graft.resource.requests.total".to_string()));
        assert!(names.contains(&"graft.resource.duration".to_string()));
        assert_eq!(counter_total(&exporter, "graft.resource.requests.total"), 1);
        assert_eq!(counter_total(&exporter, "graft.resource.requests.errors"), 0);

        metrics.record_resource_request("/settings", "POST", 405, Duration::from_millis(1));
        let names = flushed_names(&provider, &exporter);
        assert!(names.contains(&"graft.resource.requests.errors".to_string()));
        assert_eq!(counter_total(&exporter, "graft.resource.requests.total"), 2);
        assert_eq!(counter_total(&exporter, "graft.resource.requests.errors"), 1);
    }

    #[test]
    fn test_chat_errors_only_on_failure() {
        let (metrics, provider, exporter) = recording_metrics();

        metrics.record_chat(&ChatOutcome {
            duration: Duration::from_millis(1500),
            tokens_generated: Some(42),
            first_token_latency: Some(Duration::from_millis(300)),
            success: true,
            model: Some("base".to_string()),
        });
        let names = flushed_names(&provider, &exporter);
        for expected in [
            "graft.chat.requests.total",
            "graft.chat.duration",
            "graft.llm.tokens.generated",
            "graft.llm.first_token_latency",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(counter_total(&exporter, "graft.chat.requests.errors"), 0);

        metrics.record_chat(&ChatOutcome {
            success: false,
            ..ChatOutcome::default()
        });
        flushed_names(&provider, &exporter);
        assert_eq!(counter_total(&exporter, "graft.chat.requests.total"), 2);
        assert_eq!(counter_total(&exporter, "graft.chat.requests.errors"), 1);
    }

    #[test]
    fn test_optional_chat_fields_skip_llm_instruments() {
        let (metrics, provider, exporter) = recording_metrics();

        metrics.record_chat(&ChatOutcome {
            success: true,
            ..ChatOutcome::default()
        });
        let names = flushed_names(&provider, &exporter);

        assert!(names.contains(&"graft.chat.duration".to_string()));
        assert!(!names.contains(&"graft.llm.tokens.generated".to_string()));
        assert!(!names.contains(&"graft.llm.first_token_latency".to_string()));
    }
}

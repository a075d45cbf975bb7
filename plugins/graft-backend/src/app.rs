//! The Graft app instance: resource routes, health check and per-request
//! telemetry.
//!
//! Model configuration has moved to the dashboard's LLM plugin, so the
//! instance only passes its own settings through and records chat outcomes
//! reported by the frontend.

use crate::host::{
    AppInstanceSettings, CallResourceHandler, CallResourceRequest, CallResourceResponse,
    CheckHealthHandler, CheckHealthRequest, CheckHealthResult, HttpAdapter, InstanceDisposer,
    InstanceFactory, PluginContext,
};
use crate::{GraftError, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Status, TraceContextExt as _};
use opentelemetry::KeyValue;
use opentelemetry_http::HeaderExtractor;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_semantic_conventions::trace::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, URL_PATH,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_common::{ChatOutcome, PluginMetrics, PluginTracer, ProviderRegistry};
use tracing::{debug, info, warn};

/// Plugin ID the dashboard host registers this backend under
pub const PLUGIN_ID: &str = "vikshana-graft-app";

/// Instrumentation scope for the app's tracer and meter
pub const INSTRUMENTATION_NAME: &str = "graft-plugin";

/// Message returned by every health check
pub const HEALTH_MESSAGE: &str =
    "Plugin is running. Model configuration is managed by Grafana LLM plugin.";

/// How long a new instance waits for the telemetry providers to be installed
pub const DEFAULT_INSTALL_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    tracer: Arc<PluginTracer>,
    metrics: Arc<PluginMetrics>,
}

/// One app instance, serving a single org's settings
pub struct App {
    adapter: HttpAdapter,
    router: Router,
}

impl App {
    /// Build an instance whose tracer and instruments come from `registry`.
    ///
    /// If no custom providers were installed the instance records into the
    /// ambient providers instead.
    pub fn new(settings: &AppInstanceSettings, registry: &ProviderRegistry) -> Self {
        let tracer_source = registry.tracer_provider();
        info!(
            provider_type = tracer_source.kind(),
            "Resolved tracer provider"
        );
        let tracer = tracer_source.tracer(INSTRUMENTATION_NAME);

        let meter = registry.meter_provider().meter(INSTRUMENTATION_NAME);
        let metrics = PluginMetrics::new(&meter);

        debug!(
            updated = %settings.updated,
            json_data_bytes = settings.json_data.len(),
            "Graft app instance created"
        );

        let state = AppState {
            tracer: Arc::new(tracer),
            metrics: Arc::new(metrics),
        };
        let router = routes(state);

        Self {
            adapter: HttpAdapter::new(router.clone()),
            router,
        }
    }

    /// The instance's resource router
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route("/settings", any(handle_settings))
        .route("/ping", any(handle_ping))
        .route("/chat-metrics", post(handle_chat_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), trace_resource))
        .with_state(state)
}

fn plain_error(status: StatusCode, message: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        message,
    )
        .into_response()
}

async fn handle_settings(request: Request) -> Response {
    if request.method() != Method::GET {
        return plain_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let settings = request
        .extensions()
        .get::<PluginContext>()
        .and_then(|ctx| ctx.app_instance_settings.as_ref());

    match settings {
        Some(settings) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            settings.json_data.clone(),
        )
            .into_response(),
        None => plain_error(StatusCode::INTERNAL_SERVER_ERROR, "Plugin config not found"),
    }
}

async fn handle_ping() -> Json<serde_json::Value> {
    Json(json!({ "message": "ok" }))
}

/// Chat outcome as reported by the frontend
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMetricsReport {
    duration_seconds: f64,
    #[serde(default)]
    tokens_generated: Option<u64>,
    #[serde(default)]
    first_token_latency_seconds: Option<f64>,
    success: bool,
    #[serde(default)]
    model: Option<String>,
}

impl TryFrom<ChatMetricsReport> for ChatOutcome {
    type Error = GraftError;

    fn try_from(report: ChatMetricsReport) -> Result<Self> {
        let seconds = |field: &str, value: f64| {
            Duration::try_from_secs_f64(value)
                .map_err(|e| GraftError::InvalidRequest(format!("{}: {}", field, e)))
        };

        Ok(ChatOutcome {
            duration: seconds("durationSeconds", report.duration_seconds)?,
            tokens_generated: report.tokens_generated,
            first_token_latency: report
                .first_token_latency_seconds
                .map(|v| seconds("firstTokenLatencySeconds", v))
                .transpose()?,
            success: report.success,
            model: report.model,
        })
    }
}

async fn handle_chat_metrics(State(state): State<AppState>, body: Bytes) -> Result<StatusCode> {
    let report: ChatMetricsReport = serde_json::from_slice(&body)?;
    let outcome = ChatOutcome::try_from(report)?;
    state.metrics.record_chat(&outcome);
    Ok(StatusCode::ACCEPTED)
}

/// Runs each resource request inside a span and records the resource
/// instruments. The span is parented on an incoming `traceparent` header.
async fn trace_resource(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let parent = TraceContextPropagator::new().extract(&HeaderExtractor(request.headers()));
    let cx = state
        .tracer
        .start_span(format!("graft.resource {}", path), &parent);
    cx.span()
        .set_attribute(KeyValue::new(HTTP_REQUEST_METHOD, method.clone()));
    cx.span().set_attribute(KeyValue::new(URL_PATH, path.clone()));

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    let status = response.status();
    let span = cx.span();
    span.set_attribute(KeyValue::new(
        HTTP_RESPONSE_STATUS_CODE,
        i64::from(status.as_u16()),
    ));
    if status.is_server_error() {
        span.set_status(Status::error(format!("HTTP {}", status.as_u16())));
    }
    span.end();

    state
        .metrics
        .record_resource_request(&path, &method, status.as_u16(), elapsed);

    response
}

#[async_trait]
impl CallResourceHandler for App {
    async fn call_resource(&self, request: CallResourceRequest) -> Result<CallResourceResponse> {
        self.adapter.handle(request).await
    }
}

#[async_trait]
impl CheckHealthHandler for App {
    async fn check_health(&self, _request: CheckHealthRequest) -> Result<CheckHealthResult> {
        Ok(CheckHealthResult::ok(HEALTH_MESSAGE))
    }
}

impl InstanceDisposer for App {
    fn dispose(&self) {
        debug!("Disposing Graft app instance");
    }
}

/// Creates [`App`] instances for the host.
pub struct GraftAppFactory {
    registry: Arc<ProviderRegistry>,
    install_wait: Duration,
}

impl GraftAppFactory {
    /// Create a factory that waits up to [`DEFAULT_INSTALL_WAIT`] for providers
    /// to be installed.
    ///
    /// # Arguments
    /// * `registry` - Provider registry filled in during startup
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            install_wait: DEFAULT_INSTALL_WAIT,
        }
    }

    /// Override how long instance creation waits for provider installation
    pub fn with_install_wait(mut self, wait: Duration) -> Self {
        self.install_wait = wait;
        self
    }
}

#[async_trait]
impl InstanceFactory for GraftAppFactory {
    type Instance = App;

    async fn new_instance(&self, settings: AppInstanceSettings) -> Result<App> {
        if !self.registry.is_installed()
            && tokio::time::timeout(self.install_wait, self.registry.installed())
                .await
                .is_err()
        {
            warn!(
                wait_ms = self.install_wait.as_millis() as u64,
                "Telemetry providers not installed yet, creating instance with fallback providers"
            );
        }

        Ok(App::new(&settings, &self.registry))
    }
}

//! Host serving loop.
//!
//! [`PluginHost`] dispatches host calls to the app instance for the caller's
//! org. [`serve`] exposes it over HTTP until the process is asked to stop:
//!
//! - `POST /plugin/resource` takes a [`CallResourceRequest`] and answers with a
//!   [`CallResourceResponse`]
//! - `POST /plugin/health` takes a [`CheckHealthRequest`] and answers with a
//!   [`CheckHealthResult`]

use crate::host::instance::{InstanceFactory, InstanceManager};
use crate::host::protocol::{
    CallResourceRequest, CallResourceResponse, CheckHealthRequest, CheckHealthResult,
    PluginContext,
};
use crate::host::{CallResourceHandler, CheckHealthHandler};
use crate::{GraftError, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Options for the serving loop
#[derive(Debug, Clone)]
pub struct ServeOpts {
    pub listen_addr: SocketAddr,
}

/// Dispatches host calls for one plugin ID to per-org app instances
pub struct PluginHost<F: InstanceFactory> {
    plugin_id: String,
    instances: InstanceManager<F>,
}

impl<F: InstanceFactory> PluginHost<F> {
    pub fn new(plugin_id: impl Into<String>, factory: F) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            instances: InstanceManager::new(factory),
        }
    }

    pub fn instances(&self) -> &InstanceManager<F> {
        &self.instances
    }

    /// Route a resource call to the caller's app instance
    pub async fn call_resource(
        &self,
        mut request: CallResourceRequest,
    ) -> Result<CallResourceResponse> {
        self.check_plugin(&mut request.plugin_context)?;
        let instance = self.instances.get(&request.plugin_context).await?;
        debug!(
            org_id = request.plugin_context.org_id,
            method = %request.method,
            path = %request.path,
            "Resource call"
        );
        instance.call_resource(request).await
    }

    /// Run a health check against the caller's app instance
    pub async fn check_health(&self, mut request: CheckHealthRequest) -> Result<CheckHealthResult> {
        self.check_plugin(&mut request.plugin_context)?;
        let instance = self.instances.get(&request.plugin_context).await?;
        instance.check_health(request).await
    }

    /// Dispose all live app instances
    pub async fn dispose(&self) {
        self.instances.dispose_all().await;
    }

    // An empty plugin ID means the host did not fill it in; it is taken to be
    // ours so both forms share one cached instance
    fn check_plugin(&self, ctx: &mut PluginContext) -> Result<()> {
        if ctx.plugin_id.is_empty() {
            ctx.plugin_id.clone_from(&self.plugin_id);
            Ok(())
        } else if ctx.plugin_id == self.plugin_id {
            Ok(())
        } else {
            Err(GraftError::PluginMismatch {
                expected: self.plugin_id.clone(),
                actual: ctx.plugin_id.clone(),
            })
        }
    }
}

impl<F: InstanceFactory> PluginHost<F> {
    /// HTTP surface the host talks to
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/plugin/resource", post(resource_handler::<F>))
            .route("/plugin/health", post(health_handler::<F>))
            .with_state(self)
    }
}

async fn resource_handler<F: InstanceFactory>(
    State(host): State<Arc<PluginHost<F>>>,
    Json(request): Json<CallResourceRequest>,
) -> Result<Json<CallResourceResponse>> {
    host.call_resource(request).await.map(Json)
}

async fn health_handler<F: InstanceFactory>(
    State(host): State<Arc<PluginHost<F>>>,
    Json(request): Json<CheckHealthRequest>,
) -> Result<Json<CheckHealthResult>> {
    host.check_health(request).await.map(Json)
}

/// Serve `plugin_id` until SIGINT or SIGTERM.
///
/// Blocks for the lifetime of the plugin process. Returns an error if the
/// listener cannot be bound or the server fails.
pub async fn serve<F: InstanceFactory>(plugin_id: &str, factory: F, opts: ServeOpts) -> Result<()> {
    let listener = TcpListener::bind(opts.listen_addr).await?;
    info!(addr = %opts.listen_addr, plugin_id, "🌐 Plugin host listening");
    serve_with_shutdown(listener, plugin_id, factory, shutdown_signal()).await
}

/// Serve on an already-bound listener until `signal` resolves.
///
/// Live app instances are disposed once the server has drained.
pub async fn serve_with_shutdown<F, S>(
    listener: TcpListener,
    plugin_id: &str,
    factory: F,
    signal: S,
) -> Result<()>
where
    F: InstanceFactory,
    S: Future<Output = ()> + Send + 'static,
{
    let host = Arc::new(PluginHost::new(plugin_id, factory));
    let router = Arc::clone(&host).router();

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(signal)
        .await;

    host.dispose().await;
    result.map_err(GraftError::from)
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Received shutdown signal");
}

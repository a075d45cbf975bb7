//! Host-facing plugin surface.
//!
//! The dashboard host launches the backend and talks to it through a small
//! protocol: resource calls and health checks, each carrying a
//! [`PluginContext`]. This module defines those records, the handler traits an
//! app instance implements, the per-org instance manager, and the serving loop.

use async_trait::async_trait;

pub mod adapter;
pub mod instance;
pub mod protocol;
pub mod server;

pub use adapter::HttpAdapter;
pub use instance::{InstanceFactory, InstanceManager};
pub use protocol::{
    AppInstanceSettings, CallResourceRequest, CallResourceResponse, CheckHealthRequest,
    CheckHealthResult, HealthStatus, PluginContext, User,
};
pub use server::{serve, serve_with_shutdown, shutdown_signal, PluginHost, ServeOpts};

use crate::Result;

/// Handles resource calls routed to the plugin
#[async_trait]
pub trait CallResourceHandler: Send + Sync {
    async fn call_resource(&self, request: CallResourceRequest) -> Result<CallResourceResponse>;
}

/// Answers the host's health checks
#[async_trait]
pub trait CheckHealthHandler: Send + Sync {
    async fn check_health(&self, request: CheckHealthRequest) -> Result<CheckHealthResult>;
}

/// Releases whatever an app instance holds when it is replaced or the host stops
pub trait InstanceDisposer: Send + Sync {
    fn dispose(&self);
}

/// Everything the host needs from one app instance
pub trait AppInstance: CallResourceHandler + CheckHealthHandler + InstanceDisposer + 'static {}

impl<T> AppInstance for T where T: CallResourceHandler + CheckHealthHandler + InstanceDisposer + 'static {}

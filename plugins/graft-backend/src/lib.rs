//! Graft App Plugin Backend
//!
//! Backend process for the `vikshana-graft-app` dashboard plugin. It serves
//! three resource routes and the host's health check, and installs its own
//! OpenTelemetry providers before the host serving loop starts so that the
//! host's default instrumentation never replaces them.
//!
//! Model configuration lives in the dashboard's LLM plugin; this backend only
//! passes the app's own settings through.

pub mod app;
pub mod config;
pub mod error;
pub mod host;
pub mod startup;

pub use app::{App, GraftAppFactory, HEALTH_MESSAGE, PLUGIN_ID};
pub use config::GraftConfig;
pub use error::GraftError;
pub use startup::Telemetry;

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, GraftError>;

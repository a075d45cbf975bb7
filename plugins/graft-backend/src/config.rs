//! Configuration for the Graft plugin backend

use crate::{GraftError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment prefix for backend settings
pub const ENV_PREFIX: &str = "GRAFT_";

/// Process-level configuration for the plugin backend.
///
/// Telemetry settings are read separately by
/// [`OtelConfig::from_env`](telemetry_common::OtelConfig::from_env).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraftConfig {
    /// Plugin ID this backend answers for
    #[serde(default = "default_plugin_id")]
    pub plugin_id: String,

    /// Address the host serving loop listens on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Deadline for flushing telemetry on exit (seconds)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl GraftConfig {
    /// Load configuration from `GRAFT_*` environment variables
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of environment-style variables
    pub fn from_vars<I>(vars: I) -> std::result::Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            GraftError::Configuration(format!("invalid listen_addr {:?}: {}", self.listen_addr, e))
        })
    }

    /// Telemetry shutdown deadline
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            plugin_id: default_plugin_id(),
            listen_addr: default_listen_addr(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_plugin_id() -> String {
    crate::PLUGIN_ID.to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:10001".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_from_empty_env() {
        let config = GraftConfig::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config.plugin_id, "vikshana-graft-app");
        assert_eq!(config.listen_addr, "127.0.0.1:10001");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.listen_addr().is_ok());
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = GraftConfig::from_vars(vars(&[
            ("GRAFT_PLUGIN_ID", "custom-app"),
            ("GRAFT_LISTEN_ADDR", "0.0.0.0:9000"),
            ("GRAFT_SHUTDOWN_TIMEOUT_SECS", "2"),
        ]))
        .unwrap();

        assert_eq!(config.plugin_id, "custom-app");
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let result = GraftConfig::from_vars(vars(&[("GRAFT_SHUTDOWN_TIMEOUT_SECS", "soon")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_listen_addr_is_configuration_error() {
        let config =
            GraftConfig::from_vars(vars(&[("GRAFT_LISTEN_ADDR", "not-an-address")])).unwrap();
        assert_eq!(config.plugin_id, "vikshana-graft-app");
        assert!(matches!(
            config.listen_addr(),
            Err(GraftError::Configuration(_))
        ));
    }
}

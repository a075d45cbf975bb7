//! Error types for telemetry bootstrap and shutdown

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or tearing down the telemetry pipeline.
///
/// None of these are fatal to a plugin: callers log them and fall back to
/// the ambient providers.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// An OTLP exporter could not be constructed
    #[error("failed to create {signal} exporter: {message}")]
    Exporter {
        /// Signal the exporter was built for ("trace" or "metrics")
        signal: &'static str,
        /// Underlying exporter error
        message: String,
    },

    /// A provider reported an error while shutting down
    #[error("{component} shutdown error: {message}")]
    Shutdown {
        /// Component that failed ("tracer provider" or "meter provider")
        component: &'static str,
        /// Underlying SDK error
        message: String,
    },

    /// Shutdown did not finish before the caller's deadline
    #[error("telemetry shutdown exceeded deadline of {deadline:?}")]
    ShutdownTimeout {
        /// Deadline supplied by the caller
        deadline: Duration,
    },

    /// The log subscriber could not be installed
    #[error("failed to initialize tracing subscriber: {0}")]
    Subscriber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Exporter {
            signal: "trace",
            message: "invalid uri".to_string(),
        };
        assert_eq!(err.to_string(), "failed to create trace exporter: invalid uri");

        let err = TelemetryError::ShutdownTimeout {
            deadline: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("5s"));
    }
}

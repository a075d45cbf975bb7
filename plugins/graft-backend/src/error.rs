//! Error types for the Graft plugin backend

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraftError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid resource request: {0}")]
    InvalidRequest(String),

    #[error("Plugin context targets {actual}, this backend serves {expected}")]
    PluginMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

impl GraftError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GraftError::InvalidRequest(_) | GraftError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            GraftError::PluginMismatch { .. } => StatusCode::NOT_FOUND,
            GraftError::Configuration(_) | GraftError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GraftError::Configuration(_) => "configuration_error",
            GraftError::InvalidRequest(_) => "invalid_request",
            GraftError::PluginMismatch { .. } => "unknown_plugin",
            GraftError::Serialization(_) => "serialization_error",
            GraftError::Server(_) => "server_error",
        }
    }
}

impl IntoResponse for GraftError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            axum::Json(json!({
                "error": self.code(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GraftError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GraftError::PluginMismatch {
                expected: "vikshana-graft-app".to_string(),
                actual: "other-app".to_string(),
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GraftError::Configuration("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = GraftError::InvalidRequest("bad path".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

//! Error types for the ECOS gateway
//!
//! Every module owns a focused `thiserror` enum; [`GatewayError`] unifies them
//! at the HTTP boundary and maps each failure onto a status code and a
//! sanitised `{"detail": ...}` body.

use crate::config::ConfigError;
use crate::dispatcher::DispatchError;
use crate::forecasting::ForecastError;
use crate::gateway::auth::AuthError;
use crate::gateway::hardware::ManifestError;
use crate::solvers::SolverError;
use crate::transport::mqtt::MqttError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

const MAX_DETAIL_LEN: usize = 500;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{message}")]
    InvalidInput { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Forecast failed: {0}")]
    Forecast(#[from] ForecastError),

    #[error("Optimization failed: {0}")]
    Solver(#[from] SolverError),

    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    #[error("Hardware manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// JSON body returned for every failed request
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub detail: String,
}

impl GatewayError {
    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create not found error
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Dispatch(_) => StatusCode::BAD_REQUEST,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forecast(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            GatewayError::Solver(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the sanitised response body
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            detail: sanitize_error_message(&self.to_string()),
        }
    }
}

impl warp::reject::Reject for GatewayError {}

/// Mask credentials and sensitive paths, and bound the length of a message
/// that is about to leave the process.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_DETAIL_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_DETAIL_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            GatewayError::invalid_input("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::not_found("Unknown project_code").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Auth(AuthError::InvalidSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_forecast_input_errors_are_bad_requests() {
        let err = GatewayError::from(ForecastError::MissingSeries("flow".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = GatewayError::from(ForecastError::NotFitted);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_body_uses_display_text() {
        let body = GatewayError::not_found("Unknown project_code").to_error_body();
        assert_eq!(body.detail, "Unknown project_code");
    }

    #[test]
    fn test_sanitize_masks_secrets() {
        let sanitized = sanitize_error_message("connect failed: password=hunter2 token: abc");
        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_sanitize_redacts_paths() {
        let sanitized = sanitize_error_message("cannot read /home/ops/.aws/credentials");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains(".aws/credentials"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let sanitized = sanitize_error_message(&"x".repeat(800));
        assert!(sanitized.len() <= MAX_DETAIL_LEN);
        assert!(sanitized.ends_with("...[truncated]"));

        let exact = sanitize_error_message(&"y".repeat(MAX_DETAIL_LEN));
        assert_eq!(exact.len(), MAX_DETAIL_LEN);
    }

    #[test]
    fn test_sanitize_keeps_plain_messages() {
        assert_eq!(sanitize_error_message(""), "");
        assert_eq!(
            sanitize_error_message("Unknown tier. Allowed: enterprise, free, pro"),
            "Unknown tier. Allowed: enterprise, free, pro"
        );
    }
}

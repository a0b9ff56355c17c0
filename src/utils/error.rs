//! Error handling module
//!
//! Defines error types and handling logic used in the project

use crate::models::openai::{ErrorBody, ErrorEnvelope};
use crate::models::RotationLogEntry;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Missing or unknown gateway token
    #[error("Invalid API key: {0}")]
    InvalidCredential(String),

    /// Every credential of the serving provider was rate limited
    #[error("{0}")]
    RateLimitExhausted(String),

    /// Upstream provider failure after all credentials were tried
    #[error("{message}")]
    UpstreamProvider { status: Option<u16>, message: String },

    /// Model name did not resolve to a provider the user can reach
    #[error("{0}")]
    ModelNotFound(String),

    /// Request validation failed
    #[error("Request validation failed: {0}")]
    Validation(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimitExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ModelNotFound(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamProvider { status, .. } => upstream_status(*status),
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::InvalidCredential(_)
            | AppError::ModelNotFound(_)
            | AppError::Validation(_) => "invalid_request_error",
            AppError::RateLimitExhausted(_) => "rate_limit_exceeded",
            AppError::UpstreamProvider { .. } => "api_error",
            AppError::Config(_) | AppError::Internal(_) => "internal_error",
        }
    }

    /// Get machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidCredential(_) => "invalid_api_key",
            AppError::RateLimitExhausted(_) => "rate_limit_exceeded",
            AppError::UpstreamProvider { .. } => "provider_error",
            AppError::ModelNotFound(_) => "model_not_found",
            AppError::Validation(_) => "invalid_request",
            AppError::Config(_) | AppError::Internal(_) => "server_error",
        }
    }

    /// Message safe to hand back to a client
    pub fn client_message(&self) -> String {
        match self {
            AppError::Config(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => sanitize_message(&other.to_string()),
        }
    }

    /// Whether detailed error information should be logged
    pub fn should_log_details(&self) -> bool {
        !matches!(self, AppError::InvalidCredential(_))
    }

    /// Convert to the OpenAI error envelope
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                message: self.client_message(),
                error_type: self.error_type().to_string(),
                code: self.error_code().to_string(),
            },
        }
    }
}

/// Upstream 401/403 mean the provider rejected the user's stored key, which
/// is a gateway-side problem from the client's point of view.
fn upstream_status(status: Option<u16>) -> StatusCode {
    match status {
        Some(401) | Some(403) | None => StatusCode::INTERNAL_SERVER_ERROR,
        Some(code) => StatusCode::from_u16(code)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
    }
}

/// Implement IntoResponse trait to allow errors to be returned directly as HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log error
        if self.should_log_details() {
            tracing::error!("Application error: {} - Status code: {}", self, status);
        } else {
            tracing::warn!("Client error: {} - Status code: {}", self.error_type(), status);
        }

        (status, Json(self.to_envelope())).into_response()
    }
}

/// Result type alias
pub type AppResult<T> = Result<T, AppError>;

/// Classification of a single failed upstream attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429 or a provider rate-limit body
    RateLimited,
    /// Non-success HTTP status from the provider
    UpstreamApi(u16),
    /// Transport failure, timeout, or unparseable response
    Unclassified,
}

/// Failure of one credential attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AttemptError {
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::RateLimited, message: message.into() }
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            return Self::rate_limited(message);
        }
        Self { kind: FailureKind::UpstreamApi(status), message: message.into() }
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Unclassified, message: message.into() }
    }

    /// Status label recorded in the rotation log
    pub fn status_label(&self) -> String {
        match self.kind {
            FailureKind::RateLimited => "rate_limited".to_string(),
            FailureKind::UpstreamApi(status) => status.to_string(),
            FailureKind::Unclassified => "error".to_string(),
        }
    }
}

/// A failure surfacing after streaming has started is reported as-is; there is
/// no credential left to rotate to.
impl From<AttemptError> for AppError {
    fn from(err: AttemptError) -> Self {
        match err.kind {
            FailureKind::RateLimited => AppError::RateLimitExhausted(err.message),
            FailureKind::UpstreamApi(status) => {
                AppError::UpstreamProvider { status: Some(status), message: err.message }
            }
            FailureKind::Unclassified => AppError::UpstreamProvider { status: None, message: err.message },
        }
    }
}

/// Every credential of a provider failed
#[derive(Debug, Clone)]
pub struct Exhausted {
    /// Kind of the last failure, which decides the surfaced error
    pub kind: FailureKind,
    /// Message of the last failure
    pub message: String,
    /// One entry per credential tried, in order
    pub rotation_log: Vec<RotationLogEntry>,
}

impl From<Exhausted> for AppError {
    fn from(exhausted: Exhausted) -> Self {
        match exhausted.kind {
            FailureKind::RateLimited => AppError::RateLimitExhausted(format!(
                "All keys rate limited. Last: {}",
                exhausted.message
            )),
            FailureKind::UpstreamApi(status) => AppError::UpstreamProvider {
                status: Some(status),
                message: format!("All keys failed. Last: {}", exhausted.message),
            },
            FailureKind::Unclassified => AppError::UpstreamProvider {
                status: None,
                message: format!("All keys failed. Last: {}", exhausted.message),
            },
        }
    }
}

/// Replace anything that looks like key material with a placeholder
pub fn sanitize_message(message: &str) -> String {
    message
        .split(' ')
        .map(|word| {
            let core = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_');
            if looks_like_secret(core) {
                word.replace(core, "[REDACTED]")
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_secret(word: &str) -> bool {
    let keyish = word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !keyish || word.len() < 12 {
        return false;
    }
    let has_digit = word.chars().any(|c| c.is_ascii_digit());
    word.starts_with("sk-")
        || word.starts_with("sk_")
        || word.starts_with("key-")
        || (word.len() >= 32 && has_digit)
}

/// Error handling helper functions
pub mod helpers {
    use super::*;

    /// Create validation error
    pub fn validation_error(message: impl Into<String>) -> AppError {
        AppError::Validation(message.into())
    }

    /// Create model not found error
    pub fn model_not_found(model: &str) -> AppError {
        AppError::ModelNotFound(format!("Model '{}' is not available", model))
    }

    /// Create internal error
    pub fn internal_error(message: impl Into<String>) -> AppError {
        AppError::Internal(message.into())
    }
}

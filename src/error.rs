//! Error types shared by the orchestration core and the HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy every backend adapter maps its native errors into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or out-of-range input. Never retried.
    InvalidRequest,
    /// Bad or missing credentials at the backend
    AuthError,
    /// Backend-side throttling
    RateLimited,
    /// Transient transport failure
    NetworkError,
    /// Job polling or the request ceiling ran out of time
    Timeout,
    /// No eligible backend exists
    NoProviderAvailable,
    /// Any other backend-reported failure
    BackendError,
}

impl ErrorKind {
    /// Whether the manager may move on to the next candidate after this failure
    pub fn allows_failover(&self) -> bool {
        !matches!(self, Self::InvalidRequest | Self::NoProviderAvailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AuthError => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::NoProviderAvailable => "no_provider_available",
            Self::BackendError => "backend_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::NoProviderAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::AuthError | Self::NetworkError | Self::BackendError => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed attempt against one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub backend: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal failure of a whole generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct GenerationFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Backend that produced the final failure, if any was tried
    pub backend: Option<String>,
    /// Every attempted backend in the order it was tried
    pub attempts: Vec<AttemptFailure>,
}

impl GenerationFailure {
    /// A failure raised before any backend was contacted
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: None,
            attempts: Vec::new(),
        }
    }

    /// Aggregate the failures of every tried candidate. The last attempt's
    /// kind becomes the overall kind.
    pub fn exhausted(attempts: Vec<AttemptFailure>) -> Self {
        let Some(last) = attempts.last() else {
            return Self::new(ErrorKind::NoProviderAvailable, "no eligible backend available");
        };

        let summary = attempts
            .iter()
            .map(|a| format!("{} ({}: {})", a.backend, a.kind, a.message))
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            kind: last.kind,
            message: format!("all {} candidate backends failed: {}", attempts.len(), summary),
            backend: Some(last.backend.clone()),
            attempts,
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request queue is full")]
    QueueFull,

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptFailure>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None)
            }
            AppError::BackendNotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("backend_not_found")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("queue_full")),
            AppError::Generation(failure) => (failure.kind.status_code(), "generation_error", Some(failure.kind.as_str())),
        };

        let attempts = match &self {
            AppError::Generation(failure) => failure.attempts.clone(),
            _ => Vec::new(),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
                attempts,
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

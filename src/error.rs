//! Common error types for the review gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::traits::ModelKey;
use crate::review::types::CheckType;

/// A check's backend cannot be resolved from the current configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{check} backend cannot be configured: {message}")]
pub struct ConfigurationError {
    pub check: CheckType,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(check: CheckType, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
        }
    }
}

/// Constructing a model handle failed. Cached for the lifetime of the slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to load {key} model: {message}")]
pub struct ModelLoadError {
    pub key: ModelKey,
    pub message: String,
}

impl ModelLoadError {
    pub fn new(key: ModelKey, message: impl Into<String>) -> Self {
        Self {
            key,
            message: message.into(),
        }
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Unknown review type: {0}")]
    UnknownReviewType(String),

    #[error("Image could not be loaded: {0}")]
    ImageLoad(String),

    #[error("Batch of {size} images exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput(message.into())
    }

    pub fn image_load(message: impl Into<String>) -> Self {
        AppError::ImageLoad(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal(message.into())
    }

    /// Status, error type and machine-readable code for the response body
    fn classify(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "configuration_error"),
            AppError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "backend_not_configured"),
            AppError::ModelLoad(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", "model_unavailable"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "io_error"),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_json"),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "backend_error", "http_client_error"),
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_request"),
            AppError::UnknownReviewType(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request_error", "unknown_review_type"),
            AppError::ImageLoad(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", "image_load_failed"),
            AppError::BatchTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "invalid_request_error", "batch_too_large"),
            AppError::BackendUnreachable(_) => (StatusCode::BAD_GATEWAY, "backend_error", "backend_unreachable"),
            AppError::Backend(_) => (StatusCode::BAD_GATEWAY, "backend_error", "backend_error"),
            AppError::MalformedResponse(_) => (StatusCode::BAD_GATEWAY, "backend_error", "malformed_response"),
            AppError::AuthenticationFailed(_) => (StatusCode::UNAUTHORIZED, "authentication_error", "invalid_api_key"),
            AppError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_error", "rate_limit_exceeded"),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", "timeout"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal_error"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    /// Errors caused by the caller; their message is always safe to return.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Json(_)
                | AppError::InvalidInput(_)
                | AppError::UnknownReviewType(_)
                | AppError::ImageLoad(_)
                | AppError::BatchTooLarge { .. }
                | AppError::AuthenticationFailed(_)
                | AppError::RateLimitExceeded
        )
    }

    /// Fixed message for errors whose text may carry internal detail
    fn generic_message(&self) -> &'static str {
        match self {
            AppError::ImageLoad(_) => "Image could not be loaded",
            _ => match self.status_code() {
                StatusCode::SERVICE_UNAVAILABLE => "A model required for this review is unavailable",
                StatusCode::GATEWAY_TIMEOUT => "The review timed out",
                StatusCode::BAD_GATEWAY => "An inference backend failed",
                _ => "Internal server error",
            },
        }
    }

    /// Message safe to show without the debug toggle.
    ///
    /// Image load failures name the fetched URL and the transport error, so
    /// they are replaced along with every server-side error.
    pub fn public_message(&self) -> String {
        match self {
            AppError::ImageLoad(_) => self.generic_message().to_string(),
            _ if self.is_client_error() => self.to_string(),
            _ => self.generic_message().to_string(),
        }
    }

    /// Render the error with or without internal detail.
    pub fn to_response(&self, include_detail: bool) -> Response {
        let (status, error_type, code) = self.classify();

        let message = self.public_message();
        let full = self.to_string();
        let detail = (include_detail && full != message).then_some(full);

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
                r#type: error_type.to_string(),
                detail,
            },
        });

        (status, body).into_response()
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_response(false)
    }
}

/// An [`AppError`] paired with the debug toggle of the serving process.
#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub include_detail: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.error.to_response(self.include_detail)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

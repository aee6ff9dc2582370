/// Unified error types for Clipforge
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing credentials or keys
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The linked account's tokens can no longer be refreshed
    #[error("Authorization expired: {0}")]
    AuthExpired(String),

    /// The linked account cannot be used until it is reconnected
    #[error("Account not usable: {0}")]
    AccountNotUsable(String),

    /// Daily post quota exhausted for the account
    #[error("Daily posting limit reached for {username}")]
    QuotaExceeded {
        username: String,
        resets_at: DateTime<Utc>,
    },

    /// The granted OAuth scopes do not allow posting
    #[error("Insufficient scope: {0}")]
    InsufficientScope(String),

    /// Opaque third-party failure
    #[error("Provider error ({code}): {message}")]
    Provider { code: String, message: String },

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid caller credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (e.g., duplicate in-flight publish)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Encryption or signature failures
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Build a provider error from a code and message
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap a transport-level failure from the HTTP client
    pub fn transport(err: reqwest::Error) -> Self {
        let code = err
            .status()
            .map(|s| s.as_u16().to_string())
            .unwrap_or_else(|| "transport".to_string());
        AppError::Provider {
            code,
            message: err.to_string(),
        }
    }

    /// Provider failures that may succeed on a later attempt (transport errors and 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Provider { code, .. } => {
                code == "transport"
                    || code
                        .parse::<u16>()
                        .map(|status| (500..600).contains(&status))
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut resets_at = None;
        let (status, error_code, message) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string()),
            AppError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            AppError::AuthExpired(_) => (StatusCode::CONFLICT, "ReconnectRequired", self.to_string()),
            AppError::AccountNotUsable(_) => {
                (StatusCode::CONFLICT, "AccountNotUsable", self.to_string())
            }
            AppError::InsufficientScope(_) => {
                (StatusCode::FORBIDDEN, "InsufficientScope", self.to_string())
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            AppError::QuotaExceeded { resets_at: at, .. } => {
                resets_at = Some(*at);
                (StatusCode::TOO_MANY_REQUESTS, "QuotaExceeded", self.to_string())
            }
            AppError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            AppError::Provider { code, message } => (
                StatusCode::BAD_GATEWAY,
                "ProviderError",
                format!("Provider error ({}): {}", code, message),
            ),
            AppError::Configuration(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ConfigurationError",
                "Service is not configured for this operation".to_string(),
            ),
            AppError::Crypto(_)
            | AppError::Database(_)
            | AppError::Io(_)
            | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(ErrorResponse {
            success: false,
            error: error_code.to_string(),
            message,
            resets_at,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type AppResult<T> = Result<T, AppError>;

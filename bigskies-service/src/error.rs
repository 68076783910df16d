//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the framework error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the framework
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Bus transport error (connect, publish, subscribe)
    #[error("Bus error: {0}")]
    Bus(String),

    /// Publish or subscribe attempted while the broker session is down
    #[error("Bus not connected")]
    BusNotConnected,

    /// Broker rejected the operation
    #[error("Bus rejected: {0}")]
    BusRejected(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(Box<sqlx::Error>),

    /// A bounded wait elapsed without a result
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The operation was torn down by shutdown or caller cancellation
    #[error("Cancelled")]
    Cancelled,

    /// RBAC pending-validation queue is at capacity
    #[error("Validation queue overflow")]
    QueueOverflow,

    /// Credentials bootstrap handshake did not complete in time
    #[error("Credentials handshake timed out")]
    CredentialsTimeout,

    /// No healthy backend proxy is available for the device
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// ASCOM device-level error propagated from a backend
    #[error("Device error {code}: {message}")]
    Device { code: i32, message: String },

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Authorization error
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Malformed input (envelope, payload, parameters)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Downstream coordinator interaction failed (publish, DB mirror write)
    #[error("Coordinator error: {0}")]
    Coordinator(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry loop may reasonably re-attempt the failed operation
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Bus(_) | Error::BusNotConnected | Error::Timeout(_) | Error::BackendUnavailable(_)
        )
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    e.to_string(),
                ),
            ),

            Error::Bus(msg) | Error::BusRejected(msg) => {
                tracing::error!("Bus error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "BUS_ERROR",
                        "Message bus error",
                    ),
                )
            }

            Error::BusNotConnected => {
                tracing::error!("Bus operation attempted while disconnected");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "BUS_ERROR",
                        "Message bus unavailable",
                    ),
                )
            }

            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "Database operation failed",
                    ),
                )
            }

            Error::Timeout(msg) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorResponse::with_code(StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg),
            ),

            Error::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CANCELLED",
                    "Request cancelled by shutdown",
                ),
            ),

            Error::QueueOverflow => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUEUE_OVERFLOW",
                    "Validation queue is full",
                ),
            ),

            Error::CredentialsTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CREDENTIALS_TIMEOUT",
                    "Service is waiting for credentials",
                ),
            ),

            Error::BackendUnavailable(msg) => {
                tracing::error!("No healthy backend: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorResponse::with_code(
                        StatusCode::BAD_GATEWAY,
                        "BACKEND_UNAVAILABLE",
                        "Device backend unavailable",
                    ),
                )
            }

            Error::Device { code, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("DEVICE_{}", code),
                    message,
                ),
            ),

            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ),

            Error::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                ErrorResponse::with_code(StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ),

            Error::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            ),

            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),

            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),

            Error::Coordinator(msg) => {
                tracing::error!("Coordinator error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "COORDINATOR_ERROR",
                        "Downstream coordinator error",
                    ),
                )
            }

            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "IO_ERROR",
                        "I/O operation failed",
                    ),
                )
            }

            Error::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal server error",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Row not found".to_string()),
            other => Error::Database(Box::new(other)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new(StatusCode::NOT_FOUND, "Device not found");
        assert_eq!(err.status, 404);
        assert_eq!(err.error, "Device not found");
        assert!(err.code.is_none());
    }

    #[test]
    fn test_error_response_with_code() {
        let err = ErrorResponse::with_code(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "No telescope permission",
        );
        assert_eq!(err.status, 403);
        assert_eq!(err.code, Some("FORBIDDEN".to_string()));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(Error::BusNotConnected.is_retriable());
        assert!(Error::Timeout("wait".into()).is_retriable());
        assert!(!Error::Forbidden("nope".into()).is_retriable());
        assert!(!Error::QueueOverflow.is_retriable());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}

//! Layered error types for the event notifier.
//!
//! - [`ConfigError`] - startup-fatal configuration problems
//! - [`InterceptError`] - malformed input to the events interceptor
//! - [`TransportError`] - broker/lock/session-bus failures, non-fatal
//! - [`NotifierError`] - the primary `Result` error type for application code
//! - [`ApiError`] - HTTP-facing wrapper for the (out of scope) ingress layer
//!
//! # Error Philosophy
//!
//! - Intercept errors are caused by malformed input and are reported to
//!   callers.
//! - Transport errors are logged and counted; the hub/broker loops never
//!   propagate them out of the event loop.
//! - Config errors are fatal at startup.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Startup-fatal configuration problems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// An exchange configuration is missing its name.
    #[error("missing exchange name for {0}")]
    MissingExchangeName(&'static str),

    /// An exchange configuration is missing its type.
    #[error("missing exchange type for {0}")]
    MissingExchangeType(&'static str),

    /// The dedup TTL must be greater than zero.
    #[error("redis.ttl_minutes must be greater than zero")]
    ZeroTtl,

    /// `api_type` did not match a known variant.
    #[error("unknown api type: {0}")]
    UnknownApiType(String),

    /// `redis.connection_type` did not match a known variant.
    #[error("unknown redis connection type: {0}")]
    UnknownConnectionType(String),

    /// Underlying configuration loading/parsing error.
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    /// One or more settings failed validation.
    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERCEPT ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors raised while normalizing raw block-save data.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InterceptError {
    /// The transactions pool was absent.
    #[error("nil transactions pool")]
    NilTransactionsPool,

    /// The block body was absent.
    #[error("nil block body")]
    NilBlockBody,

    /// The block header was absent.
    #[error("nil block header")]
    NilBlockHeader,

    /// A public key in the input could not be parsed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(#[from] crate::types::primitives::InvalidPublicKey),
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Non-fatal failures from external transports. The hub and broker publisher
/// loops log and count these; they never stop the loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The lock service rejected the connection.
    #[error("lock service connection refused")]
    LockConnectionRefused,

    /// The lock service failed for some other reason.
    #[error("lock service error: {0}")]
    Lock(String),

    /// Publishing to a broker exchange failed.
    #[error("broker publish error: {0}")]
    Publish(String),

    /// The session-bus side channel failed.
    #[error("session bus error: {0}")]
    SessionBus(String),

    /// The broker connection or channel dropped.
    #[error("broker connectivity error: {0}")]
    Connectivity(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// The primary error type used throughout the notifier core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifierError {
    /// Startup configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed interceptor input.
    #[error(transparent)]
    Intercept(#[from] InterceptError),

    /// Transport-layer failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for notifier-core Results.
pub type Result<T> = std::result::Result<T, NotifierError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific; the ingress layer itself is out of scope)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes, for the (out-of-scope) ingress
/// layer to reuse.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped notifier error.
    #[error(transparent)]
    Notifier(#[from] NotifierError),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Authentication required or failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Internal server error (with source for logging).
    #[error("internal error")]
    Internal(#[source] eyre::Report),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Notifier(NotifierError::Intercept(_)) | Self::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string())
            }

            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            Self::Notifier(
                NotifierError::Config(_) | NotifierError::Transport(_) | NotifierError::ShutdownRequested,
            )
            | Self::Internal(_) => {
                tracing::error!(error = ?self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intercept_error_display() {
        let err = InterceptError::NilBlockHeader;
        assert_eq!(err.to_string(), "nil block header");
    }

    #[test]
    fn notifier_error_from_transport() {
        let transport = TransportError::LockConnectionRefused;
        let err: NotifierError = transport.into();
        assert!(matches!(
            err,
            NotifierError::Transport(TransportError::LockConnectionRefused)
        ));
    }

    #[test]
    fn notifier_error_from_config() {
        let err: NotifierError = ConfigError::ZeroTtl.into();
        assert!(matches!(err, NotifierError::Config(ConfigError::ZeroTtl)));
    }
}

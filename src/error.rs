//! Error types for MailFlow

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for MailFlow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for MailFlow
///
/// Variants mirror the dispatch pipeline's failure taxonomy: client faults
/// are terminal, transient downstream conditions are retried or queued, and
/// `QueueFull` is the only terminal outcome for an accepted email.
#[derive(Error, Debug)]
pub enum Error {
    /// Client fault, never retried
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Record already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Rate limit exhausted
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Downstream is down or in maintenance
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Deadline elapsed before the call completed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Call was aborted downstream
    #[error("aborted: {0}")]
    Aborted(String),

    /// Circuit breaker rejected the call without contacting downstream
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Half-open probe budget exhausted
    #[error("too many probes in half-open state")]
    TooManyProbes,

    /// Retry queue rejected the entry
    #[error("retry queue is full")]
    QueueFull,

    /// Cancelled by the caller or by shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// gRPC transport error
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retrier should attempt the call again.
    ///
    /// Client faults, terminal outcomes and breaker rejections exit the
    /// retry loop immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_)
                | Error::Unavailable(_)
                | Error::DeadlineExceeded(_)
                | Error::Aborted(_)
        )
    }

    /// Whether the resilient client should divert the request to its retry
    /// queue instead of surfacing the error.
    pub fn should_queue(&self) -> bool {
        matches!(
            self,
            Error::CircuitOpen
                | Error::Unavailable(_)
                | Error::DeadlineExceeded(_)
                | Error::Aborted(_)
        )
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let msg = status.message().to_string();
        match status.code() {
            tonic::Code::InvalidArgument => Error::InvalidArgument(msg),
            tonic::Code::NotFound => Error::NotFound(msg),
            tonic::Code::AlreadyExists => Error::AlreadyExists(msg),
            tonic::Code::ResourceExhausted => Error::ResourceExhausted(msg),
            tonic::Code::Unavailable => Error::Unavailable(msg),
            tonic::Code::DeadlineExceeded => Error::DeadlineExceeded(msg),
            tonic::Code::Aborted => Error::Aborted(msg),
            tonic::Code::Cancelled => Error::Cancelled,
            _ => Error::Internal(msg),
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            Error::NotFound(msg) => tonic::Status::not_found(msg),
            Error::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            Error::ResourceExhausted(msg) => tonic::Status::resource_exhausted(msg),
            Error::Unavailable(msg) => tonic::Status::unavailable(msg),
            Error::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            Error::Aborted(msg) => tonic::Status::aborted(msg),
            Error::CircuitOpen => tonic::Status::unavailable("circuit breaker is open"),
            Error::TooManyProbes => {
                tonic::Status::resource_exhausted("too many probes in half-open state")
            }
            Error::QueueFull => tonic::Status::resource_exhausted("retry queue is full"),
            Error::Cancelled => tonic::Status::cancelled("operation cancelled"),
            Error::Config(msg) => tonic::Status::invalid_argument(msg),
            Error::Transport(e) => tonic::Status::unavailable(e.to_string()),
            Error::Io(e) => tonic::Status::internal(e.to_string()),
            Error::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

/// HTTP mapping for the JSON mirror.
///
/// Saturation answers with `Retry-After` so well-behaved clients back off.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self {
            Error::InvalidArgument(_) | Error::Config(_) => (StatusCode::BAD_REQUEST, None),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, None),
            Error::AlreadyExists(_) => (StatusCode::CONFLICT, None),
            Error::ResourceExhausted(_) | Error::TooManyProbes | Error::QueueFull => {
                (StatusCode::TOO_MANY_REQUESTS, Some("1"))
            }
            Error::Unavailable(_) | Error::CircuitOpen => {
                (StatusCode::SERVICE_UNAVAILABLE, Some("30"))
            }
            Error::DeadlineExceeded(_) => (StatusCode::GATEWAY_TIMEOUT, None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        match retry_after {
            Some(secs) => (status, [(header::RETRY_AFTER, secs)], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

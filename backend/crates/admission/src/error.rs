//! Admission Error Types
//!
//! Queue and throttling outcomes that integrate with the unified
//! `kernel::error::AppError` system.
//!
//! Every variant except [`QueueError::Store`] is a recoverable, user-facing
//! rejection: it is logged below `error` and never retried by the core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::store::StoreError;
use thiserror::Error;

/// Admission-specific result type alias
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Capacity reached at enqueue time; nothing was written
    #[error("Queue is full")]
    QueueFull,

    /// Duplicate enqueue; the original entry is untouched
    #[error("Already in queue")]
    AlreadyInQueue,

    /// Lock not acquired, or the insert did not take
    #[error("Failed to add to queue")]
    FailedToEnqueue,

    /// Principal is not queued (never was, left, or was swept)
    #[error("Queue position not found")]
    PositionNotFound,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid principal id: {0}")]
    InvalidPrincipal(String),

    #[error("Missing principal identity")]
    MissingPrincipal,

    /// Store unreachable or holding unreadable state
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::QueueFull | QueueError::FailedToEnqueue | QueueError::Store(_) => {
                ErrorKind::ServiceUnavailable
            }
            QueueError::AlreadyInQueue => ErrorKind::Conflict,
            QueueError::PositionNotFound => ErrorKind::NotFound,
            QueueError::RateLimitExceeded => ErrorKind::TooManyRequests,
            QueueError::InvalidPrincipal(_) => ErrorKind::BadRequest,
            QueueError::MissingPrincipal => ErrorKind::Unauthorized,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::QueueFull => "QUEUE_FULL",
            QueueError::AlreadyInQueue => "QUEUE_ALREADY_IN",
            QueueError::FailedToEnqueue => "QUEUE_ENQUEUE_FAILED",
            QueueError::PositionNotFound => "QUEUE_POSITION_NOT_FOUND",
            QueueError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            QueueError::InvalidPrincipal(_) => "PRINCIPAL_INVALID",
            QueueError::MissingPrincipal => "PRINCIPAL_MISSING",
            QueueError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    fn action(&self) -> Option<&'static str> {
        match self {
            QueueError::QueueFull | QueueError::FailedToEnqueue => {
                Some("Retry after a short backoff")
            }
            QueueError::PositionNotFound => Some("Enter the queue again"),
            QueueError::RateLimitExceeded => Some("Wait until X-RateLimit-Reset"),
            _ => None,
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            QueueError::Store(e) => {
                tracing::error!(error = %e, "Admission store error");
            }
            QueueError::QueueFull | QueueError::FailedToEnqueue => {
                tracing::warn!(error = %self, "Admission rejected");
            }
            _ => {
                tracing::debug!(error = %self, "Admission error");
            }
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        let mut app = AppError::new(err.kind(), err.to_string()).with_code(err.code());
        if let Some(action) = err.action() {
            app = app.with_action(action);
        }
        match err {
            QueueError::Store(source) => app.with_source(source),
            _ => app,
        }
    }
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        self.log();
        AppError::from(self).into_response()
    }
}

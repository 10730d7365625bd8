//! Error types for the request-execution boundary.
//!
//! Only validation, timeout, circuit-open and handler failures ever cross the
//! boundary. Cache-internal failures (`CacheError`) are recovered locally and
//! never appear here.

use crate::resilience::CircuitBreakerError;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by domain handlers and fetchers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Malformed caller input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation exceeded its deadline. The underlying work may still be running.
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The guarded dependency is considered unhealthy.
    #[error("Circuit breaker open: {component}")]
    CircuitOpen { component: String },

    /// The wrapped handler failed; the original error is kept as the source.
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ExecutorError {
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        ExecutorError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn handler<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        ExecutorError::Handler(error.into())
    }

    /// Stable classification used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::Validation(_) => "validation",
            ExecutorError::Timeout { .. } => "timeout",
            ExecutorError::CircuitOpen { .. } => "circuit_open",
            ExecutorError::Handler(_) => "handler",
            ExecutorError::Unknown(_) => "unknown",
        }
    }

    /// Timeouts and open circuits are transient; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutorError::Timeout { .. } | ExecutorError::CircuitOpen { .. }
        )
    }

    /// Borrow the handler's original error, if this is a handler failure.
    pub fn handler_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            ExecutorError::Handler(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<CircuitBreakerError<ExecutorError>> for ExecutorError {
    fn from(error: CircuitBreakerError<ExecutorError>) -> Self {
        match error {
            CircuitBreakerError::CircuitOpen { component } => {
                ExecutorError::CircuitOpen { component }
            }
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

impl From<tokio::task::JoinError> for ExecutorError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_panic() {
            ExecutorError::Unknown(format!("task panicked: {error}"))
        } else {
            ExecutorError::Unknown(format!("task aborted: {error}"))
        }
    }
}

pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;

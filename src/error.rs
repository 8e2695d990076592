//! Error types for the job queue.
//!
//! This module provides the error taxonomy for every queue operation,
//! using the thiserror crate for ergonomic error handling.

use thiserror::Error;

/// The main error type for queue operations.
///
/// Submission errors (`ValidationError`, `QueueFull`) are returned to the caller
/// of `add()`. Execution errors (`UnknownJobType`, `HandlerError`, `TimeoutError`)
/// are recorded on the job and reported through events, never re-thrown.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QmlError {
    /// Malformed `add()` arguments or payload
    #[error("Validation failed: {message}")]
    ValidationError { message: String },

    /// No handler registered for the job type at dispatch time
    #[error("No handler registered for job type: {job_type}")]
    UnknownJobType { job_type: String },

    /// The handler returned an error or panicked
    #[error("Handler error: {message}")]
    HandlerError { message: String },

    /// The handler exceeded its configured timeout
    #[error("Operation timed out: {operation}")]
    TimeoutError { operation: String },

    /// Backpressure rejection from `add()`
    #[error("Queue is full: {capacity} pending jobs")]
    QueueFull { capacity: usize },

    /// Job not found error
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Invalid job status transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },
}

impl QmlError {
    /// Shorthand for a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        QmlError::ValidationError {
            message: message.into(),
        }
    }

    /// Shorthand for a handler error, used by handlers to report failures.
    pub fn handler(message: impl Into<String>) -> Self {
        QmlError::HandlerError {
            message: message.into(),
        }
    }

    /// Whether the retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QmlError::HandlerError { .. } | QmlError::TimeoutError { .. }
        )
    }

    /// Short name of the error kind, used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            QmlError::ValidationError { .. } => "ValidationError",
            QmlError::UnknownJobType { .. } => "UnknownJobTypeError",
            QmlError::HandlerError { .. } => "HandlerError",
            QmlError::TimeoutError { .. } => "TimeoutError",
            QmlError::QueueFull { .. } => "QueueFullError",
            QmlError::JobNotFound { .. } => "JobNotFound",
            QmlError::InvalidStateTransition { .. } => "InvalidStateTransition",
            QmlError::ConfigurationError { .. } => "ConfigurationError",
            QmlError::SerializationError { .. } => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for QmlError {
    fn from(err: serde_json::Error) -> Self {
        QmlError::SerializationError {
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for queue operations.
pub type Result<T> = std::result::Result<T, QmlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_failures_are_retryable() {
        assert!(QmlError::handler("smtp down").is_retryable());
        assert!(QmlError::TimeoutError {
            operation: "email:send".to_string()
        }
        .is_retryable());
        assert!(!QmlError::validation("bad").is_retryable());
        assert!(!QmlError::UnknownJobType {
            job_type: "bogus:type".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = QmlError::QueueFull { capacity: 10 };
        assert_eq!(err.to_string(), "Queue is full: 10 pending jobs");
        assert_eq!(err.kind(), "QueueFullError");
    }
}

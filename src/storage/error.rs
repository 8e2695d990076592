use crate::error::QmlError;
use thiserror::Error;

/// Errors raised by the job store while applying a mutation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Job not found in the store
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Pending set is at its configured capacity
    #[error("Storage capacity exceeded: {capacity} pending jobs")]
    CapacityExceeded { capacity: usize },

    /// A mutation would break the status state machine
    #[error("Invalid state transition for job {job_id}: {from} -> {to}")]
    InvalidStateTransition {
        job_id: String,
        from: String,
        to: String,
    },
}

impl StorageError {
    /// Create a job not found error
    pub fn job_not_found<S: Into<String>>(job_id: S) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    /// Create a capacity exceeded error
    pub fn capacity_exceeded(capacity: usize) -> Self {
        Self::CapacityExceeded { capacity }
    }
}

// Convert StorageError to QmlError for unified error handling
impl From<StorageError> for QmlError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::JobNotFound { job_id } => QmlError::JobNotFound { job_id },
            StorageError::CapacityExceeded { capacity } => QmlError::QueueFull { capacity },
            StorageError::InvalidStateTransition { from, to, .. } => {
                QmlError::InvalidStateTransition { from, to }
            }
        }
    }
}

//! Worker pool and execution context
//!
//! This module contains the bounded [`WorkerPool`] that runs handlers, the
//! [`HandlerContext`] passed to every attempt and the [`ExecutionOutcome`]
//! reported back to the scheduler.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::DynHandler;
use crate::core::Job;
use crate::error::QmlError;

/// Context information provided to handlers during job execution
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// ID of the job being executed
    pub job_id: String,
    /// Type of the job being executed
    pub job_type: String,
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Attempts allowed in total
    pub max_attempts: u32,
    /// Error of the previous attempt if this is a retry
    pub previous_error: Option<String>,
    /// When this attempt started
    pub started_at: DateTime<Utc>,
    cancellation: CancellationToken,
}

impl HandlerContext {
    pub(crate) fn new(job: &Job, cancellation: CancellationToken) -> Self {
        Self {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            attempt: job.attempts_made,
            max_attempts: job.max_attempts,
            previous_error: job.last_error.clone(),
            started_at: job.started_at.unwrap_or_else(Utc::now),
            cancellation,
        }
    }

    /// Build a standalone context for `job`, useful when calling a handler directly
    pub fn for_job(job: &Job) -> Self {
        Self::new(job, CancellationToken::new())
    }

    /// Whether this is a retry attempt
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }

    /// Whether a failure of this attempt is final
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether `cancel()` was called for this job while it was running.
    ///
    /// Cancellation of an active job is advisory: the handler decides whether
    /// to stop early.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Token that is cancelled when `cancel()` is called for this job
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Result of running one attempt
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Handler returned normally
    Success {
        result: Option<Value>,
        duration_ms: u64,
    },
    /// Handler returned an error, panicked or timed out
    Failure { error: QmlError, duration_ms: u64 },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            ExecutionOutcome::Success { duration_ms, .. }
            | ExecutionOutcome::Failure { duration_ms, .. } => *duration_ms,
        }
    }
}

/// Bounded pool of execution slots
///
/// At most `concurrency` handlers hold a slot at once. A slot is an owned
/// semaphore permit, released when the permit is dropped.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    /// Create a pool with `concurrency` slots
    pub fn new(concurrency: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Total number of slots
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.concurrency.saturating_sub(self.available())
    }

    /// Take a free slot without waiting
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Run one attempt of a job.
    ///
    /// The handler runs on its own task so that a panic is reported as a
    /// failure. When `timeout` elapses first the task is aborted and the
    /// attempt fails with `TimeoutError`.
    pub async fn execute(
        &self,
        handler: Arc<dyn DynHandler>,
        payload: Value,
        context: HandlerContext,
        timeout: Option<Duration>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let job_id = context.job_id.clone();
        let job_type = context.job_type.clone();

        debug!("Executing job {} of type {}", job_id, job_type);
        let mut task = tokio::spawn(async move { handler.call(payload, context).await });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    warn!("Job {} timed out after {}ms", job_id, limit.as_millis());
                    return ExecutionOutcome::Failure {
                        error: QmlError::TimeoutError {
                            operation: format!("{} after {}ms", job_type, limit.as_millis()),
                        },
                        duration_ms: elapsed_ms(started),
                    };
                }
            },
            None => task.await,
        };

        let duration_ms = elapsed_ms(started);
        match joined {
            Ok(Ok(result)) => ExecutionOutcome::Success {
                result,
                duration_ms,
            },
            Ok(Err(error)) => ExecutionOutcome::Failure {
                error: into_attempt_error(error),
                duration_ms,
            },
            Err(join_error) if join_error.is_panic() => ExecutionOutcome::Failure {
                error: QmlError::handler(format!(
                    "handler panicked: {}",
                    panic_message(join_error.into_panic())
                )),
                duration_ms,
            },
            Err(_) => ExecutionOutcome::Failure {
                error: QmlError::handler("handler task was cancelled"),
                duration_ms,
            },
        }
    }
}

/// Handler errors keep their kind when it decides retry behaviour; anything
/// else counts as a plain handler failure.
fn into_attempt_error(error: QmlError) -> QmlError {
    match error {
        QmlError::HandlerError { .. }
        | QmlError::TimeoutError { .. }
        | QmlError::ValidationError { .. } => error,
        other => QmlError::handler(other.to_string()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

//! Job definition and submission options.
//!
//! This module contains the core [`Job`] record that the store keeps for every
//! submitted unit of work, and the [`JobOptions`] accepted by `add()`.
//!
//! ## Job Lifecycle
//!
//! ```text
//! add() → Pending → Active → Completed
//!            ↑         ↓
//!         Retrying ←───┤
//!                      ↓
//!                    Failed
//! ```
//!
//! ## Examples
//!
//! ### Basic Job Creation
//! ```rust
//! use qml_queue::{Job, JobStatus};
//! use serde_json::json;
//!
//! let job = Job::new("email:send", json!({ "to": "buyer@example.com" }));
//!
//! assert_eq!(job.status, JobStatus::Pending);
//! assert_eq!(job.priority, 0);
//! assert_eq!(job.max_attempts, 3);
//! assert_eq!(job.attempts_made, 0);
//! ```
//!
//! ### Submission Options
//! ```rust
//! use qml_queue::{Backoff, Job, JobOptions};
//! use serde_json::json;
//!
//! let options = JobOptions::new()
//!     .priority(5)
//!     .delay_ms(250)
//!     .max_attempts(5)
//!     .backoff(Backoff::fixed(100));
//!
//! let job = Job::with_options("inventory:update", json!({ "sku": "A-1" }), &options).unwrap();
//! assert_eq!(job.priority, 5);
//! assert_eq!(job.max_attempts, 5);
//! assert!(job.not_before > job.created_at);
//! ```

use crate::core::JobStatus;
use crate::error::{QmlError, Result};
use crate::processing::retry::Backoff;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default number of attempts for a job when none is given.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Options accepted by `add()`.
///
/// Every field is optional; unset fields fall back to the queue defaults.
/// Deserializable so the HTTP boundary can accept them as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Dispatch priority, higher first. Must be non-negative. Default `0`.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Delay before the job becomes eligible, in milliseconds. Must be non-negative.
    #[serde(default)]
    pub delay_ms: Option<i64>,
    /// Maximum handler invocations. Must be at least 1.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Backoff applied between attempts.
    #[serde(default)]
    pub backoff: Option<Backoff>,
    /// Per-attempt timeout in milliseconds. Must be at least 1.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl JobOptions {
    /// Create empty options (all defaults)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the initial delay
    pub fn delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Set the maximum number of attempts
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the backoff policy
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set the per-attempt timeout
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Fill unset attempt and backoff settings from queue-level defaults.
    pub fn or_defaults(mut self, max_attempts: u32, backoff: Backoff) -> Self {
        self.max_attempts.get_or_insert(max_attempts);
        self.backoff.get_or_insert(backoff);
        self
    }

    /// Check that every provided value is in range.
    pub fn validate(&self) -> Result<()> {
        if let Some(priority) = self.priority {
            if priority < 0 {
                return Err(QmlError::validation(format!(
                    "priority must be non-negative, got {}",
                    priority
                )));
            }
        }

        if let Some(delay_ms) = self.delay_ms {
            if delay_ms < 0 {
                return Err(QmlError::validation(format!(
                    "delayMs must be non-negative, got {}",
                    delay_ms
                )));
            }
        }

        if self.max_attempts == Some(0) {
            return Err(QmlError::validation("maxAttempts must be at least 1"));
        }

        if self.timeout_ms == Some(0) {
            return Err(QmlError::validation("timeoutMs must be at least 1"));
        }

        Ok(())
    }
}

/// A unit of deferred work with its scheduling metadata.
///
/// The store owns the authoritative copy; everything handed out by the queue
/// (`get_job`, `list_jobs`, `wait_for`) is a snapshot clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier (UUID v4), immutable
    pub id: String,

    /// Job type selecting the handler, e.g. `"email:send"`
    #[serde(rename = "type")]
    pub job_type: String,

    /// Payload passed to the handler after decoding into its payload type
    pub payload: Value,

    /// Dispatch priority, higher first
    pub priority: i32,

    /// The job is not eligible for dispatch before this instant
    pub not_before: DateTime<Utc>,

    /// Maximum number of handler invocations
    pub max_attempts: u32,

    /// Handler invocations started so far
    pub attempts_made: u32,

    /// Delay policy between attempts
    pub backoff: Backoff,

    /// Per-attempt timeout override in milliseconds
    pub timeout_ms: Option<u64>,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Message of the last captured failure
    pub last_error: Option<String>,

    /// Value returned by the handler on success
    pub result: Option<Value>,

    /// Set when `cancel()` was called while the job was active
    pub cancel_requested: bool,

    /// When the job was submitted
    pub created_at: DateTime<Utc>,

    /// When the most recent attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Insertion order, refreshed on every (re)entry into the pending set
    #[serde(skip)]
    pub(crate) sequence: u64,
}

impl Job {
    /// Creates a new pending job with default options.
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            payload,
            priority: 0,
            not_before: now,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempts_made: 0,
            backoff: Backoff::default(),
            timeout_ms: None,
            status: JobStatus::Pending,
            last_error: None,
            result: None,
            cancel_requested: false,
            created_at: now,
            started_at: None,
            finished_at: None,
            sequence: 0,
        }
    }

    /// Creates a new pending job from validated submission options.
    ///
    /// Fails with `ValidationError` on an empty type or out-of-range option.
    pub fn with_options(
        job_type: impl Into<String>,
        payload: Value,
        options: &JobOptions,
    ) -> Result<Self> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(QmlError::validation("job type must not be empty"));
        }
        options.validate()?;

        let mut job = Self::new(job_type, payload);
        job.priority = options.priority.unwrap_or(0);
        job.max_attempts = options.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        job.backoff = options.backoff.clone().unwrap_or_default();
        job.timeout_ms = options.timeout_ms;
        if let Some(delay_ms) = options.delay_ms {
            job.not_before = job
                .created_at
                .checked_add_signed(Duration::milliseconds(delay_ms))
                .ok_or_else(|| QmlError::validation(format!("delay of {}ms is too large", delay_ms)))?;
        }

        Ok(job)
    }

    /// Updates the job's status and validates the transition.
    pub fn set_status(&mut self, status: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(QmlError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        self.status = status;
        Ok(())
    }

    /// Whether another attempt is allowed after the current one.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Duration of the last attempt, once the job has a finish time.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => {
                Some(finished.signed_duration_since(started).num_milliseconds().max(0) as u64)
            }
            _ => None,
        }
    }

    /// Serializes the job to a JSON string.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| QmlError::SerializationError {
            message: format!("Failed to serialize job: {}", e),
        })
    }

    /// Deserializes a job from a JSON string.
    pub fn deserialize(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| QmlError::SerializationError {
            message: format!("Failed to deserialize job: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_options_rejects_empty_type() {
        let result = Job::with_options("  ", json!({}), &JobOptions::new());
        assert!(matches!(result, Err(QmlError::ValidationError { .. })));
    }

    #[test]
    fn test_with_options_rejects_out_of_range_values() {
        for options in [
            JobOptions::new().priority(-1),
            JobOptions::new().delay_ms(-5),
            JobOptions::new().max_attempts(0),
            JobOptions::new().timeout_ms(0),
        ] {
            let result = Job::with_options("email:send", json!({}), &options);
            assert!(
                matches!(result, Err(QmlError::ValidationError { .. })),
                "{:?} should be rejected",
                options
            );
        }
    }

    #[test]
    fn test_or_defaults_keeps_explicit_values() {
        let options = JobOptions::new()
            .max_attempts(7)
            .or_defaults(2, Backoff::fixed(10));
        assert_eq!(options.max_attempts, Some(7));
        assert_eq!(options.backoff, Some(Backoff::fixed(10)));
    }

    #[test]
    fn test_set_status_follows_state_machine() {
        let mut job = Job::new("order:process", json!({}));
        assert!(job.set_status(JobStatus::Completed).is_err());
        job.set_status(JobStatus::Active).unwrap();
        job.set_status(JobStatus::Retrying).unwrap();
        job.set_status(JobStatus::Pending).unwrap();
        job.set_status(JobStatus::Active).unwrap();
        job.set_status(JobStatus::Completed).unwrap();
        assert!(job.set_status(JobStatus::Pending).is_err());
    }

    #[test]
    fn test_options_deserialize_from_camel_case() {
        let options: JobOptions =
            serde_json::from_value(json!({ "priority": 3, "delayMs": 100, "maxAttempts": 2 }))
                .unwrap();
        assert_eq!(options.priority, Some(3));
        assert_eq!(options.delay_ms, Some(100));
        assert_eq!(options.max_attempts, Some(2));
    }
}

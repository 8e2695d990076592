//! Job status management.
//!
//! This module defines the states a job moves through between `add()` and its
//! terminal outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the lifecycle status of a job.
///
/// ```text
/// Pending → Active → Completed
///    ↑         ↓
///    └─ Retrying ← (failure with attempts left)
///              ↓
///           Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the pending set for its `not_before` instant and a free slot
    Pending,
    /// Handler is executing in a worker slot
    Active,
    /// Last attempt failed; waiting for the backoff delay before re-entering the pending set
    Retrying,
    /// Handler finished without error
    Completed,
    /// Attempts exhausted, or no handler registered for the job type
    Failed,
}

impl JobStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Active,
        JobStatus::Retrying,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Returns the name of the status as a lowercase string.
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses a status name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "active" => Some(JobStatus::Active),
            "retrying" => Some(JobStatus::Retrying),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Checks if the job is in a terminal state (completed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Checks if this status can transition to the given target status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Active)
                | (Active, Completed)
                | (Active, Retrying)
                | (Active, Failed)
                | (Retrying, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

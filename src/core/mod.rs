//! Core types for the job queue.
//!
//! This module contains the job record, submission options and status
//! state machine.

pub mod job;
pub mod job_state;

pub use job::{Job, JobOptions, DEFAULT_MAX_ATTEMPTS};
pub use job_state::JobStatus;

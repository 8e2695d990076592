use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Job, JobOptions, JobStatus};
use crate::error::QmlError;
use crate::processing::{JobQueue, QueueStats};
use crate::storage::CancelOutcome;

/// Default page size for job listings
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total_jobs: usize,
    pub pending: usize,
    pub active: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
}

impl From<QueueStats> for JobStatistics {
    fn from(stats: QueueStats) -> Self {
        Self {
            total_jobs: stats.total(),
            pending: stats.pending,
            active: stats.active,
            retrying: stats.retrying,
            completed: stats.completed,
            failed: stats.failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
    pub result: Option<Value>,
    pub cancel_requested: bool,
    pub duration_ms: Option<u64>,
}

impl From<Job> for JobDetails {
    fn from(job: Job) -> Self {
        let duration_ms = job.duration_ms();
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            priority: job.priority,
            payload: job.payload,
            created_at: job.created_at,
            not_before: job.not_before,
            started_at: job.started_at,
            finished_at: job.finished_at,
            attempts: job.attempts_made,
            max_attempts: job.max_attempts,
            error_message: job.last_error,
            result: job.result,
            cancel_requested: job.cancel_requested,
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatistics {
    pub queue_name: String,
    pub running: bool,
    pub concurrency: usize,
    pub job_types: Vec<String>,
    pub jobs: JobStatistics,
    pub recent_jobs: Vec<JobDetails>,
}

/// Result of a cancellation request made over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResult {
    pub job_id: String,
    /// True when the job was removed before it ran
    pub cancelled: bool,
    /// True when the job is running and was only flagged
    pub advisory: bool,
}

/// Read and write access to a queue for the HTTP boundary
#[derive(Clone)]
pub struct DashboardService {
    queue: JobQueue,
}

impl DashboardService {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Live job counts
    pub fn get_job_statistics(&self) -> JobStatistics {
        self.queue.get_stats().into()
    }

    /// Jobs, newest first, optionally filtered by status
    pub fn get_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<JobDetails> {
        self.queue
            .list_jobs(status, Some(limit.unwrap_or(DEFAULT_PAGE_SIZE)), offset)
            .into_iter()
            .map(JobDetails::from)
            .collect()
    }

    /// Get detailed job information by ID
    pub fn get_job_details(&self, job_id: &str) -> Option<JobDetails> {
        self.queue.get_job(job_id).map(JobDetails::from)
    }

    /// Cancel a job; `JobNotFound` when there is no such job, an
    /// `InvalidStateTransition` when it already finished
    pub fn cancel_job(&self, job_id: &str) -> Result<CancelResult, QmlError> {
        let (cancelled, advisory) = match self.queue.try_cancel(job_id) {
            CancelOutcome::Removed => (true, false),
            CancelOutcome::Advisory => (false, true),
            CancelOutcome::NotFound => {
                return Err(QmlError::JobNotFound {
                    job_id: job_id.to_string(),
                })
            }
            CancelOutcome::Finished => {
                let from = self
                    .queue
                    .get_job(job_id)
                    .map(|job| job.status.to_string())
                    .unwrap_or_else(|| "finished".to_string());
                return Err(QmlError::InvalidStateTransition {
                    from,
                    to: "cancelled".to_string(),
                });
            }
        };

        Ok(CancelResult {
            job_id: job_id.to_string(),
            cancelled,
            advisory,
        })
    }

    /// Submit a job of a fixed type
    pub fn submit(
        &self,
        job_type: &str,
        payload: Value,
        options: Option<JobOptions>,
    ) -> Result<String, QmlError> {
        self.queue
            .add(job_type, payload, options.unwrap_or_default())
    }

    /// Get comprehensive server statistics
    pub fn get_server_statistics(&self) -> ServerStatistics {
        ServerStatistics {
            queue_name: self.queue.config().name.clone(),
            running: self.queue.is_running(),
            concurrency: self.queue.config().concurrency,
            job_types: self.queue.job_types(),
            jobs: self.get_job_statistics(),
            recent_jobs: self.get_jobs(None, Some(20), None),
        }
    }
}

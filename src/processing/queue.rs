//! The job queue facade
//!
//! [`JobQueue`] is the public surface of the engine. It owns the job store,
//! handler registry, worker pool and event bus, and runs the scheduler task
//! between `start()` and `shutdown()`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::events::{EventBus, JobEvent, JobEventKind, QueueStats, Subscription};
use super::retry::Backoff;
use super::scheduler::Scheduler;
use super::worker::{HandlerContext, WorkerPool};
use super::{HandlerRegistry, JobHandler};
use crate::core::{Job, JobOptions, JobStatus, DEFAULT_MAX_ATTEMPTS};
use crate::error::{QmlError, Result};
use crate::storage::{CancelOutcome, JobStore, StoreConfig};

/// Configuration for a job queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used in logs
    pub name: String,
    /// Maximum number of handlers running at once
    pub concurrency: usize,
    /// Timeout applied to jobs submitted without `timeout_ms`
    pub job_timeout: Option<Duration>,
    /// Attempts for jobs submitted without `max_attempts`
    pub default_max_attempts: u32,
    /// Backoff for jobs submitted without one
    pub default_backoff: Backoff,
    /// Job store limits
    pub store: StoreConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "qml-queue".to_string(),
            concurrency: 5,
            job_timeout: None,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            default_backoff: Backoff::default(),
            store: StoreConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Create a new queue configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the concurrency limit
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the default job timeout
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Set the default number of attempts
    pub fn default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Set the default backoff
    pub fn default_backoff(mut self, backoff: Backoff) -> Self {
        self.default_backoff = backoff;
        self
    }

    /// Set the store configuration
    pub fn store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Reject backpressure beyond `max_pending` waiting jobs
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.store.max_pending = Some(max_pending);
        self
    }

    /// Check the configuration for values the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(QmlError::ConfigurationError {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        if self.default_max_attempts == 0 {
            return Err(QmlError::ConfigurationError {
                message: "default_max_attempts must be at least 1".to_string(),
            });
        }
        if self.job_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(QmlError::ConfigurationError {
                message: "job_timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// State guarded by the queue's single store lock
pub(crate) struct QueueState {
    pub(crate) store: JobStore,
    /// Cancellation tokens of jobs currently executing
    pub(crate) running: HashMap<String, CancellationToken>,
    /// A ready job may have a type with no registered handler
    pub(crate) unhandled_ready: bool,
}

/// Everything shared between the facade, the scheduler and running executions
pub(crate) struct QueueShared {
    pub(crate) config: QueueConfig,
    state: Mutex<QueueState>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) pool: WorkerPool,
    pub(crate) events: EventBus,
    /// Wakes the scheduler after anything that may allow a dispatch
    pub(crate) wake: Notify,
    /// Wakes `wait_for` and `wait_idle` callers when a job is removed without an event
    pub(crate) removed: Notify,
    pub(crate) executions: TaskTracker,
}

impl QueueShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RunningScheduler {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// In-process background job queue
///
/// Cloning is cheap; every clone drives the same queue.
///
/// ```rust,no_run
/// use qml_queue::{JobOptions, JobQueue, QueueConfig};
/// use serde_json::json;
///
/// # async fn run() -> qml_queue::Result<()> {
/// let queue = JobQueue::new(QueueConfig::new("commerce").concurrency(2))?;
/// queue.register_fn("email:send", |payload: serde_json::Value, _ctx| async move {
///     println!("sending {}", payload);
///     Ok(None)
/// });
/// queue.start().await?;
///
/// let id = queue.add("email:send", json!({ "to": "buyer@example.com" }), JobOptions::new().priority(5))?;
/// let job = queue.wait_for(&id).await;
/// assert!(job.is_some());
///
/// queue.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<QueueShared>,
    scheduler: Arc<Mutex<Option<RunningScheduler>>>,
}

impl JobQueue {
    /// Create a stopped queue
    pub fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;

        let shared = QueueShared {
            state: Mutex::new(QueueState {
                store: JobStore::with_config(config.store.clone()),
                running: HashMap::new(),
                unhandled_ready: false,
            }),
            registry: HandlerRegistry::new(),
            pool: WorkerPool::new(config.concurrency),
            events: EventBus::new(),
            wake: Notify::new(),
            removed: Notify::new(),
            executions: TaskTracker::new(),
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
            scheduler: Arc::new(Mutex::new(None)),
        })
    }

    /// Start dispatching jobs
    pub async fn start(&self) -> Result<()> {
        let mut scheduler = self.lock_scheduler();
        if scheduler.is_some() {
            return Err(QmlError::ConfigurationError {
                message: format!("Queue '{}' is already running", self.shared.config.name),
            });
        }

        let shutdown = CancellationToken::new();
        self.shared.executions.reopen();
        let handle = tokio::spawn(Scheduler::new(Arc::clone(&self.shared)).run(shutdown.clone()));
        *scheduler = Some(RunningScheduler { shutdown, handle });

        info!(
            "Queue '{}' started with concurrency {}",
            self.shared.config.name, self.shared.config.concurrency
        );
        Ok(())
    }

    /// Stop dispatching and wait for running handlers to finish.
    ///
    /// Jobs still waiting stay in the store and are dispatched again after
    /// the next `start()`.
    pub async fn shutdown(&self) -> Result<()> {
        let running = self.lock_scheduler().take();
        let Some(running) = running else {
            return Ok(());
        };

        info!("Stopping queue '{}'", self.shared.config.name);
        running.shutdown.cancel();
        if let Err(e) = running.handle.await {
            error!("Scheduler task ended abnormally: {}", e);
        }

        self.shared.executions.close();
        self.shared.executions.wait().await;

        info!("Queue '{}' stopped", self.shared.config.name);
        Ok(())
    }

    /// Whether the scheduler is running
    pub fn is_running(&self) -> bool {
        self.lock_scheduler().is_some()
    }

    /// Submit a job.
    ///
    /// Returns the new job's id. Fails with `ValidationError` on bad options or
    /// a payload the registered handler cannot decode, and with `QueueFull`
    /// when the waiting set is at capacity. Nothing is stored on failure.
    pub fn add<P>(&self, job_type: &str, payload: P, options: JobOptions) -> Result<String>
    where
        P: Serialize,
    {
        let payload = serde_json::to_value(payload)
            .map_err(|e| QmlError::validation(format!("payload is not serializable: {}", e)))?;
        let options = options.or_defaults(
            self.shared.config.default_max_attempts,
            self.shared.config.default_backoff.clone(),
        );
        let job = Job::with_options(job_type, payload, &options)?;
        self.shared
            .registry
            .validate_payload(&job.job_type, &job.payload)?;

        let event = JobEvent::Added {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            priority: job.priority,
        };
        let job_id = job.id.clone();
        let unhandled = !self.shared.registry.contains(&job.job_type);

        {
            let mut state = self.shared.lock_state();
            state.store.evict_finished(Utc::now());
            state.store.insert_parked(job)?;
        }

        debug!("Added job {} of type {}", job_id, job_type);
        self.shared.events.emit(&event);

        // Dispatchable only after `job:added` is out
        {
            let mut state = self.shared.lock_state();
            if state.store.release(&job_id) {
                state.unhandled_ready |= unhandled;
            }
        }
        self.shared.wake.notify_one();

        Ok(job_id)
    }

    /// Submit a job with default options
    pub fn add_default<P>(&self, job_type: &str, payload: P) -> Result<String>
    where
        P: Serialize,
    {
        self.add(job_type, payload, JobOptions::default())
    }

    /// Cancel a job.
    ///
    /// Pending and retrying jobs are removed and `true` is returned. For an
    /// active job cancellation is advisory: the job is flagged, its handler's
    /// context reports `is_cancelled()`, and `false` is returned. Finished or
    /// unknown jobs return `false`.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.try_cancel(job_id) == CancelOutcome::Removed
    }

    /// Cancel a job and report what happened to it
    pub fn try_cancel(&self, job_id: &str) -> CancelOutcome {
        let (outcome, token) = {
            let mut state = self.shared.lock_state();
            let outcome = state.store.cancel(job_id);
            let token = match outcome {
                CancelOutcome::Advisory => state.running.get(job_id).cloned(),
                _ => None,
            };
            (outcome, token)
        };

        match outcome {
            CancelOutcome::Removed => {
                info!("Cancelled job {}", job_id);
                self.shared.removed.notify_waiters();
                // The earliest delayed deadline may have changed
                self.shared.wake.notify_one();
            }
            CancelOutcome::Advisory => {
                info!("Cancellation requested for active job {}", job_id);
                if let Some(token) = token {
                    token.cancel();
                }
            }
            CancelOutcome::Finished | CancelOutcome::NotFound => {
                debug!("Nothing to cancel for job {}: {:?}", job_id, outcome);
            }
        }

        outcome
    }

    /// Register the handler for a job type, replacing any previous one
    pub fn register_handler<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler,
    {
        self.shared.registry.register(job_type, handler);
    }

    /// Register an async closure as the handler for a job type
    pub fn register_fn<P, F, Fut>(&self, job_type: impl Into<String>, f: F)
    where
        P: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(P, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.shared.registry.register_fn(job_type, f);
    }

    /// Live counts of jobs by status
    pub fn get_stats(&self) -> QueueStats {
        self.shared.lock_state().store.counts()
    }

    /// Snapshot of one job
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.shared.lock_state().store.get(job_id).cloned()
    }

    /// Snapshots of jobs, newest first, optionally filtered by status
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<Job> {
        self.shared.lock_state().store.list(status, limit, offset)
    }

    /// Registered job types
    pub fn job_types(&self) -> Vec<String> {
        self.shared.registry.job_types()
    }

    /// Register a callback for one event kind
    pub fn subscribe<F>(&self, kind: JobEventKind, callback: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, callback)
    }

    /// Register a callback for every event kind
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe_all(callback)
    }

    /// Stream of every event emitted after this call
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.receiver()
    }

    /// Wait until a job reaches `completed` or `failed`.
    ///
    /// Returns `None` if the job does not exist or is removed while waiting.
    pub async fn wait_for(&self, job_id: &str) -> Option<Job> {
        let mut receiver = self.events();

        loop {
            let removed = self.shared.removed.notified();
            tokio::pin!(removed);
            removed.as_mut().enable();

            match self.get_job(job_id) {
                None => return None,
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) => {}
            }

            tokio::select! {
                received = receiver.recv() => {
                    if let Err(RecvError::Closed) = received {
                        return self.get_job(job_id);
                    }
                }
                _ = &mut removed => {}
            }
        }
    }

    /// Wait until no job is pending, active or retrying
    pub async fn wait_idle(&self) {
        let mut receiver = self.events();

        loop {
            // Cancelled jobs leave without an event
            let removed = self.shared.removed.notified();
            tokio::pin!(removed);
            removed.as_mut().enable();

            if self.get_stats().in_flight() == 0 {
                return;
            }

            tokio::select! {
                received = receiver.recv() => {
                    if let Err(RecvError::Closed) = received {
                        return;
                    }
                }
                _ = &mut removed => {}
            }
        }
    }

    /// Apply the finished-job retention policy now. Returns the number of
    /// evicted jobs.
    pub fn purge_finished(&self) -> usize {
        let evicted = self.shared.lock_state().store.evict_finished(Utc::now());
        if evicted > 0 {
            debug!("Purged {} finished jobs", evicted);
            self.shared.removed.notify_waiters();
        }
        evicted
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<RunningScheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

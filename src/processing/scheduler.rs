//! Event-driven dispatch loop
//!
//! The scheduler is a single task that sleeps until something can change the
//! dispatch decision: a job was added or cancelled, a slot was released, or the
//! earliest delayed job became due. It never polls.

use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::JobEvent;
use super::queue::{QueueShared, QueueState};
use super::retry::{next_delay, should_retry};
use super::worker::{ExecutionOutcome, HandlerContext};
use super::DynHandler;
use crate::core::Job;
use crate::error::QmlError;

/// A job claimed for execution together with the slot it runs in
struct Dispatch {
    job: Job,
    handler: Arc<dyn DynHandler>,
    permit: OwnedSemaphorePermit,
    cancellation: CancellationToken,
}

pub(crate) struct Scheduler {
    shared: Arc<QueueShared>,
}

impl Scheduler {
    pub(crate) fn new(shared: Arc<QueueShared>) -> Self {
        Self { shared }
    }

    /// Run until `shutdown` is cancelled
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting scheduler for queue '{}' with {} slots",
            self.shared.config.name, self.shared.config.concurrency
        );

        loop {
            let next_wake = self.tick();

            let delayed = async {
                match next_wake {
                    Some(at) => sleep_until(at).await,
                    None => future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.shared.wake.notified() => {}
                _ = delayed => debug!("Delayed job became due"),
            }
        }

        info!("Scheduler for queue '{}' stopped", self.shared.config.name);
    }

    /// One dispatch pass.
    ///
    /// Promotes due delayed jobs, then claims ready jobs in priority order
    /// while slots are free. Jobs whose type has no handler are failed even when
    /// every slot is busy. Returns when the next delayed job becomes due.
    pub(crate) fn tick(&self) -> Option<Instant> {
        let mut events = Vec::new();
        let mut dispatches = Vec::new();

        let next_wake = {
            let mut state = self.shared.lock_state();
            let promoted = state.store.promote_due(Instant::now());
            if !promoted.is_empty() {
                debug!("Promoted {} delayed jobs", promoted.len());
                let registry = &self.shared.registry;
                let store = &state.store;
                if promoted.iter().any(|id| {
                    store
                        .get(id)
                        .is_some_and(|job| !registry.contains(&job.job_type))
                }) {
                    state.unhandled_ready = true;
                }
            }

            while self.shared.pool.available() > 0 {
                let Some(job_id) = state.store.pop_ready() else {
                    break;
                };
                let Some(job_type) = state.store.get(&job_id).map(|job| job.job_type.clone()) else {
                    continue;
                };

                let Some(handler) = self.shared.registry.lookup(&job_type) else {
                    events.extend(fail_unhandled(&mut state, job_id, job_type));
                    continue;
                };

                let Some(permit) = self.shared.pool.try_acquire() else {
                    state.store.requeue_ready(&job_id);
                    break;
                };

                let job = match state.store.mark_active(&job_id) {
                    Ok(job) => job,
                    Err(e) => {
                        error!("Failed to start job {}: {}", job_id, e);
                        continue;
                    }
                };

                let cancellation = CancellationToken::new();
                state.running.insert(job_id.clone(), cancellation.clone());
                events.push(JobEvent::Started {
                    job_id,
                    job_type,
                    attempt: job.attempts_made,
                });
                dispatches.push(Dispatch {
                    job,
                    handler,
                    permit,
                    cancellation,
                });
            }

            if state.unhandled_ready {
                state.unhandled_ready = false;
                let registry = &self.shared.registry;
                let orphans = state
                    .store
                    .take_ready_where(|job| !registry.contains(&job.job_type));
                for job_id in orphans {
                    let job_type = state
                        .store
                        .get(&job_id)
                        .map(|job| job.job_type.clone())
                        .unwrap_or_default();
                    events.extend(fail_unhandled(&mut state, job_id, job_type));
                }
            }

            state.store.next_wake()
        };

        for event in &events {
            self.shared.events.emit(event);
        }
        for dispatch in dispatches {
            self.spawn_execution(dispatch);
        }

        next_wake
    }

    fn spawn_execution(&self, dispatch: Dispatch) {
        let shared = Arc::clone(&self.shared);

        self.shared.executions.spawn(async move {
            let Dispatch {
                job,
                handler,
                permit,
                cancellation,
            } = dispatch;

            debug!(
                "Job {} attempt {}/{} started",
                job.id, job.attempts_made, job.max_attempts
            );

            let context = HandlerContext::new(&job, cancellation);
            let timeout = job
                .timeout_ms
                .map(Duration::from_millis)
                .or(shared.config.job_timeout);
            let outcome = shared
                .pool
                .execute(handler, job.payload.clone(), context, timeout)
                .await;

            record_outcome(&shared, &job, outcome);

            // The slot stays held until the job has left Active
            drop(permit);
            shared.wake.notify_one();
        });
    }
}

/// Apply the result of an attempt to the store and report it
fn record_outcome(shared: &QueueShared, job: &Job, outcome: ExecutionOutcome) {
    let mut retry_after = None;
    let event = {
        let mut state = shared.lock_state();
        state.running.remove(&job.id);

        let event = match outcome {
            ExecutionOutcome::Success {
                result,
                duration_ms,
            } => match state.store.complete(&job.id, result) {
                Ok(done) => {
                    info!(
                        "Job {} completed successfully in {}ms",
                        job.id, duration_ms
                    );
                    Some(JobEvent::Completed {
                        job_id: done.id,
                        job_type: done.job_type,
                        duration_ms,
                        attempts: done.attempts_made,
                    })
                }
                Err(e) => {
                    error!("Failed to complete job {}: {}", job.id, e);
                    None
                }
            },
            ExecutionOutcome::Failure { error, duration_ms } => {
                let will_retry =
                    error.is_retryable() && should_retry(job.attempts_made, job.max_attempts);
                let message = error.to_string();

                let applied = if will_retry {
                    let delay = next_delay(job.attempts_made, &job.backoff);
                    warn!(
                        "Job {} failed on attempt {}/{}, retrying in {}ms: {}",
                        job.id,
                        job.attempts_made,
                        job.max_attempts,
                        delay.as_millis(),
                        message
                    );
                    retry_after = Some(delay);
                    state.store.retry(&job.id, message.clone())
                } else {
                    error!(
                        "Job {} failed after {} attempts: {}",
                        job.id, job.attempts_made, message
                    );
                    state.store.fail(&job.id, message.clone())
                };

                match applied {
                    Ok(updated) => Some(JobEvent::Failed {
                        job_id: updated.id,
                        job_type: updated.job_type,
                        error: message,
                        duration_ms,
                        attempts: updated.attempts_made,
                        will_retry,
                    }),
                    Err(e) => {
                        error!("Failed to record failure of job {}: {}", job.id, e);
                        None
                    }
                }
            }
        };

        state.store.evict_finished(chrono::Utc::now());
        event
    };

    if let Some(event) = event {
        shared.events.emit(&event);
    }

    // Parked only now so the next attempt cannot start before `job:failed` is out
    if let Some(delay) = retry_after {
        if !shared.lock_state().store.schedule_retry(&job.id, delay) {
            debug!("Job {} left the queue before its retry was scheduled", job.id);
        }
    }
}

/// Fail a ready job whose type has no registered handler, without an attempt
fn fail_unhandled(state: &mut QueueState, job_id: String, job_type: String) -> Option<JobEvent> {
    let error = QmlError::UnknownJobType {
        job_type: job_type.clone(),
    };

    match state.store.fail_without_attempt(&job_id, error.to_string()) {
        Ok(job) => {
            error!("Job {} failed: {}", job_id, error);
            Some(JobEvent::Failed {
                job_id,
                job_type,
                error: error.to_string(),
                duration_ms: 0,
                attempts: job.attempts_made,
                will_retry: false,
            })
        }
        Err(e) => {
            error!("Failed to mark job {} as failed: {}", job_id, e);
            None
        }
    }
}

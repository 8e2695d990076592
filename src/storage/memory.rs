use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use super::{StorageError, StoreConfig};
use crate::core::{Job, JobStatus};
use crate::processing::events::QueueStats;

/// Heap entry for a job that is eligible now.
///
/// Max-heap order: higher priority, then earlier `not_before`, then lower sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    not_before: DateTime<Utc>,
    sequence: u64,
    job_id: String,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.not_before.cmp(&self.not_before))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap entry for a pending job with a future `not_before`, or a retrying job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedEntry {
    ready_at: Instant,
    sequence: u64,
    job_id: String,
}

/// Result of a cancellation request against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was waiting and has been removed
    Removed,
    /// The job is executing; it was flagged but keeps running
    Advisory,
    /// The job already finished
    Finished,
    /// No job with that id
    NotFound,
}

/// In-memory job store
///
/// Holds every job record with an index by id and by status, plus two heaps
/// that decide dispatch order. Heap entries are invalidated lazily: each entry
/// carries the sequence number the job had when it was pushed, and entries whose
/// sequence no longer matches the record are skipped.
///
/// The store does no locking of its own; the queue keeps it behind a single
/// mutex so every mutation is applied atomically.
#[derive(Debug)]
pub struct JobStore {
    jobs: HashMap<String, Job>,
    by_status: HashMap<JobStatus, HashSet<String>>,
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    finished: VecDeque<(String, DateTime<Utc>)>,
    next_sequence: u64,
    config: StoreConfig,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    /// Create a new store with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a new store with the specified configuration
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            jobs: HashMap::new(),
            by_status: HashMap::new(),
            ready: BinaryHeap::new(),
            delayed: BinaryHeap::new(),
            finished: VecDeque::new(),
            next_sequence: 0,
            config,
        }
    }

    /// Store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the number of jobs currently stored
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs with the given status
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).map_or(0, HashSet::len)
    }

    /// Live counts per status
    pub fn counts(&self) -> QueueStats {
        QueueStats {
            pending: self.count(JobStatus::Pending),
            active: self.count(JobStatus::Active),
            retrying: self.count(JobStatus::Retrying),
            completed: self.count(JobStatus::Completed),
            failed: self.count(JobStatus::Failed),
        }
    }

    /// Jobs waiting for dispatch, including those waiting out a retry delay
    pub fn waiting_len(&self) -> usize {
        self.count(JobStatus::Pending) + self.count(JobStatus::Retrying)
    }

    /// Get a job by id
    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Ids of all jobs with the given status
    pub fn ids_with_status(&self, status: JobStatus) -> Vec<String> {
        self.by_status
            .get(&status)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// List jobs, newest first, optionally filtered by status
    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<Job> {
        let mut jobs: Vec<&Job> = match status {
            Some(status) => self
                .by_status
                .get(&status)
                .map(|ids| ids.iter().filter_map(|id| self.jobs.get(id)).collect())
                .unwrap_or_default(),
            None => self.jobs.values().collect(),
        };

        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });

        jobs.into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Insert a new pending job.
    ///
    /// Fails with `CapacityExceeded` when `max_pending` waiting jobs are already stored.
    pub fn insert(&mut self, job: Job) -> Result<(), StorageError> {
        let job_id = job.id.clone();
        self.insert_parked(job)?;
        self.release(&job_id);
        Ok(())
    }

    /// Store a new pending job without making it dispatchable.
    ///
    /// The job counts as pending and can be cancelled, but is not handed out by
    /// [`JobStore::pop_ready`] until [`JobStore::release`] is called.
    pub fn insert_parked(&mut self, mut job: Job) -> Result<(), StorageError> {
        if let Some(capacity) = self.config.max_pending {
            if self.waiting_len() >= capacity {
                return Err(StorageError::capacity_exceeded(capacity));
            }
        }

        if job.status != JobStatus::Pending {
            return Err(StorageError::InvalidStateTransition {
                job_id: job.id,
                from: "new".to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }

        job.sequence = self.take_sequence();
        self.index(&job.id, job.status);
        self.jobs.insert(job.id.clone(), job);

        Ok(())
    }

    /// Queue a parked job for dispatch at its `not_before` time.
    ///
    /// Returns false when the job is gone, e.g. cancelled before release.
    pub fn release(&mut self, job_id: &str) -> bool {
        let Some(job) = self.jobs.get(job_id) else {
            return false;
        };
        if job.status != JobStatus::Pending {
            return false;
        }

        let job = job.clone();
        let wait = until(job.not_before);
        if wait.is_zero() {
            self.push_ready(&job);
        } else {
            self.push_delayed(&job, wait);
        }
        true
    }

    /// Move every delayed job whose time has come into the ready heap.
    ///
    /// Retrying jobs transition back to `Pending` here. Returns the promoted ids.
    pub fn promote_due(&mut self, now: Instant) -> Vec<String> {
        let mut promoted = Vec::new();

        while let Some(Reverse(entry)) = self.delayed.peek() {
            if entry.ready_at > now {
                break;
            }
            let Some(Reverse(entry)) = self.delayed.pop() else {
                break;
            };

            let Some(job) = self.jobs.get_mut(&entry.job_id) else {
                continue;
            };
            if job.sequence != entry.sequence {
                continue;
            }

            match job.status {
                JobStatus::Pending => {}
                JobStatus::Retrying => {
                    job.status = JobStatus::Pending;
                    let id = job.id.clone();
                    self.reindex(&id, JobStatus::Retrying, JobStatus::Pending);
                }
                _ => continue,
            }

            if let Some(job) = self.jobs.get(&entry.job_id) {
                self.ready.push(ReadyEntry {
                    priority: job.priority,
                    not_before: job.not_before,
                    sequence: job.sequence,
                    job_id: job.id.clone(),
                });
                promoted.push(entry.job_id);
            }
        }

        promoted
    }

    /// When the earliest delayed job becomes due
    pub fn next_wake(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(entry)| entry.ready_at)
    }

    /// Pop the id of the next job to dispatch, skipping stale heap entries
    pub fn pop_ready(&mut self) -> Option<String> {
        while let Some(entry) = self.ready.pop() {
            match self.jobs.get(&entry.job_id) {
                Some(job) if job.sequence == entry.sequence && job.status == JobStatus::Pending => {
                    return Some(entry.job_id);
                }
                _ => continue,
            }
        }
        None
    }

    /// Put a popped job back at its place in the ready heap
    pub fn requeue_ready(&mut self, job_id: &str) {
        if let Some(job) = self.jobs.get(job_id) {
            if job.status == JobStatus::Pending {
                let entry = ReadyEntry {
                    priority: job.priority,
                    not_before: job.not_before,
                    sequence: job.sequence,
                    job_id: job.id.clone(),
                };
                self.ready.push(entry);
            }
        }
    }

    /// Remove every ready job matching `predicate` from the dispatch order and
    /// return their ids, highest priority first. Stale heap entries are dropped
    /// on the way.
    pub fn take_ready_where<F>(&mut self, predicate: F) -> Vec<String>
    where
        F: Fn(&Job) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = Vec::new();

        for entry in std::mem::take(&mut self.ready).into_vec() {
            match self.jobs.get(&entry.job_id) {
                Some(job) if job.sequence == entry.sequence && job.status == JobStatus::Pending => {
                    if predicate(job) {
                        taken.push(entry);
                    } else {
                        kept.push(entry);
                    }
                }
                _ => {}
            }
        }

        self.ready = BinaryHeap::from(kept);
        taken.sort_by(|a, b| b.cmp(a));
        taken.into_iter().map(|entry| entry.job_id).collect()
    }

    /// `Pending → Active`: start an attempt and return a snapshot of the job
    pub fn mark_active(&mut self, job_id: &str) -> Result<Job, StorageError> {
        let job = self.transition(job_id, JobStatus::Active)?;
        job.attempts_made += 1;
        job.started_at = Some(Utc::now());
        Ok(job.clone())
    }

    /// `Active → Completed`
    pub fn complete(&mut self, job_id: &str, result: Option<Value>) -> Result<Job, StorageError> {
        let job = self.transition(job_id, JobStatus::Completed)?;
        job.result = result;
        let snapshot = finish(job);
        self.finished.push_back((snapshot.id.clone(), Utc::now()));
        Ok(snapshot)
    }

    /// `Active → Retrying`: record the error.
    ///
    /// The job is not dispatchable again until [`JobStore::schedule_retry`]
    /// parks it in the delayed heap.
    pub fn retry(&mut self, job_id: &str, error: impl Into<String>) -> Result<Job, StorageError> {
        let job = self.transition(job_id, JobStatus::Retrying)?;
        job.last_error = Some(error.into());
        Ok(job.clone())
    }

    /// Make a retrying job due again after `delay`.
    ///
    /// Returns false when the job is gone or no longer retrying, e.g. because it
    /// was cancelled in the meantime.
    pub fn schedule_retry(&mut self, job_id: &str, delay: Duration) -> bool {
        let sequence = self.take_sequence();
        let Some(job) = self.jobs.get_mut(job_id) else {
            return false;
        };
        if job.status != JobStatus::Retrying {
            return false;
        }

        job.not_before = after(Utc::now(), delay);
        job.sequence = sequence;
        self.delayed.push(Reverse(DelayedEntry {
            ready_at: instant_after(delay),
            sequence,
            job_id: job_id.to_string(),
        }));
        true
    }

    /// `Active → Failed`
    pub fn fail(&mut self, job_id: &str, error: impl Into<String>) -> Result<Job, StorageError> {
        let job = self.transition(job_id, JobStatus::Failed)?;
        job.last_error = Some(error.into());
        let snapshot = finish(job);
        self.finished.push_back((snapshot.id.clone(), Utc::now()));
        Ok(snapshot)
    }

    /// `Pending → Active → Failed` without starting an attempt.
    ///
    /// Used when no handler is registered for the job type.
    pub fn fail_without_attempt(
        &mut self,
        job_id: &str,
        error: impl Into<String>,
    ) -> Result<Job, StorageError> {
        self.transition(job_id, JobStatus::Active)?;
        self.fail(job_id, error)
    }

    /// Remove a waiting job, or flag an active one.
    pub fn cancel(&mut self, job_id: &str) -> CancelOutcome {
        let Some(job) = self.jobs.get_mut(job_id) else {
            return CancelOutcome::NotFound;
        };

        match job.status {
            JobStatus::Pending | JobStatus::Retrying => {
                let status = job.status;
                self.jobs.remove(job_id);
                self.unindex(job_id, status);
                self.discard_stale_entries();
                CancelOutcome::Removed
            }
            JobStatus::Active => {
                job.cancel_requested = true;
                CancelOutcome::Advisory
            }
            JobStatus::Completed | JobStatus::Failed => CancelOutcome::Finished,
        }
    }

    /// Drop finished jobs beyond the retention cap or older than the TTL.
    ///
    /// Returns the number of evicted jobs.
    pub fn evict_finished(&mut self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;

        loop {
            let Some((_, finished_at)) = self.finished.front() else {
                break;
            };

            let over_cap = self
                .config
                .max_finished
                .is_some_and(|cap| self.finished.len() > cap);
            let expired = self.config.finished_ttl.is_some_and(|ttl| {
                now.signed_duration_since(*finished_at)
                    .to_std()
                    .is_ok_and(|age| age >= ttl)
            });

            if !over_cap && !expired {
                break;
            }

            if let Some((job_id, _)) = self.finished.pop_front() {
                if let Some(job) = self.jobs.remove(&job_id) {
                    self.unindex(&job_id, job.status);
                    evicted += 1;
                }
            }
        }

        evicted
    }

    fn transition(&mut self, job_id: &str, to: JobStatus) -> Result<&mut Job, StorageError> {
        let from = match self.jobs.get(job_id) {
            Some(job) => job.status,
            None => return Err(StorageError::job_not_found(job_id)),
        };

        if !from.can_transition_to(to) {
            return Err(StorageError::InvalidStateTransition {
                job_id: job_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.reindex(job_id, from, to);
        let job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StorageError::job_not_found(job_id))?;
        job.status = to;
        Ok(job)
    }

    /// Drop heap entries of removed jobs: always from the top of the delayed
    /// heap, so `next_wake` never reports a dead job, and from both heaps once
    /// stale entries clearly outnumber live ones.
    fn discard_stale_entries(&mut self) {
        let waiting = self.waiting_len();
        let jobs = &self.jobs;
        let is_live = |job_id: &str, sequence: u64| {
            jobs.get(job_id).is_some_and(|job| {
                job.sequence == sequence
                    && matches!(job.status, JobStatus::Pending | JobStatus::Retrying)
            })
        };

        while self
            .delayed
            .peek()
            .is_some_and(|Reverse(entry)| !is_live(&entry.job_id, entry.sequence))
        {
            self.delayed.pop();
        }

        if self.delayed.len() + self.ready.len() > 2 * waiting + STALE_ENTRY_SLACK {
            self.delayed
                .retain(|Reverse(entry)| is_live(&entry.job_id, entry.sequence));
            self.ready.retain(|entry| is_live(&entry.job_id, entry.sequence));
        }
    }

    fn take_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    fn push_ready(&mut self, job: &Job) {
        self.ready.push(ReadyEntry {
            priority: job.priority,
            not_before: job.not_before,
            sequence: job.sequence,
            job_id: job.id.clone(),
        });
    }

    fn push_delayed(&mut self, job: &Job, wait: Duration) {
        self.delayed.push(Reverse(DelayedEntry {
            ready_at: instant_after(wait),
            sequence: job.sequence,
            job_id: job.id.clone(),
        }));
    }

    fn index(&mut self, job_id: &str, status: JobStatus) {
        self.by_status
            .entry(status)
            .or_default()
            .insert(job_id.to_string());
    }

    fn unindex(&mut self, job_id: &str, status: JobStatus) {
        if let Some(ids) = self.by_status.get_mut(&status) {
            ids.remove(job_id);
        }
    }

    fn reindex(&mut self, job_id: &str, from: JobStatus, to: JobStatus) {
        self.unindex(job_id, from);
        self.index(job_id, to);
    }
}

fn finish(job: &mut Job) -> Job {
    job.finished_at = Some(Utc::now());
    job.clone()
}

/// Time left until `at`, zero when it already passed
fn until(at: DateTime<Utc>) -> Duration {
    at.signed_duration_since(Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// Stale heap entries tolerated before a full compaction
const STALE_ENTRY_SLACK: usize = 64;

// Roughly thirty years; stands in for delays too large to represent as an Instant.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn instant_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait).unwrap_or(now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobOptions;
    use serde_json::json;

    fn job(job_type: &str, priority: i32) -> Job {
        Job::with_options(job_type, json!({}), &JobOptions::new().priority(priority)).unwrap()
    }

    fn drain_ready(store: &mut JobStore) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(id) = store.pop_ready() {
            order.push(id);
        }
        order
    }

    #[tokio::test]
    async fn test_ready_order_is_priority_then_fifo() {
        let mut store = JobStore::new();
        let low = job("inventory:update", 1);
        let high = job("email:send", 5);
        let low_second = job("inventory:update", 1);
        let ids = [low.id.clone(), high.id.clone(), low_second.id.clone()];

        store.insert(low).unwrap();
        store.insert(high).unwrap();
        store.insert(low_second).unwrap();

        assert_eq!(
            drain_ready(&mut store),
            vec![ids[1].clone(), ids[0].clone(), ids[2].clone()]
        );
    }

    #[tokio::test]
    async fn test_memory_store_basic_lifecycle() {
        let mut store = JobStore::new();
        let job = job("order:process", 0);
        let id = job.id.clone();
        store.insert(job).unwrap();
        assert_eq!(store.counts().pending, 1);

        assert_eq!(store.pop_ready(), Some(id.clone()));
        let active = store.mark_active(&id).unwrap();
        assert_eq!(active.attempts_made, 1);
        assert_eq!(store.counts().active, 1);
        assert_eq!(store.counts().pending, 0);

        let done = store.complete(&id, Some(json!("ok"))).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.finished_at.is_some());
        assert_eq!(store.counts().completed, 1);
        assert_eq!(store.counts().active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_jobs_wait_for_their_time() {
        let mut store = JobStore::new();
        let delayed = Job::with_options(
            "email:send",
            json!({}),
            &JobOptions::new().priority(10).delay_ms(60_000),
        )
        .unwrap();
        let delayed_id = delayed.id.clone();
        let ready = job("email:send", 0);
        let ready_id = ready.id.clone();

        store.insert(delayed).unwrap();
        store.insert(ready).unwrap();

        assert!(store.promote_due(Instant::now()).is_empty());
        assert_eq!(store.pop_ready(), Some(ready_id));
        assert_eq!(store.pop_ready(), None);
        assert!(store.next_wake().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.promote_due(Instant::now()), vec![delayed_id.clone()]);
        assert_eq!(store.pop_ready(), Some(delayed_id));
        assert!(store.next_wake().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_parks_job_until_delay_elapses() {
        let mut store = JobStore::new();
        let job = job("currency:convert", 0);
        let id = job.id.clone();
        store.insert(job).unwrap();
        store.pop_ready();
        store.mark_active(&id).unwrap();

        let retrying = store.retry(&id, "rate service unavailable").unwrap();
        assert_eq!(retrying.status, JobStatus::Retrying);
        assert_eq!(retrying.last_error.as_deref(), Some("rate service unavailable"));
        assert_eq!(store.counts().retrying, 1);
        assert!(store.next_wake().is_none());

        assert!(store.schedule_retry(&id, Duration::from_millis(100)));
        assert_eq!(store.pop_ready(), None);
        store.promote_due(Instant::now());
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Retrying);

        tokio::time::advance(Duration::from_millis(100)).await;
        store.promote_due(Instant::now());
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Pending);
        assert_eq!(store.pop_ready(), Some(id));
    }

    #[tokio::test]
    async fn test_cancel_outcomes() {
        let mut store = JobStore::new();
        let waiting = job("email:send", 0);
        let running = job("email:send", 0);
        let waiting_id = waiting.id.clone();
        let running_id = running.id.clone();
        store.insert(waiting).unwrap();
        store.insert(running).unwrap();
        store.mark_active(&running_id).unwrap();

        assert_eq!(store.cancel(&waiting_id), CancelOutcome::Removed);
        assert!(store.get(&waiting_id).is_none());
        assert_eq!(store.pop_ready(), None);

        assert_eq!(store.cancel(&running_id), CancelOutcome::Advisory);
        assert!(store.get(&running_id).unwrap().cancel_requested);

        store.complete(&running_id, None).unwrap();
        assert_eq!(store.cancel(&running_id), CancelOutcome::Finished);
        assert_eq!(store.cancel("missing"), CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let mut store = JobStore::with_config(StoreConfig::new().with_max_pending(2));
        store.insert(job("email:send", 0)).unwrap();
        store.insert(job("email:send", 0)).unwrap();

        let result = store.insert(job("email:send", 0));
        assert!(matches!(
            result,
            Err(StorageError::CapacityExceeded { capacity: 2 })
        ));
    }

    #[tokio::test]
    async fn test_eviction_keeps_newest_finished_jobs() {
        let mut store = JobStore::with_config(StoreConfig::new().with_max_finished(2));
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = job("email:send", 0);
            let id = job.id.clone();
            store.insert(job).unwrap();
            store.mark_active(&id).unwrap();
            store.complete(&id, None).unwrap();
            ids.push(id);
        }

        assert_eq!(store.evict_finished(Utc::now()), 1);
        assert!(store.get(&ids[0]).is_none());
        assert!(store.get(&ids[2]).is_some());
        assert_eq!(store.counts().completed, 2);
    }

    #[tokio::test]
    async fn test_eviction_by_ttl() {
        let config = StoreConfig::new()
            .unlimited_history()
            .with_finished_ttl(Duration::from_secs(60));
        let mut store = JobStore::with_config(config);
        let job = job("email:send", 0);
        let id = job.id.clone();
        store.insert(job).unwrap();
        store.mark_active(&id).unwrap();
        store.fail(&id, "boom").unwrap();

        assert_eq!(store.evict_finished(Utc::now()), 0);
        assert_eq!(
            store.evict_finished(Utc::now() + chrono::Duration::seconds(61)),
            1
        );
        assert_eq!(store.counts().failed, 0);
    }

    #[tokio::test]
    async fn test_fail_without_attempt_leaves_attempts_untouched() {
        let mut store = JobStore::new();
        let job = job("bogus:type", 0);
        let id = job.id.clone();
        store.insert(job).unwrap();
        store.pop_ready();

        let failed = store.fail_without_attempt(&id, "no handler").unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts_made, 0);
        assert_eq!(store.counts().failed, 1);
        assert_eq!(store.counts().active, 0);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let mut store = JobStore::new();
        for _ in 0..3 {
            store.insert(job("email:send", 0)).unwrap();
        }
        let done = job("email:send", 0);
        let done_id = done.id.clone();
        store.insert(done).unwrap();
        store.mark_active(&done_id).unwrap();
        store.complete(&done_id, None).unwrap();

        assert_eq!(store.list(None, None, None).len(), 4);
        assert_eq!(store.list(Some(JobStatus::Pending), None, None).len(), 3);
        assert_eq!(store.list(Some(JobStatus::Completed), None, None)[0].id, done_id);
        assert_eq!(store.list(None, Some(2), Some(1)).len(), 2);
        assert!(store.list(None, None, Some(10)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_delayed_jobs_do_not_linger() {
        let mut store = JobStore::new();
        let soon = Job::with_options(
            "email:send",
            json!({}),
            &JobOptions::new().delay_ms(1_000),
        )
        .unwrap();
        let soon_id = soon.id.clone();
        store.insert(soon).unwrap();

        for _ in 0..200 {
            let far = Job::with_options(
                "email:send",
                json!({}),
                &JobOptions::new().delay_ms(600_000),
            )
            .unwrap();
            let far_id = far.id.clone();
            store.insert(far).unwrap();
            assert_eq!(store.cancel(&far_id), CancelOutcome::Removed);
        }
        assert!(store.delayed.len() <= 2 + STALE_ENTRY_SLACK);

        assert!(store.next_wake().is_some());
        assert_eq!(store.cancel(&soon_id), CancelOutcome::Removed);
        assert!(store.next_wake().is_none());
        assert!(store.delayed.is_empty());
    }

    #[tokio::test]
    async fn test_take_ready_where_keeps_other_jobs_in_order() {
        let mut store = JobStore::new();
        let orphan_low = job("loyalty:award", 1);
        let orphan_high = job("loyalty:award", 7);
        let first = job("email:send", 3);
        let second = job("email:send", 3);
        let ids = [
            orphan_low.id.clone(),
            orphan_high.id.clone(),
            first.id.clone(),
            second.id.clone(),
        ];
        for job in [orphan_low, orphan_high, first, second] {
            store.insert(job).unwrap();
        }

        let taken = store.take_ready_where(|job| job.job_type == "loyalty:award");
        assert_eq!(taken, vec![ids[1].clone(), ids[0].clone()]);
        assert_eq!(drain_ready(&mut store), vec![ids[2].clone(), ids[3].clone()]);
    }

    #[tokio::test]
    async fn test_parked_job_waits_for_release() {
        let mut store = JobStore::new();
        let job = job("email:send", 0);
        let id = job.id.clone();
        store.insert_parked(job).unwrap();

        assert_eq!(store.counts().pending, 1);
        assert_eq!(store.pop_ready(), None);

        assert!(store.release(&id));
        assert_eq!(store.pop_ready(), Some(id.clone()));

        let cancelled = job_for_release(&mut store);
        assert_eq!(store.cancel(&cancelled), CancelOutcome::Removed);
        assert!(!store.release(&cancelled));
    }

    fn job_for_release(store: &mut JobStore) -> String {
        let job = job("email:send", 0);
        let id = job.id.clone();
        store.insert_parked(job).unwrap();
        id
    }
}

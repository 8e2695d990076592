//! Queue statistics and lifecycle events
//!
//! Events are a pure observation channel: listeners receive a shared reference
//! to each event after the queue has released its store lock, so they may call
//! back into the queue but can never observe a half-applied mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::error;

/// Capacity of the broadcast channel backing [`EventBus::receiver`].
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Live job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Total number of jobs currently held by the store
    pub fn total(&self) -> usize {
        self.pending + self.active + self.retrying + self.completed + self.failed
    }

    /// Jobs that have not reached a terminal state yet
    pub fn in_flight(&self) -> usize {
        self.pending + self.active + self.retrying
    }
}

/// The four lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobEventKind {
    #[serde(rename = "job:added")]
    Added,
    #[serde(rename = "job:started")]
    Started,
    #[serde(rename = "job:completed")]
    Completed,
    #[serde(rename = "job:failed")]
    Failed,
}

impl JobEventKind {
    /// Wire name of the event, e.g. `job:added`
    pub fn name(&self) -> &'static str {
        match self {
            JobEventKind::Added => "job:added",
            JobEventKind::Started => "job:started",
            JobEventKind::Completed => "job:completed",
            JobEventKind::Failed => "job:failed",
        }
    }
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lifecycle event emitted by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum JobEvent {
    #[serde(rename = "job:added")]
    Added {
        job_id: String,
        job_type: String,
        priority: i32,
    },
    #[serde(rename = "job:started")]
    Started {
        job_id: String,
        job_type: String,
        attempt: u32,
    },
    #[serde(rename = "job:completed")]
    Completed {
        job_id: String,
        job_type: String,
        duration_ms: u64,
        attempts: u32,
    },
    /// Emitted for every failed attempt; `will_retry` is false on the terminal one
    #[serde(rename = "job:failed")]
    Failed {
        job_id: String,
        job_type: String,
        error: String,
        duration_ms: u64,
        attempts: u32,
        will_retry: bool,
    },
}

impl JobEvent {
    pub fn kind(&self) -> JobEventKind {
        match self {
            JobEvent::Added { .. } => JobEventKind::Added,
            JobEvent::Started { .. } => JobEventKind::Started,
            JobEvent::Completed { .. } => JobEventKind::Completed,
            JobEvent::Failed { .. } => JobEventKind::Failed,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Added { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => job_id,
        }
    }

    /// Whether the job reached a terminal state with this event
    pub fn is_terminal(&self) -> bool {
        match self {
            JobEvent::Completed { .. } => true,
            JobEvent::Failed { will_retry, .. } => !will_retry,
            _ => false,
        }
    }
}

type Callback = Arc<dyn Fn(&JobEvent) + Send + Sync>;

struct Listener {
    id: u64,
    kind: Option<JobEventKind>,
    callback: Callback,
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<Listener>>,
}

impl Listeners {
    fn remove(&self, id: u64) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|listener| listener.id != id);
        entries.len() != before
    }
}

/// Fan-out of job events to callbacks and stream receivers
///
/// Callbacks registered with [`EventBus::subscribe`] are invoked synchronously,
/// in registration order, for every matching event emitted while they are
/// registered. Stream consumers use [`EventBus::receiver`], which may lag and
/// skip events if it falls more than the channel capacity behind.
pub struct EventBus {
    listeners: Arc<Listeners>,
    sender: broadcast::Sender<JobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            listeners: Arc::new(Listeners::default()),
            sender,
        }
    }

    /// Register a callback for one event kind
    pub fn subscribe<F>(&self, kind: JobEventKind, callback: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.add_listener(Some(kind), Arc::new(callback))
    }

    /// Register a callback for every event
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.add_listener(None, Arc::new(callback))
    }

    /// A new stream receiver that sees every event emitted after this call
    pub fn receiver(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.listeners
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every matching callback and stream receiver
    pub fn emit(&self, event: &JobEvent) {
        let callbacks: Vec<Callback> = {
            let entries = self
                .listeners
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .filter(|listener| listener.kind.map_or(true, |kind| kind == event.kind()))
                .map(|listener| Arc::clone(&listener.callback))
                .collect()
        };

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    "Event listener panicked while handling {} for job {}",
                    event.kind(),
                    event.job_id()
                );
            }
        }

        // No receivers is not an error
        let _ = self.sender.send(event.clone());
    }

    fn add_listener(&self, kind: Option<JobEventKind>, callback: Callback) -> Subscription {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener { id, kind, callback });

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }
}

/// Handle returned by `subscribe`; call [`Subscription::unsubscribe`] to stop
/// receiving events. Dropping the handle leaves the callback registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    /// Remove the callback. Returns false if it was already removed or the
    /// queue no longer exists.
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.remove(self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn added(job_id: &str) -> JobEvent {
        JobEvent::Added {
            job_id: job_id.to_string(),
            job_type: "email:send".to_string(),
            priority: 0,
        }
    }

    #[test]
    fn test_subscribe_filters_by_kind() {
        let bus = EventBus::new();
        let added_count = Arc::new(AtomicUsize::new(0));
        let all_count = Arc::new(AtomicUsize::new(0));

        let counter = added_count.clone();
        let _added = bus.subscribe(JobEventKind::Added, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = all_count.clone();
        let _all = bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&added("a"));
        bus.emit(&JobEvent::Started {
            job_id: "a".to_string(),
            job_type: "email:send".to_string(),
            attempt: 1,
        });

        assert_eq!(added_count.load(Ordering::SeqCst), 1);
        assert_eq!(all_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = bus.subscribe(JobEventKind::Added, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&added("a"));
        assert!(subscription.unsubscribe());
        bus.emit(&added("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _bad = bus.subscribe_all(|_| panic!("listener bug"));
        let counter = count.clone();
        let _good = bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&added("a"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receiver_sees_events() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();
        bus.emit(&added("a"));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.job_id(), "a");
        assert_eq!(event.kind(), JobEventKind::Added);
    }

    #[test]
    fn test_event_wire_format() {
        let event = JobEvent::Failed {
            job_id: "a".to_string(),
            job_type: "order:process".to_string(),
            error: "Handler error: boom".to_string(),
            duration_ms: 12,
            attempts: 2,
            will_retry: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "job:failed");
        assert_eq!(json["jobId"], "a");
        assert_eq!(json["willRetry"], false);
        assert!(event.is_terminal());
    }

    #[test]
    fn test_stats_totals() {
        let stats = QueueStats {
            pending: 1,
            active: 2,
            retrying: 1,
            completed: 4,
            failed: 1,
        };
        assert_eq!(stats.total(), 9);
        assert_eq!(stats.in_flight(), 4);
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default retention cap for completed and failed jobs.
pub const DEFAULT_MAX_FINISHED: usize = 10_000;

/// Configuration for the in-memory job store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of waiting (pending or retrying) jobs; `add()` fails with
    /// `QueueFull` beyond it. `None` disables backpressure.
    pub max_pending: Option<usize>,
    /// Maximum number of completed/failed jobs kept for stats and history
    pub max_finished: Option<usize>,
    /// How long completed/failed jobs are kept after finishing
    pub finished_ttl: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_pending: None,
            max_finished: Some(DEFAULT_MAX_FINISHED),
            finished_ttl: None,
        }
    }
}

impl StoreConfig {
    /// Create a new store config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject submissions once this many jobs are waiting
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = Some(max_pending);
        self
    }

    /// Keep at most this many finished jobs
    pub fn with_max_finished(mut self, max_finished: usize) -> Self {
        self.max_finished = Some(max_finished);
        self
    }

    /// Keep finished jobs forever
    pub fn unlimited_history(mut self) -> Self {
        self.max_finished = None;
        self.finished_ttl = None;
        self
    }

    /// Evict finished jobs older than `ttl`
    pub fn with_finished_ttl(mut self, ttl: Duration) -> Self {
        self.finished_ttl = Some(ttl);
        self
    }
}

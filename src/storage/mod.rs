//! In-memory job storage.
//!
//! The [`JobStore`] is the single source of truth for every job the queue knows
//! about. It is a plain synchronous structure; the queue wraps it in one mutex
//! so that every status transition, insertion and removal is applied atomically.
//!
//! ## Indexes
//!
//! ```text
//! jobs      id → Job                      (every stored job)
//! by_status status → {id}                 (O(1) stats)
//! ready     max-heap (priority, notBefore, sequence)
//! delayed   min-heap (ready_at, sequence) (future notBefore, retry backoff)
//! finished  FIFO of (id, finished_at)     (retention cap and TTL)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use qml_queue::storage::JobStore;
//! use qml_queue::{Job, JobStatus};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut store = JobStore::new();
//! let job = Job::new("email:send", json!({ "to": "buyer@example.com" }));
//! let id = job.id.clone();
//! store.insert(job).unwrap();
//!
//! assert_eq!(store.pop_ready(), Some(id.clone()));
//! let active = store.mark_active(&id).unwrap();
//! assert_eq!(active.status, JobStatus::Active);
//! assert_eq!(active.attempts_made, 1);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod memory;

pub use config::{StoreConfig, DEFAULT_MAX_FINISHED};
pub use error::StorageError;
pub use memory::{CancelOutcome, JobStore};

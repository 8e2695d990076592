//! # qml-queue
//!
//! An in-process background job queue for moving work off the request path:
//! notifications, inventory updates, currency conversion, order processing.
//!
//! ## Features
//!
//! - **Priorities and delays**: higher priority dispatches first, FIFO within a
//!   priority, jobs never start before their `not_before` time
//! - **Bounded concurrency**: a worker pool of `concurrency` slots
//! - **Retries**: fixed or exponential backoff, per-attempt timeouts
//! - **Event-driven scheduling**: the dispatcher sleeps until a job is added,
//!   a slot frees up or a delayed job becomes due
//! - **Observability**: live stats, lifecycle events, an HTTP API and a
//!   websocket dashboard
//!
//! ## Job Lifecycle
//!
//! ```text
//! add() → pending → active → completed
//!            ↑         ↓
//!         retrying ←───┤  (attempts left, retryable error)
//!                      ↓
//!                    failed
//! ```
//!
//! ## Handlers
//!
//! ```rust
//! use async_trait::async_trait;
//! use qml_queue::{HandlerContext, JobHandler, QmlError, Result};
//! use serde::Deserialize;
//! use serde_json::{json, Value};
//!
//! #[derive(Deserialize)]
//! struct InventoryUpdate {
//!     sku: String,
//!     delta: i64,
//! }
//!
//! struct InventoryHandler;
//!
//! #[async_trait]
//! impl JobHandler for InventoryHandler {
//!     type Payload = InventoryUpdate;
//!
//!     async fn handle(&self, update: InventoryUpdate, ctx: HandlerContext) -> Result<Option<Value>> {
//!         if update.sku.is_empty() {
//!             // Not worth retrying
//!             return Err(QmlError::validation("empty sku"));
//!         }
//!         if ctx.is_cancelled() {
//!             return Err(QmlError::handler("cancelled"));
//!         }
//!         Ok(Some(json!({ "sku": update.sku, "applied": update.delta })))
//!     }
//! }
//! ```
//!
//! ## Running a Queue
//!
//! ```rust
//! use qml_queue::{Backoff, JobOptions, JobQueue, JobStatus, QueueConfig};
//! use serde_json::{json, Value};
//!
//! # tokio_test::block_on(async {
//! let queue = JobQueue::new(QueueConfig::new("commerce").concurrency(2)).unwrap();
//! queue.register_fn("email:send", |payload: Value, _ctx| async move {
//!     Ok(Some(json!({ "delivered_to": payload["to"] })))
//! });
//! queue.start().await.unwrap();
//!
//! let options = JobOptions::new()
//!     .priority(5)
//!     .max_attempts(3)
//!     .backoff(Backoff::exponential(100));
//! let id = queue
//!     .add("email:send", json!({ "to": "buyer@example.com" }), options)
//!     .unwrap();
//!
//! let job = queue.wait_for(&id).await.unwrap();
//! assert_eq!(job.status, JobStatus::Completed);
//! assert_eq!(queue.get_stats().completed, 1);
//!
//! queue.shutdown().await.unwrap();
//! # });
//! ```
//!
//! ## Events
//!
//! ```rust
//! use qml_queue::{JobEventKind, JobQueue, QueueConfig};
//!
//! let queue = JobQueue::new(QueueConfig::default()).unwrap();
//! let subscription = queue.subscribe(JobEventKind::Failed, |event| {
//!     eprintln!("job failed: {:?}", event);
//! });
//! assert!(subscription.unsubscribe());
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use qml_queue::{JobQueue, QmlError, QueueConfig};
//! use serde_json::json;
//!
//! let queue = JobQueue::new(QueueConfig::default().max_pending(0)).unwrap();
//! match queue.add_default("email:send", json!({})) {
//!     Ok(id) => println!("queued {}", id),
//!     Err(QmlError::QueueFull { capacity }) => println!("queue full at {}", capacity),
//!     Err(QmlError::ValidationError { message }) => println!("rejected: {}", message),
//!     Err(e) => println!("other error: {}", e),
//! }
//! ```

pub mod core;
pub mod dashboard;
pub mod error;
pub mod processing;
pub mod settings;
pub mod storage;

// Re-export main types for convenience
pub use core::{Job, JobOptions, JobStatus, DEFAULT_MAX_ATTEMPTS};
pub use dashboard::{create_router, submission_route, DashboardConfig, DashboardServer};
pub use error::{QmlError, Result};
pub use processing::{
    next_delay, should_retry, Backoff, EventBus, ExecutionOutcome, FnHandler, HandlerContext,
    HandlerRegistry, JobEvent, JobEventKind, JobHandler, JobQueue, QueueConfig, QueueStats,
    Subscription, WorkerPool,
};
pub use settings::Settings;
pub use storage::{CancelOutcome, JobStore, StorageError, StoreConfig};

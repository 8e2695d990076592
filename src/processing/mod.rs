//! Job Processing Engine
//!
//! This module contains the handler registry, worker pool, scheduler and the
//! [`JobQueue`] facade that ties them to the job store.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::error::{QmlError, Result};

pub mod events;
pub mod queue;
pub mod retry;
mod scheduler;
pub mod worker;

pub use events::{EventBus, JobEvent, JobEventKind, QueueStats, Subscription};
pub use queue::{JobQueue, QueueConfig};
pub use retry::{next_delay, should_retry, Backoff};
pub use worker::{ExecutionOutcome, HandlerContext, WorkerPool};

/// Trait for executing jobs of one type
///
/// The payload arrives already decoded into `Payload`, so a handler only ever
/// sees the shape it declared. Registering a handler also makes `add()` check
/// submitted payloads against that shape.
///
/// Returning `Err` fails the attempt. Errors are retried according to the job's
/// backoff until `max_attempts` is reached, except `QmlError::ValidationError`,
/// which marks the job failed immediately.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Payload shape this handler accepts
    type Payload: DeserializeOwned + Send + 'static;

    /// Execute one attempt
    ///
    /// # Returns
    /// * `Ok(Some(value))` stores `value` as the job result
    /// * `Ok(None)` completes the job without a result
    /// * `Err(QmlError)` fails the attempt
    async fn handle(&self, payload: Self::Payload, context: HandlerContext)
        -> Result<Option<Value>>;
}

/// Object-safe form of a registered handler, working on raw JSON payloads
#[async_trait]
pub trait DynHandler: Send + Sync {
    /// Check that a payload decodes into the handler's payload type
    fn validate(&self, payload: &Value) -> Result<()>;

    /// Decode the payload and run the handler
    async fn call(&self, payload: Value, context: HandlerContext) -> Result<Option<Value>>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: JobHandler> DynHandler for Typed<H> {
    fn validate(&self, payload: &Value) -> Result<()> {
        H::Payload::deserialize(payload)
            .map(|_| ())
            .map_err(|e| QmlError::validation(format!("payload does not match handler: {}", e)))
    }

    async fn call(&self, payload: Value, context: HandlerContext) -> Result<Option<Value>> {
        let payload = serde_json::from_value::<H::Payload>(payload)
            .map_err(|e| QmlError::validation(format!("payload does not match handler: {}", e)))?;
        self.0.handle(payload, context).await
    }
}

/// Adapter turning an async closure into a [`JobHandler`]
pub struct FnHandler<P, F> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

impl<P, F> FnHandler<P, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> JobHandler for FnHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
{
    type Payload = P;

    async fn handle(&self, payload: P, context: HandlerContext) -> Result<Option<Value>> {
        (self.f)(payload, context).await
    }
}

/// Registry for job handlers
///
/// Maps job type strings to their handlers. Registering a type twice replaces
/// the previous handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn DynHandler>>>,
}

impl HandlerRegistry {
    /// Create a new handler registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type
    pub fn register<H>(&self, job_type: impl Into<String>, handler: H)
    where
        H: JobHandler,
    {
        let job_type = job_type.into();
        let previous = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type.clone(), Arc::new(Typed(handler)));

        if previous.is_some() {
            warn!("Replaced handler for job type: {}", job_type);
        } else {
            debug!("Registered handler for job type: {}", job_type);
        }
    }

    /// Register an async closure as the handler for a job type
    pub fn register_fn<P, F, Fut>(&self, job_type: impl Into<String>, f: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.register(job_type, FnHandler::new(f));
    }

    /// Get the handler for a job type
    pub fn lookup(&self, job_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    /// Check if a job type is registered
    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_type)
    }

    /// Validate a payload against the handler registered for `job_type`.
    ///
    /// Unregistered types pass; they fail later, at dispatch.
    pub fn validate_payload(&self, job_type: &str, payload: &Value) -> Result<()> {
        match self.lookup(job_type) {
            Some(handler) => handler.validate(payload),
            None => Ok(()),
        }
    }

    /// Get all registered job types, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Get the number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Handler registry mapping job types to executable handlers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::context::JobContext;
use crate::error::HandlerError;
use crate::job::Job;

/// Output of a handler: an optional serialized result.
pub type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

/// Job handler trait.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute one attempt of a job.
    async fn handle(&self, ctx: JobContext, job: &Job) -> HandlerResult;
}

/// Adapter turning a typed async function into a [`JobHandler`].
struct FnHandler<F, P, R> {
    func: F,
    _types: PhantomData<fn(P) -> R>,
}

#[async_trait]
impl<F, Fut, P, R> JobHandler for FnHandler<F, P, R>
where
    F: Fn(JobContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn handle(&self, ctx: JobContext, job: &Job) -> HandlerResult {
        let payload: P = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;

        let output = (self.func)(ctx, payload).await?;

        let value = serde_json::to_value(output)
            .map_err(|e| HandlerError::InvalidResult(e.to_string()))?;
        Ok((!value.is_null()).then_some(value))
    }
}

/// Registry of job handlers keyed by job type.
///
/// Registering a type twice replaces the earlier handler.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler, returning the one it replaced.
    pub fn register<H>(&self, job_type: impl Into<String>, handler: H) -> Option<Arc<dyn JobHandler>>
    where
        H: JobHandler + 'static,
    {
        self.register_arc(job_type, Arc::new(handler))
    }

    /// Register a shared handler, returning the one it replaced.
    pub fn register_arc(
        &self,
        job_type: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Option<Arc<dyn JobHandler>> {
        let job_type = job_type.into();
        debug!(job_type = %job_type, "Registering job handler");
        self.handlers.insert(job_type, handler)
    }

    /// Register a typed async function.
    ///
    /// The job payload is decoded into `P`; the returned `R` is encoded into
    /// the job result (a unit or `null` output leaves the result empty).
    pub fn register_fn<F, Fut, P, R>(&self, job_type: impl Into<String>, func: F) -> Option<Arc<dyn JobHandler>>
    where
        F: Fn(JobContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(
            job_type,
            FnHandler {
                func,
                _types: PhantomData,
            },
        )
    }

    /// Remove a handler.
    pub fn unregister(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.remove(job_type).map(|(_, h)| h)
    }

    /// Look up a handler.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).map(|h| h.value().clone())
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

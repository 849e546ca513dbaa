//! # TaskHive Queue
//!
//! Durable background-job engine.
//!
//! ## Features
//!
//! - Priority- and time-ordered queue over a pluggable store (memory, SQLite)
//! - Optimistic claims: at most one worker holds a job at a time
//! - Retry with none/linear/exponential backoff
//! - Worker pool with per-job deadlines and panic containment
//! - Optional claim leases with a reaper for crashed workers

pub mod backoff;
pub mod client;
pub mod context;
pub mod error;
pub mod job;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod store;
pub mod submitter;
pub mod worker;

pub use backoff::{BackoffStrategy, MAX_BACKOFF, calculate_backoff};
pub use client::{Client, ClientConfig};
pub use context::JobContext;
pub use error::{HandlerError, QueueError, StoreError};
pub use job::{BACKOFF_STRATEGY_KEY, Job, JobConfig, JobId, JobStatus};
pub use pool::{PoolConfig, WorkerPool};
pub use queue::{JobStats, PRIORITY_WEIGHT, Queue, QueueOptions, score};
pub use registry::{HandlerRegistry, HandlerResult, JobHandler};
pub use store::{MemoryStore, ScoredMember, SqliteStore, Store, StoreOp};
pub use submitter::JobSubmitter;
pub use worker::{ErrorCallback, JobOutcome, SuccessCallback, Worker, WorkerHooks, WorkerStats};

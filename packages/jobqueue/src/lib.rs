//! Durable background job processing.
//!
//! This crate is the cross-process half of the async core: services enqueue
//! work that must survive restarts, and a pool of workers drains it with
//! retry and backoff. The in-process fan-out half lives in the sibling
//! `eventbus` crate; the two are deliberately separate reliability tiers
//! and share no machinery.
//!
//! # Architecture
//!
//! ```text
//! Service calls JobQueue::enqueue(job_type, payload, max_retries)
//!     │
//!     └─► JobStore (shared, durable; atomic claim is its contract)
//!
//! WorkerPool (N workers)
//!     │
//!     ├─► dequeue claimed job
//!     ├─► resolve handler via JobRegistry
//!     ├─► execute with deadline + panic isolation
//!     └─► completed, or requeue with backoff / failed
//! ```
//!
//! Delivery is at-least-once: a worker crash between claim and completion
//! is recovered by the store's visibility mechanism, so handlers should be
//! idempotent.

pub mod error;
pub mod job;
pub mod memory;
pub mod queue;
pub mod redis_store;
pub mod registry;
pub mod store;
pub mod worker;

pub use error::{QueueError, StoreError};
pub use job::{Job, JobStatus};
pub use memory::InMemoryJobStore;
pub use queue::JobQueue;
pub use redis_store::RedisJobStore;
pub use registry::{JobHandler, JobRegistry, SharedJobRegistry};
pub use store::{BackoffPolicy, JobStore};
pub use worker::{WorkerPool, WorkerPoolConfig};

//! Job handler registration and resolution.
//!
//! Each domain registers its handlers at startup; the registry is then
//! shared read-only as [`SharedJobRegistry`] so workers can resolve
//! concurrently without locking.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::job::Job;

/// A typed consumer of jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler executes.
    fn job_type(&self) -> &str;

    /// Execute one job.
    ///
    /// `cancel` fires when the worker pool is shutting down; long-running
    /// handlers should treat it as a request to wrap up. An error counts as
    /// a failed attempt and is retried up to the job's `max_retries`.
    async fn handle(&self, job: &Job, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Maps a job type string to exactly one handler.
#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to its `job_type()`.
    ///
    /// Registering a second handler for the same type is an error so that
    /// misconfiguration fails at startup instead of silently overriding.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        let job_type = handler.job_type().to_string();
        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::HandlerAlreadyRegistered { job_type });
        }
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Look up the handler for a job type.
    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a job type is registered.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// All registered job types.
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Registry shared across workers after startup.
pub type SharedJobRegistry = Arc<JobRegistry>;

//! Enqueue and status surface consumed by application services.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::Job;
use crate::store::{BackoffPolicy, JobStore};

/// Client-facing handle on the durable queue.
///
/// Cheap to clone; every clone points at the same store. Constructed once
/// at the composition root and passed to whatever services enqueue work,
/// plus the [`WorkerPool`](crate::worker::WorkerPool) that drains it.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    backoff: BackoffPolicy,
}

impl JobQueue {
    /// Create a queue over `store` with the default retry backoff.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Override the retry backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Store a new job and make it claimable.
    ///
    /// Safe to call concurrently from many processes; fails only when the
    /// store is unavailable.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: Map<String, Value>,
        max_retries: u32,
    ) -> Result<Uuid, QueueError> {
        let job = Job::new(job_type, payload, max_retries);
        self.store.enqueue(&job).await?;
        info!(job_id = %job.id, job_type = %job.job_type, max_retries, "job enqueued");
        Ok(job.id)
    }

    /// Fetch the latest persisted record for a job.
    pub async fn status(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))
    }

    /// The retry backoff policy applied when jobs are requeued.
    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Handle on the underlying store.
    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::job::JobStatus;
    use crate::memory::InMemoryJobStore;

    #[tokio::test]
    async fn enqueue_returns_an_id_resolvable_via_status() {
        let queue = JobQueue::new(Arc::new(InMemoryJobStore::new()));
        let mut payload = Map::new();
        payload.insert("note_id".to_string(), Value::from(42));

        let id = queue.enqueue("derived_data", payload, 2).await.unwrap();

        let job = queue.status(id).await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.job_type, "derived_data");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_retries, 2);
        assert_eq!(job.payload["note_id"], 42);
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_not_found() {
        let queue = JobQueue::new(Arc::new(InMemoryJobStore::new()));
        let err = queue.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(_)));
    }
}

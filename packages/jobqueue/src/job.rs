//! Job model for background work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle states for a job.
///
/// Transitions are monotonic: `Pending → Processing → Completed | Failed`,
/// with a failed attempt cycling back to `Pending` while retries remain.
/// Once a job reaches a terminal state it is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status is terminal (`Completed` or `Failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One unit of background work.
///
/// Identity, type, payload and the retry ceiling are fixed at creation;
/// only `status`, `retries` and `error` change as the job moves through
/// its lifecycle. The serialized form is the persisted record shape shared
/// with every process that talks to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: Map<String, Value>,
    pub max_retries: u32,
    pub retries: u32,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(job_type: impl Into<String>, payload: Map<String, Value>, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            max_retries,
            retries: 0,
            status: JobStatus::Pending,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// Mark the job as claimed and executing.
    pub(crate) fn mark_processing(&mut self) {
        debug_assert!(!self.status.is_terminal());
        self.status = JobStatus::Processing;
    }

    /// Mark the job as successfully completed (terminal).
    pub(crate) fn complete(&mut self) {
        debug_assert!(!self.status.is_terminal());
        self.status = JobStatus::Completed;
        self.error = None;
    }

    /// Record a permanent failure (terminal).
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        debug_assert!(!self.status.is_terminal());
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
    }

    /// Return the job to `Pending` for another attempt.
    pub(crate) fn prepare_retry(&mut self) {
        debug_assert!(self.can_retry());
        self.retries += 1;
        self.status = JobStatus::Pending;
        self.error = None;
    }
}

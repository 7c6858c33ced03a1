//! Structured error types for the job queue.
//!
//! `StoreError` covers failures at the durable-store boundary;
//! `QueueError` covers everything the queue surface itself can report.
//! Handler execution errors stay `anyhow::Error` internally and are
//! persisted as the job's error string, never as a typed variant.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by [`JobStore`](crate::store::JobStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation.
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    /// A persisted job record could not be decoded.
    #[error("corrupt job record {id}: {reason}")]
    CorruptRecord {
        /// ID of the record that failed to decode.
        id: Uuid,
        /// Decoder error message.
        reason: String,
    },

    /// A job record could not be encoded for persistence.
    #[error("failed to encode job record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors surfaced by the queue facade and the handler registry.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A handler is already registered for this job type.
    ///
    /// Exactly one handler per type; duplicates fail at startup instead of
    /// silently overriding.
    #[error("handler already registered for job type {job_type}")]
    HandlerAlreadyRegistered {
        /// The contested job type.
        job_type: String,
    },

    /// No job record exists for the given ID.
    #[error("job {0} not found")]
    JobNotFound(Uuid),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_handler_error_names_the_job_type() {
        let err = QueueError::HandlerAlreadyRegistered {
            job_type: "email".to_string(),
        };
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn store_error_converts_into_queue_error() {
        let err: QueueError = StoreError::Unavailable("connection refused".to_string()).into();
        match err {
            QueueError::Store(StoreError::Unavailable(msg)) => {
                assert!(msg.contains("connection refused"));
            }
            other => panic!("expected Store variant, got {other:?}"),
        }
    }
}

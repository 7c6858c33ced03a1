//! Contract between the queue core and the durable backing store.
//!
//! The store is an external collaborator shared by every process: the core
//! only requires atomic enqueue, blocking/polling dequeue with single-claim
//! semantics, and keyed record reads/writes. Claim exclusivity and
//! redelivery of jobs lost mid-processing (visibility timeouts) are the
//! store's responsibility; the worker pool layers no locking on top.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::Job;

/// Visibility delay applied before a retried job becomes claimable again.
///
/// The delay is a queue-level policy parameter, not a hard-coded duration:
/// the worker pool computes it from this policy and hands it to
/// [`JobStore::requeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Retries become visible immediately.
    None,
    /// The same delay between every attempt.
    Fixed(Duration),
    /// `base * 2^retries`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following `retries` prior failures.
    pub fn delay_for(&self, retries: u32) -> Duration {
        match self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retries.min(31));
                base.checked_mul(factor).map_or(*max, |delay| delay.min(*max))
            }
        }
    }
}

/// Durable, shared job store.
///
/// Implementations must be safe to use concurrently from many workers and
/// many processes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `Pending` state and make it claimable.
    ///
    /// Fails only on store unavailability.
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError>;

    /// Claim at most one visible job, waiting up to `wait` for work.
    ///
    /// The claim must be atomic: no other worker may receive the same job.
    /// Returns `Ok(None)` when the wait window elapses without work.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>, StoreError>;

    /// Read the latest persisted record for a job.
    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Overwrite the persisted record.
    ///
    /// Last writer wins; only the single owning worker writes a given job.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Persist a retried job and make it claimable again after `delay`.
    async fn requeue(&self, job: &Job, delay: Duration) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_backoff_has_zero_delay() {
        assert_eq!(BackoffPolicy::None.delay_for(0), Duration::ZERO);
        assert_eq!(BackoffPolicy::None.delay_for(10), Duration::ZERO);
    }

    #[test]
    fn fixed_backoff_ignores_the_attempt_count() {
        let policy = BackoffPolicy::Fixed(Duration::from_secs(5));
        assert_eq!(policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
    }

    #[test]
    fn exponential_backoff_doubles_until_the_cap() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(31), Duration::from_secs(60));
    }

    #[test]
    fn exponential_backoff_survives_absurd_attempt_counts() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }
}

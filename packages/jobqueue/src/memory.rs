//! Process-local job store.
//!
//! Backs tests and single-process deployments. Claims are trivially
//! exclusive: a job leaves the pending queue under one lock, so no two
//! workers can receive it. Durability is the trade-off — a restart loses
//! everything — which is why cross-process deployments use
//! [`RedisJobStore`](crate::redis_store::RedisJobStore) instead.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::Job;
use crate::store::JobStore;

struct QueueEntry {
    id: Uuid,
    visible_at: Instant,
}

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, Job>,
    pending: VecDeque<QueueEntry>,
}

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
    wakeup: Notify,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently waiting to be claimed (visible or delayed).
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().await;
            inner.records.insert(job.id, job.clone());
            inner.pending.push_back(QueueEntry {
                id: job.id,
                visible_at: Instant::now(),
            });
        }
        self.wakeup.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            let sleep_until = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                if let Some(pos) = inner.pending.iter().position(|e| e.visible_at <= now) {
                    let entry = match inner.pending.remove(pos) {
                        Some(entry) => entry,
                        None => continue,
                    };
                    match inner.records.get(&entry.id) {
                        Some(job) => return Ok(Some(job.clone())),
                        // Stale queue entry for a removed record; skip it.
                        None => continue,
                    }
                }
                inner
                    .pending
                    .iter()
                    .map(|e| e.visible_at)
                    .min()
                    .unwrap_or(deadline)
                    .min(deadline)
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Wake on new work or once the next delayed entry may have
            // become visible, whichever comes first.
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep_until(sleep_until) => {}
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.lock().await.records.insert(job.id, job.clone());
        Ok(())
    }

    async fn requeue(&self, job: &Job, delay: Duration) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().await;
            inner.records.insert(job.id, job.clone());
            inner.pending.push_back(QueueEntry {
                id: job.id,
                visible_at: Instant::now() + delay,
            });
        }
        self.wakeup.notify_one();
        Ok(())
    }
}

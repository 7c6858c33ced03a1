//! Redis-backed job store.
//!
//! The shared store every process talks to. Key layout:
//!
//! - `{prefix}:job:{id}` — JSON job record
//! - `{prefix}:pending` — list of claimable job IDs (`LPUSH`/`BRPOP`)
//! - `{prefix}:delayed` — sorted set of retried job IDs scored by the epoch
//!   millisecond at which they become visible again
//!
//! `BRPOP` removes exactly one element atomically, which is what gives the
//! worker pool its single-claim guarantee. Delayed entries are promoted onto
//! the pending list lazily, at dequeue time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::Job;
use crate::store::JobStore;

const DEFAULT_KEY_PREFIX: &str = "jobs";

fn unavailable(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Shared, durable [`JobStore`] backed by Redis.
pub struct RedisJobStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisJobStore {
    /// Connect to Redis at `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        Ok(Self {
            conn,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        })
    }

    /// Namespace all keys under `prefix` instead of the default `jobs`.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn record_key(&self, id: Uuid) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    /// Move delayed jobs whose visibility time has passed onto the pending
    /// list. Only entries this caller actually removes from the sorted set
    /// are promoted, so concurrent pollers never promote a job twice.
    async fn promote_due(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(self.delayed_key(), 0i64, now)
            .await
            .map_err(unavailable)?;
        for id in due {
            let removed: i64 = conn
                .zrem(self.delayed_key(), &id)
                .await
                .map_err(unavailable)?;
            if removed > 0 {
                let _: i64 = conn
                    .lpush(self.pending_key(), &id)
                    .await
                    .map_err(unavailable)?;
            }
        }
        Ok(())
    }

    async fn read_record(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(format!("{}:job:{}", self.prefix, id))
            .await
            .map_err(unavailable)?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let job = serde_json::from_str(&raw).map_err(|e| StoreError::CorruptRecord {
                    id: Uuid::parse_str(id).unwrap_or(Uuid::nil()),
                    reason: e.to_string(),
                })?;
                Ok(Some(job))
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let record = serde_json::to_string(job)?;
        // MULTI/EXEC so the record and its pending entry land together.
        let _: () = redis::pipe()
            .atomic()
            .set(self.record_key(job.id), record)
            .ignore()
            .lpush(self.pending_key(), job.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Job>, StoreError> {
        self.promote_due().await?;

        let mut conn = self.conn.clone();
        // BRPOP with timeout 0 blocks forever; clamp to one millisecond.
        let timeout = wait.as_secs_f64().max(0.001);
        let popped: Option<(String, String)> = conn
            .brpop(self.pending_key(), timeout)
            .await
            .map_err(unavailable)?;

        match popped {
            None => Ok(None),
            Some((_, id)) => self.read_record(&id).await,
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.read_record(&id.to_string()).await
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let record = serde_json::to_string(job)?;
        let _: () = conn
            .set(self.record_key(job.id), record)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn requeue(&self, job: &Job, delay: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let record = serde_json::to_string(job)?;
        if delay.is_zero() {
            let _: () = redis::pipe()
                .atomic()
                .set(self.record_key(job.id), record)
                .ignore()
                .lpush(self.pending_key(), job.id.to_string())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
        } else {
            let visible_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let _: () = redis::pipe()
                .atomic()
                .set(self.record_key(job.id), record)
                .ignore()
                .zadd(self.delayed_key(), job.id.to_string(), visible_at)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
        }
        Ok(())
    }
}

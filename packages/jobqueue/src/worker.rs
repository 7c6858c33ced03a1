//! Worker pool that executes queued jobs.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool::start()
//!     │
//!     └─► N worker loops
//!             ├─► dequeue (store claims atomically; bounded wait)
//!             ├─► resolve handler (JobRegistry)
//!             ├─► mark processing
//!             ├─► run handler (deadline + panic isolation)
//!             └─► mark completed, or requeue with backoff / mark failed
//! ```
//!
//! Execution is at-least-once: a worker that dies between claim and
//! completion relies on the store's own visibility mechanism to redeliver
//! the job. Exclusivity of a live claim is the store's contract, so the
//! pool never locks jobs itself.
//!
//! # Example
//!
//! ```ignore
//! let queue = JobQueue::new(store);
//! let pool = WorkerPool::new(queue.clone(), registry);
//! pool.start().await;
//!
//! // ... on shutdown:
//! pool.stop().await;
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::job::Job;
use crate::queue::JobQueue;
use crate::registry::{JobHandler, SharedJobRegistry};
use crate::store::{BackoffPolicy, JobStore};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// How long a single dequeue call waits for work.
    pub poll_interval: Duration,
    /// Deadline for a single handler invocation.
    pub job_timeout: Duration,
    /// Sleep after a dequeue-layer error before trying again.
    pub error_backoff: Duration,
    /// How long `stop()` waits for in-flight work before abandoning it.
    pub shutdown_timeout: Duration,
    /// Identifier used in log fields.
    pub worker_id: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(300),
            error_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Pool of N workers draining one queue against one registry.
pub struct WorkerPool {
    queue: JobQueue,
    registry: SharedJobRegistry,
    config: WorkerPoolConfig,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool with the default configuration.
    pub fn new(queue: JobQueue, registry: SharedJobRegistry) -> Self {
        Self::with_config(queue, registry, WorkerPoolConfig::default())
    }

    /// Create a pool with custom configuration.
    pub fn with_config(
        queue: JobQueue,
        registry: SharedJobRegistry,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            config,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker loops.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!(worker_id = %self.config.worker_id, "worker pool already started");
            return;
        }

        info!(
            worker_id = %self.config.worker_id,
            workers = self.config.workers,
            "worker pool starting"
        );

        for index in 0..self.config.workers {
            let worker = Worker {
                store: self.queue.store(),
                registry: self.registry.clone(),
                backoff: self.queue.backoff(),
                config: self.config.clone(),
                shutdown: self.shutdown.clone(),
                label: format!("{}-{}", self.config.worker_id, index),
            };
            handles.push(tokio::spawn(worker.run()));
        }
    }

    /// Stop claiming new jobs and wait for in-flight handlers to return.
    ///
    /// Bounded by `shutdown_timeout`; workers still running after that are
    /// abandoned, never killed mid-handler.
    pub async fn stop(&self) {
        info!(worker_id = %self.config.worker_id, "worker pool stopping");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        if handles.is_empty() {
            return;
        }

        let drain = futures::future::join_all(handles);
        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(worker_id = %self.config.worker_id, error = %e, "worker task failed");
                    }
                }
                info!(worker_id = %self.config.worker_id, "worker pool stopped");
            }
            Err(_) => {
                warn!(
                    worker_id = %self.config.worker_id,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "shutdown timeout elapsed; abandoning in-flight workers"
                );
            }
        }
    }
}

/// One worker loop. Owns clones of everything it needs so it can run as a
/// detached task.
struct Worker {
    store: Arc<dyn JobStore>,
    registry: SharedJobRegistry,
    backoff: BackoffPolicy,
    config: WorkerPoolConfig,
    shutdown: CancellationToken,
    label: String,
}

impl Worker {
    async fn run(self) {
        debug!(worker = %self.label, "worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.store.dequeue(self.config.poll_interval).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    // Poll window elapsed without work; loop re-checks shutdown.
                }
                Err(e) => {
                    warn!(worker = %self.label, error = %e, "dequeue failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        }

        debug!(worker = %self.label, "worker stopped");
    }

    async fn process(&self, mut job: Job) {
        let handler = match self.registry.resolve(&job.job_type) {
            Some(handler) => handler,
            None => {
                // Configuration error, not a transient one: fail immediately,
                // no retry.
                error!(
                    worker = %self.label,
                    job_id = %job.id,
                    job_type = %job.job_type,
                    "no handler registered"
                );
                job.fail(format!("no handler registered for job type {}", job.job_type));
                self.persist(&job).await;
                return;
            }
        };

        job.mark_processing();
        self.persist(&job).await;

        let attempt = job.retries + 1;
        debug!(
            worker = %self.label,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt,
            "job started"
        );

        match self.invoke(handler.as_ref(), &job).await {
            Ok(()) => {
                job.complete();
                self.persist(&job).await;
                debug!(worker = %self.label, job_id = %job.id, job_type = %job.job_type, "job completed");
            }
            Err(e) => {
                let message = e.to_string();
                if job.can_retry() {
                    let delay = self.backoff.delay_for(job.retries);
                    job.prepare_retry();
                    warn!(
                        worker = %self.label,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        error = %message,
                        retries = job.retries,
                        delay_ms = delay.as_millis() as u64,
                        "job failed, retrying"
                    );
                    if let Err(e) = self.store.requeue(&job, delay).await {
                        error!(worker = %self.label, job_id = %job.id, error = %e, "failed to requeue job");
                    }
                } else {
                    job.fail(message.as_str());
                    error!(
                        worker = %self.label,
                        job_id = %job.id,
                        job_type = %job.job_type,
                        error = %message,
                        retries = job.retries,
                        "job failed permanently"
                    );
                    self.persist(&job).await;
                }
            }
        }
    }

    /// Run the handler under the per-job deadline, converting panics into
    /// ordinary failures so one bad job cannot kill the worker loop.
    async fn invoke(&self, handler: &dyn JobHandler, job: &Job) -> anyhow::Result<()> {
        let cancel = self.shutdown.child_token();
        let fut = AssertUnwindSafe(handler.handle(job, cancel)).catch_unwind();
        match tokio::time::timeout(self.config.job_timeout, fut).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(anyhow!("handler panicked: {}", panic_message(&panic))),
            Err(_) => Err(anyhow!(
                "handler exceeded deadline of {}ms",
                self.config.job_timeout.as_millis()
            )),
        }
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.update(job).await {
            error!(worker = %self.label, job_id = %job.id, error = %e, "failed to persist job status");
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "opaque panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::Map;
    use tokio::sync::Notify;

    use crate::job::JobStatus;
    use crate::memory::InMemoryJobStore;
    use crate::registry::JobRegistry;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    /// Handler that fails the first `fail_times` invocations, then succeeds.
    struct FlakyHandler {
        job_type: &'static str,
        fail_times: u32,
        invocations: AtomicU32,
    }

    impl FlakyHandler {
        fn new(job_type: &'static str, fail_times: u32) -> Arc<Self> {
            Arc::new(Self {
                job_type,
                fail_times,
                invocations: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn job_type(&self) -> &str {
            self.job_type
        }

        async fn handle(&self, _job: &Job, _cancel: CancellationToken) -> anyhow::Result<()> {
            let attempt = self.invocations.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                anyhow::bail!("transient failure on attempt {}", attempt + 1);
            }
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        fn job_type(&self) -> &str {
            "explosive"
        }

        async fn handle(&self, _job: &Job, _cancel: CancellationToken) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    /// Handler that signals when it starts, then works for a while.
    struct SlowHandler {
        started: Arc<Notify>,
        work: Duration,
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        fn job_type(&self) -> &str {
            "slow"
        }

        async fn handle(&self, _job: &Job, _cancel: CancellationToken) -> anyhow::Result<()> {
            self.started.notify_one();
            tokio::time::sleep(self.work).await;
            Ok(())
        }
    }

    fn test_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: 2,
            poll_interval: Duration::from_millis(10),
            job_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(5),
            worker_id: "test".to_string(),
        }
    }

    fn test_pool(handlers: Vec<Arc<dyn JobHandler>>) -> (JobQueue, WorkerPool) {
        let queue =
            JobQueue::new(Arc::new(InMemoryJobStore::new())).with_backoff(BackoffPolicy::None);
        let mut registry = JobRegistry::new();
        for handler in handlers {
            registry.register(handler).unwrap();
        }
        let pool = WorkerPool::with_config(queue.clone(), Arc::new(registry), test_config());
        (queue, pool)
    }

    async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = queue.status(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for terminal status, last = {job:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn email_job_completes_after_two_transient_failures() {
        init_tracing();
        let handler = FlakyHandler::new("email", 2);
        let (queue, pool) = test_pool(vec![handler.clone() as Arc<dyn JobHandler>]);
        pool.start().await;

        let id = queue.enqueue("email", Map::new(), 3).await.unwrap();
        let job = wait_for_terminal(&queue, id).await;
        pool.stop().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retries, 2);
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_the_job_failed() {
        let handler = FlakyHandler::new("email", u32::MAX);
        let (queue, pool) = test_pool(vec![handler.clone() as Arc<dyn JobHandler>]);
        pool.start().await;

        let id = queue.enqueue("email", Map::new(), 2).await.unwrap();
        let job = wait_for_terminal(&queue, id).await;
        pool.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 2);
        // k retries means exactly k + 1 invocations.
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 3);
        assert!(job.error.unwrap().contains("transient failure"));
    }

    #[tokio::test]
    async fn successful_job_runs_exactly_once() {
        let handler = FlakyHandler::new("email", 0);
        let (queue, pool) = test_pool(vec![handler.clone() as Arc<dyn JobHandler>]);
        pool.start().await;

        let id = queue.enqueue("email", Map::new(), 3).await.unwrap();
        let job = wait_for_terminal(&queue, id).await;

        // Give the pool a moment to prove no extra invocations happen.
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.stop().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retries, 0);
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_fails_without_retry() {
        let (queue, pool) = test_pool(vec![]);
        pool.start().await;

        let id = queue.enqueue("unregistered", Map::new(), 5).await.unwrap();
        let job = wait_for_terminal(&queue, id).await;
        pool.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retries, 0);
        assert!(job.error.unwrap().contains("no handler registered"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_a_failure_and_spares_the_worker() {
        let (queue, pool) = test_pool(vec![Arc::new(PanickingHandler) as Arc<dyn JobHandler>]);
        pool.start().await;

        let id = queue.enqueue("explosive", Map::new(), 1).await.unwrap();
        let job = wait_for_terminal(&queue, id).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("panicked"));

        // The worker that caught the panic is still alive and processing.
        let survivor = queue.enqueue("explosive", Map::new(), 0).await.unwrap();
        let job = wait_for_terminal(&queue, survivor).await;
        pool.stop().await;
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn handler_deadline_is_enforced() {
        let started = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler {
            started: started.clone(),
            work: Duration::from_secs(30),
        });
        let queue =
            JobQueue::new(Arc::new(InMemoryJobStore::new())).with_backoff(BackoffPolicy::None);
        let mut registry = JobRegistry::new();
        registry.register(handler).unwrap();
        let config = WorkerPoolConfig {
            job_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let pool = WorkerPool::with_config(queue.clone(), Arc::new(registry), config);
        pool.start().await;

        let id = queue.enqueue("slow", Map::new(), 0).await.unwrap();
        let job = wait_for_terminal(&queue, id).await;
        pool.stop().await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("deadline"));
    }

    #[tokio::test]
    async fn stop_waits_for_the_in_flight_job() {
        let started = Arc::new(Notify::new());
        let handler = Arc::new(SlowHandler {
            started: started.clone(),
            work: Duration::from_millis(200),
        });
        let (queue, pool) = test_pool(vec![handler as Arc<dyn JobHandler>]);
        pool.start().await;

        let id = queue.enqueue("slow", Map::new(), 0).await.unwrap();
        started.notified().await;
        pool.stop().await;

        // The drain finished the job before stop() returned.
        let job = queue.status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn stopped_pool_claims_no_new_jobs() {
        let handler = FlakyHandler::new("email", 0);
        let (queue, pool) = test_pool(vec![handler.clone() as Arc<dyn JobHandler>]);
        pool.start().await;
        pool.stop().await;

        let id = queue.enqueue("email", Map::new(), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let job = queue.status(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(handler.invocations.load(Ordering::SeqCst), 0);
    }
}

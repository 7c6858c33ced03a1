//! In-process publish/subscribe bus with a bounded dispatch pool.
//!
//! # Guarantees
//!
//! - **Fire-and-forget**: events are never persisted; publishing with no
//!   subscribers drops the event. This is a deliberately weaker tier than
//!   the durable job queue and the two must not be conflated.
//! - **Backpressure, not loss**: `publish` blocks the publisher while the
//!   dispatch buffer is full instead of dropping the event.
//! - **Isolation**: a handler error or panic is logged and never reaches
//!   the publisher or sibling subscribers.
//! - **Graceful drain**: `stop` returns only after every already-published
//!   event has been delivered to every then-subscribed handler.
//!
//! # Ordering
//!
//! None. Two events published back-to-back may be handled out of order by
//! different dispatch workers, and a single handler is not pinned to one
//! worker.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::event::Event;
use crate::handler::EventHandler;

/// Default capacity of the dispatch buffer.
const DEFAULT_CAPACITY: usize = 1024;

/// Default number of dispatch workers.
const DEFAULT_WORKERS: usize = 4;

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Number of dispatch workers delivering events to handlers.
    pub dispatch_workers: usize,
    /// Capacity of the dispatch buffer; a full buffer blocks publishers.
    pub buffer_capacity: usize,
    /// Optional deadline per handler invocation.
    pub handler_timeout: Option<Duration>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dispatch_workers: DEFAULT_WORKERS,
            buffer_capacity: DEFAULT_CAPACITY,
            handler_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Stopped,
}

struct Subscription {
    handler_id: String,
    handler: Arc<dyn EventHandler>,
}

/// One delivery of one event to one handler.
struct DispatchTask {
    handler: Arc<dyn EventHandler>,
    event: Event,
}

struct State {
    phase: Phase,
    tx: Option<mpsc::Sender<DispatchTask>>,
    workers: Vec<JoinHandle<()>>,
}

/// In-process event bus.
///
/// Owned by the composition root and passed by `Arc` to publishers and
/// subscribers. Lifecycle: `Created → Started → Stopped`; subscriptions are
/// legal before and after `start`, publishes only while started.
pub struct EventBus {
    config: EventBusConfig,
    subscribers: RwLock<HashMap<String, Vec<Subscription>>>,
    state: Mutex<State>,
}

impl EventBus {
    /// Create a bus with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus with custom configuration.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            state: Mutex::new(State {
                phase: Phase::Created,
                tx: None,
                workers: Vec::new(),
            }),
        }
    }

    /// Spin up the dispatch workers and begin accepting publishes.
    pub async fn start(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Created => {}
            Phase::Started => return Err(BusError::AlreadyStarted),
            Phase::Stopped => return Err(BusError::Stopped),
        }

        let (tx, rx) = mpsc::channel(self.config.buffer_capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.config.dispatch_workers);
        for index in 0..self.config.dispatch_workers {
            workers.push(tokio::spawn(dispatch_loop(
                index,
                rx.clone(),
                self.config.handler_timeout,
            )));
        }

        state.tx = Some(tx);
        state.workers = workers;
        state.phase = Phase::Started;

        info!(
            workers = self.config.dispatch_workers,
            capacity = self.config.buffer_capacity,
            "event bus started"
        );
        Ok(())
    }

    /// Register `handler` under `event_type`.
    ///
    /// Legal while the bus is `Created` or `Started`. Subscribing the same
    /// handler twice is allowed and results in two invocations per event.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        if event_type.is_empty() {
            return Err(BusError::InvalidSubscription("empty event type"));
        }
        if handler.id().is_empty() {
            return Err(BusError::InvalidSubscription("empty handler id"));
        }
        self.reject_if_stopped().await?;

        let handler_id = handler.id().to_string();
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription {
                handler_id: handler_id.clone(),
                handler,
            });

        debug!(event_type, handler = %handler_id, "handler subscribed");
        Ok(())
    }

    /// Register `handler` under its own declared
    /// [`event_type`](EventHandler::event_type).
    pub async fn subscribe_handler(&self, handler: Arc<dyn EventHandler>) -> Result<(), BusError> {
        let event_type = handler.event_type().to_string();
        self.subscribe(&event_type, handler).await
    }

    /// Remove every subscription of `handler_id` under `event_type`.
    ///
    /// No-op when nothing matches.
    pub async fn unsubscribe(&self, event_type: &str, handler_id: &str) -> Result<(), BusError> {
        self.reject_if_stopped().await?;

        let mut subscribers = self.subscribers.write().await;
        if let Some(entries) = subscribers.get_mut(event_type) {
            entries.retain(|s| s.handler_id != handler_id);
            if entries.is_empty() {
                subscribers.remove(event_type);
            }
        }

        debug!(event_type, handler = %handler_id, "handler unsubscribed");
        Ok(())
    }

    /// Deliver `event` to every subscriber of its type, asynchronously.
    ///
    /// Submits one dispatch task per subscriber and returns without waiting
    /// for handler execution. Blocks only while the dispatch buffer is full
    /// (backpressure). Handler failures never propagate back here.
    pub async fn publish(&self, event: Event) -> Result<(), BusError> {
        let tx = {
            let state = self.state.lock().await;
            match state.phase {
                Phase::Created => return Err(BusError::NotStarted),
                Phase::Stopped => return Err(BusError::Stopped),
                Phase::Started => {}
            }
            match &state.tx {
                Some(tx) => tx.clone(),
                None => return Err(BusError::NotStarted),
            }
        };

        let event_type = event.event_type();

        // Snapshot under the read lock so a concurrent subscribe/unsubscribe
        // cannot invalidate the iteration; the lock is never held across an
        // await.
        let targets: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .get(event_type)
                .map(|entries| entries.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        if targets.is_empty() {
            debug!(event_type, "no subscribers; event dropped");
            return Ok(());
        }

        for handler in targets {
            let task = DispatchTask {
                handler,
                event: event.clone(),
            };
            if tx.send(task).await.is_err() {
                // All receivers are gone, so the bus stopped underneath us.
                return Err(BusError::Stopped);
            }
        }
        Ok(())
    }

    /// Stop accepting publishes, drain the dispatch buffer, and wait for
    /// every in-flight handler to return.
    ///
    /// Idempotent: stopping an already-stopped bus is a no-op.
    pub async fn stop(&self) {
        let (tx, workers) = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Stopped {
                return;
            }
            state.phase = Phase::Stopped;
            (state.tx.take(), std::mem::take(&mut state.workers))
        };

        // Dropping the last sender closes the channel; workers drain what is
        // already buffered and then exit.
        drop(tx);

        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatch worker failed");
            }
        }

        info!("event bus stopped");
    }

    /// Number of subscriptions currently registered for `event_type`.
    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }

    async fn reject_if_stopped(&self) -> Result<(), BusError> {
        if self.state.lock().await.phase == Phase::Stopped {
            return Err(BusError::Stopped);
        }
        Ok(())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One dispatch worker: pulls tasks off the shared buffer until the channel
/// closes, delivering each to its handler.
async fn dispatch_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<DispatchTask>>>,
    handler_timeout: Option<Duration>,
) {
    loop {
        // Only the receiver lock is shared; it is released before delivery
        // so other workers can pull the next task while this one runs.
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else { break };
        deliver(task, handler_timeout).await;
    }
    debug!(worker, "dispatch worker exiting");
}

/// Deliver one event to one handler, isolating errors, panics and overruns.
async fn deliver(task: DispatchTask, handler_timeout: Option<Duration>) {
    let DispatchTask { handler, event } = task;
    let event_type = event.event_type();
    let handler_id = handler.id().to_string();

    let fut = AssertUnwindSafe(handler.handle(event)).catch_unwind();
    let result = match handler_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    event_type,
                    handler = %handler_id,
                    timeout_ms = deadline.as_millis() as u64,
                    "event handler exceeded deadline"
                );
                return;
            }
        },
        None => fut.await,
    };

    match result {
        Ok(Ok(())) => {
            debug!(event_type, handler = %handler_id, "event handled");
        }
        Ok(Err(e)) => {
            error!(event_type, handler = %handler_id, error = %e, "event handler failed");
        }
        Err(_) => {
            error!(event_type, handler = %handler_id, "event handler panicked");
        }
    }
}

//! Event handler trait and helpers.

use std::future::Future;

use async_trait::async_trait;

use crate::event::Event;

/// A subscriber on the bus.
///
/// Handlers carry a stable [`id`](EventHandler::id) used as their
/// unsubscription identity, and declare the single
/// [`event_type`](EventHandler::event_type) they were constructed for. The
/// type declaration is registration convenience: the bus itself trusts
/// whatever type string the handler is subscribed under.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identity used by `unsubscribe`.
    fn id(&self) -> &str;

    /// The event type this handler consumes.
    fn event_type(&self) -> &str;

    /// Consume one event.
    ///
    /// Errors are logged by the bus and never reach the publisher; there is
    /// no redelivery.
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// Closure-backed handler.
///
/// Keeps the id/type bookkeeping in one place so tests and small
/// subscribers don't need a dedicated struct.
pub struct FnHandler<F> {
    id: String,
    event_type: String,
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.func)(event).await
    }
}

//! In-process publish/subscribe event bus.
//!
//! The same-process half of the async core: services publish immutable
//! domain facts, and every handler subscribed to that event type receives
//! them asynchronously through a bounded dispatch pool. Delivery is
//! fire-and-forget — nothing is persisted and there is no redelivery —
//! which keeps this deliberately distinct from the durable `jobqueue`
//! crate's at-least-once tier.
//!
//! # Example
//!
//! ```ignore
//! let bus = Arc::new(EventBus::new());
//! bus.subscribe("note.created", Arc::new(ReindexSearchHandler::new(deps)))
//!     .await?;
//! bus.start().await?;
//!
//! // Somewhere on the request path:
//! bus.publish(Event::NoteCreated { note_id, actor_id, occurred_at }).await?;
//!
//! // On shutdown, drains every published event first:
//! bus.stop().await;
//! ```

pub mod bus;
pub mod error;
pub mod event;
pub mod handler;

pub use bus::{EventBus, EventBusConfig};
pub use error::BusError;
pub use event::Event;
pub use handler::{EventHandler, FnHandler};

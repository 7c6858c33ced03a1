//! Structured error types for the event bus.

use thiserror::Error;

/// Errors returned by [`EventBus`](crate::bus::EventBus) operations.
///
/// Handler execution errors are never surfaced here: delivery is
/// fire-and-forget, so they are logged on the handler's own observability
/// path instead.
#[derive(Debug, Error)]
pub enum BusError {
    /// `publish` was called before `start`.
    ///
    /// Pre-start publishes are rejected, not buffered.
    #[error("event bus has not been started")]
    NotStarted,

    /// `start` was called on a bus that is already running.
    #[error("event bus is already started")]
    AlreadyStarted,

    /// The bus has been stopped and accepts no further operations.
    #[error("event bus is stopped")]
    Stopped,

    /// A subscription was rejected because its input was invalid.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_a_reason() {
        assert!(BusError::NotStarted.to_string().contains("not been started"));
        assert!(BusError::InvalidSubscription("empty event type")
            .to_string()
            .contains("empty event type"));
    }
}

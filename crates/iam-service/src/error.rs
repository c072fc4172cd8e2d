//! Service-layer error types.

use std::sync::Arc;

use iam_core::error::DomainError;
use iam_core::event::DomainEvent;
use thiserror::Error;

/// Errors raised while dispatching messages.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A domain or persistence failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// No handler is registered for the command type.
    #[error("no handler registered for command `{0}`")]
    UnregisteredCommand(&'static str),

    /// No handler is registered for the event topic.
    #[error("no handler registered for event `{0}`")]
    UnregisteredEvent(String),

    /// A handler that needs a unit of work was registered without one.
    #[error("handler `{0}` requires a unit of work")]
    UnitOfWorkRequired(&'static str),

    /// A handler received a message it cannot process.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// An event handler asked the bus to stop fanning out the current event.
    #[error("stop requested: {}", .0.message)]
    Stop(StopSentinel),
}

/// Raised by an event handler to skip the remaining handlers of the current
/// event, optionally queueing a replacement event.
#[derive(Debug, Clone)]
pub struct StopSentinel {
    /// Why handling stopped.
    pub message: String,
    /// Event queued in place of the remaining fan-out.
    pub fallback: Option<Arc<dyn DomainEvent>>,
}

impl StopSentinel {
    /// A stop signal without a fallback event.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fallback: None,
        }
    }

    /// Queues `event` once the bus has stopped the current fan-out.
    #[must_use]
    pub fn with_fallback(mut self, event: Arc<dyn DomainEvent>) -> Self {
        self.fallback = Some(event);
        self
    }
}

impl From<StopSentinel> for ServiceError {
    fn from(stop: StopSentinel) -> Self {
        Self::Stop(stop)
    }
}

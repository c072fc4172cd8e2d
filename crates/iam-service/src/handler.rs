//! Handler contracts for the message bus.

use std::sync::Arc;

use async_trait::async_trait;
use iam_core::event::DomainEvent;

use crate::error::ServiceError;
use crate::unit_of_work::UnitOfWork;

/// Whether a handler is given the run's unit of work.
///
/// Declared once at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UowRequirement {
    /// The handler receives `Some(uow)`.
    Required,
    /// The handler receives `None`.
    NotRequired,
}

impl UowRequirement {
    /// Lends `uow` to the handler if the registration asked for it.
    pub fn grant(self, uow: &mut UnitOfWork) -> Option<&mut UnitOfWork> {
        match self {
            Self::Required => Some(uow),
            Self::NotRequired => None,
        }
    }
}

/// Handles one command type and produces a result for the caller.
#[async_trait]
pub trait CommandHandler<C, R>: Send + Sync {
    /// Handles `command`.
    ///
    /// # Errors
    ///
    /// Any error aborts the whole message-bus run.
    async fn handle(&self, command: C, uow: Option<&mut UnitOfWork>) -> Result<R, ServiceError>;
}

/// Reacts to an event topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles `event`.
    ///
    /// # Errors
    ///
    /// `ServiceError::Stop` skips the remaining handlers of the event. Other
    /// errors are logged by the bus and do not abort the run.
    async fn handle(
        &self,
        event: Arc<dyn DomainEvent>,
        uow: Option<&mut UnitOfWork>,
    ) -> Result<(), ServiceError>;
}

/// Unwraps the unit of work of a handler registered with
/// [`UowRequirement::Required`].
///
/// # Errors
///
/// Returns `ServiceError::UnitOfWorkRequired` when the handler was
/// registered without one.
pub fn require_uow<'a>(
    uow: Option<&'a mut UnitOfWork>,
    handler: &'static str,
) -> Result<&'a mut UnitOfWork, ServiceError> {
    uow.ok_or(ServiceError::UnitOfWorkRequired(handler))
}

//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No event has ever been stored for the aggregate.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// An event did not directly follow the aggregate's current version.
    #[error("version conflict on aggregate {aggregate_id}: got version {got}, expected {expected}")]
    Version {
        /// The aggregate the event was applied to.
        aggregate_id: Uuid,
        /// Version carried by the event.
        got: i64,
        /// Version the aggregate was ready to accept.
        expected: i64,
    },

    /// An event was replayed onto something that is not an aggregate.
    #[error("not an aggregate: {0}")]
    NotAggregate(String),

    /// The store rejected an append.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A value has no registered transcoding.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A topic has no registered type, or a type has no registered topic.
    #[error("topic resolution failed: {0}")]
    TopicResolution(String),

    /// A payload could not be decoded into the requested shape.
    #[error("transcoding error: {0}")]
    Transcoding(String),

    /// A command is not allowed in the aggregate's current situation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

//! Contracts of the transactional event store.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;

/// An event as written to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// String form of the aggregate id.
    pub id: String,
    /// Version within the aggregate stream.
    pub version: i64,
    /// Resolver topic of the event type.
    pub topic: String,
    /// Encoded, optionally compressed and encrypted payload.
    pub state: Vec<u8>,
}

/// A stored event together with its position in the global log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Global monotonic sequence number assigned by the store.
    pub notification_id: i64,
    /// The stored event.
    pub stored: StoredEvent,
}

/// A staged outbound event awaiting external publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutBox {
    /// Row id, generated on write.
    pub id: Uuid,
    /// Aggregate the event belongs to.
    pub aggregate_id: Uuid,
    /// Resolver topic of the event type.
    pub topic: String,
    /// Encoded payload, including the event version.
    pub state: Vec<u8>,
    /// Set by the publisher once delivered.
    pub processed: bool,
}

/// Checks a page size passed to [`Recorder::select_notifications`] or
/// [`OutboxRecorder::unprocessed_outbox`]. Every store calls this first.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a negative `limit`.
pub fn page_limit(limit: i64) -> Result<usize, DomainError> {
    usize::try_from(limit).map_err(|_| {
        DomainError::Validation(format!("page limit must not be negative, got {limit}"))
    })
}

/// Append-only access to the event log inside one transaction.
#[async_trait]
pub trait Recorder: Send {
    /// Appends `events` as one batch. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Integrity` if any (id, version) already exists
    /// or the store rejects the insert.
    async fn add(&mut self, events: Vec<StoredEvent>) -> Result<(), DomainError>;

    /// All events of one aggregate, by ascending version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the query fails.
    async fn get(&mut self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError>;

    /// Up to `limit` events with sequence number at least `start`, in
    /// sequence order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a negative `limit` and
    /// `DomainError::Infrastructure` if the query fails.
    async fn select_notifications(
        &mut self,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, DomainError>;

    /// Highest sequence number in the log, or 0 when it is empty.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the query fails.
    async fn max_notification_id(&mut self) -> Result<i64, DomainError>;
}

/// Outbox table access inside one transaction.
#[async_trait]
pub trait OutboxRecorder: Send {
    /// Stages outbox rows. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Integrity` if the store rejects the insert.
    async fn add_outbox(&mut self, rows: Vec<OutBox>) -> Result<(), DomainError>;

    /// Up to `limit` unprocessed rows, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a negative `limit` and
    /// `DomainError::Infrastructure` if the query fails.
    async fn unprocessed_outbox(&mut self, limit: i64) -> Result<Vec<OutBox>, DomainError>;

    /// Flags rows as delivered. Returns how many rows changed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the update fails.
    async fn mark_processed(&mut self, ids: &[Uuid]) -> Result<u64, DomainError>;
}

/// One open transaction against the store.
///
/// Dropping a session without calling [`EventSession::commit`] discards
/// everything written through it.
#[async_trait]
pub trait EventSession: Recorder + OutboxRecorder {
    /// Makes every write of this session durable atomically.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Integrity` or `DomainError::Infrastructure` if
    /// the commit fails, in which case nothing was written.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    /// Discards every write of this session.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store fails to roll back.
    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

/// Opens transactions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if no transaction can be opened.
    async fn begin(&self) -> Result<Box<dyn EventSession>, DomainError>;
}

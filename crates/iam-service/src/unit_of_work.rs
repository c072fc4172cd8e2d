//! Unit of work: one transaction and the backlogs it produces.
//!
//! [`UnitOfWork::begin`] opens a transaction and binds the repositories to
//! it. The returned [`OpenUnitOfWork`] must be committed explicitly; when it
//! is dropped without a commit, including on early return through `?`, the
//! transaction rolls back and its pending backlogs are discarded.
//!
//! On commit, the external backlog is written to the outbox in the same
//! transaction as the events, and the internal backlog is released to the
//! [`UnitOfWork`], where the message bus collects it.

use std::collections::VecDeque;
use std::sync::Arc;

use iam_core::aggregate::Aggregate;
use iam_core::error::DomainError;
use iam_core::event::DomainEvent;
use iam_core::mapper::Mapper;
use iam_core::repository::{EventSession, Notification, SessionFactory};
use tracing::{debug, info, warn};

use crate::repository::{EventStoreProxy, Outboxes, Repository};

/// Which propagation queue to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklogKind {
    /// Events fed back into the message bus.
    Internal,
    /// Events staged in the outbox.
    External,
}

/// Pending notifiable events, one FIFO queue per kind.
#[derive(Debug, Default)]
pub struct Backlogs {
    internal: VecDeque<Arc<dyn DomainEvent>>,
    external: VecDeque<Arc<dyn DomainEvent>>,
}

impl Backlogs {
    /// Queues `event` on every backlog its flags select.
    pub fn push(&mut self, event: Arc<dyn DomainEvent>) {
        let metadata = event.metadata();
        let (internal, external) = (metadata.internally_notifiable, metadata.externally_notifiable);
        if internal {
            self.internal.push_back(Arc::clone(&event));
        }
        if external {
            self.external.push_back(event);
        }
    }

    /// Drains one queue in insertion order.
    pub fn drain(&mut self, kind: BacklogKind) -> Vec<Arc<dyn DomainEvent>> {
        match kind {
            BacklogKind::Internal => self.internal.drain(..).collect(),
            BacklogKind::External => self.external.drain(..).collect(),
        }
    }

    /// Moves every event of `other` behind the events already queued here.
    pub fn append(&mut self, other: &mut Self) {
        self.internal.append(&mut other.internal);
        self.external.append(&mut other.external);
    }

    /// Returns `true` if both queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }
}

/// Scope for the transactions of one message-bus run.
pub struct UnitOfWork {
    factory: Arc<dyn SessionFactory>,
    mapper: Arc<Mapper>,
    released: Backlogs,
}

impl UnitOfWork {
    /// Creates an idle unit of work.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, mapper: Arc<Mapper>) -> Self {
        Self {
            factory,
            mapper,
            released: Backlogs::default(),
        }
    }

    /// The mapper shared by every repository.
    #[must_use]
    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    /// Opens a transaction and binds the repositories to it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store cannot begin a
    /// transaction.
    pub async fn begin(&mut self) -> Result<OpenUnitOfWork<'_>, DomainError> {
        let session = self.factory.begin().await?;
        debug!("unit of work opened");
        Ok(OpenUnitOfWork {
            session,
            events: EventStoreProxy::new(Arc::clone(&self.mapper)),
            mapper: Arc::clone(&self.mapper),
            released: &mut self.released,
            guard: RollbackGuard { armed: true },
        })
    }

    /// Drains the backlog released by committed transactions.
    pub fn collect_backlogs(&mut self, kind: BacklogKind) -> Vec<Arc<dyn DomainEvent>> {
        self.released.drain(kind)
    }
}

struct RollbackGuard {
    armed: bool,
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("unit of work closed without commit, rolling back");
        }
    }
}

/// An open transaction with its bound repositories.
///
/// Repository order for backlog collection is fixed: the shared event-store
/// proxy behind every aggregate repository, then the outbox, which produces
/// no backlog of its own.
pub struct OpenUnitOfWork<'u> {
    session: Box<dyn EventSession>,
    events: EventStoreProxy,
    mapper: Arc<Mapper>,
    released: &'u mut Backlogs,
    guard: RollbackGuard,
}

impl OpenUnitOfWork<'_> {
    /// Repository for aggregates of type `A`.
    ///
    /// Every repository of one unit of work shares the same event-store
    /// proxy, so their backlogs land in the same queues.
    pub fn repository<A: Aggregate>(&mut self) -> Repository<'_, A> {
        Repository::new(&mut self.events, &mut *self.session)
    }

    /// The outbox repository.
    pub fn outboxes(&mut self) -> Outboxes<'_> {
        Outboxes::new(&mut *self.session, &self.mapper)
    }

    /// Drains a backlog produced in this transaction so far.
    pub fn collect_backlogs(&mut self, kind: BacklogKind) -> Vec<Arc<dyn DomainEvent>> {
        self.events.backlogs.drain(kind)
    }

    /// Up to `limit` stored events with sequence number at least `start`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the query fails.
    pub async fn select_notifications(
        &mut self,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, DomainError> {
        self.session.select_notifications(start, limit).await
    }

    /// Highest sequence number in the log, or 0 when it is empty.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the query fails.
    pub async fn max_notification_id(&mut self) -> Result<i64, DomainError> {
        self.session.max_notification_id().await
    }

    /// Stages the external backlog in the outbox and commits the transaction.
    /// The internal backlog is then released to the owning [`UnitOfWork`].
    ///
    /// # Errors
    ///
    /// Returns the mapping or store error that prevented the commit; the
    /// transaction is rolled back in that case.
    pub async fn commit(self) -> Result<(), DomainError> {
        let Self {
            mut session,
            mut events,
            mapper,
            released,
            mut guard,
        } = self;
        let external = events.backlogs.drain(BacklogKind::External);
        let staged = Outboxes::new(&mut *session, &mapper).add(&external).await?;
        session.commit().await?;
        guard.armed = false;
        released.append(&mut events.backlogs);
        info!(outbox_rows = staged, "unit of work committed");
        Ok(())
    }

    /// Discards every write of this transaction and its backlogs.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the store fails to roll back.
    pub async fn rollback(mut self) -> Result<(), DomainError> {
        self.guard.armed = false;
        debug!("unit of work rolled back");
        self.session.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iam_test_support::{FixedClock, InMemoryEventStore, TALLY_FLAGGED, Tally, tally_mapper};
    use uuid::Uuid;

    fn unit_of_work(store: &InMemoryEventStore) -> UnitOfWork {
        UnitOfWork::new(Arc::new(store.clone()), Arc::new(tally_mapper()))
    }

    #[tokio::test]
    async fn test_commit_writes_one_outbox_row_per_external_event() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut tally = Tally::open(None, "visits", &clock).unwrap();
        tally.count(2, &clock).unwrap();
        tally.publish(&clock).unwrap();
        tally.publish(&clock).unwrap();

        // Act
        let mut open = uow.begin().await.unwrap();
        open.repository::<Tally>().add(&mut tally).await.unwrap();
        open.commit().await.unwrap();

        // Assert
        assert_eq!(store.events().len(), 4);
        let outbox = store.outbox();
        assert_eq!(outbox.len(), 2);
        assert!(outbox.iter().all(|row| row.aggregate_id == tally.id() && !row.processed));
        assert!(uow.collect_backlogs(BacklogKind::External).is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_commit_writes_nothing() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut tally = Tally::open(None, "visits", &clock).unwrap();
        tally.flag("late", &clock).unwrap();
        tally.publish(&clock).unwrap();

        // Act
        {
            let mut open = uow.begin().await.unwrap();
            open.repository::<Tally>().add(&mut tally).await.unwrap();
        }

        // Assert
        assert!(store.events().is_empty());
        assert!(store.outbox().is_empty());
        assert_eq!(store.rollbacks(), 1);
        assert!(uow.collect_backlogs(BacklogKind::Internal).is_empty());
    }

    #[tokio::test]
    async fn test_internal_backlog_is_released_once_in_order_without_outbox_rows() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut tally = Tally::open(None, "visits", &clock).unwrap();
        tally.flag("first", &clock).unwrap();
        tally.flag("second", &clock).unwrap();
        let mut open = uow.begin().await.unwrap();
        open.repository::<Tally>().add(&mut tally).await.unwrap();
        open.commit().await.unwrap();

        // Act
        let first = uow.collect_backlogs(BacklogKind::Internal);
        let second = uow.collect_backlogs(BacklogKind::Internal);

        // Assert
        let versions: Vec<i64> = first.iter().map(|e| e.metadata().version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert!(first.iter().all(|e| e.topic() == TALLY_FLAGGED));
        assert!(second.is_empty());
        assert!(store.outbox().is_empty());
    }

    #[tokio::test]
    async fn test_open_backlog_can_be_collected_before_commit() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut tally = Tally::open(None, "visits", &clock).unwrap();
        tally.flag("now", &clock).unwrap();
        let mut open = uow.begin().await.unwrap();
        open.repository::<Tally>().add(&mut tally).await.unwrap();

        // Act
        let collected = open.collect_backlogs(BacklogKind::Internal);
        open.commit().await.unwrap();

        // Assert
        assert_eq!(collected.len(), 1);
        assert!(uow.collect_backlogs(BacklogKind::Internal).is_empty());
    }

    #[tokio::test]
    async fn test_get_replays_committed_aggregate() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut tally = Tally::open(None, "visits", &clock).unwrap();
        tally.count(3, &clock).unwrap();
        tally.flag("kept", &clock).unwrap();
        let mut open = uow.begin().await.unwrap();
        open.repository::<Tally>().add(&mut tally).await.unwrap();
        open.commit().await.unwrap();

        // Act
        let mut open = uow.begin().await.unwrap();
        let loaded = open.repository::<Tally>().get(tally.id()).await.unwrap();
        open.rollback().await.unwrap();

        // Assert
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.total, 3);
        assert_eq!(loaded.notes, vec!["kept".to_owned()]);
        assert_eq!(loaded.label, "visits");
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_not_found() {
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let id = Uuid::new_v4();

        let mut open = uow.begin().await.unwrap();
        let result = open.repository::<Tally>().get(id).await;

        match result {
            Err(DomainError::AggregateNotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_writer_hits_integrity_error() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut tally = Tally::open(None, "visits", &clock).unwrap();
        let mut open = uow.begin().await.unwrap();
        open.repository::<Tally>().add(&mut tally).await.unwrap();
        open.commit().await.unwrap();

        let mut first_uow = unit_of_work(&store);
        let mut second_uow = unit_of_work(&store);
        let mut first = first_uow.begin().await.unwrap();
        let mut second = second_uow.begin().await.unwrap();
        let mut a = first.repository::<Tally>().get(tally.id()).await.unwrap();
        let mut b = second.repository::<Tally>().get(tally.id()).await.unwrap();
        a.count(1, &clock).unwrap();
        b.count(5, &clock).unwrap();
        first.repository::<Tally>().add(&mut a).await.unwrap();
        first.commit().await.unwrap();

        // Act
        let result = second.repository::<Tally>().add(&mut b).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Integrity(_))));
        drop(second);
        assert_eq!(store.events().len(), 2);
    }

    #[tokio::test]
    async fn test_notifications_follow_global_sequence() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = unit_of_work(&store);
        let clock = FixedClock::standard();
        let mut first = Tally::open(None, "a", &clock).unwrap();
        let mut second = Tally::open(None, "b", &clock).unwrap();
        first.count(1, &clock).unwrap();
        let mut open = uow.begin().await.unwrap();
        open.repository::<Tally>().add(&mut first).await.unwrap();
        open.repository::<Tally>().add(&mut second).await.unwrap();
        open.commit().await.unwrap();

        // Act
        let mut open = uow.begin().await.unwrap();
        let page = open.select_notifications(2, 10).await.unwrap();
        let max = open.max_notification_id().await.unwrap();

        // Assert
        let ids: Vec<i64> = page.iter().map(|n| n.notification_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(page[1].stored.id, second.id().to_string());
        assert_eq!(max, 3);
    }
}

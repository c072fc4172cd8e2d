//! Transaction-scoped repositories.
//!
//! Every aggregate repository of a unit of work is a typed handle over the
//! same [`EventStoreProxy`]. The proxy maps aggregates to and from stored
//! events and keeps the backlog of notifiable events they produced.

use std::marker::PhantomData;
use std::sync::Arc;

use iam_core::aggregate::{self, Aggregate};
use iam_core::error::DomainError;
use iam_core::event::{DomainEvent, Event};
use iam_core::mapper::Mapper;
use iam_core::repository::{EventSession, OutBox};
use tracing::debug;
use uuid::Uuid;

use crate::unit_of_work::Backlogs;

/// The event log as seen from one unit of work.
#[derive(Debug)]
pub struct EventStoreProxy {
    mapper: Arc<Mapper>,
    pub(crate) backlogs: Backlogs,
}

impl EventStoreProxy {
    pub(crate) fn new(mapper: Arc<Mapper>) -> Self {
        Self {
            mapper,
            backlogs: Backlogs::default(),
        }
    }

    async fn add<A: Aggregate>(
        &mut self,
        session: &mut dyn EventSession,
        aggregate: &mut A,
    ) -> Result<(), DomainError> {
        let pending = aggregate.collect();
        if pending.is_empty() {
            return Ok(());
        }
        let stored = pending
            .iter()
            .map(|event| self.mapper.domain_event_to_stored(event))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            aggregate_id = %aggregate.id(),
            aggregate = A::TOPIC,
            count = stored.len(),
            "appending events"
        );
        session.add(stored).await?;
        for event in pending {
            self.backlogs.push(Arc::new(event));
        }
        Ok(())
    }

    async fn get<A: Aggregate>(
        &self,
        session: &mut dyn EventSession,
        aggregate_id: Uuid,
    ) -> Result<A, DomainError> {
        let stored = session.get(aggregate_id).await?;
        let events = stored
            .iter()
            .map(|record| {
                self.mapper
                    .stored_to_domain_event(record)
                    .and_then(Event::<A::Kind>::downcast)
            })
            .collect::<Result<Vec<_>, _>>()?;
        aggregate::replay::<A, _>(events)?.ok_or(DomainError::AggregateNotFound(aggregate_id))
    }
}

/// Typed handle for one aggregate type over the shared event-store proxy.
pub struct Repository<'a, A> {
    proxy: &'a mut EventStoreProxy,
    session: &'a mut dyn EventSession,
    aggregate: PhantomData<fn() -> A>,
}

impl<'a, A: Aggregate> Repository<'a, A> {
    pub(crate) fn new(proxy: &'a mut EventStoreProxy, session: &'a mut dyn EventSession) -> Self {
        Self {
            proxy,
            session,
            aggregate: PhantomData,
        }
    }

    /// Appends the aggregate's pending events and queues the notifiable ones
    /// in the unit-of-work backlog.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Integrity` if another writer already stored one
    /// of the versions, and mapping errors for unregistered event types.
    pub async fn add(&mut self, aggregate: &mut A) -> Result<(), DomainError> {
        self.proxy.add(&mut *self.session, aggregate).await
    }

    /// Rebuilds an aggregate from its stored events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the id has no events, and
    /// `DomainError::Version` or `DomainError::NotAggregate` for a corrupt
    /// stream.
    pub async fn get(&mut self, aggregate_id: Uuid) -> Result<A, DomainError> {
        self.proxy.get(&mut *self.session, aggregate_id).await
    }
}

/// Handle over the outbox table of one unit of work.
pub struct Outboxes<'a> {
    session: &'a mut dyn EventSession,
    mapper: &'a Mapper,
}

impl<'a> Outboxes<'a> {
    pub(crate) fn new(session: &'a mut dyn EventSession, mapper: &'a Mapper) -> Self {
        Self { session, mapper }
    }

    /// Stages one outbox row per event. Returns the number of rows.
    ///
    /// # Errors
    ///
    /// Returns mapping errors for unregistered event types and
    /// `DomainError::Integrity` if the store rejects the rows.
    pub async fn add(&mut self, events: &[Arc<dyn DomainEvent>]) -> Result<usize, DomainError> {
        let rows = events
            .iter()
            .map(|event| self.mapper.domain_event_to_outbox(event.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let count = rows.len();
        if count > 0 {
            self.session.add_outbox(rows).await?;
        }
        Ok(count)
    }

    /// Up to `limit` rows still waiting for the publisher, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the query fails.
    pub async fn unprocessed(&mut self, limit: i64) -> Result<Vec<OutBox>, DomainError> {
        self.session.unprocessed_outbox(limit).await
    }

    /// Flags rows as delivered.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the update fails.
    pub async fn mark_processed(&mut self, ids: &[Uuid]) -> Result<u64, DomainError> {
        self.session.mark_processed(ids).await
    }
}

//! Aggregate root trait and the create/trigger/mutate/collect protocol.
//!
//! Aggregates never change their fields directly. Every change is an event
//! stamped with the next version and applied through [`mutate`], which
//! enforces strict version sequencing before calling the aggregate's
//! [`Aggregate::apply`] hook. Events applied this way are also queued as
//! pending until [`Aggregate::collect`] hands them to a repository.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{Event, EventKind, EventMetadata};

/// State shared by every aggregate: identity, version, timestamps and the
/// pending-events queue.
#[derive(Debug, Clone)]
pub struct AggregateRoot<K> {
    id: Uuid,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pending: VecDeque<Event<K>>,
}

impl<K: EventKind> AggregateRoot<K> {
    /// Builds the root described by a creation event.
    #[must_use]
    pub fn from_created(metadata: &EventMetadata) -> Self {
        Self {
            id: metadata.aggregate_id,
            version: metadata.version,
            created_at: metadata.occurred_at,
            updated_at: metadata.occurred_at,
            pending: VecDeque::new(),
        }
    }

    /// Aggregate id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Version of the last applied event.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Timestamp of the creation event.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Timestamp of the last applied event.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Events triggered but not yet collected, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &Event<K>> {
        self.pending.iter()
    }
}

/// Trait that all aggregate roots implement.
pub trait Aggregate: Sized + Send + Sync + 'static {
    /// The events this aggregate produces and consumes.
    type Kind: EventKind;

    /// Topic of the aggregate type itself.
    const TOPIC: &'static str;

    /// Shared root state.
    fn root(&self) -> &AggregateRoot<Self::Kind>;

    /// Shared root state, mutably.
    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Kind>;

    /// Constructs a brand-new aggregate from its creation event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotAggregate` if `event` is not this aggregate's
    /// creation event.
    fn from_created(event: &Event<Self::Kind>) -> Result<Self, DomainError>;

    /// Type-specific field mutation for a non-creation event.
    fn apply(&mut self, event: &Event<Self::Kind>);

    /// Aggregate id.
    fn id(&self) -> Uuid {
        self.root().id()
    }

    /// Version of the last applied event.
    fn version(&self) -> i64 {
        self.root().version()
    }

    /// Stamps `kind` with the next version, applies it and queues it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotAggregate` if `kind` is a creation event.
    fn trigger(&mut self, kind: Self::Kind, clock: &dyn Clock) -> Result<(), DomainError> {
        let metadata = EventMetadata::stamped(self.id(), self.version() + 1, clock.now(), &kind);
        let event = Event { metadata, kind };
        apply_next(self, &event)?;
        self.root_mut().pending.push_back(event);
        Ok(())
    }

    /// Drains the pending events in the order they were triggered.
    fn collect(&mut self) -> Vec<Event<Self::Kind>> {
        self.root_mut().pending.drain(..).collect()
    }
}

/// Creates a new aggregate from a creation event kind.
///
/// The aggregate gets `id`, or a fresh v4 id when none is supplied.
///
/// # Errors
///
/// Returns `DomainError::NotAggregate` if `kind` is not a creation event.
pub fn create<A: Aggregate>(
    id: Option<Uuid>,
    kind: A::Kind,
    clock: &dyn Clock,
) -> Result<A, DomainError> {
    let metadata = EventMetadata::stamped(id.unwrap_or_else(Uuid::new_v4), 1, clock.now(), &kind);
    let event = Event { metadata, kind };
    let mut aggregate = mutate::<A>(None, &event)?;
    aggregate.root_mut().pending.push_back(event);
    Ok(aggregate)
}

/// Applies `event` to `target`, or constructs the aggregate when there is no
/// target yet.
///
/// # Errors
///
/// Returns `DomainError::NotAggregate` when a non-creation event has no
/// target, and `DomainError::Version` when the event does not carry exactly
/// the next version.
pub fn mutate<A: Aggregate>(target: Option<A>, event: &Event<A::Kind>) -> Result<A, DomainError> {
    match target {
        None => {
            if !event.kind.is_creation() {
                return Err(DomainError::NotAggregate(format!(
                    "`{}` at version {} needs an existing {}",
                    event.kind.topic(),
                    event.metadata.version,
                    A::TOPIC
                )));
            }
            if event.metadata.version != 1 {
                return Err(DomainError::Version {
                    aggregate_id: event.metadata.aggregate_id,
                    got: event.metadata.version,
                    expected: 1,
                });
            }
            A::from_created(event)
        }
        Some(mut aggregate) => {
            apply_next(&mut aggregate, event)?;
            Ok(aggregate)
        }
    }
}

fn apply_next<A: Aggregate>(aggregate: &mut A, event: &Event<A::Kind>) -> Result<(), DomainError> {
    let expected = aggregate.version() + 1;
    if event.metadata.version != expected {
        return Err(DomainError::Version {
            aggregate_id: aggregate.id(),
            got: event.metadata.version,
            expected,
        });
    }
    if event.kind.is_creation() {
        return Err(DomainError::NotAggregate(format!(
            "`{}` cannot be applied to existing {} {}",
            event.kind.topic(),
            A::TOPIC,
            aggregate.id()
        )));
    }
    if event.metadata.aggregate_id != aggregate.id() {
        return Err(DomainError::NotAggregate(format!(
            "event for {} applied to {} {}",
            event.metadata.aggregate_id,
            A::TOPIC,
            aggregate.id()
        )));
    }
    let root = aggregate.root_mut();
    root.version = expected;
    root.updated_at = event.metadata.occurred_at;
    aggregate.apply(event);
    Ok(())
}

/// Rebuilds an aggregate by folding `events` through [`mutate`] in order.
///
/// Returns `None` for an empty stream.
///
/// # Errors
///
/// Propagates the first `mutate` failure.
pub fn replay<A, I>(events: I) -> Result<Option<A>, DomainError>
where
    A: Aggregate,
    I: IntoIterator<Item = Event<A::Kind>>,
{
    events
        .into_iter()
        .try_fold(None, |target, event| mutate::<A>(target, &event).map(Some))
}

/// Checks that `topic` names the aggregate type `A`.
///
/// # Errors
///
/// Returns `DomainError::TopicResolution` on a mismatch.
pub fn ensure_topic<A: Aggregate>(topic: &str) -> Result<(), DomainError> {
    if topic == A::TOPIC {
        Ok(())
    } else {
        Err(DomainError::TopicResolution(format!(
            "`{topic}` does not resolve to {}",
            A::TOPIC
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::Fields;
    use chrono::TimeZone;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    #[derive(Debug, Clone)]
    enum CounterEvent {
        Opened { start: i64 },
        Added { amount: i64 },
        Noted,
    }

    impl EventKind for CounterEvent {
        fn topic(&self) -> &'static str {
            match self {
                Self::Opened { .. } => "test.counter.opened",
                Self::Added { .. } => "test.counter.added",
                Self::Noted => "test.counter.noted",
            }
        }

        fn is_creation(&self) -> bool {
            matches!(self, Self::Opened { .. })
        }

        fn to_fields(&self) -> Fields {
            match self {
                Self::Opened { start } => Fields::new().with("start", *start),
                Self::Added { amount } => Fields::new().with("amount", *amount),
                Self::Noted => Fields::new(),
            }
        }
    }

    #[derive(Debug)]
    struct Counter {
        root: AggregateRoot<CounterEvent>,
        total: i64,
    }

    impl Aggregate for Counter {
        type Kind = CounterEvent;
        const TOPIC: &'static str = "test.counter";

        fn root(&self) -> &AggregateRoot<CounterEvent> {
            &self.root
        }

        fn root_mut(&mut self) -> &mut AggregateRoot<CounterEvent> {
            &mut self.root
        }

        fn from_created(event: &Event<CounterEvent>) -> Result<Self, DomainError> {
            match event.kind {
                CounterEvent::Opened { start } => Ok(Self {
                    root: AggregateRoot::from_created(&event.metadata),
                    total: start,
                }),
                _ => Err(DomainError::NotAggregate("not a creation event".into())),
            }
        }

        fn apply(&mut self, event: &Event<CounterEvent>) {
            if let CounterEvent::Added { amount } = event.kind {
                self.total += amount;
            }
        }
    }

    fn event(id: Uuid, version: i64, kind: CounterEvent) -> Event<CounterEvent> {
        Event {
            metadata: EventMetadata::stamped(id, version, clock().now(), &kind),
            kind,
        }
    }

    #[test]
    fn test_create_builds_version_one_with_pending_creation_event() {
        // Arrange
        let id = Uuid::new_v4();

        // Act
        let counter =
            create::<Counter>(Some(id), CounterEvent::Opened { start: 5 }, &clock()).unwrap();

        // Assert
        assert_eq!(counter.id(), id);
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.total, 5);
        assert_eq!(counter.root().created_at(), clock().now());
        assert_eq!(counter.root().pending().count(), 1);
    }

    #[test]
    fn test_create_without_id_generates_one() {
        let a = create::<Counter>(None, CounterEvent::Opened { start: 0 }, &clock()).unwrap();
        let b = create::<Counter>(None, CounterEvent::Opened { start: 0 }, &clock()).unwrap();

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_trigger_advances_version_and_applies() {
        // Arrange
        let mut counter =
            create::<Counter>(None, CounterEvent::Opened { start: 1 }, &clock()).unwrap();

        // Act
        counter.trigger(CounterEvent::Added { amount: 2 }, &clock()).unwrap();
        counter.trigger(CounterEvent::Noted, &clock()).unwrap();

        // Assert
        assert_eq!(counter.version(), 3);
        assert_eq!(counter.total, 3);
    }

    #[test]
    fn test_collect_drains_in_trigger_order_exactly_once() {
        // Arrange
        let mut counter =
            create::<Counter>(None, CounterEvent::Opened { start: 0 }, &clock()).unwrap();
        counter.trigger(CounterEvent::Added { amount: 1 }, &clock()).unwrap();

        // Act
        let first = counter.collect();
        let second = counter.collect();

        // Assert
        let versions: Vec<i64> = first.iter().map(|e| e.metadata.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert!(second.is_empty());
    }

    #[test]
    fn test_replay_is_deterministic() {
        // Arrange
        let mut counter =
            create::<Counter>(None, CounterEvent::Opened { start: 10 }, &clock()).unwrap();
        counter.trigger(CounterEvent::Added { amount: 5 }, &clock()).unwrap();
        counter.trigger(CounterEvent::Added { amount: -3 }, &clock()).unwrap();
        let log = counter.collect();

        // Act
        let first = replay::<Counter, _>(log.clone()).unwrap().unwrap();
        let second = replay::<Counter, _>(log).unwrap().unwrap();

        // Assert
        assert_eq!(first.version(), 3);
        assert_eq!(first.total, 12);
        assert_eq!(second.total, first.total);
        assert_eq!(first.root().pending().count(), 0);
    }

    #[test]
    fn test_replay_of_empty_stream_is_none() {
        let result = replay::<Counter, _>(Vec::new()).unwrap();

        assert!(result.is_none());
    }

    #[test]
    fn test_mutate_rejects_version_gap() {
        // Arrange
        let id = Uuid::new_v4();
        let counter =
            mutate::<Counter>(None, &event(id, 1, CounterEvent::Opened { start: 0 })).unwrap();

        // Act
        let result = mutate(Some(counter), &event(id, 3, CounterEvent::Added { amount: 1 }));

        // Assert
        match result {
            Err(DomainError::Version { got, expected, .. }) => {
                assert_eq!(got, 3);
                assert_eq!(expected, 2);
            }
            other => panic!("expected Version error, got {other:?}"),
        }
    }

    #[test]
    fn test_mutate_rejects_replayed_version() {
        let id = Uuid::new_v4();
        let log = vec![
            event(id, 1, CounterEvent::Opened { start: 0 }),
            event(id, 2, CounterEvent::Added { amount: 1 }),
            event(id, 2, CounterEvent::Added { amount: 1 }),
        ];

        let result = replay::<Counter, _>(log);

        assert!(matches!(result, Err(DomainError::Version { got: 2, expected: 3, .. })));
    }

    #[test]
    fn test_mutate_without_target_rejects_non_creation_event() {
        let result = mutate::<Counter>(None, &event(Uuid::new_v4(), 1, CounterEvent::Noted));

        assert!(matches!(result, Err(DomainError::NotAggregate(_))));
    }

    #[test]
    fn test_mutate_without_target_rejects_late_creation_event() {
        let result =
            mutate::<Counter>(None, &event(Uuid::new_v4(), 2, CounterEvent::Opened { start: 0 }));

        assert!(matches!(result, Err(DomainError::Version { got: 2, expected: 1, .. })));
    }

    #[test]
    fn test_mutate_rejects_event_for_other_aggregate() {
        let counter =
            mutate::<Counter>(None, &event(Uuid::new_v4(), 1, CounterEvent::Opened { start: 0 }))
                .unwrap();

        let result = mutate(Some(counter), &event(Uuid::new_v4(), 2, CounterEvent::Noted));

        assert!(matches!(result, Err(DomainError::NotAggregate(_))));
    }

    #[test]
    fn test_ensure_topic_checks_aggregate_topic() {
        assert!(ensure_topic::<Counter>("test.counter").is_ok());
        assert!(matches!(
            ensure_topic::<Counter>("test.other"),
            Err(DomainError::TopicResolution(_))
        ));
    }
}

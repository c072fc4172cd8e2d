//! Tally: a minimal aggregate for exercising the service layer.
//!
//! `Flagged` is internally notifiable and `Published` is externally
//! notifiable, so a tally can produce every kind of backlog.

use iam_core::aggregate::{self, Aggregate, AggregateRoot};
use iam_core::clock::Clock;
use iam_core::error::DomainError;
use iam_core::event::{Event, EventKind, Payload};
use iam_core::mapper::Mapper;
use iam_core::topic::TopicResolver;
use iam_core::transcoder::{Fields, Transcoder};
use uuid::Uuid;

/// Topic of the tally aggregate.
pub const TALLY_TOPIC: &str = "tests.tally";

/// Topic of [`TallyEvent::Opened`].
pub const TALLY_OPENED: &str = "tests.tally.opened";
/// Topic of [`TallyEvent::Counted`].
pub const TALLY_COUNTED: &str = "tests.tally.counted";
/// Topic of [`TallyEvent::Flagged`].
pub const TALLY_FLAGGED: &str = "tests.tally.flagged";
/// Topic of [`TallyEvent::Published`].
pub const TALLY_PUBLISHED: &str = "tests.tally.published";

/// Payload for a tally being opened.
#[derive(Debug, Clone, PartialEq)]
pub struct Opened {
    pub label: String,
}

impl Payload for Opened {
    fn to_fields(&self) -> Fields {
        Fields::new().with("label", self.label.as_str())
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            label: fields.take("label")?,
        })
    }
}

/// Payload for a tally being incremented.
#[derive(Debug, Clone, PartialEq)]
pub struct Counted {
    pub by: i64,
}

impl Payload for Counted {
    fn to_fields(&self) -> Fields {
        Fields::new().with("by", self.by)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            by: fields.take("by")?,
        })
    }
}

/// Payload for a note that is fed back into the message bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Flagged {
    pub note: String,
}

impl Payload for Flagged {
    fn to_fields(&self) -> Fields {
        Fields::new().with("note", self.note.as_str())
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            note: fields.take("note")?,
        })
    }
}

/// Payload for a total that is staged in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub total: i64,
}

impl Payload for Published {
    fn to_fields(&self) -> Fields {
        Fields::new().with("total", self.total)
    }

    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            total: fields.take("total")?,
        })
    }
}

/// Events of the tally aggregate.
#[derive(Debug, Clone, PartialEq)]
pub enum TallyEvent {
    Opened(Opened),
    Counted(Counted),
    Flagged(Flagged),
    Published(Published),
}

impl EventKind for TallyEvent {
    fn topic(&self) -> &'static str {
        match self {
            Self::Opened(_) => TALLY_OPENED,
            Self::Counted(_) => TALLY_COUNTED,
            Self::Flagged(_) => TALLY_FLAGGED,
            Self::Published(_) => TALLY_PUBLISHED,
        }
    }

    fn is_creation(&self) -> bool {
        matches!(self, Self::Opened(_))
    }

    fn externally_notifiable(&self) -> bool {
        matches!(self, Self::Published(_))
    }

    fn internally_notifiable(&self) -> bool {
        matches!(self, Self::Flagged(_))
    }

    fn to_fields(&self) -> Fields {
        match self {
            Self::Opened(p) => p.to_fields(),
            Self::Counted(p) => p.to_fields(),
            Self::Flagged(p) => p.to_fields(),
            Self::Published(p) => p.to_fields(),
        }
    }
}

/// A labelled counter.
#[derive(Debug)]
pub struct Tally {
    root: AggregateRoot<TallyEvent>,
    pub label: String,
    pub total: i64,
    pub notes: Vec<String>,
}

impl Tally {
    /// Opens a new tally at zero.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature follows `aggregate::create`.
    pub fn open(id: Option<Uuid>, label: &str, clock: &dyn Clock) -> Result<Self, DomainError> {
        aggregate::create(
            id,
            TallyEvent::Opened(Opened {
                label: label.to_owned(),
            }),
            clock,
        )
    }

    /// Adds `by` to the total.
    ///
    /// # Errors
    ///
    /// Propagates version errors from `trigger`.
    pub fn count(&mut self, by: i64, clock: &dyn Clock) -> Result<(), DomainError> {
        self.trigger(TallyEvent::Counted(Counted { by }), clock)
    }

    /// Records a note that is propagated inside the message bus.
    ///
    /// # Errors
    ///
    /// Propagates version errors from `trigger`.
    pub fn flag(&mut self, note: &str, clock: &dyn Clock) -> Result<(), DomainError> {
        self.trigger(
            TallyEvent::Flagged(Flagged {
                note: note.to_owned(),
            }),
            clock,
        )
    }

    /// Announces the current total to external subscribers.
    ///
    /// # Errors
    ///
    /// Propagates version errors from `trigger`.
    pub fn publish(&mut self, clock: &dyn Clock) -> Result<(), DomainError> {
        let total = self.total;
        self.trigger(TallyEvent::Published(Published { total }), clock)
    }
}

impl Aggregate for Tally {
    type Kind = TallyEvent;
    const TOPIC: &'static str = TALLY_TOPIC;

    fn root(&self) -> &AggregateRoot<TallyEvent> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut AggregateRoot<TallyEvent> {
        &mut self.root
    }

    fn from_created(event: &Event<TallyEvent>) -> Result<Self, DomainError> {
        match &event.kind {
            TallyEvent::Opened(opened) => Ok(Self {
                root: AggregateRoot::from_created(&event.metadata),
                label: opened.label.clone(),
                total: 0,
                notes: Vec::new(),
            }),
            other => Err(DomainError::NotAggregate(format!(
                "`{}` does not create a tally",
                other.topic()
            ))),
        }
    }

    fn apply(&mut self, event: &Event<TallyEvent>) {
        match &event.kind {
            TallyEvent::Counted(counted) => self.total += counted.by,
            TallyEvent::Flagged(flagged) => self.notes.push(flagged.note.clone()),
            TallyEvent::Opened(_) | TallyEvent::Published(_) => {}
        }
    }
}

/// Registers the tally event factories.
pub fn register_tally_topics(resolver: &mut TopicResolver) {
    resolver
        .register(TALLY_OPENED, |fields| Event::decode(fields, TallyEvent::Opened))
        .register(TALLY_COUNTED, |fields| Event::decode(fields, TallyEvent::Counted))
        .register(TALLY_FLAGGED, |fields| Event::decode(fields, TallyEvent::Flagged))
        .register(TALLY_PUBLISHED, |fields| Event::decode(fields, TallyEvent::Published));
}

/// A mapper that understands tally events.
#[must_use]
pub fn tally_mapper() -> Mapper {
    let mut resolver = TopicResolver::new();
    register_tally_topics(&mut resolver);
    Mapper::new(Transcoder::new(), resolver)
}

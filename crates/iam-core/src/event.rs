//! Domain event abstractions.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::transcoder::Fields;

/// Field holding the aggregate id in a decoded event state.
pub const ID_FIELD: &str = "id";
/// Field holding the event version in a decoded event state.
pub const VERSION_FIELD: &str = "version";
/// Field holding the event timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";
/// Field holding the external propagation flag.
pub const EXTERNALLY_NOTIFIABLE_FIELD: &str = "externally_notifiable";
/// Field holding the internal propagation flag.
pub const INTERNALLY_NOTIFIABLE_FIELD: &str = "internally_notifiable";

/// Field names reserved for event metadata. Payloads must not use them.
pub const HEADER_FIELDS: [&str; 5] = [
    ID_FIELD,
    VERSION_FIELD,
    TIMESTAMP_FIELD,
    EXTERNALLY_NOTIFIABLE_FIELD,
    INTERNALLY_NOTIFIABLE_FIELD,
];

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Position in the aggregate's stream, starting at 1.
    pub version: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Whether the event is staged in the outbox on commit.
    pub externally_notifiable: bool,
    /// Whether the event is fed back into the message bus.
    pub internally_notifiable: bool,
}

impl EventMetadata {
    /// Stamps metadata for a freshly triggered event of `kind`.
    pub fn stamped<K: EventKind>(
        aggregate_id: Uuid,
        version: i64,
        occurred_at: DateTime<Utc>,
        kind: &K,
    ) -> Self {
        Self {
            aggregate_id,
            version,
            occurred_at,
            externally_notifiable: kind.externally_notifiable(),
            internally_notifiable: kind.internally_notifiable(),
        }
    }

    /// Writes the timestamp and propagation flags into the payload `fields`.
    ///
    /// Id and version are stored next to the payload, not inside it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` if the payload already uses one of
    /// the [`HEADER_FIELDS`].
    pub fn write_header(&self, fields: &mut Fields) -> Result<(), DomainError> {
        if let Some(name) = HEADER_FIELDS.iter().find(|name| fields.get(name).is_some()) {
            return Err(DomainError::Transcoding(format!(
                "payload field `{name}` is reserved for event metadata"
            )));
        }
        fields.insert(TIMESTAMP_FIELD, self.occurred_at);
        fields.insert(EXTERNALLY_NOTIFIABLE_FIELD, self.externally_notifiable);
        fields.insert(INTERNALLY_NOTIFIABLE_FIELD, self.internally_notifiable);
        Ok(())
    }

    /// Takes the metadata fields out of a decoded event state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` if id, version or timestamp is
    /// missing or mistyped. Absent flags default to `false`.
    pub fn take_from(fields: &mut Fields) -> Result<Self, DomainError> {
        Ok(Self {
            aggregate_id: fields.take(ID_FIELD)?,
            version: fields.take(VERSION_FIELD)?,
            occurred_at: fields.take(TIMESTAMP_FIELD)?,
            externally_notifiable: fields.take_or_default(EXTERNALLY_NOTIFIABLE_FIELD)?,
            internally_notifiable: fields.take_or_default(INTERNALLY_NOTIFIABLE_FIELD)?,
        })
    }
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + fmt::Debug + 'static {
    /// Topic identifying the concrete event type.
    fn topic(&self) -> &'static str;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// The event-specific payload fields.
    fn state(&self) -> Fields;

    /// Borrows the event for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Converts the boxed event for downcasting by value.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

/// Payload structs that can be written to and read from a field set.
pub trait Payload: Sized {
    /// Writes the payload fields.
    fn to_fields(&self) -> Fields;

    /// Reads the declared fields, leaving unknown ones behind.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` if a required field is missing or
    /// mistyped.
    fn from_fields(fields: &mut Fields) -> Result<Self, DomainError>;
}

/// The closed set of events one aggregate type produces.
pub trait EventKind: Clone + Send + Sync + fmt::Debug + 'static {
    /// Topic of this variant.
    fn topic(&self) -> &'static str;

    /// Whether this variant brings a new aggregate into existence.
    fn is_creation(&self) -> bool;

    /// Whether this variant is staged in the outbox.
    fn externally_notifiable(&self) -> bool {
        false
    }

    /// Whether this variant is fed back into the message bus.
    fn internally_notifiable(&self) -> bool {
        false
    }

    /// The payload of this variant.
    fn to_fields(&self) -> Fields;
}

/// Envelope pairing event metadata with one variant of an aggregate's events.
#[derive(Debug, Clone)]
pub struct Event<K> {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: K,
}

impl<K: EventKind> Event<K> {
    /// Rebuilds an event from a decoded state, wrapping its payload with
    /// `wrap`. This is the shape of every registered event factory.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Transcoding` if metadata or payload fields are
    /// missing or mistyped.
    pub fn decode<P: Payload>(
        mut fields: Fields,
        wrap: fn(P) -> K,
    ) -> Result<Box<dyn DomainEvent>, DomainError> {
        let metadata = EventMetadata::take_from(&mut fields)?;
        let payload = P::from_fields(&mut fields)?;
        Ok(Box::new(Self {
            metadata,
            kind: wrap(payload),
        }))
    }

    /// Downcasts a type-erased event back into this envelope.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotAggregate` if the event belongs to another
    /// aggregate type.
    pub fn downcast(event: Box<dyn DomainEvent>) -> Result<Self, DomainError> {
        let topic = event.topic();
        event.into_any().downcast::<Self>().map(|event| *event).map_err(|_| {
            DomainError::NotAggregate(format!(
                "event `{topic}` is not a {}",
                std::any::type_name::<K>()
            ))
        })
    }
}

impl<K: EventKind> DomainEvent for Event<K> {
    fn topic(&self) -> &'static str {
        self.kind.topic()
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn state(&self) -> Fields {
        self.kind.to_fields()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

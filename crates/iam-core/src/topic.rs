//! Topic resolution between stable type keys and event factories.

use std::collections::HashMap;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::transcoder::Fields;

/// Builds a concrete event from its decoded state.
pub type EventFactory = fn(Fields) -> Result<Box<dyn DomainEvent>, DomainError>;

/// Registry from topic strings to event factories.
///
/// Populated once during startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TopicResolver {
    factories: HashMap<&'static str, EventFactory>,
}

impl TopicResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `topic` with `factory`, replacing any earlier registration.
    pub fn register(&mut self, topic: &'static str, factory: EventFactory) -> &mut Self {
        self.factories.insert(topic, factory);
        self
    }

    /// Returns `true` if `topic` is registered.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.factories.contains_key(topic)
    }

    /// Looks up the factory for `topic`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TopicResolution` if the topic is unknown.
    pub fn resolve(&self, topic: &str) -> Result<EventFactory, DomainError> {
        self.factories
            .get(topic)
            .copied()
            .ok_or_else(|| DomainError::TopicResolution(format!("unknown topic `{topic}`")))
    }

    /// Returns the registered topic of `event`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TopicResolution` if the event's type was never
    /// registered, since it could not be read back.
    pub fn topic_of(&self, event: &dyn DomainEvent) -> Result<&'static str, DomainError> {
        let topic = event.topic();
        if self.contains(topic) {
            Ok(topic)
        } else {
            Err(DomainError::TopicResolution(format!(
                "event type with topic `{topic}` is not registered"
            )))
        }
    }

    /// Registered topics in no particular order.
    pub fn topics(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_factory(_: Fields) -> Result<Box<dyn DomainEvent>, DomainError> {
        Err(DomainError::Validation("factory called".into()))
    }

    #[test]
    fn test_resolve_unknown_topic_fails() {
        let resolver = TopicResolver::new();

        let result = resolver.resolve("iam.user.created");

        match result {
            Err(DomainError::TopicResolution(msg)) => assert!(msg.contains("iam.user.created")),
            other => panic!("expected TopicResolution, got {other:?}"),
        }
    }

    #[test]
    fn test_register_makes_topic_resolvable() {
        // Arrange
        let mut resolver = TopicResolver::new();

        // Act
        resolver.register("iam.user.created", failing_factory);
        let factory = resolver.resolve("iam.user.created").unwrap();

        // Assert
        assert!(resolver.contains("iam.user.created"));
        assert_eq!(resolver.topics().collect::<Vec<_>>(), vec!["iam.user.created"]);
        assert!(matches!(factory(Fields::new()), Err(DomainError::Validation(_))));
    }
}

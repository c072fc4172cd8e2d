//! Wiring for the identity context.
//!
//! Registration tables are built here once, explicitly, and handed to the
//! message bus. Nothing is global.

use std::sync::Arc;

use iam_core::clock::Clock;
use iam_core::mapper::Mapper;
use iam_core::repository::SessionFactory;
use iam_core::topic::TopicResolver;
use iam_core::transcoder::Transcoder;
use iam_service::handler::UowRequirement;
use iam_service::message_bus::MessageBus;
use uuid::Uuid;

use crate::application::command_handlers::IdentityCommandHandler;
use crate::application::event_handlers::CreateGroupOnRequest;
use crate::domain::commands::{CREATE_GROUP, CREATE_USER, EXECUTE_GROUP, EXECUTE_USER, IamCommand};
use crate::domain::events::{self, USER_CREATE_GROUP_REQUESTED};

/// A resolver knowing every identity event topic.
#[must_use]
pub fn topic_resolver() -> TopicResolver {
    let mut resolver = TopicResolver::new();
    events::register_topics(&mut resolver);
    resolver
}

/// The mapper used by every identity repository.
#[must_use]
pub fn mapper() -> Mapper {
    Mapper::new(Transcoder::new(), topic_resolver())
}

/// A message bus routing every [`IamCommand`] and the identity event
/// policies.
#[must_use]
pub fn message_bus(
    factory: Arc<dyn SessionFactory>,
    mapper: Arc<Mapper>,
    clock: Arc<dyn Clock>,
) -> MessageBus<IamCommand, Uuid> {
    let commands = || IdentityCommandHandler::new(Arc::clone(&clock));
    MessageBus::new(factory, mapper)
        .register_command(CREATE_USER, UowRequirement::Required, commands())
        .register_command(CREATE_GROUP, UowRequirement::Required, commands())
        .register_command(EXECUTE_USER, UowRequirement::Required, commands())
        .register_command(EXECUTE_GROUP, UowRequirement::Required, commands())
        .register_event(
            USER_CREATE_GROUP_REQUESTED,
            UowRequirement::Required,
            CreateGroupOnRequest::new(Arc::clone(&clock)),
        )
}

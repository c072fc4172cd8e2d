//! Event policies for the identity context.

use std::sync::Arc;

use async_trait::async_trait;
use iam_core::aggregate::Aggregate;
use iam_core::clock::Clock;
use iam_core::event::DomainEvent;
use iam_service::error::ServiceError;
use iam_service::handler::{EventHandler, require_uow};
use iam_service::unit_of_work::UnitOfWork;
use tracing::info;

use crate::application::repositories::IdentityRepositories;
use crate::domain::aggregates::Group;
use crate::domain::commands::CreateGroup;
use crate::domain::events::{UserEvent, UserEventKind};

const HANDLER: &str = "CreateGroupOnRequest";

/// Founds the group a user asked for, under the id reserved in the request.
pub struct CreateGroupOnRequest {
    clock: Arc<dyn Clock>,
}

impl CreateGroupOnRequest {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl EventHandler for CreateGroupOnRequest {
    async fn handle(
        &self,
        event: Arc<dyn DomainEvent>,
        uow: Option<&mut UnitOfWork>,
    ) -> Result<(), ServiceError> {
        let uow = require_uow(uow, HANDLER)?;
        let request = match event.as_any().downcast_ref::<UserEvent>().map(|e| &e.kind) {
            Some(UserEventKind::CreateGroupRequested(request)) => request.clone(),
            _ => {
                return Err(ServiceError::UnexpectedMessage(format!(
                    "{HANDLER} got `{}`",
                    event.topic()
                )));
            }
        };
        let mut group = Group::create(
            CreateGroup {
                name: request.name,
                user_id: request.user_id,
                group_id: request.group_id,
            },
            self.clock.as_ref(),
        )?;
        let mut open = uow.begin().await?;
        open.groups().add(&mut group).await?;
        open.commit().await?;
        info!(group_id = %group.id(), user_id = %request.user_id, "requested group created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iam_core::event::{Event, EventMetadata};
    use iam_test_support::{FixedClock, InMemoryEventStore};
    use uuid::Uuid;

    use crate::bootstrap;
    use crate::domain::events::{CreateGroupRequested, GROUP_CREATED, PermissionAssigned};

    fn user_event(kind: UserEventKind) -> Arc<dyn DomainEvent> {
        let at = FixedClock::standard().now();
        Arc::new(Event {
            metadata: EventMetadata::stamped(Uuid::new_v4(), 2, at, &kind),
            kind,
        })
    }

    #[tokio::test]
    async fn test_request_founds_group_under_reserved_id() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut uow = UnitOfWork::new(Arc::new(store.clone()), Arc::new(bootstrap::mapper()));
        let handler = CreateGroupOnRequest::new(Arc::new(FixedClock::standard()));
        let group_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = user_event(UserEventKind::CreateGroupRequested(CreateGroupRequested {
            name: "SVB".into(),
            user_id,
            group_id,
        }));

        // Act
        handler.handle(event, Some(&mut uow)).await.unwrap();

        // Assert
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, group_id.to_string());
        assert_eq!(events[0].topic, GROUP_CREATED);
    }

    #[tokio::test]
    async fn test_other_events_are_unexpected() {
        let store = InMemoryEventStore::new();
        let mut uow = UnitOfWork::new(Arc::new(store.clone()), Arc::new(bootstrap::mapper()));
        let handler = CreateGroupOnRequest::new(Arc::new(FixedClock::standard()));
        let event = user_event(UserEventKind::PermissionAssigned(PermissionAssigned {
            requested_access: Vec::new(),
        }));

        let result = handler.handle(event, Some(&mut uow)).await;

        assert!(matches!(result, Err(ServiceError::UnexpectedMessage(_))));
        assert!(store.events().is_empty());
    }
}

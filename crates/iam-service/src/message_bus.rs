//! Message bus: breadth-first dispatch of commands and events.
//!
//! One call to [`MessageBus::handle`] drains a FIFO queue seeded with the
//! incoming message. After every handler the internal backlog of the run's
//! unit of work is appended to the queue, so events raised while handling a
//! message are processed after it and before anything queued later.
//!
//! Command handler errors abort the run. Event handler errors are logged
//! and swallowed, except for [`StopSentinel`](crate::error::StopSentinel),
//! which ends the fan-out of the current event.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use iam_core::command::Command;
use iam_core::event::DomainEvent;
use iam_core::mapper::Mapper;
use iam_core::repository::SessionFactory;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ServiceError;
use crate::handler::{CommandHandler, EventHandler, UowRequirement};
use crate::unit_of_work::{BacklogKind, UnitOfWork};

/// An item of work for the bus: a command from a caller, or an event raised
/// while handling one.
#[derive(Debug)]
pub enum Message<C> {
    /// A command routed to its single handler.
    Command(C),
    /// An event fanned out to every subscriber of its topic.
    Event(Arc<dyn DomainEvent>),
}

struct CommandRoute<C, R> {
    requirement: UowRequirement,
    handler: Arc<dyn CommandHandler<C, R>>,
}

struct EventRoute {
    requirement: UowRequirement,
    handler: Arc<dyn EventHandler>,
}

/// Routes commands and events to their handlers.
///
/// The routing tables are built once and read-only afterwards; concurrent
/// runs share them and nothing else.
pub struct MessageBus<C, R> {
    factory: Arc<dyn SessionFactory>,
    mapper: Arc<Mapper>,
    commands: HashMap<&'static str, CommandRoute<C, R>>,
    events: HashMap<&'static str, Vec<EventRoute>>,
}

impl<C: Command, R: Send + 'static> MessageBus<C, R> {
    /// Creates a bus without routes.
    #[must_use]
    pub fn new(factory: Arc<dyn SessionFactory>, mapper: Arc<Mapper>) -> Self {
        Self {
            factory,
            mapper,
            commands: HashMap::new(),
            events: HashMap::new(),
        }
    }

    /// Routes commands of `command_type` to `handler`, replacing any earlier
    /// route for that type.
    #[must_use]
    pub fn register_command(
        mut self,
        command_type: &'static str,
        requirement: UowRequirement,
        handler: impl CommandHandler<C, R> + 'static,
    ) -> Self {
        self.commands.insert(
            command_type,
            CommandRoute {
                requirement,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Subscribes `handler` to events of `topic`. Handlers run in
    /// registration order.
    #[must_use]
    pub fn register_event(
        mut self,
        topic: &'static str,
        requirement: UowRequirement,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.events.entry(topic).or_default().push(EventRoute {
            requirement,
            handler: Arc::new(handler),
        });
        self
    }

    /// A fresh unit of work over the bus's store, for callers that read
    /// outside a run.
    #[must_use]
    pub fn unit_of_work(&self) -> UnitOfWork {
        UnitOfWork::new(Arc::clone(&self.factory), Arc::clone(&self.mapper))
    }

    /// Processes `message` and everything it causes, returning the command
    /// results in the order the commands were handled.
    ///
    /// Event handlers contribute no results, so a run seeded with an event
    /// returns an empty list.
    ///
    /// # Errors
    ///
    /// Returns the first command handler error, and
    /// `ServiceError::UnregisteredCommand` or `ServiceError::UnregisteredEvent`
    /// for messages nobody handles.
    #[instrument(skip_all)]
    pub async fn handle(&self, message: Message<C>) -> Result<Vec<R>, ServiceError> {
        let mut uow = self.unit_of_work();
        let mut queue = VecDeque::from([message]);
        let mut results = Vec::new();
        let mut handled = 0_usize;
        while let Some(message) = queue.pop_front() {
            handled += 1;
            match message {
                Message::Event(event) => self.handle_event(event, &mut uow, &mut queue).await?,
                Message::Command(command) => {
                    let result = self.handle_command(command, &mut uow, &mut queue).await?;
                    results.push(result);
                }
            }
        }
        info!(messages = handled, "message handling complete");
        Ok(results)
    }

    async fn handle_event(
        &self,
        event: Arc<dyn DomainEvent>,
        uow: &mut UnitOfWork,
        queue: &mut VecDeque<Message<C>>,
    ) -> Result<(), ServiceError> {
        let topic = event.topic();
        let routes = self
            .events
            .get(topic)
            .ok_or_else(|| ServiceError::UnregisteredEvent(topic.to_owned()))?;
        for (index, route) in routes.iter().enumerate() {
            debug!(topic, handler = index, "dispatching event");
            let outcome = route
                .handler
                .handle(Arc::clone(&event), route.requirement.grant(uow))
                .await;
            queue.extend(
                uow.collect_backlogs(BacklogKind::Internal)
                    .into_iter()
                    .map(Message::Event),
            );
            match outcome {
                Ok(()) => {}
                Err(ServiceError::Stop(stop)) => {
                    warn!(topic, handler = index, reason = %stop.message, "event handling stopped");
                    if let Some(fallback) = stop.fallback {
                        queue.push_back(Message::Event(fallback));
                    }
                    break;
                }
                Err(err) => {
                    error!(topic, handler = index, error = %err, "event handler failed");
                }
            }
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        command: C,
        uow: &mut UnitOfWork,
        queue: &mut VecDeque<Message<C>>,
    ) -> Result<R, ServiceError> {
        let command_type = command.command_type();
        let route = self
            .commands
            .get(command_type)
            .ok_or(ServiceError::UnregisteredCommand(command_type))?;
        debug!(command_type, "dispatching command");
        match route.handler.handle(command, route.requirement.grant(uow)).await {
            Ok(result) => {
                queue.extend(
                    uow.collect_backlogs(BacklogKind::Internal)
                        .into_iter()
                        .map(Message::Event),
                );
                Ok(result)
            }
            Err(err) => {
                error!(command_type, error = %err, "command handler failed");
                Err(err)
            }
        }
    }
}

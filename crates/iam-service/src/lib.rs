//! IAM Service: orchestration on top of the event-sourcing core.
//!
//! A [`unit_of_work::UnitOfWork`] scopes one transaction and the event
//! backlogs it produces. The [`message_bus::MessageBus`] drains a queue of
//! commands and events through registered handlers, feeding internally
//! notifiable events back into the same run.

pub mod error;
pub mod handler;
pub mod message_bus;
pub mod repository;
pub mod unit_of_work;

//! Application layer for the identity context.

pub mod command_handlers;
pub mod event_handlers;
pub mod query_handlers;
pub mod repositories;

//! IAM Identity: users, groups and their permissions.
//!
//! Both aggregates are event sourced. Handlers in [`application`] run them
//! through the service layer's unit of work, and [`bootstrap`] wires the
//! topic resolver, mapper and message bus for this context.

pub mod application;
pub mod bootstrap;
pub mod domain;

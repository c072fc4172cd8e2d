//! IAM Core: event-sourcing primitives.
//!
//! This crate defines the aggregate/event model, the transcoder and mapper
//! that turn domain events into stored records, the topic resolver, and the
//! contracts a transactional event store has to satisfy. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod mapper;
pub mod repository;
pub mod topic;
pub mod transcoder;

//! IAM Event Store: `PostgreSQL` persistence for the event log and outbox.

pub mod pg_event_store;
pub mod schema;

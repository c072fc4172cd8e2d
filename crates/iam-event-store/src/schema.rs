//! Event store database schema.
//!
//! The tables are created by the workspace migrations; these names are the
//! single place the queries refer to them.

/// Append-only event log with a global notification sequence.
pub const EVENT_STORE_TABLE: &str = "iam_event_store";

/// Outbox rows awaiting external publication.
pub const OUTBOX_TABLE: &str = "iam_service_outbox";

//! `PostgreSQL` implementation of the transactional store contracts.
//!
//! [`PgEventStore`] opens one database transaction per [`PgSession`].
//! Dropping a session without committing rolls the transaction back.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use iam_core::error::DomainError;
use iam_core::repository::{
    EventSession, Notification, OutBox, OutboxRecorder, Recorder, SessionFactory, StoredEvent,
    page_limit,
};

use crate::schema::{EVENT_STORE_TABLE, OUTBOX_TABLE};

fn infrastructure(context: &str, err: &sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("{context}: {err}"))
}

fn parse_aggregate_id(id: &str) -> Result<Uuid, DomainError> {
    Uuid::parse_str(id)
        .map_err(|e| DomainError::Integrity(format!("aggregate id `{id}` is not a UUID: {e}")))
}

/// PostgreSQL-backed session factory.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn EventSession>, DomainError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| infrastructure("failed to begin transaction", &e))?;
        Ok(Box::new(PgSession { tx }))
    }
}

/// One open database transaction.
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

type EventRow = (i64, Uuid, i64, String, Vec<u8>);
type OutboxRow = (Uuid, Uuid, String, Vec<u8>, bool);

fn stored_from_row((_, id, version, topic, state): EventRow) -> StoredEvent {
    StoredEvent {
        id: id.to_string(),
        version,
        topic,
        state,
    }
}

fn outbox_from_row((id, aggregate_id, topic, state, processed): OutboxRow) -> OutBox {
    OutBox {
        id,
        aggregate_id,
        topic,
        state,
        processed,
    }
}

#[async_trait]
impl Recorder for PgSession {
    #[instrument(skip_all, fields(count = events.len()))]
    async fn add(&mut self, events: Vec<StoredEvent>) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        let rows = events
            .into_iter()
            .map(|event| Ok((parse_aggregate_id(&event.id)?, event)))
            .collect::<Result<Vec<_>, DomainError>>()?;
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {EVENT_STORE_TABLE} (id, version, topic, state) "
        ));
        builder.push_values(rows, |mut b, (id, event)| {
            b.push_bind(id)
                .push_bind(event.version)
                .push_bind(event.topic)
                .push_bind(event.state);
        });
        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DomainError::Integrity(format!("failed to append events: {e}")))?;
        debug!(rows = result.rows_affected(), "events appended");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&mut self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let sql = format!(
            "SELECT nt_id, id, version, topic, state FROM {EVENT_STORE_TABLE} \
             WHERE id = $1 ORDER BY version ASC"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(aggregate_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| infrastructure("failed to load events", &e))?;
        Ok(rows.into_iter().map(stored_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn select_notifications(
        &mut self,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, DomainError> {
        page_limit(limit)?;
        let sql = format!(
            "SELECT nt_id, id, version, topic, state FROM {EVENT_STORE_TABLE} \
             WHERE nt_id >= $1 ORDER BY nt_id ASC LIMIT $2"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(start)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| infrastructure("failed to select notifications", &e))?;
        Ok(rows
            .into_iter()
            .map(|row| Notification {
                notification_id: row.0,
                stored: stored_from_row(row),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn max_notification_id(&mut self) -> Result<i64, DomainError> {
        let sql = format!("SELECT COALESCE(MAX(nt_id), 0) FROM {EVENT_STORE_TABLE}");
        let (max,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| infrastructure("failed to read max notification id", &e))?;
        Ok(max)
    }
}

#[async_trait]
impl OutboxRecorder for PgSession {
    #[instrument(skip_all, fields(count = rows.len()))]
    async fn add_outbox(&mut self, rows: Vec<OutBox>) -> Result<(), DomainError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {OUTBOX_TABLE} (id, aggregate_id, topic, state, processed) "
        ));
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.id)
                .push_bind(row.aggregate_id)
                .push_bind(row.topic)
                .push_bind(row.state)
                .push_bind(row.processed);
        });
        let result = builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DomainError::Integrity(format!("failed to stage outbox rows: {e}")))?;
        debug!(rows = result.rows_affected(), "outbox rows staged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unprocessed_outbox(&mut self, limit: i64) -> Result<Vec<OutBox>, DomainError> {
        page_limit(limit)?;
        let sql = format!(
            "SELECT id, aggregate_id, topic, state, processed FROM {OUTBOX_TABLE} \
             WHERE processed = FALSE ORDER BY create_dt ASC LIMIT $1"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| infrastructure("failed to read outbox", &e))?;
        Ok(rows.into_iter().map(outbox_from_row).collect())
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn mark_processed(&mut self, ids: &[Uuid]) -> Result<u64, DomainError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE {OUTBOX_TABLE} SET processed = TRUE WHERE id = ANY($1) AND processed = FALSE"
        );
        let result = sqlx::query(&sql)
            .bind(ids)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| infrastructure("failed to mark outbox rows", &e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EventSession for PgSession {
    #[instrument(skip_all)]
    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .commit()
            .await
            .map_err(|e| infrastructure("failed to commit transaction", &e))
    }

    #[instrument(skip_all)]
    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| infrastructure("failed to roll back transaction", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aggregate_id_rejects_non_uuid() {
        let result = parse_aggregate_id("not-a-uuid");

        assert!(matches!(result, Err(DomainError::Integrity(_))));
    }

    #[test]
    fn test_stored_from_row_stringifies_id() {
        let id = Uuid::new_v4();

        let stored = stored_from_row((7, id, 3, "iam.user.created".into(), vec![1, 2]));

        assert_eq!(stored.id, id.to_string());
        assert_eq!(stored.version, 3);
        assert_eq!(stored.state, vec![1, 2]);
    }
}

//! Integration tests for `PgEventStore`.
//!
//! These need a running `PostgreSQL` reachable through `DATABASE_URL`:
//! `cargo test -p iam-event-store -- --ignored`.

use iam_core::error::DomainError;
use iam_core::repository::{
    EventSession, OutBox, OutboxRecorder, Recorder, SessionFactory, StoredEvent,
};
use iam_event_store::pg_event_store::PgEventStore;
use sqlx::PgPool;
use uuid::Uuid;

/// Helper to build a `StoredEvent` with sensible defaults.
fn make_stored_event(aggregate_id: Uuid, version: i64) -> StoredEvent {
    StoredEvent {
        id: aggregate_id.to_string(),
        version,
        topic: "iam.user.created".to_owned(),
        state: br#"{"name":"Migo"}"#.to_vec(),
    }
}

fn make_outbox(aggregate_id: Uuid) -> OutBox {
    OutBox {
        id: Uuid::new_v4(),
        aggregate_id,
        topic: "iam.user.purchase_made".to_owned(),
        state: b"{}".to_vec(),
        processed: false,
    }
}

// --- add + get ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_get_returns_empty_vec_for_nonexistent_aggregate(pool: PgPool) {
    let store = PgEventStore::new(pool);

    let mut session = store.begin().await.unwrap();
    let events = session.get(Uuid::new_v4()).await.unwrap();

    assert!(events.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_committed_events_load_in_version_order(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let mut session = store.begin().await.unwrap();
    session
        .add(vec![
            make_stored_event(aggregate_id, 2),
            make_stored_event(aggregate_id, 1),
        ])
        .await
        .unwrap();
    session.commit().await.unwrap();

    // Act
    let mut session = store.begin().await.unwrap();
    let loaded = session.get(aggregate_id).await.unwrap();

    // Assert
    let versions: Vec<i64> = loaded.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(loaded[0], make_stored_event(aggregate_id, 1));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_duplicate_version_is_integrity_error(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let mut session = store.begin().await.unwrap();
    session.add(vec![make_stored_event(aggregate_id, 1)]).await.unwrap();
    session.commit().await.unwrap();

    // Act
    let mut session = store.begin().await.unwrap();
    let result = session.add(vec![make_stored_event(aggregate_id, 1)]).await;

    // Assert
    assert!(matches!(result, Err(DomainError::Integrity(_))));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_dropped_session_writes_nothing(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    // Act
    {
        let mut session = store.begin().await.unwrap();
        session.add(vec![make_stored_event(aggregate_id, 1)]).await.unwrap();
        session.add_outbox(vec![make_outbox(aggregate_id)]).await.unwrap();
    }

    // Assert
    let mut session = store.begin().await.unwrap();
    assert!(session.get(aggregate_id).await.unwrap().is_empty());
    assert!(session.unprocessed_outbox(10).await.unwrap().is_empty());
}

// --- notifications ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_notifications_page_through_global_sequence(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let mut session = store.begin().await.unwrap();
    assert_eq!(session.max_notification_id().await.unwrap(), 0);
    session
        .add(vec![make_stored_event(first, 1), make_stored_event(first, 2)])
        .await
        .unwrap();
    session.add(vec![make_stored_event(second, 1)]).await.unwrap();
    session.commit().await.unwrap();

    // Act
    let mut session = store.begin().await.unwrap();
    let max = session.max_notification_id().await.unwrap();
    let page = session.select_notifications(max - 1, 10).await.unwrap();

    // Assert
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].notification_id, max - 1);
    assert_eq!(page[1].stored.id, second.to_string());
    assert!(page[0].notification_id < page[1].notification_id);
}

// --- outbox ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_outbox_rows_are_listed_until_processed(pool: PgPool) {
    // Arrange
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();
    let rows = vec![make_outbox(aggregate_id), make_outbox(aggregate_id)];
    let first_id = rows[0].id;
    let mut session = store.begin().await.unwrap();
    session.add_outbox(rows).await.unwrap();
    session.commit().await.unwrap();

    // Act
    let mut session = store.begin().await.unwrap();
    let changed = session.mark_processed(&[first_id]).await.unwrap();
    let again = session.mark_processed(&[first_id]).await.unwrap();
    let pending = session.unprocessed_outbox(10).await.unwrap();
    session.commit().await.unwrap();

    // Assert
    assert_eq!(changed, 1);
    assert_eq!(again, 0);
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].id, first_id);
    assert!(!pending[0].processed);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_negative_page_limit_is_validation_error(pool: PgPool) {
    let store = PgEventStore::new(pool);

    let mut session = store.begin().await.unwrap();
    let notifications = session.select_notifications(1, -1).await;
    let outbox = session.unprocessed_outbox(-1).await;

    assert!(matches!(notifications, Err(DomainError::Validation(_))));
    assert!(matches!(outbox, Err(DomainError::Validation(_))));
}

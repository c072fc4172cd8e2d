//! Test stores: in-memory `SessionFactory` implementations for tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iam_core::error::DomainError;
use iam_core::repository::{
    EventSession, Notification, OutBox, OutboxRecorder, Recorder, SessionFactory, StoredEvent,
    page_limit,
};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    events: Vec<Notification>,
    outbox: Vec<OutBox>,
    last_sequence: i64,
    commits: usize,
    rollbacks: usize,
}

impl State {
    fn contains(&self, id: &str, version: i64) -> bool {
        self.events
            .iter()
            .any(|n| n.stored.id == id && n.stored.version == version)
    }
}

/// A transactional event store held in memory.
///
/// Sessions stage their writes and publish them on commit; dropping or
/// rolling back a session discards them. The unique (id, version)
/// constraint is enforced across committed and staged rows. Sequence
/// numbers are handed out on insert and never reused, like a database
/// sequence.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits `events` directly, outside any session.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned or an (id, version) pair
    /// already exists.
    pub fn seed(&self, events: Vec<StoredEvent>) {
        let mut state = self.state.lock().unwrap();
        for stored in events {
            assert!(
                !state.contains(&stored.id, stored.version),
                "seeded duplicate ({}, {})",
                stored.id,
                stored.version
            );
            state.last_sequence += 1;
            let notification_id = state.last_sequence;
            state.events.push(Notification {
                notification_id,
                stored,
            });
        }
    }

    /// Returns a snapshot of the committed events in sequence order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.notifications().into_iter().map(|n| n.stored).collect()
    }

    /// Returns a snapshot of the committed events with sequence numbers.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().unwrap().events.clone()
    }

    /// Returns a snapshot of the committed outbox rows.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn outbox(&self) -> Vec<OutBox> {
        self.state.lock().unwrap().outbox.clone()
    }

    /// Number of sessions committed so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    /// Number of sessions rolled back or dropped uncommitted so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

#[async_trait]
impl SessionFactory for InMemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn EventSession>, DomainError> {
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            staged_events: Vec::new(),
            staged_outbox: Vec::new(),
            processed: HashSet::new(),
            finished: false,
        }))
    }
}

/// One open transaction of an [`InMemoryEventStore`].
#[derive(Debug)]
pub struct InMemorySession {
    state: Arc<Mutex<State>>,
    staged_events: Vec<Notification>,
    staged_outbox: Vec<OutBox>,
    processed: HashSet<Uuid>,
    finished: bool,
}

impl InMemorySession {
    fn is_staged(&self, id: &str, version: i64) -> bool {
        self.staged_events
            .iter()
            .any(|n| n.stored.id == id && n.stored.version == version)
    }

    fn visible_events(&self) -> Vec<Notification> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Notification> = state
            .events
            .iter()
            .chain(self.staged_events.iter())
            .cloned()
            .collect();
        events.sort_by_key(|n| n.notification_id);
        events
    }
}

#[async_trait]
impl Recorder for InMemorySession {
    async fn add(&mut self, events: Vec<StoredEvent>) -> Result<(), DomainError> {
        let mut batch: Vec<(&str, i64)> = Vec::new();
        {
            let state = self.state.lock().unwrap();
            for stored in &events {
                let key = (stored.id.as_str(), stored.version);
                let taken = state.contains(key.0, key.1) || self.is_staged(key.0, key.1);
                if taken || batch.contains(&key) {
                    return Err(DomainError::Integrity(format!(
                        "duplicate key (id, version) = ({}, {})",
                        stored.id, stored.version
                    )));
                }
                batch.push(key);
            }
        }
        let mut state = self.state.lock().unwrap();
        for stored in events {
            state.last_sequence += 1;
            self.staged_events.push(Notification {
                notification_id: state.last_sequence,
                stored,
            });
        }
        Ok(())
    }

    async fn get(&mut self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let id = aggregate_id.to_string();
        let mut events: Vec<StoredEvent> = self
            .visible_events()
            .into_iter()
            .map(|n| n.stored)
            .filter(|stored| stored.id == id)
            .collect();
        events.sort_by_key(|stored| stored.version);
        Ok(events)
    }

    async fn select_notifications(
        &mut self,
        start: i64,
        limit: i64,
    ) -> Result<Vec<Notification>, DomainError> {
        let limit = page_limit(limit)?;
        Ok(self
            .visible_events()
            .into_iter()
            .filter(|n| n.notification_id >= start)
            .take(limit)
            .collect())
    }

    async fn max_notification_id(&mut self) -> Result<i64, DomainError> {
        Ok(self
            .visible_events()
            .iter()
            .map(|n| n.notification_id)
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl OutboxRecorder for InMemorySession {
    async fn add_outbox(&mut self, rows: Vec<OutBox>) -> Result<(), DomainError> {
        self.staged_outbox.extend(rows);
        Ok(())
    }

    async fn unprocessed_outbox(&mut self, limit: i64) -> Result<Vec<OutBox>, DomainError> {
        let limit = page_limit(limit)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .chain(self.staged_outbox.iter())
            .filter(|row| !row.processed && !self.processed.contains(&row.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&mut self, ids: &[Uuid]) -> Result<u64, DomainError> {
        let state = self.state.lock().unwrap();
        let mut changed = 0;
        for row in state.outbox.iter().chain(self.staged_outbox.iter()) {
            if ids.contains(&row.id) && !row.processed && !self.processed.contains(&row.id) {
                changed += 1;
            }
        }
        drop(state);
        self.processed.extend(ids.iter().copied());
        Ok(changed)
    }
}

#[async_trait]
impl EventSession for InMemorySession {
    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let mut session = self;
        let mut state = session.state.lock().unwrap();
        if let Some(conflict) = session
            .staged_events
            .iter()
            .find(|n| state.contains(&n.stored.id, n.stored.version))
        {
            return Err(DomainError::Integrity(format!(
                "duplicate key (id, version) = ({}, {})",
                conflict.stored.id, conflict.stored.version
            )));
        }
        state.events.append(&mut session.staged_events);
        state.events.sort_by_key(|n| n.notification_id);
        state.outbox.append(&mut session.staged_outbox);
        for row in &mut state.outbox {
            if session.processed.contains(&row.id) {
                row.processed = true;
            }
        }
        state.commits += 1;
        drop(state);
        session.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        let mut session = self;
        session.finished = true;
        session.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if !self.finished {
            if let Ok(mut state) = self.state.lock() {
                state.rollbacks += 1;
            }
        }
    }
}

/// A session factory that cannot open transactions. Useful for testing
/// error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl SessionFactory for FailingEventStore {
    async fn begin(&self) -> Result<Box<dyn EventSession>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: Uuid, version: i64) -> StoredEvent {
        StoredEvent {
            id: id.to_string(),
            version,
            topic: "tests.tally.counted".into(),
            state: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_committed_session_publishes_events_in_sequence() {
        // Arrange
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        let mut session = store.begin().await.unwrap();

        // Act
        session.add(vec![stored(id, 1), stored(id, 2)]).await.unwrap();
        session.commit().await.unwrap();

        // Assert
        let notifications = store.notifications();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].notification_id, 1);
        assert_eq!(notifications[1].notification_id, 2);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_discards_writes() {
        // Arrange
        let store = InMemoryEventStore::new();
        let mut session = store.begin().await.unwrap();
        session.add(vec![stored(Uuid::new_v4(), 1)]).await.unwrap();

        // Act
        drop(session);

        // Assert
        assert!(store.events().is_empty());
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_version_rejects_whole_batch() {
        // Arrange
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        store.seed(vec![stored(id, 1)]);
        let mut session = store.begin().await.unwrap();

        // Act
        let result = session.add(vec![stored(id, 2), stored(id, 1)]).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Integrity(_))));
        assert_eq!(session.get(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_notification_id_is_zero_when_empty() {
        let store = InMemoryEventStore::new();
        let mut session = store.begin().await.unwrap();

        let max = session.max_notification_id().await.unwrap();

        assert_eq!(max, 0);
    }

    #[tokio::test]
    async fn test_negative_page_limit_is_rejected() {
        // Arrange
        let store = InMemoryEventStore::new();
        store.seed(vec![stored(Uuid::new_v4(), 1)]);
        let mut session = store.begin().await.unwrap();

        // Act
        let notifications = session.select_notifications(1, -1).await;
        let outbox = session.unprocessed_outbox(-5).await;

        // Assert
        assert!(matches!(notifications, Err(DomainError::Validation(_))));
        assert!(matches!(outbox, Err(DomainError::Validation(_))));
        assert!(session.select_notifications(1, 0).await.unwrap().is_empty());
    }
}

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use courier_common::{EmailRecord, MailId};
use tokio::sync::broadcast;

use crate::{ChangeEvent, ChangeFeed, RecordFilter, StoreError, r#trait::RecordStore};

/// In-memory record store
///
/// Records live in a `HashMap` behind an `RwLock`. Nothing survives a
/// restart, so this is meant for tests and development. The store can be
/// flipped offline with [`set_connected`](Self::set_connected) to exercise
/// outage handling; while offline every operation fails with
/// [`StoreError::Unavailable`].
///
/// # Capacity Management
/// An optional capacity bounds the number of records. Inserts beyond it fail
/// with [`StoreError::Internal`].
#[derive(Debug, Clone)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<MailId, EmailRecord>>>,
    connected: Arc<AtomicBool>,
    feed: ChangeFeed,
    /// Maximum number of records to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryRecordStore {
    /// Create a new empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(true)),
            feed: ChangeFeed::default(),
            capacity: None,
        }
    }

    /// Create a new store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Get the current number of records
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Simulate the store going offline or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        tracing::debug!(connected, "Memory store connectivity changed");
    }

    /// Remove a record, publishing a delete event.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if there is no such record.
    pub fn remove(&self, id: &MailId) -> crate::Result<EmailRecord> {
        self.ensure_connected()?;

        let removed = self
            .records
            .write()?
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        self.feed.publish(ChangeEvent::deleted(id.clone()));
        Ok(removed)
    }

    fn ensure_connected(&self) -> crate::Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "memory store is disconnected".to_string(),
            ))
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_many(&self, filter: &RecordFilter) -> crate::Result<Vec<EmailRecord>> {
        self.ensure_connected()?;

        let mut records: Vec<_> = self
            .records
            .read()?
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn find_by_id(&self, id: &MailId) -> crate::Result<Option<EmailRecord>> {
        self.ensure_connected()?;
        Ok(self.records.read()?.get(id).cloned())
    }

    async fn insert(&self, mut record: EmailRecord) -> crate::Result<EmailRecord> {
        self.ensure_connected()?;

        {
            let mut records = self.records.write()?;

            if records.contains_key(&record.mail_id) {
                return Err(StoreError::AlreadyExists(record.mail_id));
            }

            if let Some(cap) = self.capacity
                && records.len() >= cap
            {
                return Err(StoreError::Internal(format!(
                    "Memory store capacity exceeded: {}/{} records",
                    records.len(),
                    cap
                )));
            }

            record.version = 1;
            records.insert(record.mail_id.clone(), record.clone());
        }

        self.feed.publish(ChangeEvent::inserted(record.clone()));
        Ok(record)
    }

    async fn save(&self, record: &EmailRecord) -> crate::Result<EmailRecord> {
        self.ensure_connected()?;

        let saved = {
            let mut records = self.records.write()?;

            let stored = records
                .get_mut(&record.mail_id)
                .ok_or_else(|| StoreError::NotFound(record.mail_id.clone()))?;

            if stored.version != record.version {
                return Err(StoreError::Conflict {
                    id: record.mail_id.clone(),
                    expected: record.version,
                    found: stored.version,
                });
            }

            let mut saved = record.clone();
            saved.version = record.version.saturating_add(1);
            saved.updated_at = Utc::now();
            *stored = saved.clone();
            saved
        };

        self.feed.publish(ChangeEvent::updated(saved.clone()));
        Ok(saved)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use courier_common::{DeliveryStatus, OutgoingMessage, Submission};

    use super::*;
    use crate::ChangeKind;

    fn record(id: &str) -> EmailRecord {
        let submission = Submission::new(
            MailId::new(id).unwrap(),
            OutgoingMessage::new("a@x.com", "b@x.com", "Hi", "<p>hi</p>").unwrap(),
        );
        EmailRecord::first_failure(&submission, "SMTP 550", 5)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryRecordStore::new();

        let inserted = store.insert(record("m1")).await.expect("Failed to insert");
        assert_eq!(inserted.version, 1);

        let found = store
            .find_by_id(&inserted.mail_id)
            .await
            .expect("Failed to read")
            .expect("Record missing");
        assert_eq!(found, inserted);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_mail_id() {
        let store = MemoryRecordStore::new();
        store.insert(record("m1")).await.unwrap();

        let err = store.insert(record("m1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id.as_str() == "m1"));
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_detects_conflicts() {
        let store = MemoryRecordStore::new();
        let mut first = store.insert(record("m1")).await.unwrap();
        let stale = first.clone();

        first.record_success();
        let saved = store.save(&first).await.unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(saved.status, DeliveryStatus::Sent);

        let err = store.save(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_save_unknown_record() {
        let store = MemoryRecordStore::new();
        let err = store.save(&record("ghost")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryRecordStore::with_capacity(1);
        store.insert(record("m1")).await.unwrap();

        let err = store.insert(record("m2")).await.unwrap_err();
        assert!(err.to_string().contains("capacity exceeded"));
    }

    #[tokio::test]
    async fn test_disconnected_store_is_unavailable() {
        let store = MemoryRecordStore::new();
        store.set_connected(false);

        assert!(!store.is_connected().await);
        assert!(matches!(
            store.find_many(&RecordFilter::all()).await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_connected(true);
        assert!(store.find_many(&RecordFilter::all()).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_feed_events() {
        let store = MemoryRecordStore::new();
        let mut feed = store.subscribe();

        let mut inserted = store.insert(record("m1")).await.unwrap();
        inserted.record_failure("again", 5);
        store.save(&inserted).await.unwrap();
        store.remove(&inserted.mail_id).unwrap();

        let kinds: Vec<_> = [
            feed.recv().await.unwrap(),
            feed.recv().await.unwrap(),
            feed.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|event| event.kind)
        .collect();

        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        );
    }
}

use async_trait::async_trait;
use courier_common::{EmailRecord, MailId};
use tokio::sync::broadcast;

use crate::{ChangeEvent, RecordFilter, Result};

/// Durable storage for email records, keyed by mail id.
///
/// Implementations own the `version` field: [`insert`](Self::insert) starts
/// it at 1 and every successful [`save`](Self::save) increments it. Every
/// successful write is published on the change feed returned by
/// [`subscribe`](Self::subscribe).
#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// All records matching `filter`, in store-defined order.
    async fn find_many(&self, filter: &RecordFilter) -> Result<Vec<EmailRecord>>;

    /// The record for `id`, if any.
    async fn find_by_id(&self, id: &MailId) -> Result<Option<EmailRecord>>;

    /// Persist a new record.
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists) if the
    /// mail id is already stored.
    async fn insert(&self, record: EmailRecord) -> Result<EmailRecord>;

    /// Write back a record previously read from this store.
    ///
    /// # Errors
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) if the stored
    /// version no longer matches `record.version`, and
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) if the record was
    /// never inserted.
    async fn save(&self, record: &EmailRecord) -> Result<EmailRecord>;

    /// Subscribe to insert, update, and delete events.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Whether the store is currently reachable.
    async fn is_connected(&self) -> bool;
}

//! Live change notifications for record stores.

use courier_common::{EmailRecord, MailId};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single write observed on a record store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: MailId,
    /// The record as written. Absent for deletes.
    pub document: Option<EmailRecord>,
}

impl ChangeEvent {
    #[must_use]
    pub fn inserted(record: EmailRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            id: record.mail_id.clone(),
            document: Some(record),
        }
    }

    #[must_use]
    pub fn updated(record: EmailRecord) -> Self {
        Self {
            kind: ChangeKind::Update,
            id: record.mail_id.clone(),
            document: Some(record),
        }
    }

    #[must_use]
    pub const fn deleted(id: MailId) -> Self {
        Self {
            kind: ChangeKind::Delete,
            id,
            document: None,
        }
    }
}

/// Broadcast fan-out shared by the store backends.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl ChangeFeed {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let kind = event.kind;
        if self.sender.send(event).is_err() {
            tracing::trace!(?kind, "No change feed subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

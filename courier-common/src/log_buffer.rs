//! Bounded in-memory log storage for the debug log viewer.
//!
//! [`BufferLayer`] is a `tracing-subscriber` layer that copies every event it
//! sees into a shared [`LogBuffer`]. The buffer keeps the most recent
//! `capacity` entries and drops the oldest once full.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::{self, Write as _},
    sync::Arc,
};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

const fn default_capacity() -> usize {
    1000
}

/// A single captured log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    /// The emitting module path.
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl LogEntry {
    /// Render as a single plain-text line.
    #[must_use]
    pub fn line(&self) -> String {
        let mut line = format!(
            "[{}] {} [{}] {}: {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.level,
            self.service,
            self.mail_id.as_deref().unwrap_or("-"),
            self.message
        );

        for (key, value) in &self.fields {
            let _ = write!(line, " {key}={value}");
        }

        line
    }

    #[must_use]
    pub fn is_level(&self, level: Level) -> bool {
        self.level == level.as_str()
    }
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

/// Shared handle to a bounded ring of [`LogEntry`] values.
///
/// Cloning the handle shares the underlying storage.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<Ring>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(default_capacity())
    }
}

impl LogBuffer {
    /// Create a buffer holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                next_seq: 1,
            })),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an entry, assigning its sequence number and evicting the oldest
    /// entry when full.
    pub fn push(&self, mut entry: LogEntry) {
        let mut ring = self.inner.lock();
        entry.seq = ring.next_seq;
        ring.next_seq = ring.next_seq.saturating_add(1);

        if ring.entries.len() >= self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(entry);
    }

    /// All retained entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Retained entries at exactly `level`, oldest first.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.is_level(level))
            .cloned()
            .collect()
    }

    /// Retained entries keyed by level name.
    #[must_use]
    pub fn grouped(&self) -> BTreeMap<String, Vec<LogEntry>> {
        let mut groups: BTreeMap<String, Vec<LogEntry>> = BTreeMap::new();
        for entry in self.snapshot() {
            groups.entry(entry.level.clone()).or_default().push(entry);
        }
        groups
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// A subscriber layer feeding this buffer.
    #[must_use]
    pub fn layer(&self) -> BufferLayer {
        BufferLayer {
            buffer: self.clone(),
        }
    }
}

/// `tracing-subscriber` layer that records events into a [`LogBuffer`].
#[derive(Debug, Clone)]
pub struct BufferLayer {
    buffer: LogBuffer,
}

impl<S: Subscriber> Layer<S> for BufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            seq: 0,
            timestamp: Utc::now(),
            level: metadata.level().as_str().to_string(),
            service: metadata.target().to_string(),
            mail_id: visitor.mail_id,
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    mail_id: Option<String>,
    fields: BTreeMap<String, String>,
}

impl FieldVisitor {
    fn store(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "mail_id" => self.mail_id = Some(value),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}

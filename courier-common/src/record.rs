//! The persisted email record and its delivery lifecycle.
//!
//! A record only exists once a first delivery attempt has failed. From then
//! on every attempt bumps `attempts` by exactly one and moves the record
//! through `retry` until it either reaches `sent` or exhausts its budget and
//! lands on `failed`. Both of those are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OutgoingMessage, Submission, ValidationError};

/// Longest mail id accepted from callers, in bytes.
pub const MAX_MAIL_ID_LEN: usize = 256;

/// Whether `attempts` has used up a budget of `max_retries` delivery attempts.
///
/// This is the single exhaustion boundary used throughout the relay: a record
/// with `attempts >= max_retries` is never attempted again and a failure that
/// brings it to that count marks it `failed`.
#[must_use]
pub const fn budget_exhausted(attempts: u32, max_retries: u32) -> bool {
    attempts >= max_retries
}

/// Caller-supplied idempotency key, unique per record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MailId(String);

impl MailId {
    /// Validate and wrap a mail id.
    ///
    /// # Errors
    /// If the id is empty, too long, or contains control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.trim().is_empty() {
            return Err(ValidationError::EmptyMailId);
        }

        if id.len() > MAX_MAIL_ID_LEN {
            return Err(ValidationError::MailIdTooLong {
                len: id.len(),
                max: MAX_MAIL_ID_LEN,
            });
        }

        if id.chars().any(char::is_control) {
            return Err(ValidationError::InvalidMailId);
        }

        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MailId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MailId> for String {
    fn from(id: MailId) -> Self {
        id.0
    }
}

impl AsRef<str> for MailId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a record, in lifecycle order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Retry,
    /// The retry budget is exhausted.
    Failed,
    Sent,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retry => "retry",
            Self::Failed => "failed",
            Self::Sent => "sent",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One email submission and its delivery history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    pub mail_id: MailId,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub others: Option<serde_json::Value>,
    /// Optimistic concurrency counter, owned by the record store.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailRecord {
    /// A record that has not been attempted yet.
    #[must_use]
    pub fn pending(submission: &Submission) -> Self {
        let now = Utc::now();
        let OutgoingMessage {
            from,
            to,
            subject,
            html,
        } = submission.message.clone();

        Self {
            mail_id: submission.mail_id.clone(),
            from,
            to,
            subject,
            html,
            status: DeliveryStatus::Pending,
            attempts: 0,
            error: None,
            user_id: submission.user_id.clone(),
            others: submission.others.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The record created when the first synchronous attempt fails.
    #[must_use]
    pub fn first_failure(
        submission: &Submission,
        reason: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        let mut record = Self::pending(submission);
        record.record_failure(reason, max_retries);
        record
    }

    /// The message this record delivers.
    #[must_use]
    pub fn message(&self) -> OutgoingMessage {
        OutgoingMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: self.subject.clone(),
            html: self.html.clone(),
        }
    }

    /// Whether another delivery attempt is permitted.
    #[must_use]
    pub const fn is_retryable(&self, max_retries: u32) -> bool {
        !self.status.is_terminal() && !budget_exhausted(self.attempts, max_retries)
    }

    /// Apply a successful attempt.
    pub fn record_success(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.status = DeliveryStatus::Sent;
        self.error = None;
        self.updated_at = Utc::now();
    }

    /// Apply a failed attempt, marking the record `failed` once the budget is
    /// used up.
    pub fn record_failure(&mut self, reason: impl Into<String>, max_retries: u32) {
        self.attempts = self.attempts.saturating_add(1);
        self.error = Some(reason.into());
        self.status = if budget_exhausted(self.attempts, max_retries) {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Retry
        };
        self.updated_at = Utc::now();
    }
}

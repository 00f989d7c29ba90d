//! The delivery state machine.
//!
//! Two entry points share one send path:
//!
//! - [`DeliveryEngine::attempt_delivery`] handles a first, synchronous
//!   attempt. Success persists nothing; failure creates the record that the
//!   retry machinery works from.
//! - [`DeliveryEngine::dispatch_record`] replays a stored record. The sweep
//!   and the change watcher both go through it.
//!
//! Every send for a mail id happens under that id's lock, and write-back uses
//! the store's version check, so two triggers racing on one record result in
//! one attempt and one skip.

use std::{fmt, sync::Arc};

use courier_common::{DeliveryStatus, EmailRecord, MailId, OutgoingMessage, Submission, delivery};
use courier_store::{RecordStore, StoreError};

use crate::{
    error::{SubmitError, TransportError},
    locks::KeyedLocks,
    policy::RetryPolicy,
    transport::Transport,
};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { accepted: Vec<String> },
    Failed { reason: String },
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// What caused a stored record to be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Reconciliation sweep after the store became reachable.
    Sweep,
    /// Change feed insert.
    Insert,
    /// Change feed update.
    Update,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sweep => "sweep",
            Self::Insert => "insert",
            Self::Update => "update",
        })
    }
}

/// Why a dispatch did not attempt delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No record with that id.
    Missing,
    /// The record changed since the trigger observed it.
    Stale { observed: u64, current: u64 },
    /// The record is `sent` or `failed`.
    Terminal(DeliveryStatus),
    /// The retry budget is used up.
    Exhausted { attempts: u32 },
    /// The record could not be read.
    StoreUnavailable,
    /// Shutdown arrived before a delayed dispatch started.
    Cancelled,
}

/// Result of [`DeliveryEngine::dispatch_record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Attempted {
        outcome: DeliveryOutcome,
        /// The record after the attempt.
        record: EmailRecord,
        /// Whether the updated record reached the store.
        persisted: bool,
    },
    Skipped(SkipReason),
}

impl Dispatch {
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Orchestrates sends, status transitions and retry bounding.
#[derive(Debug)]
pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
    locks: KeyedLocks,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn RecordStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Accept a new submission: reject it if its mail id is already recorded,
    /// otherwise make the first delivery attempt.
    ///
    /// A failed duplicate lookup does not block the send.
    ///
    /// # Errors
    /// [`SubmitError::Duplicate`] if a record for the mail id exists.
    pub async fn submit(&self, submission: &Submission) -> Result<DeliveryOutcome, SubmitError> {
        let _guard = self.locks.lock(&submission.mail_id).await;

        match self.store.find_by_id(&submission.mail_id).await {
            Ok(Some(existing)) => {
                delivery!(
                    level = INFO,
                    mail_id = %submission.mail_id,
                    status = %existing.status,
                    "Rejecting duplicate submission"
                );
                return Err(SubmitError::Duplicate(submission.mail_id.clone()));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    mail_id = %submission.mail_id,
                    error = %e,
                    "Duplicate check failed, sending anyway"
                );
            }
        }

        Ok(self.first_attempt(submission).await)
    }

    /// Make the first, synchronous delivery attempt for `submission`.
    ///
    /// On failure a record is created with `attempts = 1` and the failure
    /// reason, in status `retry` (or `failed` if a single attempt already
    /// exhausts the budget). Nothing is stored on success. A store error
    /// while creating the record is logged and does not change the outcome.
    pub async fn attempt_delivery(&self, submission: &Submission) -> DeliveryOutcome {
        let _guard = self.locks.lock(&submission.mail_id).await;
        self.first_attempt(submission).await
    }

    async fn first_attempt(&self, submission: &Submission) -> DeliveryOutcome {
        let outcome = self.send(&submission.mail_id, &submission.message).await;

        if let DeliveryOutcome::Failed { reason } = &outcome {
            let record =
                EmailRecord::first_failure(submission, reason.clone(), self.policy.max_retries);

            match self.store.insert(record).await {
                Ok(stored) => delivery!(
                    level = INFO,
                    mail_id = %stored.mail_id,
                    attempts = stored.attempts,
                    status = %stored.status,
                    "Queued failed delivery for retry"
                ),
                Err(e) => tracing::error!(
                    mail_id = %submission.mail_id,
                    attempts = 1,
                    error = %e,
                    "Failed to persist failed delivery, it will not be retried"
                ),
            }
        }

        outcome
    }

    /// Replay a stored record.
    ///
    /// `observed_version` is the record version the trigger saw. If the
    /// record has moved on since then another trigger already handled that
    /// state and this dispatch is skipped.
    pub async fn dispatch_record(
        &self,
        trigger: Trigger,
        id: &MailId,
        observed_version: Option<u64>,
    ) -> Dispatch {
        let _guard = self.locks.lock(id).await;

        let record = match self.store.find_by_id(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!(mail_id = %id, %trigger, "Record vanished before dispatch");
                return Dispatch::Skipped(SkipReason::Missing);
            }
            Err(e) => {
                tracing::warn!(mail_id = %id, %trigger, error = %e, "Could not load record");
                return Dispatch::Skipped(SkipReason::StoreUnavailable);
            }
        };

        if let Some(observed) = observed_version
            && observed != record.version
        {
            return Dispatch::Skipped(SkipReason::Stale {
                observed,
                current: record.version,
            });
        }

        if record.status.is_terminal() {
            return Dispatch::Skipped(SkipReason::Terminal(record.status));
        }

        if self.policy.is_exhausted(record.attempts) {
            return Dispatch::Skipped(SkipReason::Exhausted {
                attempts: record.attempts,
            });
        }

        delivery!(
            level = DEBUG,
            mail_id = %id,
            %trigger,
            attempt = record.attempts + 1,
            "Retrying delivery"
        );

        let outcome = self.send(id, &record.message()).await;

        let mut updated = record;
        match &outcome {
            DeliveryOutcome::Delivered { .. } => updated.record_success(),
            DeliveryOutcome::Failed { reason } => {
                updated.record_failure(reason.clone(), self.policy.max_retries);
            }
        }

        let persisted = match self.store.save(&updated).await {
            Ok(saved) => {
                delivery!(
                    level = INFO,
                    mail_id = %id,
                    %trigger,
                    attempts = saved.attempts,
                    status = %saved.status,
                    "Recorded delivery attempt"
                );
                updated = saved;
                true
            }
            Err(e) => {
                log_write_back_failure(id, trigger, &updated, &e);
                false
            }
        };

        Dispatch::Attempted {
            outcome,
            record: updated,
            persisted,
        }
    }

    async fn send(&self, id: &MailId, message: &OutgoingMessage) -> DeliveryOutcome {
        match self.transport.send(message).await {
            Ok(accepted) if !accepted.is_empty() => {
                delivery!(level = INFO, mail_id = %id, accepted = ?accepted.addresses, "Delivered");
                DeliveryOutcome::Delivered {
                    accepted: accepted.addresses,
                }
            }
            Ok(_) => {
                let reason = TransportError::NoRecipientsAccepted.to_string();
                tracing::warn!(mail_id = %id, "Delivery failed: {reason}");
                DeliveryOutcome::Failed { reason }
            }
            Err(e) => {
                tracing::warn!(
                    mail_id = %id,
                    permanent = e.is_permanent(),
                    "Delivery failed: {e}"
                );
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn log_write_back_failure(id: &MailId, trigger: Trigger, record: &EmailRecord, e: &StoreError) {
    if matches!(e, StoreError::Conflict { .. }) {
        tracing::warn!(
            mail_id = %id,
            %trigger,
            attempts = record.attempts,
            error = %e,
            "Record changed during delivery, attempt not recorded"
        );
    } else {
        tracing::error!(
            mail_id = %id,
            %trigger,
            attempts = record.attempts,
            error = %e,
            "Failed to record delivery attempt"
        );
    }
}

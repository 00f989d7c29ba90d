//! Typed errors for delivery operations.
//!
//! Transport failures never escape the engine: they are folded into a
//! [`DeliveryOutcome`](crate::DeliveryOutcome) and drive the retry state
//! machine. The remaining variants describe setup problems and the few
//! conditions that stop the background processor.

use courier_common::MailId;
use courier_store::StoreError;
use thiserror::Error;

/// Failure reported by a mail transport for a single send.
///
/// The `Display` output is what gets stored as a record's `error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The upstream server refused the message.
    #[error("{0}")]
    Rejected(String),

    /// The server answered but accepted none of the recipients.
    #[error("No recipients were accepted")]
    NoRecipientsAccepted,

    /// The server could not be reached or the session broke.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The message could not be built (bad address, header, etc.).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The transport gave up waiting for the server.
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl TransportError {
    /// Whether this failure is unlikely to clear up on a later attempt.
    ///
    /// Informational only: every failure consumes one attempt of the retry
    /// budget regardless.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidMessage(_) | Self::NoRecipientsAccepted)
    }
}

/// A submission that cannot be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// A record for this mail id already exists.
    #[error("A record for mailId {0} already exists")]
    Duplicate(MailId),
}

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid delivery configuration: {0}")]
    Configuration(String),

    /// The record store's change feed shut down.
    #[error("Change feed closed")]
    FeedClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reason_is_verbatim() {
        let err = TransportError::Rejected("SMTP 550".to_string());
        assert_eq!(err.to_string(), "SMTP 550");
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_error_conversion() {
        let err: DeliveryError = TransportError::Timeout("30s".to_string()).into();
        assert!(matches!(err, DeliveryError::Transport(TransportError::Timeout(_))));
        assert!(err.to_string().contains("Timed out"));
    }
}

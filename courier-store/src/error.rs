//! Error types for the courier-store crate.

use std::io;

use courier_common::MailId;
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O operation failed (file read/write/rename).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No record exists for the id.
    #[error("Record not found: {0}")]
    NotFound(MailId),

    /// A record with this mail id already exists.
    #[error("Record already exists: {0}")]
    AlreadyExists(MailId),

    /// The record was modified since it was read.
    #[error("Version conflict on {id}: expected {expected}, found {found}")]
    Conflict {
        id: MailId,
        expected: u64,
        found: u64,
    },

    /// The store cannot currently be reached.
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// Store configuration or layout is invalid.
    #[error("Store validation error: {0}")]
    Validation(String),

    /// Internal error (lock poisoning, capacity, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_) | Self::Conflict { .. })
    }
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = StoreError::from(io_err);

        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.to_string().contains("access denied"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_is_not_transient() {
        let id = MailId::new("m1").unwrap();
        assert!(!StoreError::NotFound(id).is_transient());
    }
}

//! Validation errors shared by every courier crate.

use thiserror::Error;

/// Errors raised while constructing domain values from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The mail id was empty or whitespace only.
    #[error("mailId must not be empty")]
    EmptyMailId,

    /// The mail id exceeded the maximum permitted length.
    #[error("mailId is {len} bytes long, the maximum is {max}")]
    MailIdTooLong { len: usize, max: usize },

    /// The mail id contained control characters.
    #[error("mailId contains control characters")]
    InvalidMailId,

    /// A required message field was missing or empty.
    #[error("Field `{0}` is required and must be a non-empty string")]
    MissingField(&'static str),

    /// `to` held separators but no address.
    #[error("Field `to` must contain at least one recipient address")]
    NoRecipients,
}

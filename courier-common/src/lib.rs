pub mod error;
pub mod log_buffer;
pub mod logging;
pub mod message;
pub mod record;

pub use error::ValidationError;
pub use log_buffer::{BufferLayer, LogBuffer, LogEntry};
pub use message::{OutgoingMessage, Submission};
pub use record::{DeliveryStatus, EmailRecord, MailId, budget_exhausted};
pub use tracing;

/// Broadcast to every long-running component when the relay stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

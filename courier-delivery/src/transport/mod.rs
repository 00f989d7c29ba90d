//! Mail transport adapters.

mod scripted;
mod smtp;

use async_trait::async_trait;
use courier_common::OutgoingMessage;

pub use scripted::ScriptedTransport;
pub use smtp::{SmtpConfig, SmtpTransport, TlsMode};

use crate::error::TransportError;

/// Recipients the upstream server accepted for a send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accepted {
    pub addresses: Vec<String>,
}

impl Accepted {
    #[must_use]
    pub fn new(addresses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Something that can hand a message to an upstream mail server.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send one message.
    ///
    /// An `Ok` with no accepted addresses is treated as a failure by the
    /// delivery engine.
    async fn send(&self, message: &OutgoingMessage) -> Result<Accepted, TransportError>;

    /// Check that the upstream server is reachable and accepts our session.
    async fn verify(&self) -> Result<bool, TransportError> {
        Ok(true)
    }
}

//! Delivery and retry for the courier relay.
//!
//! The [`DeliveryEngine`] owns every state transition of an [`EmailRecord`].
//! Three triggers feed it: the synchronous HTTP path, the reconciliation
//! sweep, and the change watcher. The latter two run inside
//! [`DeliveryProcessor`].
//!
//! [`EmailRecord`]: courier_common::EmailRecord

pub mod engine;
pub mod error;
pub mod locks;
pub mod policy;
pub mod processor;
pub mod transport;

pub use engine::{DeliveryEngine, DeliveryOutcome, Dispatch, SkipReason, Trigger};
pub use error::{DeliveryError, SubmitError, TransportError};
pub use locks::KeyedLocks;
pub use policy::{RetryPolicy, backoff_delay};
pub use processor::{DeliveryConfig, DeliveryProcessor, SweepReport};
pub use transport::{Accepted, ScriptedTransport, SmtpConfig, SmtpTransport, TlsMode, Transport};

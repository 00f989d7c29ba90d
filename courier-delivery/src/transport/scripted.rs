use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use courier_common::OutgoingMessage;
use parking_lot::Mutex;

use super::{Accepted, Transport};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<Result<Accepted, TransportError>>,
    fallback: Option<TransportError>,
    calls: Vec<OutgoingMessage>,
    latency: Option<Duration>,
    reachable: bool,
}

/// Transport double for tests and local development
///
/// By default every send succeeds and accepts all recipients. Results can be
/// queued with [`push_result`](Self::push_result) (consumed in order) or a
/// standing failure installed with [`fail_always`](Self::fail_always). Every
/// call is recorded for assertions.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                reachable: true,
                ..Script::default()
            })),
        }
    }
}

impl ScriptedTransport {
    /// A transport that accepts everything.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// A transport that fails every send with `reason`.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        let transport = Self::default();
        transport.fail_always(reason);
        transport
    }

    /// Queue the result of the next unscripted send.
    pub fn push_result(&self, result: Result<Accepted, TransportError>) {
        self.script.lock().queued.push_back(result);
    }

    /// Queue a rejection for the next send.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.push_result(Err(TransportError::Rejected(reason.into())));
    }

    /// Fail every send not covered by a queued result.
    pub fn fail_always(&self, reason: impl Into<String>) {
        self.script.lock().fallback = Some(TransportError::Rejected(reason.into()));
    }

    /// Go back to accepting sends not covered by a queued result.
    pub fn recover(&self) {
        self.script.lock().fallback = None;
    }

    /// Delay every send by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = Some(latency);
    }

    /// Control the result of [`verify`](Transport::verify).
    pub fn set_reachable(&self, reachable: bool) {
        self.script.lock().reachable = reachable;
    }

    /// Every message handed to [`send`](Transport::send), in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<OutgoingMessage> {
        self.script.lock().calls.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.script.lock().calls.len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<Accepted, TransportError> {
        let latency = self.script.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut script = self.script.lock();
        script.calls.push(message.clone());

        if let Some(result) = script.queued.pop_front() {
            return result;
        }

        match &script.fallback {
            Some(err) => Err(err.clone()),
            None => Ok(Accepted::new(message.recipients())),
        }
    }

    async fn verify(&self) -> Result<bool, TransportError> {
        Ok(self.script.lock().reachable)
    }
}

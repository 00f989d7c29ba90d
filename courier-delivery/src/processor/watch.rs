//! Change feed watcher: replays records as they are written.

use std::{sync::Arc, time::Duration};

use courier_common::{DeliveryStatus, Signal, internal};
use courier_store::{ChangeEvent, ChangeKind};
use tokio::{
    sync::{
        Notify,
        broadcast::{self, error::RecvError},
    },
    task::JoinSet,
};

use crate::{
    engine::{DeliveryEngine, Dispatch, SkipReason, Trigger},
    error::DeliveryError,
    policy::RetryPolicy,
};

/// What the watcher does with one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    Ignore(&'static str),
    Dispatch {
        trigger: Trigger,
        delay: Duration,
        /// Version the event carried, for the stale check.
        version: Option<u64>,
    },
}

/// Decide how to react to `event`.
///
/// Inserts are dispatched straight away unless already `sent`. Updates are
/// dispatched after the retry backoff for their attempt count, so a failed
/// write-back from the engine does not immediately re-trigger itself.
#[must_use]
pub fn decide(event: &ChangeEvent, policy: &RetryPolicy) -> WatchAction {
    match event.kind {
        ChangeKind::Delete => WatchAction::Ignore("deleted"),
        ChangeKind::Insert => match &event.document {
            Some(record) if record.status == DeliveryStatus::Sent => {
                WatchAction::Ignore("already sent")
            }
            document => WatchAction::Dispatch {
                trigger: Trigger::Insert,
                delay: Duration::ZERO,
                version: document.as_ref().map(|record| record.version),
            },
        },
        ChangeKind::Update => match &event.document {
            Some(record) if record.status.is_terminal() => WatchAction::Ignore("terminal"),
            Some(record) if policy.is_exhausted(record.attempts) => {
                WatchAction::Ignore("retry budget exhausted")
            }
            Some(record) => WatchAction::Dispatch {
                trigger: Trigger::Update,
                delay: policy.retry_delay(record.attempts),
                version: Some(record.version),
            },
            None => WatchAction::Dispatch {
                trigger: Trigger::Update,
                delay: policy.retry_delay(1),
                version: None,
            },
        },
    }
}

/// Subscribes to the store's change feed and dispatches records through the
/// engine.
///
/// Falling behind the feed drops events, so the watcher then wakes
/// `resweep` and leaves the missed records to a fresh sweep.
#[derive(Debug)]
pub struct ChangeWatcher {
    engine: Arc<DeliveryEngine>,
    shutdown_timeout: Duration,
    resweep: Arc<Notify>,
}

impl ChangeWatcher {
    #[must_use]
    pub const fn new(
        engine: Arc<DeliveryEngine>,
        shutdown_timeout: Duration,
        resweep: Arc<Notify>,
    ) -> Self {
        Self {
            engine,
            shutdown_timeout,
            resweep,
        }
    }

    /// Consume `feed` until shutdown.
    ///
    /// # Errors
    /// [`DeliveryError::FeedClosed`] if the store drops the feed.
    pub async fn run(
        &self,
        mut feed: broadcast::Receiver<ChangeEvent>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!("Change watcher started");

        let mut in_flight: JoinSet<Dispatch> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    internal!(level = INFO, "Change watcher received shutdown signal");
                    self.drain(&mut in_flight).await;
                    return Ok(());
                }

                Some(joined) = in_flight.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Watcher dispatch aborted");
                    }
                }

                event = feed.recv() => match event {
                    Ok(event) => self.handle(&event, &mut in_flight, &shutdown),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            missed,
                            "Change watcher fell behind, requesting a sweep"
                        );
                        self.resweep.notify_one();
                    }
                    Err(RecvError::Closed) => {
                        tracing::error!("Change feed closed");
                        in_flight.abort_all();
                        return Err(DeliveryError::FeedClosed);
                    }
                },
            }
        }
    }

    fn handle(
        &self,
        event: &ChangeEvent,
        in_flight: &mut JoinSet<Dispatch>,
        shutdown: &broadcast::Receiver<Signal>,
    ) {
        let (trigger, delay, version) = match decide(event, self.engine.policy()) {
            WatchAction::Ignore(reason) => {
                tracing::trace!(mail_id = %event.id, kind = ?event.kind, reason, "Ignoring change");
                return;
            }
            WatchAction::Dispatch {
                trigger,
                delay,
                version,
            } => (trigger, delay, version),
        };

        let engine = Arc::clone(&self.engine);
        let id = event.id.clone();
        let mut shutdown = shutdown.resubscribe();

        in_flight.spawn(async move {
            if !delay.is_zero() {
                tracing::debug!(
                    mail_id = %id,
                    %trigger,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling retry"
                );

                tokio::select! {
                    _ = shutdown.recv() => {
                        return Dispatch::Skipped(SkipReason::Cancelled);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            engine.dispatch_record(trigger, &id, version).await
        });
    }

    async fn drain(&self, in_flight: &mut JoinSet<Dispatch>) {
        if in_flight.is_empty() {
            return;
        }

        internal!(
            level = INFO,
            "Waiting for {} in-flight dispatches",
            in_flight.len()
        );

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "Shutdown timeout exceeded, remaining dispatches will be picked up by the next sweep"
            );
            in_flight.abort_all();
        }
    }
}

//! Reconciliation sweep: replay every retryable record whenever the store
//! (re)connects or the change watcher loses events.

use std::{sync::Arc, time::Duration};

use courier_common::{Signal, internal};
use courier_store::{RecordFilter, StoreError};
use tokio::{
    sync::{Notify, broadcast},
    task::JoinSet,
};

use super::readiness::{ReadinessBackoff, wait_until_ready};
use crate::engine::{DeliveryEngine, DeliveryOutcome, Dispatch, Trigger};

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records matched by the retry filter.
    pub found: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Records another trigger handled first, or that changed state.
    pub skipped: usize,
    /// Dispatches that panicked.
    pub aborted: usize,
}

impl SweepReport {
    fn tally(&mut self, dispatch: &Dispatch) {
        match dispatch {
            Dispatch::Attempted {
                outcome: DeliveryOutcome::Delivered { .. },
                ..
            } => self.delivered += 1,
            Dispatch::Attempted {
                outcome: DeliveryOutcome::Failed { .. },
                ..
            } => self.failed += 1,
            Dispatch::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Replay every retryable record once.
///
/// Records are dispatched concurrently, at most `concurrency` at a time. Each
/// dispatch runs in its own task, so one record failing or panicking never
/// stops the others.
///
/// # Errors
/// If the retryable records cannot be listed.
pub async fn sweep(
    engine: &Arc<DeliveryEngine>,
    concurrency: usize,
) -> Result<SweepReport, StoreError> {
    let filter = RecordFilter::retryable(engine.policy().max_retries);
    let records = engine.store().find_many(&filter).await?;

    let mut report = SweepReport {
        found: records.len(),
        ..SweepReport::default()
    };

    if records.is_empty() {
        return Ok(report);
    }

    internal!(level = INFO, "Sweeping {} retryable records", records.len());

    let concurrency = concurrency.max(1);
    let mut pending = records.into_iter();
    let mut in_flight = JoinSet::new();

    loop {
        while in_flight.len() < concurrency {
            let Some(record) = pending.next() else {
                break;
            };
            let engine = Arc::clone(engine);
            in_flight.spawn(async move {
                engine
                    .dispatch_record(Trigger::Sweep, &record.mail_id, Some(record.version))
                    .await
            });
        }

        match in_flight.join_next().await {
            Some(Ok(dispatch)) => report.tally(&dispatch),
            Some(Err(e)) => {
                report.aborted += 1;
                tracing::error!(error = %e, "Sweep dispatch aborted");
            }
            None => break,
        }
    }

    Ok(report)
}

/// Runs a sweep each time the store becomes reachable, and again whenever
/// `resweep` is notified.
#[derive(Debug)]
pub struct Reconciler {
    engine: Arc<DeliveryEngine>,
    backoff: ReadinessBackoff,
    connectivity_interval: Duration,
    concurrency: usize,
    resweep: Arc<Notify>,
}

impl Reconciler {
    #[must_use]
    pub const fn new(
        engine: Arc<DeliveryEngine>,
        backoff: ReadinessBackoff,
        connectivity_interval: Duration,
        concurrency: usize,
        resweep: Arc<Notify>,
    ) -> Self {
        Self {
            engine,
            backoff,
            connectivity_interval,
            concurrency,
            resweep,
        }
    }

    /// Wait for the store, sweep, then wait for an outage or a resweep
    /// request and start over.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<Signal>) {
        loop {
            if !wait_until_ready(self.engine.store().as_ref(), self.backoff, &mut shutdown).await
            {
                return;
            }

            match sweep(&self.engine, self.concurrency).await {
                Ok(report) => internal!(
                    level = INFO,
                    found = report.found,
                    delivered = report.delivered,
                    failed = report.failed,
                    skipped = report.skipped,
                    aborted = report.aborted,
                    "Reconciliation sweep complete"
                ),
                Err(e) => {
                    tracing::error!(error = %e, "Reconciliation sweep failed");
                    if self.pause(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            }

            if self.wait_for_trigger(&mut shutdown).await {
                return;
            }
        }
    }

    /// Poll connectivity until the store drops or a resweep is requested.
    /// Returns `true` on shutdown.
    async fn wait_for_trigger(&self, shutdown: &mut broadcast::Receiver<Signal>) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                () = self.resweep.notified() => {
                    internal!(level = INFO, "Sweep requested by the change watcher");
                    return false;
                }
                () = tokio::time::sleep(self.connectivity_interval) => {}
            }

            if !self.engine.store().is_connected().await {
                tracing::warn!("Record store connection lost, sweep will re-run on reconnect");
                return false;
            }
        }
    }

    /// Sleep one connectivity interval. Returns `true` on shutdown.
    async fn pause(&self, shutdown: &mut broadcast::Receiver<Signal>) -> bool {
        tokio::select! {
            _ = shutdown.recv() => true,
            () = tokio::time::sleep(self.connectivity_interval) => false,
        }
    }
}

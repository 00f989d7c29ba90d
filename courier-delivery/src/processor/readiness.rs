//! Waiting for the record store to become reachable.

use std::time::Duration;

use courier_common::{Signal, internal};
use courier_store::RecordStore;
use tokio::sync::broadcast;

/// Capped doubling backoff between connectivity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl ReadinessBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// The delay to use after `current`.
    #[must_use]
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Poll `store` until it reports connected.
///
/// Returns `false` if a shutdown signal arrives first.
pub async fn wait_until_ready(
    store: &dyn RecordStore,
    backoff: ReadinessBackoff,
    shutdown: &mut broadcast::Receiver<Signal>,
) -> bool {
    let mut delay = backoff.initial;
    let mut failed_checks = 0u32;

    loop {
        if store.is_connected().await {
            if failed_checks > 0 {
                internal!(
                    level = INFO,
                    "Record store reachable after {failed_checks} failed checks"
                );
            }
            return true;
        }

        failed_checks += 1;
        tracing::warn!(
            failed_checks,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Record store unavailable"
        );

        tokio::select! {
            _ = shutdown.recv() => {
                internal!(level = INFO, "Shutdown while waiting for record store");
                return false;
            }
            () = tokio::time::sleep(delay) => {}
        }

        delay = backoff.next(delay);
    }
}

#[cfg(test)]
mod tests {
    use courier_store::MemoryRecordStore;

    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let backoff = ReadinessBackoff::new(Duration::from_millis(500), Duration::from_secs(3));

        let mut delay = backoff.initial;
        let mut seen = vec![delay];
        for _ in 0..5 {
            delay = backoff.next(delay);
            seen.push(delay);
        }

        assert_eq!(
            seen,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[tokio::test]
    async fn test_returns_once_connected() {
        let store = MemoryRecordStore::new();
        store.set_connected(false);
        let (tx, mut rx) = broadcast::channel(1);

        let reconnect = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store.set_connected(true);
            })
        };

        let backoff = ReadinessBackoff::new(Duration::from_millis(5), Duration::from_millis(10));
        assert!(wait_until_ready(&store, backoff, &mut rx).await);

        let _ = reconnect.await;
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancelled_by_shutdown() {
        let store = MemoryRecordStore::new();
        store.set_connected(false);
        let (tx, mut rx) = broadcast::channel(1);

        let backoff = ReadinessBackoff::new(Duration::from_secs(60), Duration::from_secs(60));
        let waiter = tokio::spawn(async move { wait_until_ready(&store, backoff, &mut rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = tx.send(Signal::Shutdown);

        assert!(!waiter.await.unwrap_or(true));
    }
}

//! Background delivery: the reconciliation sweep and the change watcher.

pub mod readiness;
pub mod reconcile;
pub mod watch;

use std::{sync::Arc, time::Duration};

use courier_common::{Signal, internal};
use serde::Deserialize;
use tokio::sync::{Notify, broadcast};

pub use readiness::{ReadinessBackoff, wait_until_ready};
pub use reconcile::{Reconciler, SweepReport, sweep};
pub use watch::{ChangeWatcher, WatchAction, decide};

use crate::{engine::DeliveryEngine, error::DeliveryError, policy::RetryPolicy};

const fn default_readiness_initial_backoff() -> u64 {
    500
}

const fn default_readiness_max_backoff() -> u64 {
    60_000 // 1 minute
}

const fn default_connectivity_check() -> u64 {
    15
}

const fn default_sweep_concurrency() -> usize {
    8
}

const fn default_shutdown_timeout() -> u64 {
    30
}

/// Settings for the retry machinery.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// First wait between store readiness checks (in milliseconds).
    ///
    /// Doubles after every failed check up to `readiness_max_backoff_ms`.
    #[serde(default = "default_readiness_initial_backoff")]
    pub readiness_initial_backoff_ms: u64,

    /// Upper bound on the wait between readiness checks (in milliseconds).
    #[serde(default = "default_readiness_max_backoff")]
    pub readiness_max_backoff_ms: u64,

    /// How often to check the store is still reachable after a sweep (in
    /// seconds). A lost connection re-arms the sweep.
    #[serde(default = "default_connectivity_check")]
    pub connectivity_check_secs: u64,

    /// Records dispatched in parallel during a sweep.
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,

    /// Grace period for in-flight dispatches at shutdown (in seconds).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            readiness_initial_backoff_ms: default_readiness_initial_backoff(),
            readiness_max_backoff_ms: default_readiness_max_backoff(),
            connectivity_check_secs: default_connectivity_check(),
            sweep_concurrency: default_sweep_concurrency(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub fn readiness_backoff(&self) -> ReadinessBackoff {
        ReadinessBackoff::new(
            Duration::from_millis(self.readiness_initial_backoff_ms),
            Duration::from_millis(self.readiness_max_backoff_ms),
        )
    }

    /// Check the values make sense together.
    ///
    /// # Errors
    /// [`DeliveryError::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.retry.max_retries == 0 {
            return Err(DeliveryError::Configuration(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.retry_jitter_factor) {
            return Err(DeliveryError::Configuration(format!(
                "retry.retry_jitter_factor must be between 0.0 and 1.0, got {}",
                self.retry.retry_jitter_factor
            )));
        }

        if self.retry.base_retry_delay_secs > self.retry.max_retry_delay_secs {
            return Err(DeliveryError::Configuration(
                "retry.base_retry_delay_secs exceeds retry.max_retry_delay_secs".to_string(),
            ));
        }

        if self.connectivity_check_secs == 0 {
            return Err(DeliveryError::Configuration(
                "connectivity_check_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Runs the reconciliation sweep and the change watcher side by side.
#[derive(Debug)]
pub struct DeliveryProcessor {
    engine: Arc<DeliveryEngine>,
    watcher: ChangeWatcher,
    reconciler: Reconciler,
}

impl DeliveryProcessor {
    #[must_use]
    pub fn new(config: &DeliveryConfig, engine: Arc<DeliveryEngine>) -> Self {
        let resweep = Arc::new(Notify::new());
        let watcher = ChangeWatcher::new(
            Arc::clone(&engine),
            Duration::from_secs(config.shutdown_timeout_secs),
            Arc::clone(&resweep),
        );
        let reconciler = Reconciler::new(
            Arc::clone(&engine),
            config.readiness_backoff(),
            Duration::from_secs(config.connectivity_check_secs),
            config.sweep_concurrency,
            resweep,
        );

        Self {
            engine,
            watcher,
            reconciler,
        }
    }

    #[must_use]
    pub const fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    /// Run until shutdown.
    ///
    /// The change feed is subscribed before the first sweep starts, so
    /// nothing written between the two is missed. A record seen by both is
    /// attempted once: the second dispatch finds it changed. Events the
    /// watcher misses by lagging are recovered by an extra sweep.
    ///
    /// # Errors
    /// If the change feed closes.
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) -> Result<(), DeliveryError> {
        internal!(
            level = INFO,
            "Delivery processor starting with max_retries={}",
            self.engine.policy().max_retries
        );

        let feed = self.engine.store().subscribe();

        let (watched, ()) = tokio::join!(
            self.watcher.run(feed, shutdown.resubscribe()),
            self.reconciler.run(shutdown),
        );

        internal!(level = INFO, "Delivery processor shutdown complete");
        watched
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: DeliveryConfig = ron::from_str("()").unwrap();
        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.readiness_initial_backoff_ms, 500);
        assert_eq!(config.sweep_concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let config: DeliveryConfig = ron::from_str(
            "(retry: (max_retries: 3, base_retry_delay_secs: 10), sweep_concurrency: 2)",
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_retry_delay_secs, 10);
        assert_eq!(config.retry.max_retry_delay_secs, 3600);
        assert_eq!(config.sweep_concurrency, 2);
        assert_eq!(config.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DeliveryConfig::default();
        config.retry.max_retries = 0;
        assert!(matches!(
            config.validate(),
            Err(DeliveryError::Configuration(_))
        ));

        let mut config = DeliveryConfig::default();
        config.retry.retry_jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = DeliveryConfig::default();
        config.retry.base_retry_delay_secs = 7200;
        assert!(config.validate().is_err());
    }
}

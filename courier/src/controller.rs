use std::sync::{Arc, LazyLock};

use courier_common::{LogBuffer, Signal, internal, logging};
use courier_delivery::{
    DeliveryConfig, DeliveryEngine, DeliveryProcessor, SmtpConfig, SmtpTransport, Transport,
};
use courier_http::{AppState, HealthChecker, HttpConfig, HttpServer};
use courier_store::{RecordStore, StoreConfig};
use serde::Deserialize;
use tokio::sync::broadcast;

const fn default_log_capacity() -> usize {
    1000
}

/// In-memory log buffer settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    /// Entries kept for the `/logs` viewer before the oldest are dropped
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
        }
    }
}

/// The whole relay, as described by its configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for CTRL+C or SIGTERM, then tell everything to stop.
///
/// Only returns early if a second CTRL+C asks for a forced shutdown.
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    tracing::warn!("Forced shutdown");

    Ok(())
}

/// Log the outcome of the startup connection test. A failure is not fatal:
/// sends will fail and be queued until the relay is reachable.
async fn verify_transport(transport: &dyn Transport, health: &HealthChecker) {
    match transport.verify().await {
        Ok(true) => {
            internal!(level = INFO, "Mail server connection established successfully");
            health.set_transport_ready(true);
        }
        Ok(false) => tracing::error!("Mail server rejected the connection test"),
        Err(e) => tracing::error!(error = %e, "Mail server init error"),
    }
}

impl Courier {
    /// Build the SMTP transport and the delivery engine on top of `store`.
    ///
    /// # Errors
    ///
    /// This function will return an error if the SMTP settings are invalid.
    pub fn delivery_engine(
        &self,
        store: Arc<dyn RecordStore>,
    ) -> anyhow::Result<(Arc<dyn Transport>, Arc<DeliveryEngine>)> {
        let transport: Arc<dyn Transport> = Arc::new(SmtpTransport::from_config(&self.smtp)?);
        let engine = Arc::new(DeliveryEngine::new(
            Arc::clone(&transport),
            store,
            self.delivery.retry.clone(),
        ));

        Ok((transport, engine))
    }

    /// Check every section before anything is started.
    ///
    /// # Errors
    ///
    /// This function will return an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.delivery.validate()?;
        self.http.auth.validate()?;

        if !self.http.auth.requires_auth() {
            tracing::warn!("Authentication is disabled, /sendmail accepts every request");
        }

        Ok(())
    }

    /// Run the relay until shutdown
    ///
    /// # Errors
    ///
    /// This function will return an error if the store, transport or HTTP
    /// listener cannot be set up, or if a component fails while running.
    pub async fn run(self) -> anyhow::Result<()> {
        let buffer = LogBuffer::new(self.logs.capacity);
        logging::init(&buffer);

        internal!(level = INFO, "Controller running");

        self.validate()?;

        let store = self.store.build()?;
        internal!(level = INFO, "Record store ready: {:?}", self.store);

        let (transport, engine) = self.delivery_engine(Arc::clone(&store))?;

        let health = Arc::new(HealthChecker::new(store));
        verify_transport(transport.as_ref(), &health).await;

        let processor = DeliveryProcessor::new(&self.delivery, Arc::clone(&engine));

        let state = AppState {
            engine,
            auth: Arc::new(self.http.auth.clone()),
            health: Arc::clone(&health),
            logs: buffer,
        };
        let server = HttpServer::new(&self.http, state).await?;

        let processor_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let server_shutdown = SHUTDOWN_BROADCAST.subscribe();
        health.set_delivery_ready(true);

        let services = async move {
            tokio::try_join!(
                async move {
                    processor
                        .serve(processor_shutdown)
                        .await
                        .map_err(anyhow::Error::from)
                },
                async move { server.serve(server_shutdown).await.map_err(anyhow::Error::from) },
            )
            .map(|_| ())
        };

        let ret = tokio::select! {
            r = services => r,
            r = shutdown() => r,
        };

        health.set_delivery_ready(false);
        internal!(level = INFO, "Shutting down...");

        ret
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use courier_delivery::TlsMode;

    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let courier: Courier = ron::from_str("Courier ()").unwrap();

        assert_eq!(courier.http.listen_address, "[::]:3000");
        assert_eq!(courier.smtp.port, 587);
        assert_eq!(
            courier.store,
            StoreConfig::File {
                path: PathBuf::from("/var/lib/courier/records")
            }
        );
        assert_eq!(courier.delivery.retry.max_retries, 5);
        assert_eq!(courier.logs.capacity, 1000);
    }

    #[test]
    fn test_full_config() {
        let courier: Courier = ron::from_str(
            r#"Courier (
                http: (
                    listen_address: "127.0.0.1:8080",
                    auth: (enabled: true, token_hashes: ["00ff"]),
                ),
                smtp: (host: "smtp.example.com", port: 465, tls: Tls),
                store: Memory(capacity: Some(50)),
                delivery: (retry: (max_retries: 3), sweep_concurrency: 2),
                logs: (capacity: 200),
            )"#,
        )
        .unwrap();

        assert_eq!(courier.http.listen_address, "127.0.0.1:8080");
        assert!(courier.http.auth.requires_auth());
        assert_eq!(courier.smtp.host, "smtp.example.com");
        assert_eq!(courier.smtp.tls, TlsMode::Tls);
        assert_eq!(courier.store, StoreConfig::Memory { capacity: Some(50) });
        assert_eq!(courier.delivery.retry.max_retries, 3);
        assert_eq!(courier.delivery.sweep_concurrency, 2);
        assert_eq!(courier.logs.capacity, 200);
    }

    fn sample() -> Courier {
        ron::from_str(include_str!("../../courier.config.ron")).unwrap()
    }

    #[test]
    fn test_sample_config_parses() {
        let courier = sample();

        assert!(courier.validate().is_ok());
        assert!(courier.http.auth.requires_auth());
    }

    #[tokio::test]
    async fn test_sample_config_builds_delivery_engine() {
        let courier = Courier {
            store: StoreConfig::Memory { capacity: None },
            ..sample()
        };
        let store = courier.store.build().unwrap();

        let (transport, engine) = courier.delivery_engine(Arc::clone(&store)).unwrap();

        assert!(Arc::ptr_eq(engine.transport(), &transport));
        assert_eq!(engine.policy().max_retries, 5);
        assert!(engine.store().is_connected().await);
    }

    #[test]
    fn test_missing_auth_section_refuses_to_start() {
        let courier: Courier = ron::from_str("Courier ()").unwrap();

        assert!(courier.http.auth.requires_auth());
        assert!(courier.validate().is_err());
    }

    #[test]
    fn test_explicitly_disabled_auth_is_allowed() {
        let courier: Courier =
            ron::from_str("Courier (http: (auth: (enabled: false)))").unwrap();

        assert!(courier.validate().is_ok());
    }
}

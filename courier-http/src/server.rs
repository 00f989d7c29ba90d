//! HTTP server

use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use courier_common::{Signal, internal};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};

use crate::{AppState, HttpConfig, HttpError, health, ingress, logs};

/// Build the full route table.
///
/// CORS is permissive on every route. Requests running past
/// `request_timeout_secs` get `408 Request Timeout`.
pub fn router(state: AppState, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .route("/sendmail", post(ingress::send_mail))
        .route("/sendmail/", post(ingress::send_mail))
        .route("/api/v1/health", get(health::api_health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    if config.logs_enabled {
        router = router
            .route("/logs", get(logs::grouped))
            .route("/logs/print", get(logs::print_all))
            .route("/logs/print/{level}", get(logs::print_level))
            .route("/logs/printhtml", get(logs::html_all))
            .route("/logs/printhtml/{level}", get(logs::html_level));
    }

    router
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(CorsLayer::permissive())
}

/// The relay's HTTP front door
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Bind the listener and build the router.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(config: &HttpConfig, state: AppState) -> Result<Self, HttpError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| HttpError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        internal!(
            level = INFO,
            address = %config.listen_address,
            auth = config.auth.requires_auth(),
            "HTTP server bound"
        );

        Ok(Self {
            listener,
            router: router(state, config),
        })
    }

    /// The address actually bound, useful when listening on port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket's local address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a shutdown signal arrives, then finish in-flight requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HttpError> {
        internal!(level = INFO, "HTTP server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                internal!(level = INFO, "HTTP server received shutdown signal");
            })
            .await
            .map_err(|e| HttpError::ServerError(e.to_string()))?;

        internal!(level = INFO, "HTTP server stopped");
        Ok(())
    }
}

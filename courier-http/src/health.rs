//! Health probes

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_store::RecordStore;
use serde::Serialize;
use serde_json::json;

use crate::AppState;

/// Tracks the readiness of the relay's components
///
/// Transport and delivery readiness are flags set by whoever starts those
/// components. Store readiness is checked live on every probe.
#[derive(Debug)]
pub struct HealthChecker {
    /// Whether the upstream mail server accepted our session at startup
    transport_ready: AtomicBool,

    /// Whether the delivery processor is running
    delivery_ready: AtomicBool,

    store: Arc<dyn RecordStore>,
}

impl HealthChecker {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            transport_ready: AtomicBool::new(false),
            delivery_ready: AtomicBool::new(false),
            store,
        }
    }

    pub fn set_transport_ready(&self, ready: bool) {
        self.transport_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Transport readiness updated");
    }

    pub fn set_delivery_ready(&self, ready: bool) {
        self.delivery_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Delivery readiness updated");
    }

    /// For liveness we only need to respond at all.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    /// Current status of every component.
    pub async fn status(&self) -> HealthStatus {
        let transport_ready = self.transport_ready.load(Ordering::Relaxed);
        let delivery_ready = self.delivery_ready.load(Ordering::Relaxed);
        let store_ready = self.store.is_connected().await;

        HealthStatus {
            alive: self.is_alive(),
            ready: transport_ready && delivery_ready && store_ready,
            transport_ready,
            delivery_ready,
            store_ready,
        }
    }
}

/// Detailed health status information
#[derive(Debug, Clone, Serialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Status struct intentionally has multiple boolean fields for clarity"
)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub transport_ready: bool,
    pub delivery_ready: bool,
    pub store_ready: bool,
}

/// `GET /api/v1/health`
pub async fn api_health() -> Json<serde_json::Value> {
    Json(json!({ "status": true }))
}

/// `GET /health/live`
pub async fn liveness(State(state): State<AppState>) -> Response {
    if state.health.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// `GET /health/ready`
pub async fn readiness(State(state): State<AppState>) -> Response {
    let status = state.health.status().await;

    if status.ready {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(
            transport_ready = status.transport_ready,
            delivery_ready = status.delivery_ready,
            store_ready = status.store_ready,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

//! HTTP surface of the courier relay
//!
//! # Endpoints
//!
//! - **`POST /sendmail`** (and `/sendmail/`) - submit an email for delivery
//! - **`GET /api/v1/health`** - always `{"status": true}`
//! - **`GET /health/live`**, **`GET /health/ready`** - orchestration probes
//! - **`GET /logs`**, **`/logs/print[/{level}]`**, **`/logs/printhtml[/{level}]`** -
//!   the in-memory log buffer

mod auth;
mod config;
mod error;
mod health;
mod ingress;
mod logs;
mod server;

use std::sync::Arc;

pub use auth::{AuthConfig, bearer_token, hash_token};
pub use config::HttpConfig;
use courier_common::LogBuffer;
use courier_delivery::DeliveryEngine;
pub use error::{ApiBody, ApiError, HttpError};
pub use health::{HealthChecker, HealthStatus};
pub use ingress::SendResult;
pub use logs::render_page;
pub use server::{HttpServer, router};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Arc<DeliveryEngine>,
    pub auth: Arc<AuthConfig>,
    pub health: Arc<HealthChecker>,
    pub logs: LogBuffer,
}

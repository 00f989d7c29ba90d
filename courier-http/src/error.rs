//! HTTP error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_common::{MailId, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// Errors starting or running the HTTP server
#[derive(Debug, Error)]
pub enum HttpError {
    /// Failed to bind to the specified address
    #[error("Failed to bind HTTP server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    /// The server encountered a runtime error
    #[error("HTTP server error: {0}")]
    ServerError(String),

    /// The HTTP configuration is unusable
    #[error("Invalid HTTP configuration: {0}")]
    Configuration(String),
}

/// Body of every `/sendmail` response.
#[derive(Debug, Serialize)]
pub struct ApiBody<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Why a `/sendmail` request was not delivered.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid or no JSON provided in body")]
    InvalidJson,

    #[error("Access denied")]
    AccessDenied,

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Email with mailId {0} has already been submitted")]
    Duplicate(MailId),

    /// The first attempt failed; the record is queued for retry.
    #[error("Failed to send email, it has been queued for retry")]
    DeliveryFailed,
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::DeliveryFailed => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiBody::<()> {
            result: None,
            error: Some(self.to_string()),
        };
        (self.status(), Json(body)).into_response()
    }
}

use std::time::Duration;

use async_trait::async_trait;
use courier_common::OutgoingMessage;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use serde::Deserialize;

use super::{Accepted, Transport};
use crate::error::{DeliveryError, TransportError};

const USERNAME_ENV: &str = "COURIER_SMTP_USERNAME";
const PASSWORD_ENV: &str = "COURIER_SMTP_PASSWORD";

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    587
}

const fn default_timeout_secs() -> u64 {
    30
}

/// How the SMTP session is secured.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS (port 587).
    #[default]
    StartTls,
    /// TLS from the first byte (port 465).
    Tls,
    /// No encryption. Only for local relays and tests.
    None,
}

/// Upstream SMTP relay configuration
///
/// # Example Configuration
///
/// ```ron
/// smtp: (
///     host: "smtp.gmail.com",
///     port: 587,
///     tls: StartTls,
///     username: Some("relay@example.com"),
/// )
/// ```
///
/// Credentials left out of the file are read from `COURIER_SMTP_USERNAME` and
/// `COURIER_SMTP_PASSWORD`.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsMode,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Timeout applied to each SMTP command, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: TlsMode::default(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SmtpConfig {
    fn credentials(&self) -> Option<Credentials> {
        let username = self
            .username
            .clone()
            .or_else(|| std::env::var(USERNAME_ENV).ok())?;
        let password = self
            .password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())?;

        Some(Credentials::new(username, password))
    }
}

/// Transport backed by lettre's async SMTP client.
#[derive(Clone)]
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
    port: u16,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Build a pooled SMTP transport.
    ///
    /// # Errors
    /// If the TLS parameters for `host` cannot be constructed.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| DeliveryError::Configuration(e.to_string()))?,
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| DeliveryError::Configuration(e.to_string()))?,
        };

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let Some(credentials) = config.credentials() {
            builder = builder.credentials(credentials);
        } else {
            tracing::warn!(host = %config.host, "No SMTP credentials configured");
        }

        Ok(Self {
            inner: builder.build(),
            host: config.host.clone(),
            port: config.port,
        })
    }

    fn build_message(message: &OutgoingMessage) -> Result<Message, TransportError> {
        let from: Mailbox = message.from.parse().map_err(|e| {
            TransportError::InvalidMessage(format!("invalid sender {}: {e}", message.from))
        })?;

        let mut builder = Message::builder().from(from).subject(message.subject.clone());

        for recipient in message.recipients() {
            let mailbox: Mailbox = recipient.parse().map_err(|e| {
                TransportError::InvalidMessage(format!("invalid recipient {recipient}: {e}"))
            })?;
            builder = builder.to(mailbox);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(message.html.clone())
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

fn classify(err: &lettre::transport::smtp::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if let Some(code) = err.status() {
        TransportError::Rejected(format!("SMTP {code}: {err}"))
    } else {
        TransportError::Connection(err.to_string())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<Accepted, TransportError> {
        let email = Self::build_message(message)?;
        let recipients: Vec<String> = email
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect();

        let response = self.inner.send(email).await.map_err(|e| classify(&e))?;

        if response.is_positive() {
            Ok(Accepted::new(recipients))
        } else {
            Err(TransportError::Rejected(format!("SMTP {}", response.code())))
        }
    }

    async fn verify(&self) -> Result<bool, TransportError> {
        self.inner.test_connection().await.map_err(|e| classify(&e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: SmtpConfig = ron::from_str("(host: \"smtp.example.com\")").unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.tls, TlsMode::StartTls);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_build_html_message() {
        let message =
            OutgoingMessage::new("a@x.com", "b@x.com, c@x.com", "Hi", "<p>hi</p>").unwrap();
        let email = SmtpTransport::build_message(&message).unwrap();

        assert_eq!(email.envelope().to().len(), 2);
        let formatted = String::from_utf8(email.formatted()).unwrap();
        assert!(formatted.contains("Content-Type: text/html"));
        assert!(formatted.contains("Subject: Hi"));
    }

    #[test]
    fn test_invalid_sender_is_rejected() {
        let message = OutgoingMessage::new("not an address", "b@x.com", "Hi", "<p>hi</p>").unwrap();
        let err = SmtpTransport::build_message(&message).unwrap_err();

        assert!(matches!(err, TransportError::InvalidMessage(_)));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_plain_transport_builds_without_network() {
        let config = SmtpConfig {
            host: "127.0.0.1".to_string(),
            port: 2525,
            tls: TlsMode::None,
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            timeout_secs: 1,
        };

        let transport = SmtpTransport::from_config(&config).unwrap();
        assert!(format!("{transport:?}").contains("2525"));
    }
}

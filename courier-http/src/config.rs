//! HTTP server configuration

use serde::Deserialize;

use crate::AuthConfig;

/// Configuration for the HTTP surface
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address to bind
    ///
    /// Common values:
    /// - `[::]:3000` (IPv6 any address, port 3000)
    /// - `0.0.0.0:3000` (IPv4 any address, port 3000)
    /// - `127.0.0.1:3000` (localhost only, port 3000)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Upper bound on handling one request (in seconds)
    ///
    /// Covers the synchronous delivery attempt made by `/sendmail`, so it
    /// should exceed the SMTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Serve the `/logs` viewer routes
    #[serde(default = "default_logs_enabled")]
    pub logs_enabled: bool,

    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_listen_address() -> String {
    "[::]:3000".to_string()
}

const fn default_request_timeout() -> u64 {
    60
}

const fn default_logs_enabled() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            request_timeout_secs: default_request_timeout(),
            logs_enabled: default_logs_enabled(),
            auth: AuthConfig::default(),
        }
    }
}

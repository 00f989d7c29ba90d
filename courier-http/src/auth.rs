//! Bearer token authentication for the ingress endpoint
//!
//! Tokens are configured as SHA-256 hashes so the plaintext never appears in
//! configuration files. Incoming tokens are hashed and compared against the
//! configured list.

use hex::encode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::HttpError;

const fn default_enabled() -> bool {
    true
}

/// Authentication configuration for `/sendmail`
///
/// # Example Configuration
///
/// ```ron
/// auth: (
///     enabled: true,
///     token_hashes: [
///         // SHA-256 hash of "test-token"
///         "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e",
///     ],
/// )
/// ```
///
/// # Generating Token Hashes
///
/// ```bash
/// echo -n "your-secret-token" | sha256sum
/// ```
///
/// Authentication is on unless explicitly disabled, and the relay refuses to
/// start with it on but no tokens configured.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When disabled every request is allowed.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Accepted tokens, as 64-character hex SHA-256 hashes.
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            token_hashes: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Check the token list is usable.
    ///
    /// # Errors
    /// [`HttpError::Configuration`] if authentication is enabled without any
    /// tokens, or a configured hash is not 64 hex characters.
    pub fn validate(&self) -> Result<(), HttpError> {
        if !self.enabled {
            return Ok(());
        }

        if self.token_hashes.is_empty() {
            return Err(HttpError::Configuration(
                "http.auth is enabled but no token_hashes are configured".to_string(),
            ));
        }

        if let Some(bad) = self
            .token_hashes
            .iter()
            .find(|hash| hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(HttpError::Configuration(format!(
                "http.auth.token_hashes entry {bad:?} is not a hex SHA-256 hash"
            )));
        }

        Ok(())
    }

    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        self.enabled
    }

    /// Check a plaintext token against the configured hashes.
    ///
    /// Always `true` when authentication is disabled.
    #[must_use]
    pub fn validate_token(&self, token: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let hash = hash_token(token);
        self.token_hashes
            .iter()
            .any(|configured| configured.eq_ignore_ascii_case(&hash))
    }

    /// Check the raw value of an `Authorization` header.
    ///
    /// # Errors
    /// Returns a description of the failure when authentication is enabled
    /// and the header is absent, malformed, or carries an unknown token.
    pub fn authorize(&self, header: Option<&str>) -> Result<(), &'static str> {
        if !self.enabled {
            return Ok(());
        }

        let Some(header) = header else {
            return Err("Authentication required but no token provided");
        };

        let Some(token) = bearer_token(header) else {
            return Err("Malformed authorization header");
        };

        if self.validate_token(token) {
            Ok(())
        } else {
            Err("Invalid authentication token")
        }
    }
}

/// Extract the token from `Bearer <token>`.
///
/// The header must split on spaces into exactly two parts, the first being
/// `Bearer`.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}

/// Hex SHA-256 of `token`, the form stored in `token_hashes`.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-256 of "test-token"
    const TEST_TOKEN_HASH: &str =
        "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e";

    fn enabled() -> AuthConfig {
        AuthConfig {
            enabled: true,
            token_hashes: vec![TEST_TOKEN_HASH.to_string()],
        }
    }

    #[test]
    fn test_hash_matches_sha256sum() {
        assert_eq!(hash_token("test-token"), TEST_TOKEN_HASH);
    }

    #[test]
    fn test_default_requires_tokens() {
        let config = AuthConfig::default();

        assert!(config.requires_auth());
        assert!(config.authorize(None).is_err());
        assert!(matches!(
            config.validate(),
            Err(HttpError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_token_hashes() {
        assert!(enabled().validate().is_ok());

        let upper = AuthConfig {
            enabled: true,
            token_hashes: vec![TEST_TOKEN_HASH.to_uppercase()],
        };
        assert!(upper.validate().is_ok());

        let plaintext = AuthConfig {
            enabled: true,
            token_hashes: vec!["test-token".to_string()],
        };
        assert!(plaintext.validate().is_err());
    }

    #[test]
    fn test_auth_disabled() {
        let config = AuthConfig {
            enabled: false,
            token_hashes: Vec::new(),
        };

        assert!(config.validate().is_ok());

        assert!(!config.requires_auth());
        assert!(config.validate_token("anything"));
        assert!(config.authorize(None).is_ok());
        assert!(config.authorize(Some("garbage")).is_ok());
    }

    #[test]
    fn test_valid_bearer_token() {
        let config = enabled();

        assert!(config.validate_token("test-token"));
        assert!(config.authorize(Some("Bearer test-token")).is_ok());
    }

    #[test]
    fn test_rejected_headers() {
        let config = enabled();

        assert!(config.authorize(None).is_err());
        assert!(config.authorize(Some("Bearer wrong-token")).is_err());
        assert!(config.authorize(Some("test-token")).is_err());
        assert!(config.authorize(Some("Basic test-token")).is_err());
        assert!(config.authorize(Some("Bearer test-token extra")).is_err());
        assert!(config.authorize(Some("Bearer  test-token")).is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), Some(""));
        assert_eq!(bearer_token("bearer abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer a b"), None);
    }

    #[test]
    fn test_empty_hash_list_rejects_everything() {
        let config = AuthConfig {
            enabled: true,
            token_hashes: Vec::new(),
        };

        assert!(!config.validate_token("test-token"));
        assert!(config.authorize(Some("Bearer test-token")).is_err());
    }
}

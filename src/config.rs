//! Room, server and identity-provider configuration.
//!
//! Everything here is built and validated once at startup, before the
//! server accepts connections.
//!
//! # Example
//!
//! ```
//! use chat_room::{EchoPolicy, RoomConfig};
//!
//! let config = RoomConfig::new()
//!     .with_queue_capacity(64)
//!     .with_echo(EchoPolicy::Exclude);
//! assert!(config.validate().is_ok());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default per-connection outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the room's forward intake.
pub const DEFAULT_FORWARD_BUFFER: usize = 1024;

/// Default number of coordinator restarts before the room gives up.
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// EchoPolicy
// ============================================================================

/// Whether a sender receives its own forwarded message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Every member, sender included, gets the message.
    #[default]
    Include,
    /// The sender is skipped.
    Exclude,
}

// ============================================================================
// RoomConfig
// ============================================================================

/// Room hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Outbound queue capacity per member.
    pub queue_capacity: usize,
    /// Capacity of the forward intake shared by all read workers.
    pub forward_buffer: usize,
    /// Echo policy for fan-out.
    pub echo: EchoPolicy,
    /// Coordinator restarts tolerated by the supervisor.
    pub max_restarts: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            forward_buffer: DEFAULT_FORWARD_BUFFER,
            echo: EchoPolicy::Include,
            max_restarts: DEFAULT_MAX_RESTARTS,
        }
    }

    /// Sets the per-member queue capacity.
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the forward intake capacity.
    #[inline]
    #[must_use]
    pub fn with_forward_buffer(mut self, capacity: usize) -> Self {
        self.forward_buffer = capacity;
        self
    }

    /// Sets the echo policy.
    #[inline]
    #[must_use]
    pub fn with_echo(mut self, echo: EchoPolicy) -> Self {
        self.echo = echo;
        self
    }

    /// Sets the restart limit.
    #[inline]
    #[must_use]
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be greater than zero"));
        }
        if self.forward_buffer == 0 {
            return Err(Error::config("forward_buffer must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// TraceTarget
// ============================================================================

/// Where the room trace goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceTarget {
    /// One line per event on standard output.
    #[default]
    Stdout,
    /// Through `tracing`.
    Log,
    /// Nowhere.
    Off,
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Listen address.
    pub addr: SocketAddr,
    /// Request path of the room endpoint.
    pub room_path: String,
    /// Redirect target for unauthenticated requests.
    pub login_path: String,
    /// Cookie whose presence marks a request as authenticated.
    pub auth_cookie: String,
    /// Trace destination.
    pub trace: TraceTarget,
    /// Room settings.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            room_path: "/room".to_string(),
            login_path: "/login".to_string(),
            auth_cookie: "auth".to_string(),
            trace: TraceTarget::default(),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    #[inline]
    #[must_use]
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the trace destination.
    #[inline]
    #[must_use]
    pub fn with_trace(mut self, trace: TraceTarget) -> Self {
        self.trace = trace;
        self
    }

    /// Sets the room settings.
    #[inline]
    #[must_use]
    pub fn with_room(mut self, room: RoomConfig) -> Self {
        self.room = room;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a path is not absolute, the cookie
    /// name is empty, or the room settings are invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [("room_path", &self.room_path), ("login_path", &self.login_path)] {
            if !path.starts_with('/') {
                return Err(Error::config(format!("{name} must start with '/': {path:?}")));
            }
        }
        if self.auth_cookie.is_empty() {
            return Err(Error::config("auth_cookie must not be empty"));
        }
        self.room.validate()
    }
}

// ============================================================================
// OAuthConfig
// ============================================================================

/// Client credentials for one identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderCredentials {
    /// OAuth client id.
    #[serde(rename = "ClientId")]
    pub client_id: String,
    /// OAuth client secret.
    #[serde(rename = "ClientSecret")]
    pub client_secret: String,
}

/// The known identity providers, one field each.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Providers {
    /// Google credentials.
    #[serde(rename = "Google")]
    pub google: ProviderCredentials,
    /// GitHub credentials.
    #[serde(rename = "Github")]
    pub github: ProviderCredentials,
}

/// Identity-provider configuration file.
///
/// ```json
/// {
///   "SecurityKey": "...",
///   "Provider": {
///     "Google": { "ClientId": "...", "ClientSecret": "..." },
///     "Github": { "ClientId": "...", "ClientSecret": "..." }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthConfig {
    /// Key used to sign session state.
    #[serde(rename = "SecurityKey")]
    pub security_key: String,
    /// Provider credentials.
    #[serde(rename = "Provider")]
    pub providers: Providers,
}

impl OAuthConfig {
    /// Parses and validates a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is malformed, has unknown fields, or
    ///   lacks a provider
    /// - [`Error::Config`] if a key, id or secret is empty
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, otherwise as
    /// [`from_json`](Self::from_json).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        debug!(path = %path.display(), "Identity provider configuration loaded");
        Ok(config)
    }

    /// Validates that no credential is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        if self.security_key.trim().is_empty() {
            return Err(Error::config("SecurityKey must not be empty"));
        }
        for (name, provider) in [
            ("Google", &self.providers.google),
            ("Github", &self.providers.github),
        ] {
            if provider.client_id.trim().is_empty() {
                return Err(Error::config(format!("{name}.ClientId must not be empty")));
            }
            if provider.client_secret.trim().is_empty() {
                return Err(Error::config(format!(
                    "{name}.ClientSecret must not be empty"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "SecurityKey": "s3cret",
        "Provider": {
            "Google": { "ClientId": "g-id", "ClientSecret": "g-secret" },
            "Github": { "ClientId": "h-id", "ClientSecret": "h-secret" }
        }
    }"#;

    #[test]
    fn test_room_defaults() {
        let config = RoomConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.forward_buffer, DEFAULT_FORWARD_BUFFER);
        assert_eq!(config.echo, EchoPolicy::Include);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_room_rejects_zero_capacity() {
        let err = RoomConfig::new().with_queue_capacity(0).validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = RoomConfig::new().with_forward_buffer(0).validate().unwrap_err();
        assert!(err.to_string().contains("forward_buffer"));
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), DEFAULT_PORT);
        assert_eq!(config.room_path, "/room");
        assert_eq!(config.login_path, "/login");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_rejects_relative_path() {
        let mut config = ServerConfig::default();
        config.login_path = "login".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("login_path"));
    }

    #[test]
    fn test_oauth_parse() {
        let config = OAuthConfig::from_json(VALID).expect("valid config");
        assert_eq!(config.security_key, "s3cret");
        assert_eq!(config.providers.google.client_id, "g-id");
        assert_eq!(config.providers.github.client_secret, "h-secret");
    }

    #[test]
    fn test_oauth_missing_provider() {
        let text = r#"{
            "SecurityKey": "k",
            "Provider": { "Google": { "ClientId": "a", "ClientSecret": "b" } }
        }"#;
        assert!(matches!(OAuthConfig::from_json(text), Err(Error::Json(_))));
    }

    #[test]
    fn test_oauth_unknown_provider() {
        let text = VALID.replace("\"Github\"", "\"Gitlab\"");
        assert!(matches!(OAuthConfig::from_json(&text), Err(Error::Json(_))));
    }

    #[test]
    fn test_oauth_empty_secret() {
        let text = VALID.replace("g-secret", " ");
        let err = OAuthConfig::from_json(&text).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Google.ClientSecret must not be empty"
        );
    }

    #[test]
    fn test_oauth_load_missing_file() {
        let err = OAuthConfig::load("/nonexistent/oauth2_config.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

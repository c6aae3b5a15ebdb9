//! Error types for the chat room.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use chat_room::{Result, RoomHandle};
//!
//! async fn count(room: &RoomHandle) -> Result<usize> {
//!     Ok(room.members().await?.len())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Upgrade | [`Error::Upgrade`], [`Error::Rejected`] |
//! | Room | [`Error::RoomClosed`], [`Error::QueueClosed`] |
//! | External | [`Error::Io`], [`Error::Json`] |
//!
//! Transport failures on an established connection are not surfaced as
//! errors at all: they end the connection and produce a single leave.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::http::StatusCode;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when room, server or provider configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Upgrade Errors
    // ========================================================================
    /// WebSocket upgrade negotiation failed.
    ///
    /// Local to one request; never reaches the room.
    #[error("Upgrade failed: {message}")]
    Upgrade {
        /// Description of the upgrade failure.
        message: String,
    },

    /// Upgrade request refused by a handshake filter.
    ///
    /// The filter already wrote `status` back to the caller.
    #[error("Upgrade rejected with {status}")]
    Rejected {
        /// Status code sent to the caller.
        status: StatusCode,
    },

    // ========================================================================
    // Room Errors
    // ========================================================================
    /// The room coordinator is no longer running.
    #[error("Room closed")]
    RoomClosed,

    /// Outbound queue closed while waiting for space.
    #[error("Outbound queue closed")]
    QueueClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an upgrade error.
    #[inline]
    pub fn upgrade(message: impl Into<String>) -> Self {
        Self::Upgrade {
            message: message.into(),
        }
    }

    /// Creates a rejected-upgrade error.
    #[inline]
    pub fn rejected(status: StatusCode) -> Self {
        Self::Rejected { status }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error belongs to a single upgrade request.
    #[inline]
    #[must_use]
    pub fn is_upgrade_error(&self) -> bool {
        matches!(self, Self::Upgrade { .. } | Self::Rejected { .. })
    }

    /// Returns `true` if this is a connection-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Upgrade { .. } | Self::Rejected { .. } | Self::Io(_))
    }

    /// Returns `true` if the room itself has stopped.
    #[inline]
    #[must_use]
    pub fn is_room_closed(&self) -> bool {
        matches!(self, Self::RoomClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::upgrade("missing Sec-WebSocket-Key");
        assert_eq!(err.to_string(), "Upgrade failed: missing Sec-WebSocket-Key");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("queue_capacity must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Configuration error: queue_capacity must be greater than zero"
        );
    }

    #[test]
    fn test_rejected_display() {
        let err = Error::rejected(StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(err.to_string(), "Upgrade rejected with 307 Temporary Redirect");
    }

    #[test]
    fn test_is_upgrade_error() {
        assert!(Error::upgrade("x").is_upgrade_error());
        assert!(Error::rejected(StatusCode::NOT_FOUND).is_upgrade_error());
        assert!(!Error::RoomClosed.is_upgrade_error());
    }

    #[test]
    fn test_is_connection_error() {
        let io_err: Error = IoError::new(ErrorKind::ConnectionReset, "reset").into();

        assert!(io_err.is_connection_error());
        assert!(Error::upgrade("x").is_connection_error());
        assert!(!Error::config("x").is_connection_error());
        assert!(!Error::RoomClosed.is_connection_error());
    }

    #[test]
    fn test_is_room_closed() {
        assert!(Error::RoomClosed.is_room_closed());
        assert!(!Error::QueueClosed.is_room_closed());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}

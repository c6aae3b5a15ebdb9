//! Upgrade adapter: turns an accepted stream into a joined connection.
//!
//! # Flow
//!
//! 1. Read the request head and refuse anything that cannot be upgraded
//!    (see [`handshake`](super::handshake))
//! 2. Run the handshake filters ([`MustAuth`] around [`RoomRoute`])
//! 3. Complete the WebSocket upgrade
//! 4. Create a [`Connection`] and join it to the room
//! 5. Start its read and write workers
//!
//! A failure in steps 1-3 is answered with an HTTP error on that stream
//! alone and never reaches the room.

// ============================================================================
// Imports
// ============================================================================

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::hub::RoomHandle;

use super::auth::{MustAuth, RoomRoute};
use super::connection::{Connection, ConnectionTasks};
use super::handshake::{Replay, precheck};

// ============================================================================
// UpgradeAdapter
// ============================================================================

/// Upgrades authenticated requests into room connections.
#[derive(Debug, Clone)]
pub struct UpgradeAdapter {
    room: RoomHandle,
    filter: MustAuth<RoomRoute>,
}

impl UpgradeAdapter {
    /// Creates an adapter for `room` using the paths and cookie from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured login path is invalid.
    pub fn new(room: RoomHandle, config: &ServerConfig) -> Result<Self> {
        let filter = MustAuth::new(
            RoomRoute::new(config.room_path.clone()),
            config.auth_cookie.clone(),
            &config.login_path,
        )?;

        Ok(Self { room, filter })
    }

    /// Upgrades `stream`, joins the new connection and starts its workers.
    ///
    /// # Errors
    ///
    /// - [`Error::Upgrade`] if the request cannot be upgraded (already
    ///   answered with `400`, `405` or `431`) or the handshake failed
    /// - [`Error::Rejected`] if a handshake filter refused the request
    /// - [`Error::RoomClosed`] if the room has stopped
    pub async fn upgrade<S>(&self, mut stream: S) -> Result<ConnectionTasks>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let head = precheck(&mut stream).await?;

        let ws_stream = accept_hdr_async(Replay::new(head, stream), self.filter.clone())
            .await
            .map_err(upgrade_error)?;

        let connection = Connection::new(self.room.queue_capacity());
        self.room.join(connection.member())?;

        debug!(connection_id = %connection.id(), "Connection upgraded and joined");

        let (writer, reader) = ws_stream.split();
        Ok(connection.spawn(reader, writer, self.room.clone()))
    }
}

/// Maps a handshake failure to the crate error.
fn upgrade_error(err: WsError) -> Error {
    match err {
        WsError::Http(response) => Error::rejected(response.status()),
        other => Error::upgrade(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

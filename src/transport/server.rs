//! TCP server for the room endpoint.
//!
//! Binds the listen address and hands every accepted stream to the
//! [`UpgradeAdapter`] on its own task.
//!
//! # Connection Flow
//!
//! 1. Accept TCP connection
//! 2. Handshake filters run (auth cookie, room path)
//! 3. WebSocket upgrade completes, connection joins the room
//! 4. Task waits for the connection's workers, then exits

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::hub::RoomHandle;

use super::upgrade::UpgradeAdapter;

// ============================================================================
// RoomServer
// ============================================================================

/// A bound server, ready to accept room connections.
///
/// # Example
///
/// ```ignore
/// let server = RoomServer::bind(&config, room).await?;
/// println!("Room at {}", server.ws_url());
/// server.run_until(tokio::signal::ctrl_c().map(drop)).await;
/// ```
pub struct RoomServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address actually bound.
    local_addr: SocketAddr,
    /// Room endpoint path, for display.
    room_path: String,
    /// Shared upgrade adapter.
    adapter: Arc<UpgradeAdapter>,
}

impl RoomServer {
    /// Binds to `config.addr`.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if `config` is invalid
    /// - [`Error::Io`](crate::Error::Io) if binding fails
    pub async fn bind(config: &ServerConfig, room: RoomHandle) -> Result<Self> {
        config.validate()?;
        let adapter = UpgradeAdapter::new(room, config)?;

        let listener = TcpListener::bind(config.addr).await?;
        let local_addr = listener.local_addr()?;

        debug!(%local_addr, "Room server bound");

        Ok(Self {
            listener,
            local_addr,
            room_path: config.room_path.clone(),
            adapter: Arc::new(adapter),
        })
    }

    /// Returns the bound socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL of the room endpoint.
    ///
    /// Format: `ws://{addr}{room_path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.room_path)
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections already upgraded keep running after this returns.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut shutdown = pin!(shutdown);
        info!(addr = %self.local_addr, path = %self.room_path, "Room server listening");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Room server stopping");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let adapter = Arc::clone(&self.adapter);
                        tokio::spawn(handle_connection(adapter, stream, peer));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                },
            }
        }

        debug!("Accept loop terminated");
    }

    /// Accepts connections forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await;
    }
}

/// Upgrades one stream and waits for its connection to finish.
async fn handle_connection(adapter: Arc<UpgradeAdapter>, stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "New TCP connection");

    match adapter.upgrade(stream).await {
        Ok(tasks) => {
            let id = tasks.id();
            info!(connection_id = %id, %peer, "Connection joined room");
            tasks.wait().await;
            info!(connection_id = %id, %peer, "Connection closed");
        }
        Err(e) if e.is_upgrade_error() => {
            debug!(%peer, error = %e, "Upgrade refused");
        }
        Err(e) => {
            warn!(%peer, error = %e, "Connection handling failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

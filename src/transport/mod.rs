//! WebSocket transport layer.
//!
//! This module turns incoming TCP streams into room connections and runs
//! their I/O workers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  TCP   ┌────────────┐ upgrade ┌────────────────┐  join/forward/leave  ┌──────┐
//! │  Client  │──────► │ RoomServer │───────► │ UpgradeAdapter │ ───────────────────► │ Room │
//! └──────────┘        └────────────┘         │  → Connection  │ ◄─── OutboundQueue ─ └──────┘
//!                                            └────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `RoomServer::run_until` - Accept a TCP stream
//! 2. `handshake::precheck` - Answer requests that cannot be upgraded
//! 3. `MustAuth` / `RoomRoute` - Handshake filters accept or answer the request
//! 4. `UpgradeAdapter::upgrade` - Upgrade, join the room, start workers
//! 5. `Connection` workers - Forward inbound frames, drain the outbound queue
//! 6. First worker to stop sends the single leave
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `auth` | Handshake filters |
//! | `connection` | Connection and read/write workers |
//! | `handshake` | Request-head precheck and replay stream |
//! | `server` | TCP accept loop |
//! | `upgrade` | Upgrade adapter |

// ============================================================================
// Submodules
// ============================================================================

/// Handshake filters for the room endpoint.
pub mod auth;

/// Room connection and its workers.
pub mod connection;

/// Request-head precheck for the upgrade path.
pub mod handshake;

/// TCP server for the room endpoint.
pub mod server;

/// Upgrade adapter.
pub mod upgrade;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::{MustAuth, RoomRoute};
pub use connection::{Connection, ConnectionTasks};
pub use server::RoomServer;
pub use upgrade::UpgradeAdapter;

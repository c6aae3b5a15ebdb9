//! Chat room - real-time message broadcast over WebSocket.
//!
//! Every message one participant sends is delivered to everyone else in
//! the room. The core is the room hub: a single coordinating task that
//! owns the membership set and fans messages out to bounded
//! per-connection queues, so one slow recipient never stalls the rest.
//!
//! # Architecture
//!
//! - **Room**: one task, four intakes (join, leave, forward, members),
//!   no locks on membership
//! - **Outbound queue**: bounded, drop-on-full for fan-out
//! - **Connection**: a read worker and a write worker per participant,
//!   exactly one leave however the connection ends
//! - **Upgrade adapter**: auth cookie check, WebSocket upgrade, join
//!
//! Delivery is best-effort: a message is dropped for a member whose queue
//! is full. Nothing is persisted.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_room::{Result, Room, RoomServer, ServerConfig, TracingSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ServerConfig::default();
//!
//!     let (room, handle) = Room::new(config.room.clone(), Arc::new(TracingSink))?;
//!     tokio::spawn(room.run_supervised());
//!
//!     let server = RoomServer::bind(&config, handle).await?;
//!     println!("Room at {}", server.ws_url());
//!     server.run().await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Room, server and identity-provider configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hub`] | Room coordinator, outbound queue, trace sinks |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`transport`] | WebSocket server, upgrade and connection workers |

// ============================================================================
// Modules
// ============================================================================

/// Room, server and identity-provider configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Room broadcast hub.
///
/// - [`Room`] / [`RoomHandle`] - Coordinator and its intakes
/// - [`OutboundQueue`] - Bounded per-connection queue
/// - [`TraceSink`] - Lifecycle trace destination
pub mod hub;

/// Type-safe identifiers.
pub mod identifiers;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{EchoPolicy, OAuthConfig, RoomConfig, ServerConfig, TraceTarget};

// Error types
pub use error::{Error, Result};

// Hub types
pub use hub::{
    Envelope, Member, MemorySink, Message, NullSink, OutboundQueue, PushError, Room, RoomHandle,
    TraceEvent, TraceSink, TracingSink, WriterSink,
};

// Identifier types
pub use identifiers::ConnectionId;

// Transport types
pub use transport::{Connection, ConnectionTasks, MustAuth, RoomRoute, RoomServer, UpgradeAdapter};

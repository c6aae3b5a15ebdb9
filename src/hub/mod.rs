//! Room broadcast hub.
//!
//! The hub owns the set of joined connections and fans every inbound
//! message out to their outbound queues.
//!
//! # Event Flow
//!
//! ```text
//! join(member) ──┐
//! leave(id) ─────┼──► coordinator ──try_push──► member queues ──► write workers
//! forward(msg) ──┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Message payloads and sender envelopes |
//! | `queue` | Bounded per-connection outbound queue |
//! | `room` | Coordinator, handle and membership |
//! | `supervisor` | Restart-on-panic supervision |
//! | `trace` | Lifecycle trace events and sinks |

// ============================================================================
// Submodules
// ============================================================================

/// Message payloads and sender envelopes.
pub mod message;

/// Bounded per-connection outbound queue.
pub mod queue;

/// Room coordinator and handle.
pub mod room;

/// Coordinator supervision.
mod supervisor;

/// Lifecycle trace events and sinks.
pub mod trace;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{Envelope, Message};
pub use queue::{OutboundQueue, PushError};
pub use room::{Member, Room, RoomHandle};
pub use trace::{MemorySink, NullSink, TraceEvent, TraceSink, TracingSink, WriterSink};

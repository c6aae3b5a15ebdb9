//! Room lifecycle trace.
//!
//! The room reports what it does as an ordered stream of [`TraceEvent`]s
//! to a write-only [`TraceSink`]. This is separate from diagnostic
//! logging: it is the human-readable record of joins, leaves, forwards
//! and drops, written one line per event.
//!
//! | Sink | Destination |
//! |------|-------------|
//! | [`WriterSink`] | any `io::Write` (stdout by default) |
//! | [`TracingSink`] | `tracing` at `info`/`warn` level |
//! | [`NullSink`] | discarded |
//! | [`MemorySink`] | in-memory list, for inspection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::identifiers::ConnectionId;

// ============================================================================
// TraceEvent
// ============================================================================

/// One entry in the room trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A connection joined the room.
    Joined {
        /// Joining connection.
        id: ConnectionId,
        /// Member count after the join.
        members: usize,
    },

    /// A connection left the room.
    Left {
        /// Leaving connection.
        id: ConnectionId,
        /// Member count after the leave.
        members: usize,
    },

    /// A message was fanned out.
    Forwarded {
        /// Sending connection.
        from: ConnectionId,
        /// Payload size in bytes.
        bytes: usize,
        /// Members whose queue accepted the message.
        delivered: usize,
        /// Members an enqueue was attempted for.
        attempted: usize,
    },

    /// A message was dropped for one member because its queue was full.
    Dropped {
        /// Sending connection.
        from: ConnectionId,
        /// Member that missed the message.
        to: ConnectionId,
    },

    /// The coordinator panicked and was restarted with an empty room.
    Restarted {
        /// Restart count so far.
        attempt: u32,
        /// Members discarded by the restart.
        lost: usize,
    },
}

impl TraceEvent {
    /// Returns `true` for events that indicate lost delivery.
    #[inline]
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Dropped { .. } | Self::Restarted { .. })
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Joined { id, members } => {
                write!(f, "connection {id} joined ({members} members)")
            }
            Self::Left { id, members } => {
                write!(f, "connection {id} left ({members} members)")
            }
            Self::Forwarded {
                from,
                bytes,
                delivered,
                attempted,
            } => write!(
                f,
                "message from {from} ({bytes} bytes) forwarded to {delivered} of {attempted} members"
            ),
            Self::Dropped { from, to } => {
                write!(f, "message from {from} dropped for {to}: queue full")
            }
            Self::Restarted { attempt, lost } => {
                write!(f, "room restarted (attempt {attempt}), {lost} members lost")
            }
        }
    }
}

// ============================================================================
// TraceSink
// ============================================================================

/// Write-only destination for room trace events.
///
/// Called from the coordinating loop, so implementations must not block
/// for long.
pub trait TraceSink: Send + Sync {
    /// Records one event.
    fn trace(&self, event: &TraceEvent);
}

impl<T: TraceSink + ?Sized> TraceSink for Arc<T> {
    fn trace(&self, event: &TraceEvent) {
        (**self).trace(event);
    }
}

// ============================================================================
// WriterSink
// ============================================================================

/// Writes one line per event to an `io::Write`.
pub struct WriterSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    /// Creates a sink writing to `out`.
    #[inline]
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Consumes the sink and returns the writer.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl WriterSink<io::Stdout> {
    /// Creates a sink writing to standard output.
    #[inline]
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TraceSink for WriterSink<W> {
    fn trace(&self, event: &TraceEvent) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{event}") {
            warn!(error = %e, "Failed to write trace event");
        }
    }
}

// ============================================================================
// TracingSink
// ============================================================================

/// Forwards trace events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn trace(&self, event: &TraceEvent) {
        if event.is_warning() {
            warn!(target: "chat_room::trace", "{event}");
        } else {
            info!(target: "chat_room::trace", "{event}");
        }
    }
}

// ============================================================================
// NullSink
// ============================================================================

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    #[inline]
    fn trace(&self, _event: &TraceEvent) {}
}

// ============================================================================
// MemorySink
// ============================================================================

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events rendered as lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }
}

impl TraceSink for MemorySink {
    fn trace(&self, event: &TraceEvent) {
        self.events.lock().push(event.clone());
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Room message types.
//!
//! A [`Message`] is an opaque, immutable payload carrying only a
//! text/binary framing tag. Payloads are reference-counted so fan-out to
//! many members clones a pointer, not the bytes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio_tungstenite::tungstenite::Message as Frame;

use crate::identifiers::ConnectionId;

// ============================================================================
// Message
// ============================================================================

/// One chat message as received from a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text frame.
    Text(Arc<str>),
    /// Binary frame.
    Binary(Arc<[u8]>),
}

impl Message {
    /// Creates a text message.
    #[inline]
    #[must_use]
    pub fn text(text: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(text.as_ref()))
    }

    /// Creates a binary message.
    #[inline]
    #[must_use]
    pub fn binary(data: impl AsRef<[u8]>) -> Self {
        Self::Binary(Arc::from(data.as_ref()))
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the text payload, if this is a text message.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Converts an inbound WebSocket frame into a message.
    ///
    /// Control frames (ping, pong, close) carry no chat payload and yield `None`.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Text(text) => Some(Self::text(text.as_str())),
            Frame::Binary(data) => Some(Self::binary(&data[..])),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) | Frame::Frame(_) => None,
        }
    }

    /// Converts the message into an outbound WebSocket frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Text(text) => Frame::text(text.to_string()),
            Self::Binary(data) => Frame::binary(data.to_vec()),
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A message together with the connection that sent it.
///
/// The sender is used only for echo suppression; it is never written to
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending connection.
    pub from: ConnectionId,
    /// Message payload.
    pub message: Message,
}

impl Envelope {
    /// Creates a new envelope.
    #[inline]
    #[must_use]
    pub fn new(from: ConnectionId, message: Message) -> Self {
        Self { from, message }
    }
}

// ============================================================================
// Tests
// ============================================================================

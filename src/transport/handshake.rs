//! Request-head precheck for the upgrade path.
//!
//! tungstenite validates the upgrade headers before any handshake
//! [`Callback`](tokio_tungstenite::tungstenite::handshake::server::Callback)
//! runs, and drops the stream without a reply when they are wrong. The
//! precheck reads the request head first, answers a bad request itself,
//! and otherwise hands the head back for the real handshake through a
//! [`Replay`] stream.
//!
//! | Request | Answer |
//! |---------|--------|
//! | Not `GET` | `405 Method Not Allowed` |
//! | Missing or wrong upgrade headers | `400 Bad Request` |
//! | Head over [`MAX_HEAD_SIZE`] | `431 Request Header Fields Too Large` |

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::machine::TryParse;
use tokio_tungstenite::tungstenite::handshake::server::{Request, create_response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest request head accepted on the upgrade path.
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Read chunk size while collecting the head.
const READ_CHUNK: usize = 1024;

// ============================================================================
// Precheck
// ============================================================================

/// Reads the request head from `stream` and checks it can be upgraded.
///
/// On success returns every byte read so far, to be replayed ahead of the
/// stream. On a bad request the error response has already been written.
///
/// # Errors
///
/// - [`Error::Upgrade`] if the request was refused or the peer closed early
/// - [`Error::Io`] if reading or writing the stream fails
pub async fn precheck<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let refusal = match Request::try_parse(&head) {
            Ok(Some((_, request))) => match create_response(&request) {
                Ok(_) => return Ok(head),
                Err(e) => Some(refusal_for(e)),
            },
            Ok(None) if head.len() >= MAX_HEAD_SIZE => Some((
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                "request head too large".to_string(),
            )),
            Ok(None) => None,
            Err(e) => Some(refusal_for(e)),
        };

        if let Some((status, reason)) = refusal {
            debug!(%status, %reason, "Upgrade request refused");
            refuse(stream, status, &reason).await?;
            return Err(Error::upgrade(format!("{status}: {reason}")));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::upgrade("connection closed before the request head completed"));
        }
        head.extend_from_slice(&chunk[..n]);
    }
}

/// Picks the status for a request tungstenite would not upgrade.
fn refusal_for(err: WsError) -> (StatusCode, String) {
    let status = match &err {
        WsError::Protocol(ProtocolError::WrongHttpMethod) => StatusCode::METHOD_NOT_ALLOWED,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

/// Writes a plain-text error response and closes the write side.
async fn refuse<S>(stream: &mut S, status: StatusCode, reason: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let body = format!("{reason}\n");
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Connection: close\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    );

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

/// A stream that yields already-read bytes before reading from `inner`.
///
/// Writes go straight to `inner`.
#[derive(Debug)]
pub struct Replay<S> {
    head: Vec<u8>,
    pos: usize,
    inner: S,
}

impl<S> Replay<S> {
    /// Wraps `inner`, replaying `head` first.
    #[inline]
    #[must_use]
    pub fn new(head: Vec<u8>, inner: S) -> Self {
        Self { head, pos: 0, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Replay<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pos < this.head.len() {
            let n = buf.remaining().min(this.head.len() - this.pos);
            buf.put_slice(&this.head[this.pos..this.pos + n]);
            this.pos += n;
            if this.pos == this.head.len() {
                this.head = Vec::new();
                this.pos = 0;
            }
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Replay<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================

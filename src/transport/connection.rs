//! Room connection and its read/write workers.
//!
//! A [`Connection`] pairs one framed transport with one
//! [`OutboundQueue`]. Once joined, it runs two tasks:
//!
//! - **read worker**: receives frames and forwards each message to the room
//! - **write worker**: drains the outbound queue onto the transport
//!
//! The workers share only the queue and a [`LeaveGate`]. Whichever worker
//! stops first, the gate makes sure the room sees exactly one leave for
//! this connection and that the other worker stops too.
//!
//! # Termination
//!
//! | Cause | Detected by | Effect |
//! |-------|-------------|--------|
//! | Peer close / read error | read worker | leave, close queue |
//! | Write error | write worker | leave, stop read worker |
//! | Room removed the member | write worker (queue closed) | leave (no-op), stop read worker |

// ============================================================================
// Imports
// ============================================================================

use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, trace, warn};

use crate::hub::{Envelope, Member, Message, OutboundQueue, RoomHandle};
use crate::identifiers::ConnectionId;

// ============================================================================
// LeaveGate
// ============================================================================

/// Once-only leave shared by both workers of a connection.
struct LeaveGate {
    id: ConnectionId,
    room: RoomHandle,
    leaving: AtomicBool,
    /// Wakes the read worker when the write side is done.
    stop: Notify,
}

impl LeaveGate {
    fn new(id: ConnectionId, room: RoomHandle) -> Self {
        Self {
            id,
            room,
            leaving: AtomicBool::new(false),
            stop: Notify::new(),
        }
    }

    /// Sends the leave event if no worker has yet. Returns `true` for the
    /// call that sent it.
    fn leave(&self) -> bool {
        if self.leaving.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.room.leave(self.id).is_err() {
            debug!(connection_id = %self.id, "Room already closed on leave");
        }
        true
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One participant's connection, before its workers start.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    queue: Arc<OutboundQueue>,
}

impl Connection {
    /// Creates a connection with a fresh id and an empty queue of
    /// `queue_capacity`.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            id: ConnectionId::next(),
            queue: Arc::new(OutboundQueue::new(queue_capacity)),
        }
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the outbound queue.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// Returns the room membership entry for this connection.
    #[inline]
    #[must_use]
    pub fn member(&self) -> Member {
        Member::new(self.id, Arc::clone(&self.queue))
    }

    /// Starts the read and write workers.
    ///
    /// The connection must already have joined `room`.
    pub fn spawn<R, W>(self, reader: R, writer: W, room: RoomHandle) -> ConnectionTasks
    where
        R: Stream<Item = Result<Frame, WsError>> + Send + 'static,
        W: Sink<Frame, Error = WsError> + Send + 'static,
    {
        let gate = Arc::new(LeaveGate::new(self.id, room.clone()));

        let read = tokio::spawn(read_loop(
            reader,
            self.id,
            room,
            Arc::clone(&gate),
            Arc::clone(&self.queue),
        ));
        let write = tokio::spawn(write_loop(writer, self.id, gate, self.queue));

        debug!(connection_id = %self.id, "Connection workers started");

        ConnectionTasks {
            id: self.id,
            read,
            write,
        }
    }
}

// ============================================================================
// ConnectionTasks
// ============================================================================

/// Handles to a running connection's workers.
#[derive(Debug)]
pub struct ConnectionTasks {
    id: ConnectionId,
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl ConnectionTasks {
    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once both workers have exited.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.read.is_finished() && self.write.is_finished()
    }

    /// Waits for both workers to exit.
    pub async fn wait(self) {
        let (read, write) = tokio::join!(self.read, self.write);
        for (worker, result) in [("read", read), ("write", write)] {
            if let Err(e) = result {
                warn!(connection_id = %self.id, worker, error = %e, "Connection worker failed");
            }
        }
        debug!(connection_id = %self.id, "Connection finished");
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Forwards every inbound message to the room until the transport ends.
async fn read_loop<R>(
    reader: R,
    id: ConnectionId,
    room: RoomHandle,
    gate: Arc<LeaveGate>,
    queue: Arc<OutboundQueue>,
) where
    R: Stream<Item = Result<Frame, WsError>>,
{
    let mut reader = pin!(reader);

    loop {
        let frame = tokio::select! {
            frame = reader.next() => frame,
            () = gate.stop.notified() => {
                debug!(connection_id = %id, "Write side finished, stopping reads");
                break;
            }
        };

        match frame {
            Some(Ok(Frame::Close(_))) => {
                debug!(connection_id = %id, "Connection closed by peer");
                break;
            }

            Some(Ok(frame)) => {
                // Ping/pong are answered by the WebSocket layer.
                let Some(message) = Message::from_frame(frame) else {
                    continue;
                };

                trace!(connection_id = %id, bytes = message.len(), "Message received");
                if room.forward(Envelope::new(id, message)).await.is_err() {
                    debug!(connection_id = %id, "Room closed, stopping reads");
                    break;
                }
            }

            Some(Err(e)) => {
                debug!(connection_id = %id, error = %e, "Connection read failed");
                break;
            }

            None => {
                debug!(connection_id = %id, "Connection stream ended");
                break;
            }
        }
    }

    gate.leave();
    queue.close();
}

/// Writes queued messages to the transport until the queue closes.
async fn write_loop<W>(writer: W, id: ConnectionId, gate: Arc<LeaveGate>, queue: Arc<OutboundQueue>)
where
    W: Sink<Frame, Error = WsError>,
{
    let mut writer = pin!(writer);

    while let Some(message) = queue.pop().await {
        if let Err(e) = writer.send(message.to_frame()).await {
            debug!(connection_id = %id, error = %e, "Connection write failed");
            break;
        }
    }

    gate.leave();
    queue.close();
    gate.stop.notify_one();

    if let Err(e) = writer.close().await {
        trace!(connection_id = %id, error = %e, "Connection close failed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{sink, stream};
    use tokio::time::timeout;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::config::RoomConfig;
    use crate::hub::{MemorySink, Room, TraceEvent};

    const STEP: Duration = Duration::from_secs(2);

    fn failing_writer() -> impl Sink<Frame, Error = WsError> + Send + 'static {
        sink::unfold((), |(), _frame: Frame| async { Err::<(), WsError>(WsError::AlreadyClosed) })
    }

    async fn ws_pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (server, client) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn test_gate_sends_single_leave() {
        let (mut room, handle) =
            Room::new(RoomConfig::default(), Arc::new(MemorySink::new())).expect("config");
        let gate = LeaveGate::new(ConnectionId::next(), handle);

        assert!(gate.leave());
        assert!(!gate.leave());
        assert_eq!(room.drain_leaves().len(), 1);
    }

    #[tokio::test]
    async fn test_single_leave_when_both_workers_fail() {
        for _ in 0..32 {
            let (mut room, handle) =
                Room::new(RoomConfig::default(), Arc::new(MemorySink::new())).expect("config");
            let connection = Connection::new(4);
            let id = connection.id();

            // A queued message makes the writer hit its error while the
            // reader hits its own.
            connection
                .queue()
                .try_push(Message::text("pending"))
                .expect("room");

            let reader = stream::iter(vec![Err(WsError::ConnectionClosed)]);
            let tasks = connection.spawn(reader, failing_writer(), handle);
            timeout(STEP, tasks.wait()).await.expect("workers exit");

            assert_eq!(room.drain_leaves(), vec![id]);
        }
    }

    #[tokio::test]
    async fn test_peer_close_leaves_room() {
        let sink = Arc::new(MemorySink::new());
        let (room, handle) = Room::new(RoomConfig::default(), sink.clone()).expect("config");
        tokio::spawn(room.run());

        let (server, mut client) = ws_pair().await;
        let connection = Connection::new(4);
        let id = connection.id();
        handle.join(connection.member()).expect("join");

        let (writer, reader) = server.split();
        let tasks = connection.spawn(reader, writer, handle.clone());

        client.close(None).await.expect("client close");
        timeout(STEP, tasks.wait()).await.expect("workers exit");

        assert!(handle.members().await.expect("members").is_empty());
        let left = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, TraceEvent::Left { id: left, .. } if *left == id))
            .count();
        assert_eq!(left, 1);
    }

    #[tokio::test]
    async fn test_messages_flow_between_two_connections() {
        let (room, handle) =
            Room::new(RoomConfig::default(), Arc::new(MemorySink::new())).expect("config");
        tokio::spawn(room.run());

        let mut clients = Vec::new();
        for _ in 0..2 {
            let (server, client) = ws_pair().await;
            let connection = Connection::new(8);
            handle.join(connection.member()).expect("join");
            let (writer, reader) = server.split();
            connection.spawn(reader, writer, handle.clone());
            clients.push(client);
        }
        handle.members().await.expect("barrier");

        clients[0]
            .send(Frame::text("hello"))
            .await
            .expect("send");

        for client in &mut clients {
            let frame = timeout(STEP, client.next())
                .await
                .expect("delivered")
                .expect("stream open")
                .expect("frame");
            assert_eq!(frame, Frame::text("hello"));
        }
    }

    #[tokio::test]
    async fn test_room_removal_stops_both_workers() {
        let (mut room, handle) =
            Room::new(RoomConfig::default(), Arc::new(MemorySink::new())).expect("config");
        let (server, _client) = ws_pair().await;
        let connection = Connection::new(4);
        let queue = Arc::clone(connection.queue());
        let (writer, reader) = server.split();
        let tasks = connection.spawn(reader, writer, handle);
        tokio::task::yield_now().await;
        assert!(!tasks.is_finished());

        // What the room does when it discards a member.
        queue.close();

        timeout(STEP, async {
            while !tasks.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("workers exit");
        tasks.wait().await;
        assert_eq!(room.drain_leaves().len(), 1);
    }
}

//! Room hub: membership registry and fan-out coordinator.
//!
//! # Architecture
//!
//! ```text
//!  read workers ──forward──┐
//!  upgrade     ──join─────┤      ┌──────────────┐     try_push     ┌───────────────┐
//!  workers     ──leave────┼────► │ coordinator  │ ───────────────► │ OutboundQueue │ × members
//!  callers     ──members──┘      │ (one task)   │                  └───────────────┘
//!                                └──────────────┘
//! ```
//!
//! One task owns the membership map and services the intakes one event
//! at a time, so the map needs no lock. Fan-out never waits on a member:
//! a full queue drops the message for that member only.
//!
//! Intakes are polled in a fixed priority (join, leave, forward,
//! members), so a `members` reply is only sent once every event submitted
//! before it has been handled. A run of join/leave events gives way to a
//! waiting forward after [`MAX_PRIORITY_RUN`] events, so churn cannot
//! starve fan-out. The `members` query has no such turn: under sustained
//! forward traffic it waits until the forward intake drains.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::{EchoPolicy, RoomConfig};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;

use super::message::Envelope;
use super::queue::{OutboundQueue, PushError};
use super::trace::{TraceEvent, TraceSink};

// ============================================================================
// Constants
// ============================================================================

/// Join/leave events serviced in a row before a waiting forward gets a turn.
pub const MAX_PRIORITY_RUN: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Reply channel for a membership query.
type MembersReply = oneshot::Sender<Vec<ConnectionId>>;

// ============================================================================
// Member
// ============================================================================

/// A connection as seen by the room: its identity and its outbound queue.
#[derive(Debug, Clone)]
pub struct Member {
    id: ConnectionId,
    queue: Arc<OutboundQueue>,
}

impl Member {
    /// Creates a member entry.
    #[inline]
    #[must_use]
    pub fn new(id: ConnectionId, queue: Arc<OutboundQueue>) -> Self {
        Self { id, queue }
    }

    /// Returns the member's connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the member's outbound queue.
    #[inline]
    #[must_use]
    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }
}

// ============================================================================
// RoomHandle
// ============================================================================

/// Cloneable sending side of a room.
///
/// Every handler that needs the room gets a clone; the room stops once
/// all clones are dropped.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    join_tx: mpsc::UnboundedSender<Member>,
    leave_tx: mpsc::UnboundedSender<ConnectionId>,
    forward_tx: mpsc::Sender<Envelope>,
    members_tx: mpsc::UnboundedSender<MembersReply>,
    queue_capacity: usize,
}

impl RoomHandle {
    /// Adds a member to the room.
    ///
    /// Joining the same id twice is a caller bug; the room ignores the
    /// second join and closes its queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomClosed`] if the room has stopped.
    pub fn join(&self, member: Member) -> Result<()> {
        self.join_tx.send(member).map_err(|_| Error::RoomClosed)
    }

    /// Removes a member. Leaving when not a member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomClosed`] if the room has stopped.
    pub fn leave(&self, id: ConnectionId) -> Result<()> {
        self.leave_tx.send(id).map_err(|_| Error::RoomClosed)
    }

    /// Submits a message for fan-out to every member.
    ///
    /// Waits only if the forward intake itself is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomClosed`] if the room has stopped.
    pub async fn forward(&self, envelope: Envelope) -> Result<()> {
        self.forward_tx
            .send(envelope)
            .await
            .map_err(|_| Error::RoomClosed)
    }

    /// Returns the current member ids in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RoomClosed`] if the room has stopped.
    pub async fn members(&self) -> Result<Vec<ConnectionId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.members_tx
            .send(reply_tx)
            .map_err(|_| Error::RoomClosed)?;
        reply_rx.await.map_err(|_| Error::RoomClosed)
    }

    /// Returns the outbound queue capacity new members should use.
    #[inline]
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Returns `true` once the room has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.join_tx.is_closed()
    }
}

// ============================================================================
// Intakes
// ============================================================================

/// Receiving side of the four room intakes.
pub(crate) struct Intakes {
    join_rx: mpsc::UnboundedReceiver<Member>,
    leave_rx: mpsc::UnboundedReceiver<ConnectionId>,
    forward_rx: mpsc::Receiver<Envelope>,
    members_rx: mpsc::UnboundedReceiver<MembersReply>,
}

// ============================================================================
// Room
// ============================================================================

/// A room waiting to be run.
///
/// # Example
///
/// ```ignore
/// let (room, handle) = Room::new(RoomConfig::default(), Arc::new(TracingSink))?;
/// tokio::spawn(room.run_supervised());
/// ```
pub struct Room {
    intakes: Intakes,
    config: RoomConfig,
    sink: Arc<dyn TraceSink>,
}

impl Room {
    /// Creates a room and its first handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn new(config: RoomConfig, sink: Arc<dyn TraceSink>) -> Result<(Self, RoomHandle)> {
        config.validate()?;

        let (join_tx, join_rx) = mpsc::unbounded_channel();
        let (leave_tx, leave_rx) = mpsc::unbounded_channel();
        let (forward_tx, forward_rx) = mpsc::channel(config.forward_buffer);
        let (members_tx, members_rx) = mpsc::unbounded_channel();

        let handle = RoomHandle {
            join_tx,
            leave_tx,
            forward_tx,
            members_tx,
            queue_capacity: config.queue_capacity,
        };

        let room = Self {
            intakes: Intakes {
                join_rx,
                leave_rx,
                forward_rx,
                members_rx,
            },
            config,
            sink,
        };

        Ok((room, handle))
    }

    /// Runs the coordinator until every handle is dropped.
    ///
    /// A panic inside the coordinator ends the room.
    pub async fn run(mut self) {
        info!("Room started");
        let mut coordinator = Coordinator::new(self.config.echo, Arc::clone(&self.sink));
        coordinator.run(&mut self.intakes).await;
        info!(members = coordinator.len(), "Room stopped");
    }

    /// Runs the coordinator under a supervisor that restarts it after a
    /// panic, up to `max_restarts` times.
    pub async fn run_supervised(self) {
        super::supervisor::supervise(self.intakes, self.config, self.sink).await;
    }
}

#[cfg(test)]
impl Room {
    /// Takes the leave events queued so far without running the room.
    pub(crate) fn drain_leaves(&mut self) -> Vec<ConnectionId> {
        let mut ids = Vec::new();
        while let Ok(id) = self.intakes.leave_rx.try_recv() {
            ids.push(id);
        }
        ids
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Membership state owned by the coordinating task.
///
/// Dropping it closes every member queue, so a discarded room winds its
/// connections down.
pub(crate) struct Coordinator {
    members: FxHashMap<ConnectionId, Arc<OutboundQueue>>,
    echo: EchoPolicy,
    sink: Arc<dyn TraceSink>,
}

impl Coordinator {
    pub(crate) fn new(echo: EchoPolicy, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            members: FxHashMap::default(),
            echo,
            sink,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// Services intakes until all of them are closed.
    pub(crate) async fn run(&mut self, intakes: &mut Intakes) {
        let mut run = 0usize;

        loop {
            let yield_to_forward = run >= MAX_PRIORITY_RUN && !intakes.forward_rx.is_empty();

            tokio::select! {
                biased;

                Some(member) = intakes.join_rx.recv(), if !yield_to_forward => {
                    run += 1;
                    self.join(member);
                }

                Some(id) = intakes.leave_rx.recv(), if !yield_to_forward => {
                    run += 1;
                    self.leave(id);
                }

                Some(envelope) = intakes.forward_rx.recv() => {
                    run = 0;
                    self.forward(envelope);
                }

                Some(reply) = intakes.members_rx.recv() => {
                    run = 0;
                    let _ = reply.send(self.member_ids());
                }

                else => {
                    debug!("All room handles dropped");
                    break;
                }
            }
        }
    }

    fn join(&mut self, member: Member) {
        let Member { id, queue } = member;

        if self.members.contains_key(&id) {
            warn!(connection_id = %id, "Duplicate join ignored");
            queue.close();
            return;
        }

        self.members.insert(id, queue);
        debug!(connection_id = %id, members = self.members.len(), "Member joined");
        self.sink.trace(&TraceEvent::Joined {
            id,
            members: self.members.len(),
        });
    }

    fn leave(&mut self, id: ConnectionId) {
        let Some(queue) = self.members.remove(&id) else {
            trace!(connection_id = %id, "Leave for non-member ignored");
            return;
        };

        queue.close();
        debug!(connection_id = %id, members = self.members.len(), "Member left");
        self.sink.trace(&TraceEvent::Left {
            id,
            members: self.members.len(),
        });
    }

    fn forward(&mut self, envelope: Envelope) {
        let Envelope { from, message } = envelope;
        let mut attempted = 0;
        let mut delivered = 0;

        for (&to, queue) in &self.members {
            if self.echo == EchoPolicy::Exclude && to == from {
                continue;
            }

            attempted += 1;
            match queue.try_push(message.clone()) {
                Ok(()) => delivered += 1,
                Err(PushError::Full(_)) => {
                    warn!(from = %from, to = %to, "Outbound queue full, message dropped");
                    self.sink.trace(&TraceEvent::Dropped { from, to });
                }
                Err(PushError::Closed(_)) => {
                    debug!(to = %to, "Outbound queue closed, leave pending");
                }
            }
        }

        trace!(from = %from, delivered, attempted, "Message forwarded");
        self.sink.trace(&TraceEvent::Forwarded {
            from,
            bytes: message.len(),
            delivered,
            attempted,
        });
    }

    fn member_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        for queue in self.members.values() {
            queue.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::hub::message::Message;
    use crate::hub::trace::MemorySink;

    const STEP: Duration = Duration::from_secs(1);

    fn start(config: RoomConfig) -> (RoomHandle, Arc<MemorySink>, tokio::task::JoinHandle<()>) {
        let sink = Arc::new(MemorySink::new());
        let (room, handle) = Room::new(config, sink.clone()).expect("valid config");
        let task = tokio::spawn(room.run());
        (handle, sink, task)
    }

    fn member(capacity: usize) -> (Member, Arc<OutboundQueue>) {
        let queue = Arc::new(OutboundQueue::new(capacity));
        (Member::new(ConnectionId::next(), Arc::clone(&queue)), queue)
    }

    fn drain(queue: &OutboundQueue) -> Vec<Message> {
        use futures_util::FutureExt;
        let mut out = Vec::new();
        while !queue.is_empty() {
            match queue.pop().now_or_never().flatten() {
                Some(message) => out.push(message),
                None => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let result = Room::new(
            RoomConfig::new().with_queue_capacity(0),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_join_then_leave_twice() {
        let (room, sink, _task) = start(RoomConfig::default());
        let (a, queue) = member(4);
        let id = a.id();

        room.join(a).expect("room open");
        assert_eq!(room.members().await.expect("members"), vec![id]);

        room.leave(id).expect("room open");
        room.leave(id).expect("second leave is accepted");
        assert!(room.members().await.expect("members").is_empty());
        assert!(queue.is_closed());

        let events = sink.events();
        let left = events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Left { .. }))
            .count();
        assert_eq!(left, 1);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_leave_for_unknown_connection_is_noop() {
        let (room, sink, _task) = start(RoomConfig::default());

        room.leave(ConnectionId::next()).expect("room open");
        assert!(room.members().await.expect("members").is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_with_echo() {
        let (room, _sink, _task) = start(RoomConfig::default());
        let (a, a_queue) = member(8);
        let (b, b_queue) = member(8);
        let (a_id, b_id) = (a.id(), b.id());

        room.join(a).expect("join a");
        room.join(b).expect("join b");
        room.forward(Envelope::new(a_id, Message::text("hello")))
            .await
            .expect("forward");
        room.members().await.expect("barrier");

        assert_eq!(drain(&b_queue), vec![Message::text("hello")]);
        assert_eq!(drain(&a_queue), vec![Message::text("hello")]);

        room.leave(b_id).expect("leave b");
        room.forward(Envelope::new(a_id, Message::text("still here")))
            .await
            .expect("forward");
        assert_eq!(room.members().await.expect("members"), vec![a_id]);

        assert_eq!(drain(&a_queue), vec![Message::text("still here")]);
        assert!(b_queue.is_closed());
        assert!(drain(&b_queue).is_empty());
    }

    #[tokio::test]
    async fn test_scenario_without_echo() {
        let (room, _sink, _task) = start(RoomConfig::new().with_echo(EchoPolicy::Exclude));
        let (a, a_queue) = member(8);
        let (b, b_queue) = member(8);
        let a_id = a.id();

        room.join(a).expect("join a");
        room.join(b).expect("join b");
        room.forward(Envelope::new(a_id, Message::text("hello")))
            .await
            .expect("forward");
        room.members().await.expect("barrier");

        assert_eq!(drain(&b_queue), vec![Message::text("hello")]);
        assert!(drain(&a_queue).is_empty());
    }

    #[tokio::test]
    async fn test_non_member_never_receives() {
        let (room, _sink, _task) = start(RoomConfig::default());
        let (a, a_queue) = member(8);
        let (_outsider, outsider_queue) = member(8);
        let a_id = a.id();

        room.join(a).expect("join");
        room.forward(Envelope::new(a_id, Message::text("members only")))
            .await
            .expect("forward");
        room.members().await.expect("barrier");

        assert_eq!(drain(&a_queue).len(), 1);
        assert!(outsider_queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (room, sink, _task) = start(RoomConfig::default());
        let (slow, slow_queue) = member(1);
        let (fast, fast_queue) = member(8);
        let (slow_id, fast_id) = (slow.id(), fast.id());

        room.join(slow).expect("join slow");
        room.join(fast).expect("join fast");

        for text in ["one", "two"] {
            room.forward(Envelope::new(fast_id, Message::text(text)))
                .await
                .expect("forward");
        }

        let members = timeout(STEP, room.members())
            .await
            .expect("room keeps servicing events")
            .expect("members");
        assert_eq!(members.len(), 2);

        assert_eq!(drain(&slow_queue), vec![Message::text("one")]);
        assert_eq!(
            drain(&fast_queue),
            vec![Message::text("one"), Message::text("two")]
        );

        let dropped: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, TraceEvent::Dropped { .. }))
            .collect();
        assert_eq!(
            dropped,
            vec![TraceEvent::Dropped {
                from: fast_id,
                to: slow_id
            }]
        );
    }

    #[tokio::test]
    async fn test_every_member_gets_one_attempt() {
        let (room, sink, _task) = start(RoomConfig::default());
        let queues: Vec<_> = (0..5)
            .map(|_| {
                let (m, q) = member(4);
                room.join(m).expect("join");
                q
            })
            .collect();

        let from = ConnectionId::next();
        room.forward(Envelope::new(from, Message::binary([7u8; 3])))
            .await
            .expect("forward");
        room.members().await.expect("barrier");

        for queue in &queues {
            assert_eq!(drain(queue), vec![Message::binary([7u8; 3])]);
        }
        assert!(sink.events().contains(&TraceEvent::Forwarded {
            from,
            bytes: 3,
            delivered: 5,
            attempted: 5,
        }));
    }

    #[tokio::test]
    async fn test_duplicate_join_is_ignored() {
        let (room, _sink, _task) = start(RoomConfig::default());
        let (a, a_queue) = member(4);
        let duplicate_queue = Arc::new(OutboundQueue::new(4));
        let duplicate = Member::new(a.id(), Arc::clone(&duplicate_queue));

        room.join(a).expect("join");
        room.join(duplicate).expect("join");
        assert_eq!(room.members().await.expect("members").len(), 1);

        assert!(!a_queue.is_closed());
        assert!(duplicate_queue.is_closed());
    }

    #[tokio::test]
    async fn test_room_stops_when_handles_dropped() {
        let (room, _sink, task) = start(RoomConfig::default());
        let (a, a_queue) = member(4);
        room.join(a).expect("join");
        room.members().await.expect("barrier");

        drop(room);
        timeout(STEP, task)
            .await
            .expect("room stops")
            .expect("room task");
        assert!(a_queue.is_closed());
    }

    #[tokio::test]
    async fn test_join_burst_yields_to_waiting_forward() {
        let sink = Arc::new(MemorySink::new());
        let (room, handle) = Room::new(RoomConfig::default(), sink.clone()).expect("valid config");

        let burst = MAX_PRIORITY_RUN + 16;
        let queues: Vec<_> = (0..burst)
            .map(|_| {
                let (m, queue) = member(4);
                handle.join(m).expect("join");
                queue
            })
            .collect();
        handle
            .forward(Envelope::new(ConnectionId::next(), Message::text("hi")))
            .await
            .expect("forward");

        tokio::spawn(room.run());
        assert_eq!(handle.members().await.expect("barrier").len(), burst);

        let delivered = queues.iter().filter(|q| !q.is_empty()).count();
        assert_eq!(delivered, MAX_PRIORITY_RUN);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            TraceEvent::Forwarded { attempted, .. } if *attempted == MAX_PRIORITY_RUN
        )));
    }

    #[tokio::test]
    async fn test_handle_after_stop() {
        let sink = Arc::new(MemorySink::new());
        let (room, handle) = Room::new(RoomConfig::default(), sink).expect("valid config");
        drop(room);

        assert!(handle.is_closed());
        assert!(matches!(handle.leave(ConnectionId::next()), Err(Error::RoomClosed)));
        assert!(matches!(
            handle.forward(Envelope::new(ConnectionId::next(), Message::text("x"))).await,
            Err(Error::RoomClosed)
        ));
        assert!(matches!(handle.members().await, Err(Error::RoomClosed)));
    }
}

//! Bounded per-connection outbound queue.
//!
//! The room enqueues with [`OutboundQueue::try_push`], which never waits:
//! a full queue hands the message back and the room drops it for that
//! member only. The owning connection's write worker drains the queue
//! with [`OutboundQueue::pop`].
//!
//! # Close
//!
//! [`OutboundQueue::close`] is idempotent. It discards anything still
//! queued and wakes a waiting `pop` with `None`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::result::Result as StdResult;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

use crate::error::{Error, Result};

use super::message::Message;

// ============================================================================
// PushError
// ============================================================================

/// Failure of a non-blocking enqueue. The rejected message is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Queue is at capacity.
    #[error("outbound queue full")]
    Full(Message),

    /// Queue has been closed.
    #[error("outbound queue closed")]
    Closed(Message),
}

impl PushError {
    /// Returns the message that could not be queued.
    #[inline]
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Full(message) | Self::Closed(message) => message,
        }
    }
}

// ============================================================================
// OutboundQueue
// ============================================================================

struct State {
    items: VecDeque<Message>,
    closed: bool,
}

/// Bounded FIFO of messages waiting to be written to one connection.
pub struct OutboundQueue {
    capacity: usize,
    state: Mutex<State>,
    /// Signalled when an item arrives or the queue closes.
    readable: Notify,
    /// Signalled when an item leaves or the queue closes.
    writable: Notify,
}

impl OutboundQueue {
    /// Creates a queue holding at most `capacity` messages (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Returns the fixed capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of queued messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Enqueues without waiting.
    ///
    /// # Errors
    ///
    /// - [`PushError::Full`] if the queue is at capacity
    /// - [`PushError::Closed`] if the queue has been closed
    pub fn try_push(&self, message: Message) -> StdResult<(), PushError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PushError::Closed(message));
            }
            if state.items.len() >= self.capacity {
                return Err(PushError::Full(message));
            }
            state.items.push_back(message);
        }
        self.readable.notify_one();
        Ok(())
    }

    /// Enqueues, waiting for space if the queue is full.
    ///
    /// Not used by room fan-out, which must never wait on one member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the queue closes before space frees up.
    pub async fn push(&self, message: Message) -> Result<()> {
        let mut message = message;
        loop {
            let writable = self.writable.notified();
            match self.try_push(message) {
                Ok(()) => return Ok(()),
                Err(PushError::Closed(_)) => return Err(Error::QueueClosed),
                Err(PushError::Full(rejected)) => message = rejected,
            }
            writable.await;
        }
    }

    /// Dequeues the oldest message, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Message> {
        loop {
            let readable = self.readable.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.items.pop_front() {
                    drop(state);
                    self.writable.notify_one();
                    return Some(message);
                }
            }
            readable.await;
        }
    }

    /// Closes the queue, discarding pending messages.
    ///
    /// Returns `true` if this call closed it, `false` if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.items.clear();
        }
        // notify_one stores a permit for a consumer that is not waiting yet.
        self.readable.notify_one();
        self.writable.notify_waiters();
        true
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OutboundQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.items.len())
            .field("closed", &state.closed)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::FutureExt;
    use proptest::prelude::*;
    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_capacity_minimum_is_one() {
        assert_eq!(OutboundQueue::new(0).capacity(), 1);
        assert_eq!(OutboundQueue::new(8).capacity(), 8);
    }

    #[test]
    fn test_try_push_full_returns_message() {
        let queue = OutboundQueue::new(1);
        queue.try_push(Message::text("first")).expect("room for one");

        let err = queue.try_push(Message::text("second")).unwrap_err();
        assert_eq!(err, PushError::Full(Message::text("second")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_try_push_after_close() {
        let queue = OutboundQueue::new(4);
        assert!(queue.close());

        let err = queue.try_push(Message::text("late")).unwrap_err();
        assert!(matches!(err, PushError::Closed(_)));
        assert_eq!(err.into_message(), Message::text("late"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let queue = OutboundQueue::new(4);
        queue.try_push(Message::text("pending")).expect("room");

        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_waits_until_push() {
        let queue = OutboundQueue::new(2);
        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.try_push(Message::text("wake")).expect("room");
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), Some(Message::text("wake")));
    }

    #[test]
    fn test_close_wakes_waiting_pop() {
        let queue = OutboundQueue::new(2);
        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.close();
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), None);
    }

    #[tokio::test]
    async fn test_blocking_push_waits_for_space() {
        let queue = Arc::new(OutboundQueue::new(1));
        queue.try_push(Message::text("a")).expect("room");

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(Message::text("b")).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(queue.pop().await, Some(Message::text("a")));

        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer finishes")
            .expect("producer task")
            .expect("push succeeds");
        assert_eq!(queue.pop().await, Some(Message::text("b")));
    }

    #[tokio::test]
    async fn test_blocking_push_fails_on_close() {
        let queue = Arc::new(OutboundQueue::new(1));
        queue.try_push(Message::text("a")).expect("room");

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(Message::text("b")).await })
        };

        tokio::task::yield_now().await;
        queue.close();

        let result = timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer finishes")
            .expect("producer task");
        assert!(matches!(result, Err(Error::QueueClosed)));
    }

    proptest! {
        #[test]
        fn prop_fifo_and_bounded(capacity in 1usize..16, count in 0usize..64) {
            let queue = OutboundQueue::new(capacity);
            let mut accepted = Vec::new();

            for i in 0..count {
                match queue.try_push(Message::text(i.to_string())) {
                    Ok(()) => accepted.push(i),
                    Err(PushError::Full(_)) => {}
                    Err(PushError::Closed(_)) => prop_assert!(false, "queue never closed"),
                }
                prop_assert!(queue.len() <= capacity);
            }

            prop_assert_eq!(accepted.len(), count.min(capacity));

            for expected in accepted {
                let got = queue.pop().now_or_never().flatten();
                prop_assert_eq!(got, Some(Message::text(expected.to_string())));
            }
            prop_assert!(queue.is_empty());
        }
    }
}

//! Coordinator supervision.
//!
//! A panic inside the coordinator (a misbehaving trace sink, for one)
//! would otherwise take the whole room down. The supervisor catches it,
//! discards the membership, and starts a fresh coordinator on the same
//! intakes so existing [`RoomHandle`](super::RoomHandle)s keep working.
//!
//! Discarding the membership closes every member queue: their write
//! workers stop, the connections close, and their leaves arrive at the
//! new coordinator as no-ops. Clients reconnect to rejoin.

// ============================================================================
// Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::config::RoomConfig;

use super::room::{Coordinator, Intakes};
use super::trace::{TraceEvent, TraceSink};

// ============================================================================
// Supervisor
// ============================================================================

/// Runs coordinators on `intakes` until every handle is dropped or the
/// restart limit is exceeded.
pub(crate) async fn supervise(mut intakes: Intakes, config: RoomConfig, sink: Arc<dyn TraceSink>) {
    let mut restarts: u32 = 0;
    info!(max_restarts = config.max_restarts, "Supervised room started");

    loop {
        let mut coordinator = Coordinator::new(config.echo, Arc::clone(&sink));
        let outcome = AssertUnwindSafe(coordinator.run(&mut intakes))
            .catch_unwind()
            .await;

        match outcome {
            Ok(()) => {
                info!(members = coordinator.len(), "Room stopped");
                return;
            }
            Err(panic) => {
                let lost = coordinator.len();
                drop(coordinator);

                let reason = panic_message(panic.as_ref());
                if restarts >= config.max_restarts {
                    error!(restarts, %reason, lost, "Room coordinator failed, giving up");
                    return;
                }

                restarts += 1;
                warn!(attempt = restarts, %reason, lost, "Room coordinator panicked, restarting");

                // The sink may be what panicked; a second panic here must not escape.
                let event = TraceEvent::Restarted {
                    attempt: restarts,
                    lost,
                };
                let _ = std::panic::catch_unwind(AssertUnwindSafe(|| sink.trace(&event)));
            }
        }
    }
}

/// Extracts a printable message from a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

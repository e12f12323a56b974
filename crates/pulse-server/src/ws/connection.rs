//! Per-session connection handle and egress queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use pulse_core::{Event, SessionId};

use crate::metrics::WS_EGRESS_DROPS_TOTAL;

/// Handle to one live session, shared between the registry and handlers.
///
/// The handle owns the sending half of the session's bounded egress
/// queue. The write pump holds the receiving half and is the only task
/// that ever touches the socket's write side, so everything the rest of
/// the system wants to say to this peer funnels through [`enqueue`].
///
/// Backpressure policy: every enqueue is non-blocking **drop-on-full**
/// (direct replies and broadcasts alike). Drops are counted on the
/// handle and in `ws_egress_drops_total`.
///
/// [`enqueue`]: SessionHandle::enqueue
pub struct SessionHandle {
    id: SessionId,
    egress: Mutex<Option<mpsc::Sender<Event>>>,
    dropped: AtomicU64,
    connected_at: Instant,
}

impl SessionHandle {
    /// Create a handle around the egress sender.
    pub fn new(id: SessionId, egress: mpsc::Sender<Event>) -> Self {
        Self {
            id,
            egress: Mutex::new(Some(egress)),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
        }
    }

    /// This session's identity.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Queue an event for the write pump.
    ///
    /// Returns `false` without blocking if the queue is full (the event
    /// is dropped and counted) or already closed.
    pub fn enqueue(&self, event: Event) -> bool {
        let guard = self.egress.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(WS_EGRESS_DROPS_TOTAL).increment(1);
                warn!(
                    session = %self.id,
                    event_type = event.event_type,
                    "egress queue full, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the egress queue. This is the write pump's single stop
    /// signal; repeated calls are no-ops.
    pub fn close(&self) {
        let _ = self.egress.lock().take();
    }

    /// Whether [`close`](SessionHandle::close) has run.
    pub fn is_closed(&self) -> bool {
        self.egress.lock().is_none()
    }

    /// Events dropped on this handle because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("dropped", &self.drop_count())
            .finish()
    }
}

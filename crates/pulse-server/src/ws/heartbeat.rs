//! Heartbeat timing policy: ping cadence and pong deadlines.
//!
//! Each session starts ALIVE with a read deadline of `now + pong_wait`.
//! Every pong extends the deadline by the same amount; a read that
//! outlives the deadline classifies the peer as dead. Pings go out at
//! 9/10 of the pong wait so at least one ping lands inside every pong
//! window even under scheduling jitter.

use std::time::Duration;

use tokio::time::Instant;

/// Default time to wait for a pong before declaring the peer dead.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(10);

/// Smallest accepted pong wait. Anything shorter rounds the derived
/// ping interval down to zero, which a timer cannot represent.
const MIN_PONG_WAIT: Duration = Duration::from_millis(10);

/// Error constructing a [`Heartbeat`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeartbeatError {
    /// The configured pong wait is too short to derive a ping interval.
    #[error("pong wait {0:?} is below the {MIN_PONG_WAIT:?} minimum")]
    PongWaitTooShort(Duration),
}

/// Per-session liveness timing.
///
/// Invariant: `ping_interval() < pong_wait()`, so a live peer always
/// sees a ping before its deadline can expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pong_wait: Duration,
}

impl Heartbeat {
    /// Create a policy with the given pong wait.
    pub fn new(pong_wait: Duration) -> Result<Self, HeartbeatError> {
        if pong_wait < MIN_PONG_WAIT {
            return Err(HeartbeatError::PongWaitTooShort(pong_wait));
        }
        Ok(Self { pong_wait })
    }

    /// How long a silent peer stays ALIVE after its last pong.
    pub fn pong_wait(&self) -> Duration {
        self.pong_wait
    }

    /// Cadence of server-initiated pings: 9/10 of the pong wait.
    pub fn ping_interval(&self) -> Duration {
        self.pong_wait * 9 / 10
    }

    /// The read deadline granted by a pong (or connect) at `now`.
    pub fn deadline_after(&self, now: Instant) -> Instant {
        now + self.pong_wait
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            pong_wait: DEFAULT_PONG_WAIT,
        }
    }
}

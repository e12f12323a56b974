//! Gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ws::heartbeat::{Heartbeat, HeartbeatError};

/// Configuration for the pulse gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent sessions; further upgrades are refused.
    pub max_connections: usize,
    /// How long to wait for a pong before declaring a peer dead, in
    /// milliseconds. Pings go out at 9/10 of this.
    pub pong_wait_ms: u64,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Capacity of each session's egress queue. A full queue drops
    /// rather than buffers.
    pub egress_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            pong_wait_ms: 10_000,
            max_frame_size: 1024,
            egress_capacity: 1,
        }
    }
}

impl GatewayConfig {
    /// The pong wait as a [`Duration`].
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Build the heartbeat policy from this config.
    pub fn heartbeat(&self) -> Result<Heartbeat, HeartbeatError> {
        Heartbeat::new(self.pong_wait())
    }
}

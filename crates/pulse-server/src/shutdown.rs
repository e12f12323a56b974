//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ws::registry::Registry;

/// Default timeout for graceful shutdown before giving up on tasks.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates graceful shutdown of the accept loop and all sessions.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tear the gateway down.
    ///
    /// 1. Cancel the token; the accept loop stops taking upgrades
    /// 2. Close every session's egress queue; each write pump sends a
    ///    close frame and both pumps unwind
    /// 3. Wait up to `timeout` for the given tasks to finish
    pub async fn drain(
        &self,
        registry: &Registry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let closed = registry.close_all().await;
        info!(
            closed,
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining sessions"
        );

        let joined = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, joined).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::SessionHandle;
    use pulse_core::SessionId;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn token_cancelled_future_resolves() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        coord.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn drain_closes_sessions_and_joins_tasks() {
        let coord = ShutdownCoordinator::new();
        let registry = Registry::new();

        let (tx, mut rx) = mpsc::channel(1);
        registry
            .add(Arc::new(SessionHandle::new(SessionId::new(), tx)))
            .await;

        let token = coord.token();
        let task = tokio::spawn(async move {
            token.cancelled().await;
        });

        coord.drain(&registry, vec![task], None).await;
        assert!(coord.is_shutting_down());
        assert_eq!(registry.count().await, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn drain_times_out_on_stuck_task() {
        let coord = ShutdownCoordinator::new();
        let registry = Registry::new();

        // A task that ignores cancellation.
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .drain(&registry, vec![task], Some(Duration::from_millis(50)))
            .await;
        assert!(coord.is_shutting_down());
    }
}

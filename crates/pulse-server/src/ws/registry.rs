//! Session registry and event routing.
//!
//! One [`Registry`] instance owns the set of live sessions and the
//! event-type-to-handler table. It is created by the accepting component
//! at startup and torn down by closing every session, never a hidden
//! process-wide singleton.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::debug;

use pulse_core::{Event, SessionId};

use super::connection::SessionHandle;
use crate::metrics::WS_ROUTING_ERRORS_TOTAL;

/// Failure reported by an event handler.
///
/// Handler failures are contained: the read pump logs them and the
/// session stays alive. There is no automatic retry.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload did not have the shape the handler requires.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// What was wrong with it.
        message: String,
    },

    /// Anything else the handler could not do.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

/// Failure to route an inbound event.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// No handler is registered for the event's type.
    #[error("no handler registered for event type '{event_type}'")]
    UnknownEventType {
        /// The unmatched discriminator.
        event_type: String,
    },

    /// The handler ran and reported failure.
    #[error("handler for '{event_type}' failed: {source}")]
    Handler {
        /// The dispatched discriminator.
        event_type: String,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },
}

/// Trait implemented by every event handler.
///
/// Dispatch runs synchronously on the origin session's read pump, so a
/// handler must not block unboundedly. Handlers may enqueue outbound
/// events on any session through the registry: the origin (echo), one
/// peer (direct reply), or everyone (broadcast).
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one inbound event from `origin`.
    async fn handle(
        &self,
        event: Event,
        origin: &Arc<SessionHandle>,
        registry: &Registry,
    ) -> Result<(), HandlerError>;
}

/// Shared state guarded by the registry's single lock.
#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Arc<SessionHandle>>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

/// Central coordinator of live sessions and event routing.
///
/// All shared mutable state sits behind one `RwLock`. Dispatch never
/// holds that lock while handler code runs: [`route`] snapshots the
/// handler under the read lock, releases it, then invokes, so handlers
/// may reentrantly call [`add`], [`remove`], or any send method without
/// deadlocking.
///
/// [`route`]: Registry::route
/// [`add`]: Registry::add
/// [`remove`]: Registry::remove
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. The caller starts its pumps afterwards.
    pub async fn add(&self, handle: Arc<SessionHandle>) {
        let mut inner = self.inner.write().await;
        let _ = inner.sessions.insert(handle.id().clone(), handle);
    }

    /// Remove a session and close its egress queue.
    ///
    /// Idempotent: concurrent or repeated calls for the same session
    /// have no effect beyond the first. Returns whether this call was
    /// the one that removed it.
    pub async fn remove(&self, id: &SessionId) -> bool {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.sessions.remove(id)
        };
        match removed {
            Some(handle) => {
                // Close outside the lock; this wakes the write pump.
                handle.close();
                debug!(session = %id, "session removed");
                true
            }
            None => false,
        }
    }

    /// Register a handler for an event type. Last registration wins.
    pub async fn register_handler(
        &self,
        event_type: impl Into<String>,
        handler: impl EventHandler + 'static,
    ) {
        let mut inner = self.inner.write().await;
        let _ = inner.handlers.insert(event_type.into(), Arc::new(handler));
    }

    /// Route an inbound event to its registered handler.
    ///
    /// The handler runs in the calling pump's context, after the
    /// registry lock has been released. An unknown type is an error for
    /// the caller to log, never fatal to the session.
    pub async fn route(&self, event: Event, origin: &Arc<SessionHandle>) -> Result<(), RouteError> {
        let handler = {
            let inner = self.inner.read().await;
            inner.handlers.get(&event.event_type).cloned()
        };
        let Some(handler) = handler else {
            counter!(WS_ROUTING_ERRORS_TOTAL).increment(1);
            return Err(RouteError::UnknownEventType {
                event_type: event.event_type,
            });
        };
        let event_type = event.event_type.clone();
        handler
            .handle(event, origin, self)
            .await
            .map_err(|source| RouteError::Handler { event_type, source })
    }

    /// Enqueue an event for one session. Returns `false` if the session
    /// is unknown or its queue was full/closed (drop-on-full policy).
    pub async fn send_to(&self, id: &SessionId, event: Event) -> bool {
        let handle = {
            let inner = self.inner.read().await;
            inner.sessions.get(id).cloned()
        };
        handle.is_some_and(|h| h.enqueue(event))
    }

    /// Enqueue an event for every live session.
    ///
    /// Best-effort fan-out: full queues drop (and are counted on the
    /// handle) rather than stalling the caller. Returns how many
    /// sessions accepted the event.
    pub async fn broadcast(&self, event: &Event) -> usize {
        let targets = self.snapshot(None).await;
        targets
            .iter()
            .filter(|h| h.enqueue(event.clone()))
            .count()
    }

    /// Enqueue an event for every session except `origin`.
    pub async fn broadcast_except(&self, event: &Event, origin: &SessionId) -> usize {
        let targets = self.snapshot(Some(origin)).await;
        targets
            .iter()
            .filter(|h| h.enqueue(event.clone()))
            .count()
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Whether a session is currently registered.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.inner.read().await.sessions.contains_key(id)
    }

    /// Registered handler event types (sorted).
    pub async fn handler_types(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut names: Vec<String> = inner.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drain every session and close its egress queue.
    ///
    /// Used at shutdown: each write pump sends a close frame and exits,
    /// which in turn unwinds its read pump. Returns how many sessions
    /// were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<SessionHandle>> = {
            let mut inner = self.inner.write().await;
            inner.sessions.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.close();
        }
        drained.len()
    }

    /// Clone the fan-out targets under the read lock, then release it
    /// before any enqueue runs.
    async fn snapshot(&self, except: Option<&SessionId>) -> Vec<Arc<SessionHandle>> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|h| except.is_none_or(|id| h.id() != id))
            .cloned()
            .collect()
    }
}

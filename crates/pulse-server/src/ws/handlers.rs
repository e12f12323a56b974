//! Built-in event handlers.
//!
//! These cover the gateway's stock realtime behaviors: position sharing
//! (`move`), room chat (`chat`), and a loopback probe (`echo`).
//! Applications register their own handlers next to (or instead of)
//! these through [`Registry::register_handler`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use pulse_core::Event;

use super::connection::SessionHandle;
use super::registry::{EventHandler, HandlerError, Registry};

/// Rebroadcasts a `{x, y}` position update to every other session.
pub struct MoveHandler;

#[async_trait]
impl EventHandler for MoveHandler {
    async fn handle(
        &self,
        event: Event,
        origin: &Arc<SessionHandle>,
        registry: &Registry,
    ) -> Result<(), HandlerError> {
        let valid = event.payload.get("x").is_some_and(serde_json::Value::is_number)
            && event.payload.get("y").is_some_and(serde_json::Value::is_number);
        if !valid {
            return Err(HandlerError::InvalidPayload {
                message: "move payload requires numeric 'x' and 'y'".into(),
            });
        }
        let reached = registry.broadcast_except(&event, origin.id()).await;
        debug!(session = %origin.id(), reached, "position shared");
        Ok(())
    }
}

/// Rebroadcasts a chat event to every other session. The origin does
/// not hear its own message.
pub struct ChatHandler;

#[async_trait]
impl EventHandler for ChatHandler {
    async fn handle(
        &self,
        event: Event,
        origin: &Arc<SessionHandle>,
        registry: &Registry,
    ) -> Result<(), HandlerError> {
        if event.payload.is_null() {
            return Err(HandlerError::InvalidPayload {
                message: "chat payload must not be empty".into(),
            });
        }
        let reached = registry.broadcast_except(&event, origin.id()).await;
        debug!(session = %origin.id(), reached, "chat relayed");
        Ok(())
    }
}

/// Sends the event straight back to its origin.
pub struct EchoHandler;

#[async_trait]
impl EventHandler for EchoHandler {
    async fn handle(
        &self,
        event: Event,
        origin: &Arc<SessionHandle>,
        _registry: &Registry,
    ) -> Result<(), HandlerError> {
        if !origin.enqueue(event) {
            // Drop-on-full: the reply is lost, the session is fine.
            debug!(session = %origin.id(), "echo dropped, egress full");
        }
        Ok(())
    }
}

/// Register every built-in handler.
pub async fn register_all(registry: &Registry) {
    registry.register_handler("move", MoveHandler).await;
    registry.register_handler("chat", ChatHandler).await;
    registry.register_handler("echo", EchoHandler).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::SessionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn make_session(capacity: usize) -> (Arc<SessionHandle>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(SessionHandle::new(SessionId::new(), tx)), rx)
    }

    async fn registry_with_builtins() -> Registry {
        let registry = Registry::new();
        register_all(&registry).await;
        registry
    }

    #[tokio::test]
    async fn register_all_registers_builtins() {
        let registry = registry_with_builtins().await;
        assert_eq!(registry.handler_types().await, vec!["chat", "echo", "move"]);
    }

    #[tokio::test]
    async fn move_event_reaches_other_sessions_only() {
        let registry = registry_with_builtins().await;
        let (a, mut rx_a) = make_session(1);
        let (b, mut rx_b) = make_session(1);
        registry.add(a.clone()).await;
        registry.add(b).await;

        let event = Event::new("move", json!({"x": 3.0, "y": 4.5}));
        registry.route(event.clone(), &a).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), event);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn move_rejects_malformed_payload() {
        let registry = registry_with_builtins().await;
        let (a, _rx) = make_session(1);

        for payload in [json!(null), json!({"x": 1.0}), json!({"x": "a", "y": 2.0})] {
            let err = registry
                .route(Event::new("move", payload), &a)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("move payload"));
        }
    }

    #[tokio::test]
    async fn chat_excludes_origin() {
        let registry = registry_with_builtins().await;
        let (a, mut rx_a) = make_session(1);
        let (b, mut rx_b) = make_session(1);
        let (c, mut rx_c) = make_session(1);
        registry.add(a.clone()).await;
        registry.add(b).await;
        registry.add(c).await;

        registry
            .route(Event::new("chat", json!("hi")), &a)
            .await
            .unwrap();

        assert_eq!(rx_b.recv().await.unwrap().payload, json!("hi"));
        assert_eq!(rx_c.recv().await.unwrap().payload, json!("hi"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_rejects_empty_payload() {
        let registry = registry_with_builtins().await;
        let (a, _rx) = make_session(1);
        let err = registry
            .route(Event::empty("chat"), &a)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("chat payload"));
    }

    #[tokio::test]
    async fn echo_returns_to_origin() {
        let registry = registry_with_builtins().await;
        let (a, mut rx_a) = make_session(1);
        registry.add(a.clone()).await;

        let event = Event::new("echo", json!({"n": 1}));
        registry.route(event.clone(), &a).await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn echo_with_full_queue_still_succeeds() {
        let registry = registry_with_builtins().await;
        let (a, _rx_a) = make_session(1);
        registry.add(a.clone()).await;
        assert!(a.enqueue(Event::empty("filler")));

        // The reply is dropped under the backpressure policy, but the
        // handler does not fail the session.
        registry.route(Event::empty("echo"), &a).await.unwrap();
        assert_eq!(a.drop_count(), 1);
    }
}

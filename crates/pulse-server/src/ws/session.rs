//! Session lifecycle — one connected client from upgrade through
//! disconnect.
//!
//! Each session runs two pumps over one split socket. The write pump is
//! the socket's only writer; everything outbound (data frames, pings,
//! the final close frame) goes through it. The read pump decodes inbound
//! events and routes them, and its deadline enforces liveness. Either
//! pump may fail first; removal is idempotent and teardown waits for
//! both pumps before the session task returns.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pulse_core::{Event, SessionId};

use super::connection::SessionHandle;
use super::heartbeat::Heartbeat;
use super::registry::Registry;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_PINGS_TOTAL,
    WS_SESSION_DURATION_SECONDS,
};

/// Why a session's read pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer sent an orderly close frame.
    PeerClosed,
    /// No pong arrived before the read deadline; the peer is dead.
    DeadlineExpired,
    /// The socket read failed or the stream ended abruptly.
    Transport,
    /// An inbound frame was not a well-formed event.
    Decode,
}

/// Run a session for an upgraded socket until it disconnects.
///
/// 1. Registers a [`SessionHandle`] and greets the peer with
///    `session.ready`
/// 2. Spawns the write pump (exclusive writer, pings interleaved)
/// 3. Drives the read pump inline: decode, route, extend deadline on
///    pong
/// 4. On any exit path, removes the session (idempotent) and joins the
///    write pump before returning
pub async fn run(
    socket: WebSocket,
    registry: Arc<Registry>,
    heartbeat: Heartbeat,
    egress_capacity: usize,
) {
    let (ws_tx, mut ws_rx) = socket.split();

    let (tx, rx) = mpsc::channel::<Event>(egress_capacity.max(1));
    let handle = Arc::new(SessionHandle::new(SessionId::new(), tx));
    let id = handle.id().clone();

    registry.add(handle.clone()).await;
    info!(session = %id, "session connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // The greeting rides the egress queue like any other outbound event.
    let _ = handle.enqueue(ready_event(&id));

    let write_task = tokio::spawn(write_pump(ws_tx, rx, heartbeat, registry.clone(), id.clone()));

    let reason = read_pump(&mut ws_rx, &handle, &registry, heartbeat).await;

    info!(session = %id, ?reason, "session disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_SESSION_DURATION_SECONDS).record(handle.age().as_secs_f64());

    // Removal closes the egress queue, which tells the write pump to
    // send its close frame and exit. Join it so both pumps have fully
    // stopped before this task releases the session.
    let _ = registry.remove(&id).await;
    let _ = write_task.await;
}

/// The greeting enqueued as soon as a session registers.
fn ready_event(id: &SessionId) -> Event {
    Event::new(
        "session.ready",
        json!({
            "session_id": id.as_str(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

/// Exclusive writer: drains the egress queue, interleaves pings, and
/// emits the close frame when the queue is closed.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Event>,
    heartbeat: Heartbeat,
    registry: Arc<Registry>,
    id: SessionId,
) {
    let mut ping = tokio::time::interval(heartbeat.ping_interval());
    // Skip the immediate first tick.
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            warn!(session = %id, "write failed, closing session");
                            let _ = registry.remove(&id).await;
                            return;
                        }
                    }
                    Err(error) => {
                        // A payload that cannot re-serialize is dropped;
                        // the connection itself is still healthy.
                        warn!(session = %id, %error, "failed to serialize outbound event");
                    }
                },
                None => {
                    // Queue closed: the removal signal.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                }
            },
            _ = ping.tick() => {
                debug!(session = %id, "ping");
                counter!(WS_PINGS_TOTAL).increment(1);
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    warn!(session = %id, "ping failed, closing session");
                    let _ = registry.remove(&id).await;
                    return;
                }
            }
        }
    }
}

/// Reads frames under a pong deadline and routes decoded events.
async fn read_pump(
    ws_rx: &mut SplitStream<WebSocket>,
    handle: &Arc<SessionHandle>,
    registry: &Registry,
    heartbeat: Heartbeat,
) -> DisconnectReason {
    let id = handle.id();
    let mut deadline = heartbeat.deadline_after(Instant::now());

    loop {
        let frame = match tokio::time::timeout_at(deadline, ws_rx.next()).await {
            Err(_elapsed) => {
                warn!(session = %id, pong_wait = ?heartbeat.pong_wait(), "no pong before deadline");
                return DisconnectReason::DeadlineExpired;
            }
            Ok(None) => return DisconnectReason::Transport,
            Ok(Some(Err(error))) => {
                debug!(session = %id, %error, "socket read failed");
                return DisconnectReason::Transport;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => text.to_owned(),
                Err(_) => {
                    warn!(session = %id, len = data.len(), "non-UTF8 binary frame");
                    return DisconnectReason::Decode;
                }
            },
            Message::Pong(_) => {
                debug!(session = %id, "pong");
                deadline = heartbeat.deadline_after(Instant::now());
                continue;
            }
            Message::Ping(_) => {
                // The transport answers pings for us; nothing to do.
                debug!(session = %id, "ping from peer");
                continue;
            }
            Message::Close(_) => {
                debug!(session = %id, "peer sent close frame");
                return DisconnectReason::PeerClosed;
            }
        };

        let event: Event = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(error) => {
                warn!(session = %id, %error, "malformed inbound frame");
                return DisconnectReason::Decode;
            }
        };

        // Routing failures are contained: log and keep reading.
        if let Err(error) = registry.route(event, handle).await {
            warn!(session = %id, %error, "routing failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pump behavior over a real socket is covered by the end-to-end
    // tests in tests/integration.rs; these validate the helper logic.

    #[test]
    fn ready_event_shape() {
        let id = SessionId::from("s-77");
        let event = ready_event(&id);
        assert_eq!(event.event_type, "session.ready");
        assert_eq!(event.payload["session_id"], "s-77");
        assert!(event.payload["timestamp"].is_string());
    }

    #[test]
    fn ready_event_roundtrips() {
        let event = ready_event(&SessionId::new());
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn disconnect_reason_equality() {
        assert_eq!(DisconnectReason::PeerClosed, DisconnectReason::PeerClosed);
        assert_ne!(DisconnectReason::Decode, DisconnectReason::Transport);
    }

    #[test]
    fn disconnect_reason_debug() {
        let rendered = format!("{:?}", DisconnectReason::DeadlineExpired);
        assert!(rendered.contains("DeadlineExpired"));
    }
}

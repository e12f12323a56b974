//! The typed message unit exchanged over a session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed, serializable message exchanged between peers and handlers.
///
/// The wire form is a field-tagged JSON record:
/// `{"type": "move", "payload": {"x": 1.0, "y": 2.0}}`. The payload is
/// opaque to the session layer; only handlers interpret it. An absent
/// payload deserializes as [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Discriminator matched against the registered handler table.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Handler-defined data. `null` when the sender omitted it.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create an event with the given type and payload.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Create an event with a `null` payload.
    pub fn empty(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Value::Null,
        }
    }
}

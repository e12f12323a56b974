//! WebSocket session management: connection pumps, heartbeat, registry,
//! event routing, and the built-in handlers.

pub mod connection;
pub mod handlers;
pub mod heartbeat;
pub mod registry;
pub mod session;

pub use connection::SessionHandle;
pub use heartbeat::Heartbeat;
pub use registry::{EventHandler, HandlerError, Registry, RouteError};
pub use session::DisconnectReason;

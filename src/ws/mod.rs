//! WebSocket layer: socket lifecycle, inbound routing and outbound queues.
//!
//! The endpoint at `/ws` plays the event-router role: it assigns each
//! socket a connection id, maps socket open/close to the connect and
//! disconnect handlers, and routes inbound frames by their `action` field
//! to publish (`"broadcast"`) or query (anything else).

pub mod connection;
pub mod handler;
pub mod outbound;

pub use outbound::WsTransport;

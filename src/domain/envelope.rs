//! Wire envelopes exchanged with clients.
//!
//! Outbound messages are always `{ "action": ..., "message": ... }`.
//! Inbound frames carry the action used for routing, an optional payload
//! and, for publishers, the shared secret.

use serde::{Deserialize, Serialize};

/// Default action name for fan-out updates.
pub const BROADCAST_ACTION: &str = "coords";

/// Default action name for replies to a last-state query.
pub const QUERY_ACTION: &str = "coordsResponse";

/// Action name used for error frames sent back to a client.
pub const ERROR_ACTION: &str = "error";

/// Inbound action that routes to the publish handler. Every other action
/// falls through to the default (query) route.
pub const PUBLISH_ROUTE: &str = "broadcast";

/// Outbound message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind discriminator.
    pub action: String,
    /// Opaque payload, passed through uninterpreted.
    pub message: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope for the given action and payload.
    #[must_use]
    pub fn new(action: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            message,
        }
    }

    /// Serializes the envelope to the text sent on the wire.
    #[must_use]
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Inbound frame from a client, routed by `action`.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Route selector.
    #[serde(default)]
    pub action: String,
    /// Payload for publish frames.
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    /// Publisher secret.
    #[serde(default, rename = "secretKey")]
    pub secret_key: Option<String>,
}

//! Type-safe connection identifier.
//!
//! [`ConnectionId`] is a newtype over the opaque string the transport
//! assigns at connect time, so connection ids cannot be confused with
//! other strings flowing through the relay (actions, secrets, payloads).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one live client channel.
///
/// Opaque to the relay: it is assigned by the transport layer and only
/// compared, stored and handed back to the transport for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new random `ConnectionId` (UUID v4 text).
    ///
    /// Used by the WebSocket transport when it accepts a channel.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[test]
    fn serializes_as_bare_string() {
        let id = ConnectionId::from("c1");
        let Ok(json) = serde_json::to_string(&id) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "\"c1\"");
    }

    #[test]
    fn display_matches_inner() {
        let id = ConnectionId::from("conn-42");
        assert_eq!(id.to_string(), "conn-42");
        assert_eq!(id.as_str(), "conn-42");
    }
}

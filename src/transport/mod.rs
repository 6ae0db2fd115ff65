//! Delivery capability consumed by the fan-out engine.
//!
//! The relay never talks to sockets directly; it hands an encoded
//! envelope and a connection id to a [`TransportSender`] and only learns
//! whether delivery succeeded. [`crate::ws::WsTransport`] delivers to
//! sockets held by this process; [`ClusterTransport`] wraps it and
//! forwards deliveries for sockets held by other relay instances over a
//! [`PeerBus`].

pub mod cluster;
pub mod peer_bus;

use async_trait::async_trait;

use crate::domain::ConnectionId;
use crate::error::RelayError;

pub use cluster::ClusterTransport;
pub use peer_bus::{MemoryPeerBus, PeerBus, PeerDelivery, PgPeerBus};

/// Pushes one encoded message to one connection.
#[async_trait]
pub trait TransportSender: Send + Sync + std::fmt::Debug {
    /// Attempts delivery of `data` to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DeliveryFailed`] if the channel is gone or
    /// cannot accept the message.
    async fn send(&self, id: &ConnectionId, data: &str) -> Result<(), RelayError>;
}

//! Instance-to-instance delivery channel.
//!
//! When a broadcast targets a connection whose socket lives on another
//! relay instance, the encoded envelope is published as a
//! [`PeerDelivery`] addressed to that instance. Every instance subscribes
//! and keeps only the deliveries addressed to itself.
//!
//! [`MemoryPeerBus`] wraps a [`tokio::sync::broadcast`] channel for
//! instances sharing one process. [`PgPeerBus`] rides on PostgreSQL
//! `NOTIFY` / `LISTEN`, so instances sharing a database need no extra
//! infrastructure.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;

use crate::domain::ConnectionId;
use crate::error::RelayError;

/// `NOTIFY` channel shared by all relay instances.
pub const NOTIFY_CHANNEL: &str = "relay_deliver";

/// PostgreSQL rejects `NOTIFY` payloads of this many bytes or more.
const NOTIFY_PAYLOAD_LIMIT: usize = 8000;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// One encoded envelope for one connection, addressed to the instance
/// holding its socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDelivery {
    /// Instance that owns the connection.
    pub owner: String,
    /// Target connection.
    pub conn_id: ConnectionId,
    /// Encoded `{ action, message }` envelope.
    pub data: String,
}

/// Publish/subscribe channel between relay instances.
#[async_trait]
pub trait PeerBus: Send + Sync + std::fmt::Debug {
    /// Hands `delivery` to the bus. Success means the bus accepted it, not
    /// that the owning instance delivered it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DeliveryFailed`] if the bus rejects the
    /// delivery.
    async fn publish(&self, delivery: &PeerDelivery) -> Result<(), RelayError>;

    /// Creates a receiver for every delivery published from now on.
    fn subscribe(&self) -> broadcast::Receiver<PeerDelivery>;
}

/// In-process bus backed by a `tokio::broadcast` channel.
#[derive(Debug, Clone)]
pub struct MemoryPeerBus {
    sender: broadcast::Sender<PeerDelivery>,
}

impl MemoryPeerBus {
    /// Creates a bus whose subscribers buffer up to `capacity` deliveries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

#[async_trait]
impl PeerBus for MemoryPeerBus {
    async fn publish(&self, delivery: &PeerDelivery) -> Result<(), RelayError> {
        // No subscribers means no other instance is running.
        let _ = self.sender.send(delivery.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerDelivery> {
        self.sender.subscribe()
    }
}

/// Bus over PostgreSQL `NOTIFY` on [`NOTIFY_CHANNEL`].
#[derive(Debug, Clone)]
pub struct PgPeerBus {
    pool: PgPool,
    sender: broadcast::Sender<PeerDelivery>,
}

impl PgPeerBus {
    /// Starts listening on [`NOTIFY_CHANNEL`] and spawns the task that
    /// feeds notifications to subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if the listener cannot
    /// connect.
    pub async fn start(pool: PgPool, capacity: usize) -> Result<Self, RelayError> {
        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;

        let (sender, _) = broadcast::channel(capacity.max(1));
        let feed = sender.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<PeerDelivery>(notification.payload()) {
                            Ok(delivery) => {
                                let _ = feed.send(delivery);
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "undecodable peer delivery");
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "peer listener failed; retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
        tracing::info!(channel = NOTIFY_CHANNEL, "listening for peer deliveries");

        Ok(Self { pool, sender })
    }
}

/// Encodes `delivery` as a `NOTIFY` payload.
fn notify_payload(delivery: &PeerDelivery) -> Result<String, RelayError> {
    let failed = || RelayError::DeliveryFailed {
        conn_id: delivery.conn_id.clone(),
    };
    let payload = serde_json::to_string(delivery).map_err(|_| failed())?;
    if payload.len() >= NOTIFY_PAYLOAD_LIMIT {
        tracing::warn!(
            conn_id = %delivery.conn_id,
            bytes = payload.len(),
            "peer delivery exceeds NOTIFY payload limit"
        );
        return Err(failed());
    }
    Ok(payload)
}

#[async_trait]
impl PeerBus for PgPeerBus {
    async fn publish(&self, delivery: &PeerDelivery) -> Result<(), RelayError> {
        let payload = notify_payload(delivery)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                tracing::warn!(conn_id = %delivery.conn_id, error = %err, "NOTIFY failed");
                RelayError::DeliveryFailed {
                    conn_id: delivery.conn_id.clone(),
                }
            })?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PeerDelivery> {
        self.sender.subscribe()
    }
}

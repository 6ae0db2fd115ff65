//! Outbound queues for locally attached WebSocket connections.
//!
//! Each accepted socket gets a bounded `mpsc` queue drained by its write
//! loop. [`WsTransport`] maps connection ids to those queues and is the
//! [`TransportSender`] for sockets held by this process.
//!
//! A queue that rejects a message is dropped from the map. Its write loop
//! then sees the end of the queue and closes the socket, so the client
//! reconnects instead of staying attached without receiving anything.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::domain::ConnectionId;
use crate::error::RelayError;
use crate::transport::TransportSender;

/// Connection id → outbound queue for sockets held by this process.
#[derive(Debug)]
pub struct WsTransport {
    queues: RwLock<HashMap<ConnectionId, mpsc::Sender<String>>>,
    capacity: usize,
}

impl WsTransport {
    /// Creates a transport whose per-connection queues hold `capacity`
    /// messages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Opens a queue for `id`, returning the receiving half for the
    /// socket's write loop. Re-attaching an id replaces its old queue.
    pub async fn attach(&self, id: ConnectionId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.queues.write().await.insert(id, tx);
        rx
    }

    /// Drops the queue for `id`. Later sends to it fail.
    pub async fn detach(&self, id: &ConnectionId) {
        self.queues.write().await.remove(id);
    }

    /// Whether `id` has a queue on this process.
    pub async fn is_attached(&self, id: &ConnectionId) -> bool {
        self.queues.read().await.contains_key(id)
    }

    /// Number of attached sockets.
    pub async fn attached(&self) -> usize {
        self.queues.read().await.len()
    }
}

#[async_trait]
impl TransportSender for WsTransport {
    /// A full queue counts as a failed delivery: the socket is not keeping
    /// up and is treated the same as a closed one.
    async fn send(&self, id: &ConnectionId, data: &str) -> Result<(), RelayError> {
        let tx = self.queues.read().await.get(id).cloned();
        let Some(tx) = tx else {
            return Err(RelayError::DeliveryFailed {
                conn_id: id.clone(),
            });
        };
        if let Err(err) = tx.try_send(data.to_string()) {
            let mut queues = self.queues.write().await;
            if queues.get(id).is_some_and(|current| current.same_channel(&tx)) {
                queues.remove(id);
            }
            tracing::debug!(conn_id = %id, error = %err, "outbound queue dropped");
            return Err(RelayError::DeliveryFailed {
                conn_id: id.clone(),
            });
        }
        Ok(())
    }
}

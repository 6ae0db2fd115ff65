//! Transport doubles shared by the service tests.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::domain::ConnectionId;
use crate::error::RelayError;
use crate::transport::TransportSender;

/// Records every successful delivery and fails for a fixed set of ids.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    dead: HashSet<ConnectionId>,
    sent: Mutex<Vec<(ConnectionId, String)>>,
}

impl ScriptedTransport {
    pub(crate) fn failing(dead: &[&str]) -> Self {
        Self {
            dead: dead.iter().map(|id| ConnectionId::from(*id)).collect(),
            sent: Mutex::default(),
        }
    }

    /// Ids that received at least one message, sorted.
    pub(crate) async fn recipients(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .sent
            .lock()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Decoded frames delivered to `id`, in send order.
    pub(crate) async fn frames_for(&self, id: &ConnectionId) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(to, _)| to == id)
            .filter_map(|(_, data)| serde_json::from_str(data).ok())
            .collect()
    }
}

#[async_trait]
impl TransportSender for ScriptedTransport {
    async fn send(&self, id: &ConnectionId, data: &str) -> Result<(), RelayError> {
        if self.dead.contains(id) {
            return Err(RelayError::DeliveryFailed {
                conn_id: id.clone(),
            });
        }
        self.sent.lock().await.push((id.clone(), data.to_string()));
        Ok(())
    }
}

/// Holds every delivery to `slow` until a delivery to `fast` has
/// completed. Sends issued one after another never finish.
#[derive(Debug)]
pub(crate) struct GatedTransport {
    slow: ConnectionId,
    fast: ConnectionId,
    fast_done: Notify,
    completed: Mutex<Vec<ConnectionId>>,
}

impl GatedTransport {
    pub(crate) fn new(slow: &str, fast: &str) -> Self {
        Self {
            slow: ConnectionId::from(slow),
            fast: ConnectionId::from(fast),
            fast_done: Notify::new(),
            completed: Mutex::default(),
        }
    }

    /// Ids in the order their deliveries completed.
    pub(crate) async fn completed(&self) -> Vec<ConnectionId> {
        self.completed.lock().await.clone()
    }
}

#[async_trait]
impl TransportSender for GatedTransport {
    async fn send(&self, id: &ConnectionId, _data: &str) -> Result<(), RelayError> {
        if *id == self.slow {
            self.fast_done.notified().await;
        }
        self.completed.lock().await.push(id.clone());
        if *id == self.fast {
            self.fast_done.notify_one();
        }
        Ok(())
    }
}

//! Fan-out engine: deliver one payload to every registered connection.
//!
//! [`FanoutEngine::broadcast`] reads the registry, sends to every target
//! concurrently, joins all attempts, then evicts the ids whose delivery
//! failed in a single batch. A failed delivery is taken as proof the
//! channel is dead; there is no retry and no distinction between transient
//! and permanent failures.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::domain::{ConnectionId, Envelope};
use crate::error::RelayError;
use crate::persistence::ConnectionStore;
use crate::transport::TransportSender;

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of targets that accepted the message.
    pub delivered: usize,
    /// Targets whose delivery failed and that were evicted.
    pub evicted: Vec<ConnectionId>,
}

/// Registry-driven broadcaster with failure-based eviction.
#[derive(Debug, Clone)]
pub struct FanoutEngine {
    store: Arc<dyn ConnectionStore>,
    transport: Arc<dyn TransportSender>,
}

impl FanoutEngine {
    /// Creates an engine over a connection store and a transport.
    #[must_use]
    pub fn new(store: Arc<dyn ConnectionStore>, transport: Arc<dyn TransportSender>) -> Self {
        Self { store, transport }
    }

    /// Sends `{ action, message: payload }` to every registered connection
    /// except `exclude`, then evicts the ones that failed.
    ///
    /// Individual delivery failures never fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if reading the registry or
    /// the eviction batch fails.
    pub async fn broadcast(
        &self,
        action: &str,
        payload: &serde_json::Value,
        exclude: Option<&ConnectionId>,
    ) -> Result<BroadcastReport, RelayError> {
        let data = Envelope::new(action, payload.clone()).to_text();
        let data = data.as_str();

        let targets: Vec<ConnectionId> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|id| Some(id) != exclude)
            .collect();

        let outcomes = join_all(targets.iter().map(|id| async move {
            let result = self.transport.send(id, data).await;
            (id, result)
        }))
        .await;

        let evicted: Vec<ConnectionId> = outcomes
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(()) => None,
                Err(err) => {
                    tracing::debug!(conn_id = %id, error = %err, "delivery failed");
                    Some(id.clone())
                }
            })
            .collect();

        self.store.remove_batch(&evicted).await?;

        let delivered = targets.len().saturating_sub(evicted.len());
        if !evicted.is_empty() {
            tracing::info!(action, evicted = evicted.len(), "evicted unreachable connections");
        }
        tracing::debug!(action, targets = targets.len(), delivered, "fan-out complete");

        Ok(BroadcastReport { delivered, evicted })
    }

    /// Sends `{ action, message: payload }` to a single connection.
    ///
    /// Unlike [`Self::broadcast`], a failure here is only reported; the
    /// registry is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DeliveryFailed`] if the transport rejects it.
    pub async fn send(
        &self,
        id: &ConnectionId,
        action: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RelayError> {
        let data = Envelope::new(action, payload.clone()).to_text();
        self.transport.send(id, &data).await
    }
}

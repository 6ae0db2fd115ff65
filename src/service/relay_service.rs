//! Relay service: the connect / disconnect / publish / query handlers.
//!
//! Each handler performs one registry or cache operation and, for
//! publish, one fan-out round. Handlers share no in-process state; all
//! coordination goes through the [`ConnectionStore`] and [`StateCache`].

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::domain::{ConnectionId, LastState};
use crate::error::RelayError;
use crate::persistence::{ConnectionStore, StateCache};
use crate::transport::TransportSender;

use super::fanout::{BroadcastReport, FanoutEngine};

/// Lifecycle handlers for relay clients.
///
/// Client states: `absent → connected → (publishing)* → absent`. Store
/// failures are returned to the caller unchanged; nothing is retried.
#[derive(Debug, Clone)]
pub struct RelayService {
    store: Arc<dyn ConnectionStore>,
    cache: Arc<dyn StateCache>,
    fanout: FanoutEngine,
    secret_key: Option<String>,
    broadcast_action: String,
    query_action: String,
}

impl RelayService {
    /// Creates a `RelayService` over the given backends.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        cache: Arc<dyn StateCache>,
        transport: Arc<dyn TransportSender>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            fanout: FanoutEngine::new(Arc::clone(&store), transport),
            store,
            cache,
            secret_key: config.secret_key.clone(),
            broadcast_action: config.broadcast_action.clone(),
            query_action: config.query_action.clone(),
        }
    }

    /// `absent → connected`: registers the connection. No fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if the registry write fails.
    /// The transport channel may stay open in that case.
    pub async fn on_connect(&self, id: &ConnectionId) -> Result<(), RelayError> {
        self.store.register(id).await?;
        tracing::info!(conn_id = %id, "connection registered");
        Ok(())
    }

    /// `connected → absent`: removes the connection. No fan-out.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if the registry delete fails.
    pub async fn on_disconnect(&self, id: &ConnectionId) -> Result<(), RelayError> {
        self.store.remove(id).await?;
        tracing::info!(conn_id = %id, "connection removed");
        Ok(())
    }

    /// Publish: caches `message` and then fans it out to every other
    /// connection.
    ///
    /// The cache write always completes before any peer is notified; if it
    /// fails nothing is broadcast. Unreachable peers do not fail the call.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Unauthorized`] if a secret is configured and
    ///   `secret_key` does not match it.
    /// - [`RelayError::InvalidRequest`] if `message` is missing or null.
    /// - [`RelayError::StoreUnavailable`] if the cache write, the registry
    ///   read or the eviction batch fails.
    pub async fn on_publish(
        &self,
        sender: &ConnectionId,
        message: Option<serde_json::Value>,
        secret_key: Option<&str>,
    ) -> Result<BroadcastReport, RelayError> {
        if let Some(expected) = &self.secret_key
            && secret_key != Some(expected.as_str())
        {
            tracing::warn!(conn_id = %sender, "publish rejected: bad secret");
            return Err(RelayError::Unauthorized);
        }

        let payload = match message {
            Some(value) if !value.is_null() => value,
            _ => {
                return Err(RelayError::InvalidRequest(
                    "publish requires a message".to_string(),
                ));
            }
        };

        self.cache.put(&payload).await?;

        let report = self
            .fanout
            .broadcast(&self.broadcast_action, &payload, Some(sender))
            .await?;

        tracing::debug!(
            conn_id = %sender,
            delivered = report.delivered,
            evicted = report.evicted.len(),
            "publish relayed"
        );
        Ok(report)
    }

    /// Query: sends the cached state to the asking connection.
    ///
    /// Returns `true` if something was sent, `false` if nothing has been
    /// published yet.
    ///
    /// # Errors
    ///
    /// - [`RelayError::StoreUnavailable`] if the cache read fails.
    /// - [`RelayError::DeliveryFailed`] if the reply cannot be delivered.
    ///   The registry is not modified in that case.
    pub async fn on_query(&self, id: &ConnectionId) -> Result<bool, RelayError> {
        let Some(state) = self.cache.get().await? else {
            tracing::debug!(conn_id = %id, "query before first publish");
            return Ok(false);
        };
        self.fanout
            .send(id, &self.query_action, &state.payload)
            .await?;
        Ok(true)
    }

    /// Returns the cached state, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if the cache read fails.
    pub async fn last_state(&self) -> Result<Option<LastState>, RelayError> {
        self.cache.get().await
    }

    /// Returns the number of registered connections.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if the registry read fails.
    pub async fn connection_count(&self) -> Result<usize, RelayError> {
        Ok(self.store.list_all().await?.len())
    }
}

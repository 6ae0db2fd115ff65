//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::persistence::{ConnectionStore, MemoryStore, PostgresStore, StateCache};
use crate::service::RelayService;
use crate::transport::{ClusterTransport, MemoryPeerBus, PeerBus, PgPeerBus, TransportSender};
use crate::ws::WsTransport;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Lifecycle handlers over the registry, cache and fan-out engine.
    pub relay: Arc<RelayService>,
    /// Outbound queues for sockets attached to this process.
    pub transport: Arc<WsTransport>,
}

impl AppState {
    /// Wires backends and transport from `config`.
    ///
    /// With persistence enabled the registry and the cache live in
    /// PostgreSQL and instances exchange forwarded deliveries over
    /// `NOTIFY`; otherwise a single in-process [`MemoryStore`] serves both
    /// and the peer bus stays in memory.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if PostgreSQL cannot be
    /// reached or migrated.
    pub async fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let transport = Arc::new(WsTransport::new(config.outbound_buffer));

        let (store, cache, bus): (
            Arc<dyn ConnectionStore>,
            Arc<dyn StateCache>,
            Arc<dyn PeerBus>,
        ) = if config.persistence_enabled {
            let pg = Arc::new(PostgresStore::connect(config).await?);
            let bus = PgPeerBus::start(pg.pool().clone(), config.peer_buffer).await?;
            (
                Arc::clone(&pg) as Arc<dyn ConnectionStore>,
                pg as Arc<dyn StateCache>,
                Arc::new(bus) as Arc<dyn PeerBus>,
            )
        } else {
            tracing::warn!("persistence disabled; registry is local to this process");
            let mem = Arc::new(MemoryStore::new().for_instance(config.instance_id.clone()));
            (
                Arc::clone(&mem) as Arc<dyn ConnectionStore>,
                mem as Arc<dyn StateCache>,
                Arc::new(MemoryPeerBus::new(config.peer_buffer)) as Arc<dyn PeerBus>,
            )
        };

        Ok(Self::with_backends(store, cache, bus, transport, config))
    }

    /// Builds state over explicit backends and starts this instance's
    /// peer delivery task. Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_backends(
        store: Arc<dyn ConnectionStore>,
        cache: Arc<dyn StateCache>,
        bus: Arc<dyn PeerBus>,
        transport: Arc<WsTransport>,
        config: &RelayConfig,
    ) -> Self {
        let cluster = ClusterTransport::new(
            config.instance_id.clone(),
            Arc::clone(&transport),
            Arc::clone(&store),
            bus,
        );
        let _peer_delivery = cluster.spawn_peer_delivery();

        let relay = RelayService::new(
            store,
            cache,
            Arc::new(cluster) as Arc<dyn TransportSender>,
            config,
        );
        Self {
            relay: Arc::new(relay),
            transport,
        }
    }
}

//! Transport spanning every relay instance that shares a registry.
//!
//! The registry is shared, but sockets are not: each instance only holds
//! queues for the sockets it accepted. [`ClusterTransport`] delivers
//! locally when it can and otherwise forwards the envelope to the
//! instance recorded as the connection's owner. That instance runs the
//! task started by [`ClusterTransport::spawn_peer_delivery`], which pushes
//! forwarded envelopes into its own queues and evicts ids whose socket is
//! gone.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::TransportSender;
use super::peer_bus::{PeerBus, PeerDelivery};
use crate::domain::ConnectionId;
use crate::error::RelayError;
use crate::persistence::ConnectionStore;
use crate::ws::WsTransport;

/// Local-first transport that forwards to the owning instance.
#[derive(Debug)]
pub struct ClusterTransport {
    instance: String,
    local: Arc<WsTransport>,
    store: Arc<dyn ConnectionStore>,
    bus: Arc<dyn PeerBus>,
}

impl ClusterTransport {
    /// Creates the transport for relay instance `instance`.
    #[must_use]
    pub fn new(
        instance: impl Into<String>,
        local: Arc<WsTransport>,
        store: Arc<dyn ConnectionStore>,
        bus: Arc<dyn PeerBus>,
    ) -> Self {
        Self {
            instance: instance.into(),
            local,
            store,
            bus,
        }
    }

    /// Subscribes to the peer bus and spawns the task delivering the
    /// envelopes other instances forward to this one.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed. Must be called within a Tokio runtime.
    pub fn spawn_peer_delivery(&self) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let instance = self.instance.clone();
        let local = Arc::clone(&self.local);
        let store = Arc::clone(&self.store);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(delivery) if delivery.owner == instance => {
                        deliver_forwarded(&local, store.as_ref(), &delivery).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "peer delivery task lagged behind bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(instance = %instance, "peer delivery task stopped");
        })
    }
}

/// Pushes a forwarded envelope into the local queue, evicting the id if
/// its socket is gone.
async fn deliver_forwarded(
    local: &WsTransport,
    store: &dyn ConnectionStore,
    delivery: &PeerDelivery,
) {
    if local.send(&delivery.conn_id, &delivery.data).await.is_ok() {
        return;
    }
    tracing::info!(conn_id = %delivery.conn_id, "evicting unreachable forwarded connection");
    if let Err(err) = store.remove(&delivery.conn_id).await {
        tracing::error!(conn_id = %delivery.conn_id, error = %err, "eviction failed");
    }
}

#[async_trait]
impl TransportSender for ClusterTransport {
    /// Forwarded deliveries succeed once the bus accepts them; the owner
    /// handles a dead socket on its side.
    async fn send(&self, id: &ConnectionId, data: &str) -> Result<(), RelayError> {
        if self.local.is_attached(id).await {
            return self.local.send(id, data).await;
        }
        match self.store.owner_of(id).await? {
            Some(owner) if owner != self.instance => {
                let delivery = PeerDelivery {
                    owner,
                    conn_id: id.clone(),
                    data: data.to_string(),
                };
                self.bus.publish(&delivery).await
            }
            // Registered here but no socket: left over from a dropped
            // connection.
            _ => Err(RelayError::DeliveryFailed {
                conn_id: id.clone(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::persistence::MemoryStore;
    use crate::service::FanoutEngine;
    use crate::transport::MemoryPeerBus;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(1);

    struct Instance {
        store: Arc<MemoryStore>,
        local: Arc<WsTransport>,
        cluster: Arc<ClusterTransport>,
    }

    fn instance(registry: &MemoryStore, bus: &Arc<MemoryPeerBus>, name: &str) -> Instance {
        let store = Arc::new(registry.for_instance(name));
        let local = Arc::new(WsTransport::new(4));
        let cluster = Arc::new(ClusterTransport::new(
            name,
            Arc::clone(&local),
            Arc::clone(&store) as Arc<dyn ConnectionStore>,
            Arc::clone(bus) as Arc<dyn PeerBus>,
        ));
        Instance {
            store,
            local,
            cluster,
        }
    }

    fn pair() -> (Arc<MemoryPeerBus>, Instance, Instance) {
        let registry = MemoryStore::new();
        let bus = Arc::new(MemoryPeerBus::new(16));
        let a = instance(&registry, &bus, "a");
        let b = instance(&registry, &bus, "b");
        (bus, a, b)
    }

    async fn connect(node: &Instance, id: &str) -> tokio::sync::mpsc::Receiver<String> {
        let id = ConnectionId::from(id);
        let rx = node.local.attach(id.clone()).await;
        let Ok(()) = node.store.register(&id).await else {
            panic!("register failed");
        };
        rx
    }

    #[tokio::test]
    async fn local_socket_is_served_without_the_bus() {
        let (bus, a, _b) = pair();
        let mut seen = bus.subscribe();
        let mut rx = connect(&a, "on-a").await;

        assert!(a.cluster.send(&ConnectionId::from("on-a"), "hi").await.is_ok());
        assert_eq!(rx.recv().await.as_deref(), Some("hi"));
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_socket_receives_forwarded_envelope() {
        let (_bus, a, b) = pair();
        let _worker = b.cluster.spawn_peer_delivery();
        let mut rx = connect(&b, "on-b").await;

        assert!(a.cluster.send(&ConnectionId::from("on-b"), "hi").await.is_ok());

        let Ok(received) = tokio::time::timeout(WAIT, rx.recv()).await else {
            panic!("forwarded envelope never arrived");
        };
        assert_eq!(received.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn orphan_owned_by_this_instance_fails() {
        let (bus, a, _b) = pair();
        let mut seen = bus.subscribe();
        let orphan = ConnectionId::from("orphan");
        let Ok(()) = a.store.register(&orphan).await else {
            panic!("register failed");
        };

        let result = a.cluster.send(&orphan, "hi").await;
        assert!(matches!(result, Err(RelayError::DeliveryFailed { .. })));
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_id_fails() {
        let (_bus, a, _b) = pair();
        let result = a.cluster.send(&ConnectionId::from("ghost"), "hi").await;
        assert!(matches!(result, Err(RelayError::DeliveryFailed { .. })));
    }

    #[tokio::test]
    async fn owner_evicts_dead_forwarded_connection() {
        let (_bus, a, b) = pair();
        let _worker = b.cluster.spawn_peer_delivery();
        let dead = ConnectionId::from("dead");
        drop(connect(&b, "dead").await);

        assert!(a.cluster.send(&dead, "hi").await.is_ok());

        let evicted = tokio::time::timeout(WAIT, async {
            while !matches!(a.store.owner_of(&dead).await, Ok(None)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(evicted.is_ok(), "owner should evict the dead connection");
    }

    #[tokio::test]
    async fn broadcast_keeps_connections_of_other_instances() {
        let (_bus, a, b) = pair();
        let _worker = b.cluster.spawn_peer_delivery();
        let mut on_a = connect(&a, "on-a").await;
        let mut on_b = connect(&b, "on-b").await;
        let Ok(()) = a.store.register(&ConnectionId::from("orphan")).await else {
            panic!("register failed");
        };

        let engine = FanoutEngine::new(
            Arc::clone(&a.store) as Arc<dyn ConnectionStore>,
            Arc::clone(&a.cluster) as Arc<dyn TransportSender>,
        );
        let Ok(report) = engine.broadcast("coords", &json!({"lat": 1}), None).await else {
            panic!("broadcast failed");
        };

        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, vec![ConnectionId::from("orphan")]);
        assert!(matches!(
            a.store.owner_of(&ConnectionId::from("on-b")).await,
            Ok(Some(owner)) if owner == "b"
        ));
        assert!(on_a.recv().await.is_some());
        let Ok(Some(frame)) = tokio::time::timeout(WAIT, on_b.recv()).await else {
            panic!("remote socket missed the broadcast");
        };
        assert!(frame.contains("\"coords\""));
    }
}

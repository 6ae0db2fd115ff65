//! In-process backend for the connection registry and state cache.
//!
//! [`MemoryStore`] keeps the connection set in a
//! `tokio::sync::RwLock<HashMap<..>>` and the cached state in a single
//! `RwLock<Option<..>>`. Views created with [`MemoryStore::for_instance`]
//! share the same maps under a different owner, which is how several
//! relay instances are wired against one registry inside one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;

use super::{ConnectionStore, StateCache};
use crate::config::DEFAULT_INSTANCE_ID;
use crate::domain::{ConnectionId, LastState};
use crate::error::RelayError;

#[derive(Debug, Clone)]
struct Registration {
    owner: String,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Shared {
    connections: RwLock<HashMap<ConnectionId, Registration>>,
    last_state: RwLock<Option<LastState>>,
    batch_round_trips: AtomicUsize,
    offline: AtomicBool,
    batches_failing: AtomicBool,
}

/// In-memory implementation of [`ConnectionStore`] and [`StateCache`].
#[derive(Debug)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    owner: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store owned by [`DEFAULT_INSTANCE_ID`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            owner: DEFAULT_INSTANCE_ID.to_string(),
        }
    }

    /// Returns a view over the same data that registers connections as
    /// owned by `owner`.
    #[must_use]
    pub fn for_instance(&self, owner: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            owner: owner.into(),
        }
    }

    /// Simulates a backend outage: while offline every operation fails
    /// with [`RelayError::StoreUnavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes only non-empty batch deletes fail, leaving every other
    /// operation available.
    pub fn set_batches_failing(&self, failing: bool) {
        self.shared.batches_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of batch deletes that actually reached the backing map.
    #[must_use]
    pub fn batch_round_trips(&self) -> usize {
        self.shared.batch_round_trips.load(Ordering::SeqCst)
    }

    /// Registration timestamp of `id`, if registered.
    pub async fn connected_at(&self, id: &ConnectionId) -> Option<DateTime<Utc>> {
        self.shared
            .connections
            .read()
            .await
            .get(id)
            .map(|reg| reg.connected_at)
    }

    fn check_online(&self) -> Result<(), RelayError> {
        if self.shared.offline.load(Ordering::SeqCst) {
            return Err(RelayError::StoreUnavailable(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn register(&self, id: &ConnectionId) -> Result<(), RelayError> {
        self.check_online()?;
        let registration = Registration {
            owner: self.owner.clone(),
            connected_at: Utc::now().trunc_subsecs(0),
        };
        self.shared
            .connections
            .write()
            .await
            .insert(id.clone(), registration);
        Ok(())
    }

    async fn remove(&self, id: &ConnectionId) -> Result<(), RelayError> {
        self.check_online()?;
        self.shared.connections.write().await.remove(id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ConnectionId>, RelayError> {
        self.check_online()?;
        let map = self.shared.connections.read().await;
        Ok(map.keys().cloned().collect())
    }

    async fn remove_batch(&self, ids: &[ConnectionId]) -> Result<(), RelayError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.check_online()?;
        if self.shared.batches_failing.load(Ordering::SeqCst) {
            return Err(RelayError::StoreUnavailable(
                "batch delete rejected".to_string(),
            ));
        }
        self.shared.batch_round_trips.fetch_add(1, Ordering::SeqCst);
        let mut map = self.shared.connections.write().await;
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }

    async fn owner_of(&self, id: &ConnectionId) -> Result<Option<String>, RelayError> {
        self.check_online()?;
        let map = self.shared.connections.read().await;
        Ok(map.get(id).map(|reg| reg.owner.clone()))
    }
}

#[async_trait]
impl StateCache for MemoryStore {
    async fn put(&self, payload: &serde_json::Value) -> Result<(), RelayError> {
        self.check_online()?;
        *self.shared.last_state.write().await = Some(LastState::now(payload.clone()));
        Ok(())
    }

    async fn get(&self) -> Result<Option<LastState>, RelayError> {
        self.check_online()?;
        Ok(self.shared.last_state.read().await.clone())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn ids(store: &MemoryStore) -> Vec<ConnectionId> {
        let Ok(mut ids) = store.list_all().await else {
            panic!("list_all failed");
        };
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let store = MemoryStore::new();
        let id = ConnectionId::from("c1");
        assert!(store.register(&id).await.is_ok());
        let Some(first) = store.connected_at(&id).await else {
            panic!("c1 should be registered");
        };
        assert!(store.register(&id).await.is_ok());
        let Some(second) = store.connected_at(&id).await else {
            panic!("c1 should still be registered");
        };

        assert_eq!(ids(&store).await, vec![id]);
        assert!(second >= first);
    }

    #[tokio::test]
    async fn remove_absent_is_ok() {
        let store = MemoryStore::new();
        let kept = ConnectionId::from("kept");
        assert!(store.register(&kept).await.is_ok());

        assert!(store.remove(&ConnectionId::from("ghost")).await.is_ok());
        assert_eq!(ids(&store).await, vec![kept]);
    }

    #[tokio::test]
    async fn remove_batch_drops_only_given_ids() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            assert!(store.register(&ConnectionId::from(id)).await.is_ok());
        }

        let batch = [ConnectionId::from("b"), ConnectionId::from("zzz")];
        assert!(store.remove_batch(&batch).await.is_ok());

        assert_eq!(
            ids(&store).await,
            vec![ConnectionId::from("a"), ConnectionId::from("c")]
        );
        assert_eq!(store.batch_round_trips(), 1);
    }

    #[tokio::test]
    async fn empty_batch_skips_backend_even_when_offline() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(store.remove_batch(&[]).await.is_ok());
        assert_eq!(store.batch_round_trips(), 0);
    }

    #[tokio::test]
    async fn failing_batches_leave_other_operations_available() {
        let store = MemoryStore::new();
        store.set_batches_failing(true);
        let id = ConnectionId::from("c1");

        assert!(store.register(&id).await.is_ok());
        assert!(store.list_all().await.is_ok());
        assert!(matches!(
            store.remove_batch(std::slice::from_ref(&id)).await,
            Err(RelayError::StoreUnavailable(_))
        ));
        assert_eq!(ids(&store).await, vec![id]);
    }

    #[tokio::test]
    async fn instance_views_share_data_and_record_owner() {
        let a = MemoryStore::new().for_instance("a");
        let b = a.for_instance("b");
        assert!(a.register(&ConnectionId::from("on-a")).await.is_ok());
        assert!(b.register(&ConnectionId::from("on-b")).await.is_ok());

        assert_eq!(ids(&a).await, ids(&b).await);
        assert!(matches!(
            a.owner_of(&ConnectionId::from("on-b")).await,
            Ok(Some(owner)) if owner == "b"
        ));
        assert!(matches!(
            b.owner_of(&ConnectionId::from("missing")).await,
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn cache_is_absent_before_first_put() {
        let store = MemoryStore::new();
        let Ok(state) = store.get().await else {
            panic!("get failed");
        };
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn cache_overwrites_without_merge() {
        let store = MemoryStore::new();
        assert!(store.put(&json!({"lat": 1, "lon": 2, "alt": 9})).await.is_ok());
        assert!(store.put(&json!({"lat": 5})).await.is_ok());

        let Ok(Some(state)) = store.get().await else {
            panic!("state should be present");
        };
        assert_eq!(state.payload, json!({"lat": 5}));
        assert_eq!(state.updated_at.timestamp_subsec_nanos(), 0);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let result = store.register(&ConnectionId::from("c1")).await;
        assert!(matches!(result, Err(RelayError::StoreUnavailable(_))));
        assert!(matches!(
            store.list_all().await,
            Err(RelayError::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.put(&json!({})).await,
            Err(RelayError::StoreUnavailable(_))
        ));
    }
}

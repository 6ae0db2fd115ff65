//! Persistence layer: the connection registry and the last-state cache.
//!
//! Both are narrow async traits so the fan-out engine and lifecycle
//! handlers never hold a private copy of the connection set. Every call
//! goes to the backend, because other relay instances mutate the same
//! rows concurrently. Each row names the instance holding its socket;
//! only that instance can deliver to it.
//!
//! Two backends are provided: [`postgres::PostgresStore`] for durable
//! shared storage and [`memory::MemoryStore`] for single-process runs
//! and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::domain::{ConnectionId, LastState};
use crate::error::RelayError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Durable set of active connection ids.
///
/// Each id is recorded together with the relay instance that holds its
/// socket, so deliveries can be forwarded to that instance.
///
/// Each operation is individually atomic against the backend; no
/// cross-operation transactions are offered.
#[async_trait]
pub trait ConnectionStore: Send + Sync + std::fmt::Debug {
    /// Upserts `id`. Registering a present id refreshes its timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn register(&self, id: &ConnectionId) -> Result<(), RelayError>;

    /// Deletes `id`. Removing an absent id succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn remove(&self, id: &ConnectionId) -> Result<(), RelayError>;

    /// Reads every registered id in one consistent query.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn list_all(&self) -> Result<Vec<ConnectionId>, RelayError>;

    /// Deletes all of `ids`. An empty slice returns immediately without
    /// touching the backend.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn remove_batch(&self, ids: &[ConnectionId]) -> Result<(), RelayError>;

    /// Returns the relay instance that registered `id`, or `None` if `id`
    /// is not registered.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn owner_of(&self, id: &ConnectionId) -> Result<Option<String>, RelayError>;
}

/// Single-slot holder of the last published payload.
#[async_trait]
pub trait StateCache: Send + Sync + std::fmt::Debug {
    /// Overwrites the slot with `payload`, stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn put(&self, payload: &serde_json::Value) -> Result<(), RelayError>;

    /// Returns the last written state, or `None` before the first publish.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on backend failure.
    async fn get(&self) -> Result<Option<LastState>, RelayError>;
}

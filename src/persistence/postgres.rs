//! PostgreSQL implementation of the connection registry and state cache.
//!
//! All rows live in one `relay_items` table keyed by `(pk, sk)`.
//! Connections share the `CONNECTION` partition with the connection id as
//! sort key and the owning relay instance in `owner`; the cached state is
//! the single `(LAST_LOCATION, SELF)` row. Timestamps are unix seconds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{ConnectionStore, StateCache};
use crate::config::RelayConfig;
use crate::domain::{ConnectionId, LastState};
use crate::error::RelayError;

const CONNECTION_PARTITION: &str = "CONNECTION";
const STATE_PARTITION: &str = "LAST_LOCATION";
const STATE_KEY: &str = "SELF";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    owner: String,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool. Connections it
    /// registers are recorded as owned by `owner`.
    #[must_use]
    pub fn new(pool: PgPool, owner: impl Into<String>) -> Self {
        Self {
            pool,
            owner: owner.into(),
        }
    }

    /// Opens a pool from `config`, applies pending migrations and drops
    /// the rows a previous run of this instance left behind.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] if the database cannot be
    /// reached or the migration fails.
    pub async fn connect(config: &RelayConfig) -> Result<Self, RelayError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("relay_items schema ready");

        let store = Self::new(pool, config.instance_id.clone());
        let purged = store.purge_owned().await?;
        if purged > 0 {
            tracing::info!(instance = %store.owner, purged, "dropped stale connections");
        }
        Ok(store)
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Deletes every connection registered by this instance. None of those
    /// sockets survive a restart.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] on database failure.
    pub async fn purge_owned(&self) -> Result<u64, RelayError> {
        let result = sqlx::query("DELETE FROM relay_items WHERE pk = $1 AND owner = $2")
            .bind(CONNECTION_PARTITION)
            .bind(&self.owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Builds the cached state from a `(payload, ts)` row.
fn state_from_row(
    payload: Option<serde_json::Value>,
    ts: i64,
) -> Result<Option<LastState>, RelayError> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    let updated_at = DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| {
        RelayError::StoreUnavailable(format!("stored timestamp {ts} is out of range"))
    })?;
    Ok(Some(LastState {
        payload,
        updated_at,
    }))
}

#[async_trait]
impl ConnectionStore for PostgresStore {
    async fn register(&self, id: &ConnectionId) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO relay_items (pk, sk, owner, ts) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (pk, sk) DO UPDATE SET owner = EXCLUDED.owner, ts = EXCLUDED.ts",
        )
        .bind(CONNECTION_PARTITION)
        .bind(id.as_str())
        .bind(&self.owner)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, id: &ConnectionId) -> Result<(), RelayError> {
        sqlx::query("DELETE FROM relay_items WHERE pk = $1 AND sk = $2")
            .bind(CONNECTION_PARTITION)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ConnectionId>, RelayError> {
        let rows = sqlx::query_scalar::<_, String>("SELECT sk FROM relay_items WHERE pk = $1")
            .bind(CONNECTION_PARTITION)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ConnectionId::from).collect())
    }

    async fn remove_batch(&self, ids: &[ConnectionId]) -> Result<(), RelayError> {
        if ids.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let result = sqlx::query("DELETE FROM relay_items WHERE pk = $1 AND sk = ANY($2)")
            .bind(CONNECTION_PARTITION)
            .bind(&keys)
            .execute(&self.pool)
            .await?;
        tracing::debug!(
            requested = keys.len(),
            deleted = result.rows_affected(),
            "batch connection delete"
        );
        Ok(())
    }

    async fn owner_of(&self, id: &ConnectionId) -> Result<Option<String>, RelayError> {
        let owner = sqlx::query_scalar::<_, Option<String>>(
            "SELECT owner FROM relay_items WHERE pk = $1 AND sk = $2",
        )
        .bind(CONNECTION_PARTITION)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner.flatten())
    }
}

#[async_trait]
impl StateCache for PostgresStore {
    async fn put(&self, payload: &serde_json::Value) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO relay_items (pk, sk, payload, ts) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (pk, sk) DO UPDATE SET payload = EXCLUDED.payload, ts = EXCLUDED.ts",
        )
        .bind(STATE_PARTITION)
        .bind(STATE_KEY)
        .bind(payload)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self) -> Result<Option<LastState>, RelayError> {
        let row = sqlx::query_as::<_, (Option<serde_json::Value>, i64)>(
            "SELECT payload, ts FROM relay_items WHERE pk = $1 AND sk = $2",
        )
        .bind(STATE_PARTITION)
        .bind(STATE_KEY)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((payload, ts)) => state_from_row(payload, ts),
            None => Ok(None),
        }
    }
}

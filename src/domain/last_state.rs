//! The single cached record served to late joiners.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Most recently published payload, last-write-wins.
///
/// `updated_at` has one-second precision on every backend.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LastState {
    /// Opaque payload exactly as published.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    /// When the payload was written.
    pub updated_at: DateTime<Utc>,
}

impl LastState {
    /// Stamps a payload with the current time, truncated to whole
    /// seconds to match what the durable backend stores.
    #[must_use]
    pub fn now(payload: serde_json::Value) -> Self {
        Self {
            payload,
            updated_at: Utc::now().trunc_subsecs(0),
        }
    }
}

//! Read-only views of the relay: cached state and registry size.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::domain::LastState;
use crate::error::{ErrorResponse, RelayError};

/// Registry size response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionCountResponse {
    /// Number of registered connection ids.
    pub count: usize,
}

/// `GET /state` — Last published payload.
///
/// # Errors
///
/// Returns [`RelayError::StoreUnavailable`] if the cache cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/state",
    tag = "Relay",
    summary = "Last published state",
    description = "Returns the most recently published payload with its timestamp, or `null` if nothing has been published yet.",
    responses(
        (status = 200, description = "Cached state or null", body = Option<LastState>),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_state(State(state): State<AppState>) -> Result<impl IntoResponse, RelayError> {
    let last = state.relay.last_state().await?;
    Ok(Json(last))
}

/// `GET /connections` — Number of registered connections.
///
/// # Errors
///
/// Returns [`RelayError::StoreUnavailable`] if the registry cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/connections",
    tag = "Relay",
    summary = "Registered connection count",
    description = "Reads the connection registry and returns how many ids it holds, including ids not yet evicted by a fan-out round.",
    responses(
        (status = 200, description = "Registry size", body = ConnectionCountResponse),
        (status = 500, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn get_connections(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RelayError> {
    let count = state.relay.connection_count().await?;
    Ok(Json(ConnectionCountResponse { count }))
}

/// Relay read routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/connections", get(get_connections))
}

//! # coord-relay
//!
//! Real-time location relay over WebSocket.
//!
//! One client publishes coordinate updates; the relay caches the latest
//! one and fans it out to every other connected client. Newly connected
//! clients can query the cached value. Delivery failures during fan-out
//! evict the unreachable connection from the registry.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler (ws/)          REST Handlers (api/)
//!     │
//!     ├── RelayService (service/)   connect / disconnect / publish / query
//!     ├── FanoutEngine (service/)   join over sends, batch eviction
//!     │
//!     ├── ConnectionStore + StateCache (persistence/)
//!     │       └── PostgreSQL or in-memory
//!     │
//!     └── TransportSender (transport/)
//!             └── ClusterTransport ── WsTransport (ws/)  local sockets
//!                                 └── PeerBus            other instances
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
pub mod transport;
pub mod ws;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full HTTP + WebSocket router over `state`.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

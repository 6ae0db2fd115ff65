//! REST read endpoints driven through the router without a socket.

#![allow(clippy::panic)]

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use coord_relay::app_state::AppState;
use coord_relay::build_app;
use coord_relay::config::RelayConfig;
use coord_relay::domain::ConnectionId;
use coord_relay::persistence::{ConnectionStore, MemoryStore, StateCache};
use coord_relay::transport::{MemoryPeerBus, PeerBus};
use coord_relay::ws::WsTransport;

fn state_over(store: &Arc<MemoryStore>) -> AppState {
    let config = RelayConfig::default();
    AppState::with_backends(
        Arc::clone(store) as Arc<dyn ConnectionStore>,
        Arc::clone(store) as Arc<dyn StateCache>,
        Arc::new(MemoryPeerBus::new(config.peer_buffer)) as Arc<dyn PeerBus>,
        Arc::new(WsTransport::new(config.outbound_buffer)),
        &config,
    )
}

async fn get(state: AppState, uri: &str) -> (StatusCode, Value) {
    let Ok(request) = Request::builder().uri(uri).body(Body::empty()) else {
        panic!("bad request");
    };
    let Ok(response) = build_app(state).oneshot(request).await else {
        panic!("router failed");
    };
    let status = response.status();
    let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body read failed");
    };
    let Ok(value) = serde_json::from_slice(&bytes) else {
        panic!("body is not json");
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_healthy() {
    let store = Arc::new(MemoryStore::new());
    let (status, body) = get(state_over(&store), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn state_is_null_before_publish() {
    let store = Arc::new(MemoryStore::new());
    let (status, body) = get(state_over(&store), "/api/v1/state").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
}

#[tokio::test]
async fn state_returns_cached_payload() {
    let store = Arc::new(MemoryStore::new());
    tokio_test::assert_ok!(store.put(&json!({"lat": 4, "lon": 5})).await);

    let (status, body) = get(state_over(&store), "/api/v1/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"], json!({"lat": 4, "lon": 5}));
    assert!(body["updated_at"].is_string());
}

#[tokio::test]
async fn connections_counts_registry() {
    let store = Arc::new(MemoryStore::new());
    tokio_test::assert_ok!(store.register(&ConnectionId::from("a")).await);
    tokio_test::assert_ok!(store.register(&ConnectionId::from("b")).await);

    let (status, body) = get(state_over(&store), "/api/v1/connections").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn store_outage_maps_to_server_error() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);

    let (status, body) = get(state_over(&store), "/api/v1/connections").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], 3001);
}

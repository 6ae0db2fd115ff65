//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single socket: registers it on open,
//! routes inbound frames to the relay handlers, drains the outbound queue
//! the fan-out engine writes into, and deregisters it on close.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use super::outbound::WsTransport;
use crate::domain::envelope::{ERROR_ACTION, PUBLISH_ROUTE};
use crate::domain::{ConnectionId, Envelope, InboundFrame};
use crate::error::RelayError;
use crate::service::RelayService;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads frames from the client and dispatches them.
/// - Forwards queued outbound messages to the client.
pub async fn run_connection(
    socket: WebSocket,
    relay: Arc<RelayService>,
    transport: Arc<WsTransport>,
) {
    let conn_id = ConnectionId::generate();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut outbound = transport.attach(conn_id.clone()).await;

    if let Err(err) = relay.on_connect(&conn_id).await {
        tracing::error!(conn_id = %conn_id, error = %err, "connect handler failed");
        transport.detach(&conn_id).await;
        let _ = ws_tx.send(Message::text(error_frame(&err))).await;
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            // Incoming frame from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = dispatch(&relay, &conn_id, text.as_str()).await {
                            tracing::warn!(conn_id = %conn_id, error = %err, "handler failed");
                            if ws_tx.send(Message::text(error_frame(&err))).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Message queued by the fan-out engine
            queued = outbound.recv() => {
                match queued {
                    Some(text) => {
                        if ws_tx.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    // Queue dropped after a failed delivery.
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    transport.detach(&conn_id).await;
    if let Err(err) = relay.on_disconnect(&conn_id).await {
        tracing::error!(conn_id = %conn_id, error = %err, "disconnect handler failed");
    }
    tracing::debug!(conn_id = %conn_id, "ws connection closed");
}

/// Routes one inbound text frame to the publish or query handler.
async fn dispatch(
    relay: &RelayService,
    conn_id: &ConnectionId,
    text: &str,
) -> Result<(), RelayError> {
    let frame = serde_json::from_str::<InboundFrame>(text)
        .map_err(|_| RelayError::InvalidRequest("malformed JSON".to_string()))?;

    if frame.action == PUBLISH_ROUTE {
        relay
            .on_publish(conn_id, frame.message, frame.secret_key.as_deref())
            .await?;
    } else {
        relay.on_query(conn_id).await?;
    }
    Ok(())
}

/// Encodes `err` as an `{ "action": "error", "message": { code, message } }`
/// frame.
fn error_frame(err: &RelayError) -> String {
    let body = serde_json::to_value(err.to_body()).unwrap_or_default();
    Envelope::new(ERROR_ACTION, body).to_text()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn error_frame_shape() {
        let frame = error_frame(&RelayError::Unauthorized);
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&frame) else {
            panic!("error frame is not json");
        };
        assert_eq!(value["action"], "error");
        assert_eq!(value["message"]["code"], 1002);
    }
}

//! WebSocket adapter.
//!
//! One JSON-RPC envelope per text frame. Frames dispatch concurrently
//! (slow upstream calls must not head-of-line-block a connection), so
//! responses may arrive out of order; the request `id` is the correlation
//! handle, exactly as JSON-RPC intends.
//!
//! A malformed frame gets a `-32600` error reply with a null id and the
//! connection stays open. Liveness is enforced with
//! periodic pings; a connection that misses a pong for a full interval is
//! torn down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::AppState;
use super::jsonrpc::{JSONRPC_VERSION, JsonRpcResponse, next_request_id, parse_envelope};
use crate::auth::Transport;
use crate::dispatch::CallContext;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// API key fallback for clients that cannot set headers (browsers)
    api_key: Option<String>,
}

/// `GET /mcp/ws` — upgrade to a WebSocket JSON-RPC session.
pub async fn ws_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or(query.api_key.filter(|k| !k.is_empty()));
    ws.on_upgrade(move |socket| handle_session(state, socket, api_key))
}

async fn handle_session(state: Arc<AppState>, socket: WebSocket, api_key: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    // Single writer task; dispatch tasks and the keepalive share one
    // outbound channel so frames never interleave mid-write.
    let (tx, mut rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let ctx = Arc::new(CallContext::new(Transport::WebSocket, api_key));

    // Tell the client the session is ready before any request arrives.
    let hello = json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": "notifications/initialized",
    });
    if tx.send(Message::Text(hello.to_string().into())).await.is_err() {
        return;
    }

    let mut keepalive = tokio::time::interval(state.ws_ping_interval);
    keepalive.tick().await; // immediate first tick
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if awaiting_pong {
                    warn!("WebSocket peer missed keepalive pong, closing");
                    break;
                }
                awaiting_pong = true;
                if tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let state = state.clone();
                        let ctx = ctx.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let reply = match parse_envelope(text.as_bytes()) {
                                Ok(envelope) => state.dispatcher.dispatch(envelope, &ctx).await,
                                Err(e) => Some(JsonRpcResponse::error(
                                    None,
                                    e.to_jsonrpc_error(&next_request_id().to_string()),
                                )),
                            };
                            if let Some(reply) = reply {
                                match serde_json::to_string(&reply) {
                                    Ok(wire) => {
                                        let _ = tx.send(Message::Text(wire.into())).await;
                                    }
                                    Err(e) => warn!(error = %e, "Failed to serialize reply"),
                                }
                            }
                        });
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if tx.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket session closed by peer");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // Text frames only on this surface.
                        let error = crate::error::GatewayError::InvalidRequest {
                            details: "Binary frames are not supported".to_string(),
                        };
                        let reply = JsonRpcResponse::error(
                            None,
                            error.to_jsonrpc_error(&next_request_id().to_string()),
                        );
                        match serde_json::to_string(&reply) {
                            Ok(wire) => {
                                if tx.send(Message::Text(wire.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to serialize reply"),
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    drop(tx);
    let _ = writer.await;
}

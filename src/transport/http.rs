//! HTTP adapter: the JSON-RPC endpoint, the REST convenience routes, and
//! the discovery endpoints.
//!
//! Error shaping differs per surface. `POST /mcp` is JSON-RPC: protocol
//! errors travel in a `200` body, and only bytes that fail JSON parsing get
//! an HTTP `400`. The REST routes are plain HTTP: the status line carries
//! the outcome.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

use super::AppState;
use super::jsonrpc::{JsonRpcResponse, next_request_id, parse_envelope};
use crate::auth::Transport;
use crate::dispatch::{CallContext, SERVICE_NAME, SERVICE_VERSION};
use crate::error::GatewayError;
use crate::logging;

/// Build the HTTP router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_body_size;
    Router::new()
        .route("/mcp", post(mcp_endpoint))
        .route("/mcp/ws", get(super::ws::ws_endpoint))
        .route("/mcp/tools/{name}", post(rest_tool_endpoint))
        .route("/health", get(health))
        .route("/capabilities", get(capabilities))
        .route("/capabilities/openai-tools", get(openai_tools))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(logging::trace_layer())
        .with_state(state)
}

fn api_key_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// `POST /mcp` — one JSON-RPC envelope per request body.
async fn mcp_endpoint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match parse_envelope(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Framing failures never become a dispatch: no usage record,
            // and a syntax error is the one case that earns an HTTP 400
            // on this surface.
            let status = match e {
                GatewayError::ParseError { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::OK,
            };
            let reply =
                JsonRpcResponse::error(None, e.to_jsonrpc_error(&next_request_id().to_string()));
            return (status, Json(reply)).into_response();
        }
    };

    let ctx = CallContext::new(Transport::Http, api_key_from(&headers));
    match state.dispatcher.dispatch(envelope, &ctx).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `POST /mcp/tools/{name}` — invoke one tool with a bare JSON body of
/// arguments, no JSON-RPC framing required.
async fn rest_tool_endpoint(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let arguments: Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                let error = GatewayError::ParseError {
                    details: format!("Invalid JSON: {e}"),
                };
                return rest_error(&name, next_request_id().to_string(), error);
            }
        }
    };

    let ctx = CallContext::new(Transport::Http, api_key_from(&headers));
    match state.dispatcher.rest_call(&name, arguments, &ctx).await {
        Ok(outcome) => {
            let mut body = match outcome.payload {
                Value::Object(map) => map,
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("result".to_string(), other);
                    map
                }
            };
            body.insert("tool".into(), json!(name));
            body.insert("request_id".into(), json!(outcome.request_id));
            body.insert("processing_time_ms".into(), json!(outcome.elapsed_ms));
            body.insert("timestamp".into(), json!(chrono::Utc::now()));
            (StatusCode::OK, Json(Value::Object(body))).into_response()
        }
        Err(e) => rest_error(&name, e.request_id, e.error),
    }
}

fn rest_error(tool: &str, request_id: String, error: GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "error": error.to_string(),
        "error_type": error.error_type_name(),
        "service": SERVICE_NAME,
        "tool": tool,
        "request_id": request_id,
        "timestamp": chrono::Utc::now(),
    });
    if let Some(details) = error.details() {
        body["details"] = details;
    }
    (status, Json(body)).into_response()
}

/// `GET /health` — liveness probe.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

/// `GET /capabilities` — discovery document with the MCP tool schemas.
async fn capabilities(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(
        state
            .registry
            .capabilities_document(SERVICE_NAME, SERVICE_VERSION),
    )
}

/// `GET /capabilities/openai-tools` — the catalog in OpenAI
/// function-calling format.
async fn openai_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.registry.openai_tool_list())
}

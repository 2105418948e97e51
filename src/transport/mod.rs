//! Transport adapters.
//!
//! Three surfaces expose the same dispatch core: HTTP (JSON-RPC endpoint
//! plus REST convenience routes), WebSocket, and stdio. Adapters own
//! framing and reply shaping only; everything semantic lives in
//! [`crate::dispatch`].

pub mod http;
pub mod jsonrpc;
pub mod stdio;
pub mod ws;

use std::time::Duration;

use crate::dispatch::Dispatcher;
use crate::registry::ToolRegistry;

/// Shared state behind the HTTP/WebSocket server.
pub struct AppState {
    /// The dispatch core
    pub dispatcher: Dispatcher,
    /// Tool registry, for the discovery endpoints
    pub registry: ToolRegistry,
    /// WebSocket keepalive ping interval
    pub ws_ping_interval: Duration,
    /// Maximum accepted request body size
    pub max_body_size: usize,
}

//! medigate: a protocol-translation gateway for a medical-coding API.
//!
//! Exposes one tool catalog over three transports — HTTP (JSON-RPC plus
//! REST convenience routes), WebSocket, and stdio — and forwards
//! validated, authenticated calls to the upstream API in the caller's
//! environment. Every call produces one usage record.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod registry;
pub mod transport;
pub mod upstream;
pub mod usage;

pub use config::GatewayConfig;
pub use dispatch::Dispatcher;
pub use error::GatewayError;
pub use registry::ToolRegistry;

//! JSON-RPC 2.0 error response structures.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
///
/// Embedded in JSON-RPC error responses. `code` is one of the standard
/// protocol codes (-32600, -32601, -32602, -32603).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code per the JSON-RPC 2.0 specification
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Additional error context attached to JSON-RPC errors.
///
/// For upstream failures `details` carries the upstream's own message, which
/// callers need for diagnosis. The request id lets operators find the
/// matching log lines and usage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Unique identifier for tracing this call in logs and usage records
    pub request_id: String,

    /// Machine-readable error type name
    pub error_type: String,

    /// Type-specific details; for upstream errors, the upstream message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

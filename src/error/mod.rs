//! Error handling for the gateway.
//!
//! One error type covers the whole dispatch path: protocol violations,
//! authentication failures, and upstream failures. Each variant maps to a
//! JSON-RPC 2.0 error code (for the JSON-RPC surfaces) and to an HTTP status
//! (for the REST convenience surface). The two mappings are deliberately
//! separate contracts: JSON-RPC errors always travel in a 200 body, REST
//! errors use the HTTP status line.

pub mod jsonrpc;

use jsonrpc::{ErrorData, JsonRpcError};
use thiserror::Error;

/// All error conditions that can terminate a dispatch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    /// Request bytes are not valid JSON. Rejected at the transport boundary.
    #[error("Invalid JSON: {details}")]
    ParseError {
        /// Description of the parse failure
        details: String,
    },

    /// Request is not a valid JSON-RPC 2.0 envelope.
    #[error("Invalid JSON-RPC request: {details}")]
    InvalidRequest {
        /// What makes the envelope invalid
        details: String,
    },

    /// The requested method is not part of the MCP surface.
    #[error("Method '{method}' not found")]
    MethodNotFound {
        /// The unknown method name
        method: String,
    },

    /// `tools/call` named a tool that is not in the registry.
    #[error("Tool '{tool}' not found")]
    ToolNotFound {
        /// The unknown tool name
        tool: String,
    },

    /// Method parameters are missing or malformed.
    #[error("Invalid parameters: {details}")]
    InvalidParams {
        /// Description of the validation failure
        details: String,
    },

    /// No credential was supplied on a surface that requires one.
    #[error("Missing API key")]
    MissingCredential,

    /// The credential-validation service rejected the key.
    #[error("Invalid API key: {reason}")]
    InvalidCredential {
        /// Reason reported by the validation service
        reason: String,
    },

    /// The credential-validation service could not be reached. Never
    /// downgraded to anonymous access.
    #[error("Credential validation unavailable: {reason}")]
    ValidatorUnavailable {
        /// Why validation failed
        reason: String,
    },

    /// Upstream API returned a non-2xx status. The body is preserved so the
    /// caller sees the upstream's own message.
    #[error("Upstream returned HTTP {status}")]
    UpstreamStatus {
        /// HTTP status code from upstream
        status: u16,
        /// Upstream response body
        body: String,
    },

    /// Could not connect to the upstream API.
    #[error("Upstream unreachable: {reason}")]
    UpstreamUnreachable {
        /// Connection failure detail
        reason: String,
    },

    /// Upstream did not respond within the configured deadline.
    #[error("Upstream timed out after {timeout_secs}s")]
    UpstreamTimeout {
        /// The deadline in seconds
        timeout_secs: u64,
    },

    /// Unexpected internal failure.
    #[error("Internal error: {details}")]
    Internal {
        /// Failure detail for operators
        details: String,
    },
}

impl GatewayError {
    /// Maps the error to its JSON-RPC 2.0 error code.
    ///
    /// Only the four standard protocol codes appear on the wire:
    /// authentication and upstream failures all surface as `-32603` with the
    /// detail carried in `error.data`.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } | Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } | Self::ToolNotFound { .. } => -32601,
            Self::InvalidParams { .. } => -32602,
            Self::MissingCredential
            | Self::InvalidCredential { .. }
            | Self::ValidatorUnavailable { .. }
            | Self::UpstreamStatus { .. }
            | Self::UpstreamUnreachable { .. }
            | Self::UpstreamTimeout { .. }
            | Self::Internal { .. } => -32603,
        }
    }

    /// Maps the error to the HTTP status used by the REST surface and by
    /// usage records. Upstream statuses propagate as received.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ParseError { .. }
            | Self::InvalidRequest { .. }
            | Self::MethodNotFound { .. }
            | Self::InvalidParams { .. } => 400,
            Self::MissingCredential | Self::InvalidCredential { .. } => 401,
            Self::ToolNotFound { .. } => 404,
            Self::UpstreamStatus { status, .. } => *status,
            Self::UpstreamUnreachable { .. } => 502,
            Self::UpstreamTimeout { .. } => 504,
            Self::ValidatorUnavailable { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Returns the error type name for logs and usage records.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential { .. } => "invalid_credential",
            Self::ValidatorUnavailable { .. } => "validator_unavailable",
            Self::UpstreamStatus { .. } => "upstream_status",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Structured details for `error.data`.
    ///
    /// Upstream failures deliberately expose the upstream message: the
    /// gateway is a translator, and swallowing the upstream's diagnosis
    /// would leave callers debugging blind.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::MethodNotFound { method } => Some(serde_json::json!({ "method": method })),
            Self::ToolNotFound { tool } => Some(serde_json::json!({ "tool": tool })),
            Self::UpstreamStatus { status, body } => Some(serde_json::json!({
                "upstream_status": status,
                "upstream_message": body,
            })),
            Self::UpstreamUnreachable { reason } => {
                Some(serde_json::json!({ "reason": reason }))
            }
            Self::UpstreamTimeout { timeout_secs } => {
                Some(serde_json::json!({ "timeout_secs": timeout_secs }))
            }
            _ => None,
        }
    }

    /// Converts the error into a JSON-RPC error object.
    pub fn to_jsonrpc_error(&self, request_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                request_id: request_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: self.details(),
            }),
        }
    }
}

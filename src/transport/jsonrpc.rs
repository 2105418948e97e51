//! JSON-RPC 2.0 envelope types and parsing.
//!
//! Every transport adapter frames bytes into one envelope per call (HTTP
//! body, WebSocket frame, stdio line) and hands it to the dispatch core.
//! Parsing here only establishes that the bytes are a JSON object and pulls
//! the fields out; envelope-level validation (version, method presence) is
//! the dispatch core's job so that protocol rejections are recorded like any
//! other terminal state.
//!
//! # ID preservation
//!
//! The request `id` type (number, string, or explicit null) is preserved
//! exactly in responses. `"id": 1` is answered with `"id": 1`, never
//! `"id": "1"`. A missing `id` marks a notification, which gets no reply.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::error::jsonrpc::JsonRpcError;

/// JSON-RPC 2.0 version literal.
pub const JSONRPC_VERSION: &str = "2.0";

// Per-call request ids combine a process-unique prefix (one Uuid::new_v4()
// at startup) with a counter, avoiding CSPRNG work on every call while
// keeping ids globally unique. Version/variant bits are patched so the
// result is still a well-formed v4 UUID.
static REQUEST_ID_PREFIX: LazyLock<u64> =
    LazyLock::new(|| (Uuid::new_v4().as_u128() >> 64) as u64);
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique request id for one invocation.
pub fn next_request_id() -> Uuid {
    let prefix = *REQUEST_ID_PREFIX;
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut bits = ((prefix as u128) << 64) | (counter as u128);
    bits = (bits & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    bits = (bits & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(bits)
}

/// JSON-RPC 2.0 request/response id.
///
/// JSON-RPC 2.0 allows string, integer, or null ids. The variant is preserved
/// end to end; `Null` is an explicit `"id": null`, which is distinct from a
/// missing id (notification).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer id (e.g. `"id": 1`)
    Number(i64),
    /// String id (e.g. `"id": "abc-123"`)
    String(String),
    /// Explicit null id
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_i64()
                .map(JsonRpcId::Number)
                .ok_or_else(|| serde::de::Error::custom("JSON-RPC id must be an integer")),
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC id must be a string, integer, or null",
            )),
        }
    }
}

/// Deserializer distinguishing a missing `id` (notification) from an
/// explicit `"id": null` (request expecting a null-id reply).
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<JsonRpcId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(Some(JsonRpcId::Null));
    }
    JsonRpcId::deserialize(value)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// Raw JSON-RPC envelope as received on the wire.
///
/// All fields are optional so the dispatch core can report precisely which
/// part of a malformed envelope is wrong while still echoing any id that
/// was extractable.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    /// Must be `"2.0"`; validated by the dispatch core
    pub jsonrpc: Option<String>,
    /// Request id; `None` for notifications, `Some(Null)` for explicit null
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<JsonRpcId>,
    /// Method name
    pub method: Option<String>,
    /// Method parameters
    pub params: Option<Value>,
}

/// Parse one JSON-RPC envelope from raw bytes.
///
/// Only JSON syntax failures are rejected here (`ParseError`, the transport
/// framing error class). Structurally-valid JSON that is not a usable
/// envelope comes back as a `RawEnvelope` with missing fields, or as
/// `InvalidRequest` when the top-level value is not an object (batch arrays
/// are not supported: every transport frames exactly one envelope per call).
pub fn parse_envelope(bytes: &[u8]) -> Result<RawEnvelope, GatewayError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| GatewayError::ParseError {
        details: format!("Invalid JSON: {e}"),
    })?;

    if !value.is_object() {
        return Err(GatewayError::InvalidRequest {
            details: "Request must be a JSON object".to_string(),
        });
    }

    serde_json::from_value(value).map_err(|e| GatewayError::InvalidRequest {
        details: format!("Invalid JSON-RPC structure: {e}"),
    })
}

/// JSON-RPC 2.0 response.
///
/// Exactly one of `result` / `error` is set. Unlike requests, the `id`
/// field always serializes: `None` becomes `"id": null`, which is what the
/// spec requires when the request id could not be determined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: Cow<'static, str>,
    /// Echo of the request id (null when unknown)
    pub id: Option<JsonRpcId>,
    /// Success payload (mutually exclusive with `error`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (mutually exclusive with `result`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response echoing `id`.
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response. Pass `id: None` when the request id could
    /// not be determined; it serializes as `"id": null`.
    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_request() {
        let raw = parse_envelope(
            br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"t"}}"#,
        )
        .unwrap();
        assert_eq!(raw.jsonrpc.as_deref(), Some("2.0"));
        assert_eq!(raw.id, Some(JsonRpcId::Number(1)));
        assert_eq!(raw.method.as_deref(), Some("tools/call"));
        assert!(raw.params.is_some());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse_envelope(br#"{"jsonrpc": "#).unwrap_err();
        assert!(matches!(err, GatewayError::ParseError { .. }));
    }

    #[test]
    fn non_object_is_invalid_request() {
        let err = parse_envelope(br#"[1,2,3]"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn missing_id_is_notification_shape() {
        let raw = parse_envelope(br#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert_eq!(raw.id, None);
    }

    #[test]
    fn explicit_null_id_preserved() {
        let raw = parse_envelope(br#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
        assert_eq!(raw.id, Some(JsonRpcId::Null));
    }

    #[test]
    fn float_id_rejected() {
        let err = parse_envelope(br#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest { .. }));
    }

    #[test]
    fn id_type_preserved_in_response() {
        let resp = JsonRpcResponse::success(
            Some(JsonRpcId::Number(42)),
            serde_json::json!({"ok": true}),
        );
        let wire = serde_json::to_string(&resp).unwrap();
        assert!(wire.contains("\"id\":42"));
        assert!(!wire.contains("\"id\":\"42\""));

        let resp = JsonRpcResponse::success(
            Some(JsonRpcId::String("abc".into())),
            serde_json::json!({}),
        );
        let wire = serde_json::to_string(&resp).unwrap();
        assert!(wire.contains("\"id\":\"abc\""));
    }

    #[test]
    fn unknown_id_serializes_as_null() {
        let err = GatewayError::ParseError {
            details: "bad".into(),
        };
        let resp = JsonRpcResponse::error(None, err.to_jsonrpc_error("rid"));
        let wire = serde_json::to_string(&resp).unwrap();
        assert!(wire.contains("\"id\":null"));
        assert!(wire.contains("-32600"));
        assert!(!wire.contains("\"result\""));
    }

    #[test]
    fn request_ids_are_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}

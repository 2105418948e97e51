//! Transport-independent dispatch core.
//!
//! Every surface funnels into [`Dispatcher::dispatch`] (JSON-RPC envelopes)
//! or [`Dispatcher::rest_call`] (the REST convenience routes). The adapters
//! only frame bytes and shape replies; method routing, parameter
//! translation, credential resolution, upstream forwarding, and usage
//! recording all happen here, once, identically for every transport.
//!
//! A dispatch moves through a fixed sequence of states: envelope validated,
//! method routed, tool resolved, upstream invoked, response produced. Each
//! call terminates in exactly one state and emits exactly one usage record
//! for it. JSON framing errors never reach this module; the adapters reject
//! those before a dispatch exists.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value, json};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::auth::{CredentialResolver, Principal, Transport};
use crate::error::GatewayError;
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::transport::jsonrpc::{JsonRpcResponse, JSONRPC_VERSION, RawEnvelope, next_request_id};
use crate::upstream::UpstreamInvoker;
use crate::usage::{UsageRecord, UsageSink};

/// MCP protocol revision this gateway speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Service name reported by `initialize` and the discovery endpoints.
pub const SERVICE_NAME: &str = "medigate";

/// Crate version reported alongside the service name.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-call (or per-connection) context handed in by a transport adapter.
///
/// The resolved principal is cached, so a WebSocket connection or stdio
/// session validates its credential once rather than per message.
pub struct CallContext {
    transport: Transport,
    api_key: Option<String>,
    principal: OnceCell<Principal>,
}

impl CallContext {
    pub fn new(transport: Transport, api_key: Option<String>) -> Self {
        Self {
            transport,
            api_key,
            principal: OnceCell::new(),
        }
    }

    /// Transport this context belongs to.
    pub fn transport(&self) -> Transport {
        self.transport
    }
}

/// Outcome of a REST tool invocation.
pub struct RestOutcome {
    /// Gateway-assigned request id
    pub request_id: String,
    /// Upstream response body
    pub payload: Value,
    /// Wall-clock processing time in milliseconds
    pub elapsed_ms: u64,
}

/// A failed REST invocation, keeping the request id the call ran under so
/// the error body can reference the matching usage record.
pub struct RestError {
    /// Gateway-assigned request id
    pub request_id: String,
    /// What went wrong
    pub error: GatewayError,
}

/// The dispatch core shared by all transports.
pub struct Dispatcher {
    registry: ToolRegistry,
    upstream: Arc<dyn UpstreamInvoker>,
    resolver: CredentialResolver,
    usage: Arc<dyn UsageSink>,
}

/// Accounting fields accumulated as a dispatch advances.
struct CallTrace {
    request_id: String,
    started: Instant,
    tool_name: Option<String>,
    request_payload: Option<Value>,
}

impl CallTrace {
    fn new() -> Self {
        Self {
            request_id: next_request_id().to_string(),
            started: Instant::now(),
            tool_name: None,
            request_payload: None,
        }
    }
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        upstream: Arc<dyn UpstreamInvoker>,
        resolver: CredentialResolver,
        usage: Arc<dyn UsageSink>,
    ) -> Self {
        Self {
            registry,
            upstream,
            resolver,
            usage,
        }
    }

    /// Dispatch one JSON-RPC envelope.
    ///
    /// Returns `None` for notifications (no `id`), which still run and are
    /// still recorded; their results and errors are simply not sent back.
    pub async fn dispatch(&self, raw: RawEnvelope, ctx: &CallContext) -> Option<JsonRpcResponse> {
        let mut trace = CallTrace::new();
        let is_notification = raw.id.is_none();
        let id = raw.id.clone();

        let outcome = self.route(raw, ctx, &mut trace).await;

        let (status, response_payload, error_message) = match &outcome {
            Ok(result) => (200, Some(result.clone()), None),
            Err(e) => (e.http_status(), None, Some(e.to_string())),
        };
        self.record(ctx, &trace, status, response_payload, error_message);

        if is_notification {
            if let Err(e) = &outcome {
                warn!(
                    request_id = %trace.request_id,
                    error = %e,
                    "Notification dispatch failed (no reply sent)"
                );
            }
            return None;
        }
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, e.to_jsonrpc_error(&trace.request_id)),
        })
    }

    /// Invoke one tool on behalf of the REST surface.
    ///
    /// Emits the same usage record a `tools/call` would; only the response
    /// shaping differs, and that stays in the HTTP adapter.
    pub async fn rest_call(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<RestOutcome, RestError> {
        let mut trace = CallTrace::new();
        let outcome = self
            .invoke_tool(tool_name, arguments, ctx, &mut trace)
            .await;

        let (status, response_payload, error_message) = match &outcome {
            Ok(result) => (200, Some(result.clone()), None),
            Err(e) => (e.http_status(), None, Some(e.to_string())),
        };
        self.record(ctx, &trace, status, response_payload, error_message);

        let elapsed_ms = trace.started.elapsed().as_millis() as u64;
        match outcome {
            Ok(payload) => Ok(RestOutcome {
                request_id: trace.request_id,
                payload,
                elapsed_ms,
            }),
            Err(error) => Err(RestError {
                request_id: trace.request_id,
                error,
            }),
        }
    }

    async fn route(
        &self,
        raw: RawEnvelope,
        ctx: &CallContext,
        trace: &mut CallTrace,
    ) -> Result<Value, GatewayError> {
        match raw.jsonrpc.as_deref() {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(GatewayError::InvalidRequest {
                    details: format!("Unsupported JSON-RPC version '{other}'"),
                });
            }
            None => {
                return Err(GatewayError::InvalidRequest {
                    details: "Missing 'jsonrpc' version field".to_string(),
                });
            }
        }
        let method = raw.method.as_deref().ok_or_else(|| GatewayError::InvalidRequest {
            details: "Missing 'method' field".to_string(),
        })?;

        info!(
            request_id = %trace.request_id,
            %method,
            transport = %ctx.transport,
            "Dispatching request"
        );

        match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVICE_NAME, "version": SERVICE_VERSION },
            })),
            "tools/list" => Ok(self.registry.mcp_tool_list()),
            "ping" => Ok(json!({})),
            "tools/call" => {
                let (tool_name, arguments) = extract_call_params(raw.params)?;
                let upstream_json = self
                    .invoke_tool(&tool_name, arguments, ctx, trace)
                    .await?;
                // MCP content blocks: the upstream JSON travels as
                // pretty-printed text, which is what tool-calling LLM
                // clients render.
                let text = serde_json::to_string_pretty(&upstream_json).map_err(|e| {
                    GatewayError::Internal {
                        details: format!("failed to render tool result: {e}"),
                    }
                })?;
                Ok(json!({ "content": [{ "type": "text", "text": text }] }))
            }
            other => Err(GatewayError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }

    /// Resolve, validate, authenticate, and forward one tool invocation.
    async fn invoke_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
        trace: &mut CallTrace,
    ) -> Result<Value, GatewayError> {
        trace.tool_name = Some(tool_name.to_string());
        trace.request_payload = Some(arguments.clone());

        let tool = self
            .registry
            .lookup(tool_name)
            .ok_or_else(|| GatewayError::ToolNotFound {
                tool: tool_name.to_string(),
            })?;

        let args = match arguments {
            Value::Object(map) => map,
            _ => {
                return Err(GatewayError::InvalidParams {
                    details: "'arguments' must be an object".to_string(),
                });
            }
        };
        // Validation must complete before any upstream traffic: a rejected
        // call never reaches the upstream API.
        let payload = translate_arguments(tool, args, &trace.request_id)?;

        let principal = ctx
            .principal
            .get_or_try_init(|| self.resolver.resolve(ctx.api_key.as_deref(), ctx.transport))
            .await?;

        let result = self
            .upstream
            .invoke(
                principal.environment(),
                tool.endpoint,
                &Value::Object(payload),
                ctx.api_key.as_deref(),
            )
            .await?;

        info!(
            request_id = %trace.request_id,
            tool = tool_name,
            credential_id = principal.credential_id(),
            environment = %principal.environment(),
            "Tool call forwarded"
        );
        Ok(result)
    }

    fn record(
        &self,
        ctx: &CallContext,
        trace: &CallTrace,
        status_code: u16,
        response_payload: Option<Value>,
        error_message: Option<String>,
    ) {
        let credential_id = ctx
            .principal
            .get()
            .map(|p| p.credential_id().to_string())
            .unwrap_or_else(|| "unresolved".to_string());
        self.usage.record(UsageRecord {
            request_id: trace.request_id.clone(),
            credential_id,
            tool_name: trace.tool_name.clone(),
            request_payload: trace.request_payload.clone(),
            response_payload,
            status_code,
            processing_time_ms: trace.started.elapsed().as_millis() as u64,
            error_message,
            transport: ctx.transport.as_str(),
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Pull `name` and `arguments` out of `tools/call` params.
fn extract_call_params(params: Option<Value>) -> Result<(String, Value), GatewayError> {
    let params = params.ok_or_else(|| GatewayError::InvalidParams {
        details: "Missing 'params' for tools/call".to_string(),
    })?;
    let Value::Object(mut map) = params else {
        return Err(GatewayError::InvalidParams {
            details: "'params' must be an object".to_string(),
        });
    };
    let name = match map.remove("name") {
        Some(Value::String(name)) => name,
        Some(_) => {
            return Err(GatewayError::InvalidParams {
                details: "'params.name' must be a string".to_string(),
            });
        }
        None => {
            return Err(GatewayError::InvalidParams {
                details: "Missing 'params.name'".to_string(),
            });
        }
    };
    let arguments = map
        .remove("arguments")
        .ok_or_else(|| GatewayError::InvalidParams {
            details: "Missing 'params.arguments'".to_string(),
        })?;
    Ok((name, arguments))
}

/// Translate caller arguments into the upstream payload for `tool`.
///
/// Applies the tool's deprecated aliases, checks required fields, and
/// enforces enumerated values. Unknown extra fields pass through untouched;
/// the upstream API is the authority on what it ignores.
fn translate_arguments(
    tool: &ToolDescriptor,
    mut args: Map<String, Value>,
    request_id: &str,
) -> Result<Map<String, Value>, GatewayError> {
    for alias in tool.aliases {
        if let Some(value) = args.remove(alias.from) {
            if args.contains_key(alias.to) {
                // The canonical field wins; the alias value is dropped.
                warn!(
                    %request_id,
                    tool = tool.name,
                    alias = alias.from,
                    canonical = alias.to,
                    "Deprecated alias ignored: canonical field also present"
                );
                continue;
            }
            warn!(
                %request_id,
                tool = tool.name,
                alias = alias.from,
                canonical = alias.to,
                "Deprecated field alias translated"
            );
            let value = if alias.join_array {
                join_if_array(value)
            } else {
                value
            };
            args.insert(alias.to.to_string(), value);
        }
    }

    let missing: Vec<&str> = tool
        .required_fields()
        .filter(|name| !args.get(*name).is_some_and(|v| !v.is_null()))
        .collect();
    if !missing.is_empty() {
        return Err(GatewayError::InvalidParams {
            details: format!("Missing required field(s): {}", missing.join(", ")),
        });
    }

    for field in tool.fields {
        let Some(allowed) = field.allowed_values else {
            continue;
        };
        if let Some(value) = args.get(field.name) {
            let ok = value.as_str().is_some_and(|s| allowed.contains(&s));
            if !ok {
                return Err(GatewayError::InvalidParams {
                    details: format!(
                        "Field '{}' must be one of: {}",
                        field.name,
                        allowed.join(", ")
                    ),
                });
            }
        }
    }

    Ok(args)
}

fn join_if_array(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            Value::String(joined)
        }
        other => other,
    }
}

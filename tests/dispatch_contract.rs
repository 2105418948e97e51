//! Dispatch core contract tests: envelope validation, method routing,
//! argument translation, credential handling, and usage recording, all
//! against stubbed collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use medigate::auth::{
    CredentialResolver, CredentialValidator, CredentialVerdict, Transport,
};
use medigate::dispatch::{CallContext, Dispatcher};
use medigate::error::GatewayError;
use medigate::registry::ToolRegistry;
use medigate::transport::jsonrpc::{JsonRpcId, parse_envelope};
use medigate::upstream::{Environment, UpstreamInvoker};
use medigate::usage::{UsageRecord, UsageSink};

/// Upstream stub that records every invocation and returns a canned body.
#[derive(Default)]
struct StubUpstream {
    calls: Mutex<Vec<(Environment, String, Value)>>,
    response: Mutex<Option<Result<Value, GatewayError>>>,
}

impl StubUpstream {
    fn returning(value: Value) -> Arc<Self> {
        let stub = Self::default();
        *stub.response.lock().unwrap() = Some(Ok(value));
        Arc::new(stub)
    }

    fn failing(error: GatewayError) -> Arc<Self> {
        let stub = Self::default();
        *stub.response.lock().unwrap() = Some(Err(error));
        Arc::new(stub)
    }

    fn calls(&self) -> Vec<(Environment, String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamInvoker for StubUpstream {
    async fn invoke(
        &self,
        environment: Environment,
        endpoint: &str,
        payload: &Value,
        _api_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push((environment, endpoint.to_string(), payload.clone()));
        self.response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(json!({})))
    }
}

struct StubValidator(Result<CredentialVerdict, GatewayError>);

#[async_trait]
impl CredentialValidator for StubValidator {
    async fn validate(&self, _api_key: &str) -> Result<CredentialVerdict, GatewayError> {
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<UsageRecord>>);

impl RecordingSink {
    fn records(&self) -> Vec<UsageRecord> {
        self.0.lock().unwrap().clone()
    }
}

impl UsageSink for RecordingSink {
    fn record(&self, record: UsageRecord) {
        self.0.lock().unwrap().push(record);
    }
}

fn production_verdict() -> CredentialVerdict {
    CredentialVerdict {
        valid: true,
        principal_id: Some("org-7".into()),
        environment: Some(Environment::Production),
        reason: None,
    }
}

struct Harness {
    dispatcher: Dispatcher,
    upstream: Arc<StubUpstream>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(upstream: Arc<StubUpstream>) -> Self {
        Self::with_verdict(upstream, Ok(production_verdict()))
    }

    fn with_verdict(
        upstream: Arc<StubUpstream>,
        verdict: Result<CredentialVerdict, GatewayError>,
    ) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Dispatcher::new(
            ToolRegistry::new(),
            upstream.clone(),
            CredentialResolver::new(Arc::new(StubValidator(verdict)), false, Environment::Sandbox),
            sink.clone(),
        );
        Self {
            dispatcher,
            upstream,
            sink,
        }
    }

    async fn send(&self, body: &str) -> Option<Value> {
        let ctx = CallContext::new(Transport::Http, Some("test-key".into()));
        let envelope = parse_envelope(body.as_bytes()).unwrap();
        self.dispatcher
            .dispatch(envelope, &ctx)
            .await
            .map(|r| serde_json::to_value(r).unwrap())
    }
}

#[tokio::test]
async fn initialize_reports_protocol_and_server_info() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
        .await
        .unwrap();
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(reply["result"]["serverInfo"]["name"], "medigate");
    assert!(reply["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn tools_list_exposes_full_catalog() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":"list-1","method":"tools/list"}"#)
        .await
        .unwrap();
    assert_eq!(reply["id"], "list-1");
    let tools = reply["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 5);
    assert!(tools.iter().any(|t| t["name"] == "calculate_raf"));
}

#[tokio::test]
async fn ping_returns_empty_object() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn tool_call_result_is_pretty_printed_text_content() {
    let harness = Harness::new(StubUpstream::returning(json!({"raf": {"final": 1.23}})));
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"calculate_raf","arguments":{"demographics":"M 67","illnesses":"DM2, CHF","model":"V28"}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(reply["id"], 7);
    let content = &reply["result"]["content"][0];
    assert_eq!(content["type"], "text");
    assert_eq!(
        content["text"],
        "{\n  \"raf\": {\n    \"final\": 1.23\n  }\n}"
    );

    let calls = harness.upstream.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, Environment::Production);
    assert_eq!(calls[0].1, "/raf/calculate");
    assert_eq!(calls[0].2["model"], "V28");
}

#[tokio::test]
async fn deprecated_aliases_translate_before_forwarding() {
    let harness = Harness::new(StubUpstream::returning(json!({"ok": true})));
    harness
        .send(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"validate_codes","arguments":{"patient_chart":"chart","codes":["E11.9","I10"]}}}"#,
        )
        .await
        .unwrap();
    let calls = harness.upstream.calls();
    assert_eq!(calls[0].2["human_coded_output"], "E11.9, I10");
    assert!(calls[0].2.get("codes").is_none());
}

#[tokio::test]
async fn invalid_version_is_rejected_with_id_echoed() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(r#"{"jsonrpc":"1.0","id":5,"method":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(reply["id"], 5);
    assert_eq!(reply["error"]["code"], -32600);
    assert!(reply.get("result").is_none());
}

#[tokio::test]
async fn unknown_method_is_32601() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":6,"method":"resources/list"}"#)
        .await
        .unwrap();
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(reply["error"]["data"]["error_type"], "method_not_found");
}

#[tokio::test]
async fn unknown_tool_is_32601() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"bogus_tool","arguments":{}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(reply["error"]["data"]["details"]["tool"], "bogus_tool");
    assert!(harness.upstream.calls().is_empty());
}

#[tokio::test]
async fn validation_failure_never_reaches_upstream() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"calculate_raf","arguments":{"demographics":"F 70"}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(reply["error"]["code"], -32602);
    assert!(harness.upstream.calls().is_empty());

    let records = harness.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code, 400);
    assert_eq!(records[0].tool_name.as_deref(), Some("calculate_raf"));
}

#[tokio::test]
async fn upstream_error_preserves_upstream_message() {
    let harness = Harness::new(StubUpstream::failing(GatewayError::UpstreamStatus {
        status: 503,
        body: "model overloaded".into(),
    }));
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","id":10,"method":"tools/call","params":{"name":"parse_eob","arguments":{"content":"EOB"}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(reply["error"]["code"], -32603);
    assert_eq!(
        reply["error"]["data"]["details"]["upstream_message"],
        "model overloaded"
    );

    let records = harness.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status_code, 503);
}

#[tokio::test]
async fn rejected_credential_is_internal_error_class() {
    let rejected = CredentialVerdict {
        valid: false,
        principal_id: None,
        environment: None,
        reason: Some("revoked".into()),
    };
    let harness =
        Harness::with_verdict(StubUpstream::returning(json!({})), Ok(rejected));
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","id":11,"method":"tools/call","params":{"name":"parse_eob","arguments":{"content":"EOB"}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(reply["error"]["code"], -32603);
    assert_eq!(reply["error"]["data"]["error_type"], "invalid_credential");
    assert!(harness.upstream.calls().is_empty());
    assert_eq!(harness.sink.records()[0].status_code, 401);
}

#[tokio::test]
async fn validator_outage_is_not_a_credential_rejection() {
    let outage = Err(GatewayError::ValidatorUnavailable {
        reason: "connection refused".into(),
    });
    let harness = Harness::with_verdict(StubUpstream::returning(json!({})), outage);
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","id":12,"method":"tools/call","params":{"name":"parse_eob","arguments":{"content":"EOB"}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(
        reply["error"]["data"]["error_type"],
        "validator_unavailable"
    );
    assert!(harness.upstream.calls().is_empty());
}

#[tokio::test]
async fn sandbox_credential_routes_to_sandbox() {
    let verdict = CredentialVerdict {
        valid: true,
        principal_id: Some("org-sbx".into()),
        environment: Some(Environment::Sandbox),
        reason: None,
    };
    let upstream = StubUpstream::returning(json!({}));
    let harness = Harness::with_verdict(upstream.clone(), Ok(verdict));
    harness
        .send(
            r#"{"jsonrpc":"2.0","id":13,"method":"tools/call","params":{"name":"process_chart","arguments":{"text":"chart"}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(upstream.calls()[0].0, Environment::Sandbox);
}

#[tokio::test]
async fn notification_runs_but_gets_no_reply() {
    let harness = Harness::new(StubUpstream::returning(json!({"ok": true})));
    let reply = harness
        .send(
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"parse_eob","arguments":{"content":"EOB"}}}"#,
        )
        .await;
    assert!(reply.is_none());
    assert_eq!(harness.upstream.calls().len(), 1);
    assert_eq!(harness.sink.records().len(), 1);
}

#[tokio::test]
async fn explicit_null_id_gets_null_id_reply() {
    let harness = Harness::new(StubUpstream::returning(json!({})));
    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(reply["id"], Value::Null);
    assert!(reply["result"].is_object());
}

#[tokio::test]
async fn every_call_emits_exactly_one_usage_record() {
    let harness = Harness::new(StubUpstream::returning(json!({"ok": true})));
    let bodies = [
        r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
        r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        r#"{"jsonrpc":"2.0","id":3,"method":"nope"}"#,
        r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"parse_eob","arguments":{"content":"x"}}}"#,
        r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"parse_eob","arguments":{}}}"#,
    ];
    for body in bodies {
        harness.send(body).await;
    }
    let records = harness.sink.records();
    assert_eq!(records.len(), bodies.len());
    let ids: std::collections::HashSet<_> =
        records.iter().map(|r| r.request_id.clone()).collect();
    assert_eq!(ids.len(), bodies.len());
    assert_eq!(records[3].status_code, 200);
    assert_eq!(records[4].status_code, 400);
}

#[tokio::test]
async fn concurrent_calls_correlate_by_id() {
    let harness = Arc::new(Harness::new(StubUpstream::returning(json!({"ok": true}))));
    let mut handles = Vec::new();
    for n in 0..16i64 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let body = format!(
                r#"{{"jsonrpc":"2.0","id":{n},"method":"tools/call","params":{{"name":"parse_eob","arguments":{{"content":"doc-{n}"}}}}}}"#
            );
            (n, harness.send(&body).await.unwrap())
        }));
    }
    for handle in handles {
        let (n, reply) = handle.await.unwrap();
        assert_eq!(reply["id"], json!(n));
        assert!(reply["result"]["content"][0]["text"].is_string());
    }
    assert_eq!(harness.sink.records().len(), 16);
}

#[tokio::test]
async fn principal_is_cached_per_context() {
    struct CountingValidator(Mutex<u32>);

    #[async_trait]
    impl CredentialValidator for CountingValidator {
        async fn validate(&self, _api_key: &str) -> Result<CredentialVerdict, GatewayError> {
            *self.0.lock().unwrap() += 1;
            Ok(production_verdict())
        }
    }

    let validator = Arc::new(CountingValidator(Mutex::new(0)));
    let dispatcher = Dispatcher::new(
        ToolRegistry::new(),
        StubUpstream::returning(json!({})),
        CredentialResolver::new(validator.clone(), false, Environment::Sandbox),
        Arc::new(RecordingSink::default()),
    );

    let ctx = CallContext::new(Transport::WebSocket, Some("key".into()));
    for n in 0..3 {
        let body = format!(
            r#"{{"jsonrpc":"2.0","id":{n},"method":"tools/call","params":{{"name":"parse_eob","arguments":{{"content":"x"}}}}}}"#
        );
        let envelope = parse_envelope(body.as_bytes()).unwrap();
        dispatcher.dispatch(envelope, &ctx).await.unwrap();
    }
    assert_eq!(*validator.0.lock().unwrap(), 1);
}

#[tokio::test]
async fn repeated_call_with_same_id_is_byte_identical() {
    let harness = Harness::new(StubUpstream::returning(json!({"raf": {"final": 1.23}})));
    let body = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"calculate_raf","arguments":{"demographics":"M 67","illnesses":"DM2, CHF","model":"V28"}}}"#;

    let first = harness.send(body).await.unwrap();
    let second = harness.send(body).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(harness.upstream.calls().len(), 2);
}

#[tokio::test]
async fn id_type_round_trips_through_dispatch() {
    let harness = Harness::new(StubUpstream::returning(json!({})));

    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":42,"method":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(reply["id"], json!(42));

    let reply = harness
        .send(r#"{"jsonrpc":"2.0","id":"abc-123","method":"ping"}"#)
        .await
        .unwrap();
    assert_eq!(reply["id"], json!("abc-123"));
}

#[test]
fn envelope_id_variants_parse_distinctly() {
    let with_id = parse_envelope(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
    assert_eq!(with_id.id, Some(JsonRpcId::Number(1)));
    let notification = parse_envelope(br#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
    assert_eq!(notification.id, None);
    let null_id = parse_envelope(br#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).unwrap();
    assert_eq!(null_id.id, Some(JsonRpcId::Null));
}

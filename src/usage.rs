//! Usage recording.
//!
//! Every dispatched call produces exactly one [`UsageRecord`] at its
//! terminal state, success or failure. Recording is fire-and-forget: the
//! caller's response is never delayed or failed by the usage pipeline, so a
//! sink failure is logged and dropped rather than propagated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// One call's worth of accounting data.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// Gateway-assigned request id
    pub request_id: String,
    /// Credential the call ran as (`"anonymous"` when none)
    pub credential_id: String,
    /// Tool invoked, when the call got far enough to name one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Arguments as received, before alias translation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<Value>,
    /// Upstream response, on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<Value>,
    /// HTTP-style status classifying the outcome
    pub status_code: u16,
    /// Wall-clock processing time in milliseconds
    pub processing_time_ms: u64,
    /// Error description, on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Transport the call arrived through
    pub transport: &'static str,
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
}

/// Destination for usage records.
pub trait UsageSink: Send + Sync {
    /// Accept one record. Must not block the caller; failures are the
    /// sink's problem to log.
    fn record(&self, record: UsageRecord);
}

/// Posts records to an external usage-tracking endpoint.
///
/// Each record is shipped from a spawned task; delivery failure is logged
/// at warn and the record is dropped.
pub struct HttpUsageSink {
    client: reqwest::Client,
    usage_url: String,
}

impl HttpUsageSink {
    pub fn new(client: reqwest::Client, usage_url: String) -> Self {
        Self { client, usage_url }
    }
}

impl UsageSink for HttpUsageSink {
    fn record(&self, record: UsageRecord) {
        let client = self.client.clone();
        let url = self.usage_url.clone();
        tokio::spawn(async move {
            let request_id = record.request_id.clone();
            match client.post(&url).json(&record).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(
                        %request_id,
                        status = response.status().as_u16(),
                        "Usage endpoint rejected record"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%request_id, error = %e, "Failed to deliver usage record");
                }
            }
        });
    }
}

/// Emits records as structured log events. Used when no usage endpoint is
/// configured, so accounting data still lands somewhere greppable.
#[derive(Debug, Default)]
pub struct LogUsageSink;

impl UsageSink for LogUsageSink {
    fn record(&self, record: UsageRecord) {
        debug!(
            request_id = %record.request_id,
            credential_id = %record.credential_id,
            tool = record.tool_name.as_deref().unwrap_or("-"),
            status = record.status_code,
            elapsed_ms = record.processing_time_ms,
            transport = record.transport,
            error = record.error_message.as_deref().unwrap_or("-"),
            "usage"
        );
    }
}

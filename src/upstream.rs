//! Upstream API client.
//!
//! Resolves the per-call environment to a base URL, performs exactly one
//! POST per invocation, and classifies failures into typed errors. There is
//! no automatic retry: a duplicate forward could duplicate upstream side
//! effects, and retry policy belongs to the caller.
//!
//! The request timeout is a deliberate hardening choice: the system this
//! gateway replaces had none, which let a stalled upstream pin a caller
//! indefinitely. A bounded wait surfaces as `UpstreamTimeout`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Upstream routing axis: which base URL and dataset a call targets.
///
/// The environment comes from the caller's credential (or from the
/// configured anonymous default) and is consulted on every call, since
/// concurrent calls may target different environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live dataset
    Production,
    /// Isolated evaluation dataset
    Sandbox,
}

impl Environment {
    /// Stable lowercase name, used in logs and usage records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "sandbox" => Ok(Environment::Sandbox),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL for the production environment
    pub production_base_url: String,
    /// Base URL for the sandbox environment
    pub sandbox_base_url: String,
    /// Request timeout (connection + response)
    pub timeout: Duration,
    /// Connection timeout (TCP + TLS handshake)
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            production_base_url: "https://api.medikode.ai".to_string(),
            sandbox_base_url: "https://sandbox-api.medikode.ai".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl UpstreamConfig {
    /// Base URL for the given environment.
    pub fn base_url(&self, environment: Environment) -> &str {
        match environment {
            Environment::Production => &self.production_base_url,
            Environment::Sandbox => &self.sandbox_base_url,
        }
    }
}

/// Abstraction over the upstream call, so tests can stub the collaborator.
#[async_trait]
pub trait UpstreamInvoker: Send + Sync {
    /// Forward `payload` to `endpoint` in `environment`, returning the
    /// parsed JSON body on success.
    async fn invoke(
        &self,
        environment: Environment,
        endpoint: &str,
        payload: &Value,
        api_key: Option<&str>,
    ) -> Result<Value, GatewayError>;
}

/// HTTP client for the upstream medical-coding API.
///
/// `Clone` and shareable across tasks; reqwest pools connections internally.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Build the client from configuration.
    pub fn new(config: UpstreamConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GatewayError::Internal {
                details: format!("failed to build upstream client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn classify(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::UpstreamTimeout {
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else if error.is_connect() {
            GatewayError::UpstreamUnreachable {
                reason: error.to_string(),
            }
        } else {
            GatewayError::Internal {
                details: format!("upstream request failed: {error}"),
            }
        }
    }
}

#[async_trait]
impl UpstreamInvoker for UpstreamClient {
    async fn invoke(
        &self,
        environment: Environment,
        endpoint: &str,
        payload: &Value,
        api_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let url = format!(
            "{}{}",
            self.config.base_url(environment).trim_end_matches('/'),
            endpoint
        );
        debug!(%environment, %url, "Forwarding to upstream");

        let mut request = self.client.post(&url).json(payload);
        if let Some(key) = api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), "Upstream returned error status");
            return Err(GatewayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(|e| GatewayError::Internal {
            details: format!("failed to parse upstream response: {e}"),
        })
    }
}

//! Credential resolution.
//!
//! Every tool invocation runs as a [`Principal`]. On HTTP the API key comes
//! from the `x-api-key` header; on WebSocket from the upgrade request; on
//! stdio from the process environment. Validation is delegated to an
//! external service through the [`CredentialValidator`] seam.
//!
//! When the validator cannot be reached the call fails closed: an
//! unreachable validator is never treated as a valid (or anonymous)
//! credential.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::GatewayError;
use crate::upstream::Environment;

/// The identity a call runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// A validated API key.
    Authenticated {
        /// Stable identifier for the credential, used in usage records
        principal_id: String,
        /// Environment the credential is scoped to
        environment: Environment,
    },
    /// No credential presented, on a surface configured to allow it.
    Anonymous {
        /// Environment anonymous calls run against
        environment: Environment,
    },
}

impl Principal {
    /// Environment this principal's calls target.
    pub fn environment(&self) -> Environment {
        match self {
            Principal::Authenticated { environment, .. } => *environment,
            Principal::Anonymous { environment } => *environment,
        }
    }

    /// Credential identifier for usage records (`"anonymous"` when none).
    pub fn credential_id(&self) -> &str {
        match self {
            Principal::Authenticated { principal_id, .. } => principal_id,
            Principal::Anonymous { .. } => "anonymous",
        }
    }
}

/// Which adapter a call arrived through.
///
/// Determines whether a missing credential may fall back to anonymous
/// access, and is stamped into usage records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// HTTP surfaces (JSON-RPC endpoint and REST convenience routes)
    Http,
    /// WebSocket JSON-RPC
    WebSocket,
    /// stdio JSON-RPC
    Stdio,
}

impl Transport {
    /// Stable lowercase name for logs and usage records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::WebSocket => "websocket",
            Transport::Stdio => "stdio",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict returned by the validation service for a presented key.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialVerdict {
    /// Whether the key is valid
    pub valid: bool,
    /// Identifier for the key's owner, present when valid
    #[serde(default)]
    pub principal_id: Option<String>,
    /// Environment the key is scoped to
    #[serde(default)]
    pub environment: Option<Environment>,
    /// Rejection reason, present when invalid
    #[serde(default)]
    pub reason: Option<String>,
}

/// Validates presented API keys against an external service.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Check `api_key`, returning the service's verdict.
    ///
    /// Transport failures reaching the service are `ValidatorUnavailable`,
    /// which callers must not conflate with a rejection.
    async fn validate(&self, api_key: &str) -> Result<CredentialVerdict, GatewayError>;
}

/// HTTP implementation of [`CredentialValidator`].
#[derive(Clone)]
pub struct HttpCredentialValidator {
    client: reqwest::Client,
    validation_url: String,
}

impl HttpCredentialValidator {
    pub fn new(client: reqwest::Client, validation_url: String) -> Self {
        Self {
            client,
            validation_url,
        }
    }
}

#[async_trait]
impl CredentialValidator for HttpCredentialValidator {
    async fn validate(&self, api_key: &str) -> Result<CredentialVerdict, GatewayError> {
        let response = self
            .client
            .post(&self.validation_url)
            .header("x-api-key", api_key)
            .send()
            .await
            .map_err(|e| GatewayError::ValidatorUnavailable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            // A definitive rejection, not an outage.
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let reason = body["reason"]
                .as_str()
                .unwrap_or("rejected by validation service")
                .to_string();
            return Ok(CredentialVerdict {
                valid: false,
                principal_id: None,
                environment: None,
                reason: Some(reason),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::ValidatorUnavailable {
                reason: format!("validation service returned HTTP {}", status.as_u16()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::ValidatorUnavailable {
                reason: format!("unparseable validation response: {e}"),
            })
    }
}

/// Resolves the per-call [`Principal`] from an optional presented key.
pub struct CredentialResolver {
    validator: std::sync::Arc<dyn CredentialValidator>,
    allow_anonymous: bool,
    anonymous_environment: Environment,
}

impl CredentialResolver {
    pub fn new(
        validator: std::sync::Arc<dyn CredentialValidator>,
        allow_anonymous: bool,
        anonymous_environment: Environment,
    ) -> Self {
        Self {
            validator,
            allow_anonymous,
            anonymous_environment,
        }
    }

    /// Resolve `api_key` to a principal.
    ///
    /// A missing key yields `Anonymous` only on WebSocket and stdio, and
    /// only when anonymous access is enabled; the HTTP surfaces always
    /// require a key. A presented key is always validated, even where
    /// anonymous access would have been allowed.
    pub async fn resolve(
        &self,
        api_key: Option<&str>,
        transport: Transport,
    ) -> Result<Principal, GatewayError> {
        let key = match api_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                let local_transport = matches!(transport, Transport::WebSocket | Transport::Stdio);
                if self.allow_anonymous && local_transport {
                    warn!(%transport, "No API key presented, proceeding anonymously");
                    return Ok(Principal::Anonymous {
                        environment: self.anonymous_environment,
                    });
                }
                return Err(GatewayError::MissingCredential);
            }
        };

        let verdict = self.validator.validate(key).await?;
        if !verdict.valid {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "rejected by validation service".to_string());
            warn!(%transport, %reason, "API key rejected");
            return Err(GatewayError::InvalidCredential { reason });
        }

        Ok(Principal::Authenticated {
            principal_id: verdict
                .principal_id
                .unwrap_or_else(|| "unknown".to_string()),
            environment: verdict.environment.unwrap_or(Environment::Production),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedValidator(Result<CredentialVerdict, GatewayError>);

    #[async_trait]
    impl CredentialValidator for FixedValidator {
        async fn validate(&self, _api_key: &str) -> Result<CredentialVerdict, GatewayError> {
            self.0.clone()
        }
    }

    fn resolver(
        verdict: Result<CredentialVerdict, GatewayError>,
        allow_anonymous: bool,
    ) -> CredentialResolver {
        CredentialResolver::new(
            Arc::new(FixedValidator(verdict)),
            allow_anonymous,
            Environment::Sandbox,
        )
    }

    fn valid_verdict() -> CredentialVerdict {
        CredentialVerdict {
            valid: true,
            principal_id: Some("org-42".into()),
            environment: Some(Environment::Production),
            reason: None,
        }
    }

    #[tokio::test]
    async fn valid_key_yields_authenticated_principal() {
        let principal = resolver(Ok(valid_verdict()), false)
            .resolve(Some("key"), Transport::Http)
            .await
            .unwrap();
        assert_eq!(principal.credential_id(), "org-42");
        assert_eq!(principal.environment(), Environment::Production);
    }

    #[tokio::test]
    async fn missing_key_on_http_always_fails() {
        let err = resolver(Ok(valid_verdict()), true)
            .resolve(None, Transport::Http)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::MissingCredential);
    }

    #[tokio::test]
    async fn missing_key_on_stdio_falls_back_when_enabled() {
        let principal = resolver(Ok(valid_verdict()), true)
            .resolve(None, Transport::Stdio)
            .await
            .unwrap();
        assert_eq!(
            principal,
            Principal::Anonymous {
                environment: Environment::Sandbox
            }
        );
    }

    #[tokio::test]
    async fn missing_key_on_websocket_fails_when_anonymous_disabled() {
        let err = resolver(Ok(valid_verdict()), false)
            .resolve(None, Transport::WebSocket)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::MissingCredential);
    }

    #[tokio::test]
    async fn presented_key_is_validated_even_when_anonymous_allowed() {
        let rejected = CredentialVerdict {
            valid: false,
            principal_id: None,
            environment: None,
            reason: Some("revoked".into()),
        };
        let err = resolver(Ok(rejected), true)
            .resolve(Some("stale-key"), Transport::Stdio)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential { .. }));
    }

    #[tokio::test]
    async fn validator_outage_is_not_a_rejection() {
        let outage = Err(GatewayError::ValidatorUnavailable {
            reason: "connection refused".into(),
        });
        let err = resolver(outage, true)
            .resolve(Some("key"), Transport::WebSocket)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ValidatorUnavailable { .. }));
    }
}

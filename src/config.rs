//! Gateway configuration.
//!
//! Everything is settable from the environment (`MEDIGATE_*`) with
//! conservative defaults, so a bare `medigate` starts against the
//! production upstream and requires credentials everywhere.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::GatewayError;
use crate::upstream::{Environment, UpstreamConfig};

/// Default upstream request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default WebSocket keepalive ping interval in seconds.
pub const DEFAULT_WS_PING_INTERVAL_SECS: u64 = 30;

/// Maximum accepted request body, in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket server binds to
    pub listen_addr: SocketAddr,
    /// Production upstream base URL
    pub production_base_url: String,
    /// Sandbox upstream base URL
    pub sandbox_base_url: String,
    /// Credential-validation endpoint
    pub validation_url: String,
    /// Usage-tracking endpoint; records go to the log when unset
    pub usage_url: Option<String>,
    /// Upstream request timeout
    pub request_timeout: Duration,
    /// Upstream connection timeout
    pub connect_timeout: Duration,
    /// Allow key-less calls on WebSocket and stdio
    pub allow_anonymous: bool,
    /// Environment anonymous calls run against
    pub anonymous_environment: Environment,
    /// WebSocket keepalive ping interval
    pub ws_ping_interval: Duration,
    /// Maximum accepted request body size
    pub max_body_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let upstream = UpstreamConfig::default();
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            validation_url: format!("{}/auth/validate", upstream.production_base_url),
            production_base_url: upstream.production_base_url,
            sandbox_base_url: upstream.sandbox_base_url,
            usage_url: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(5),
            allow_anonymous: false,
            anonymous_environment: Environment::Sandbox,
            ws_ping_interval: Duration::from_secs(DEFAULT_WS_PING_INTERVAL_SECS),
            max_body_size: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Build configuration from `MEDIGATE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, GatewayError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("MEDIGATE_LISTEN_ADDR") {
            config.listen_addr = addr.parse().map_err(|e| GatewayError::Internal {
                details: format!("invalid MEDIGATE_LISTEN_ADDR '{addr}': {e}"),
            })?;
        }
        if let Ok(url) = std::env::var("MEDIGATE_PRODUCTION_URL") {
            config.production_base_url = url;
        }
        if let Ok(url) = std::env::var("MEDIGATE_SANDBOX_URL") {
            config.sandbox_base_url = url;
        }
        if let Ok(url) = std::env::var("MEDIGATE_VALIDATION_URL") {
            config.validation_url = url;
        } else {
            config.validation_url = format!("{}/auth/validate", config.production_base_url);
        }
        if let Ok(url) = std::env::var("MEDIGATE_USAGE_URL") {
            if !url.is_empty() {
                config.usage_url = Some(url);
            }
        }
        if let Ok(secs) = std::env::var("MEDIGATE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_u64("MEDIGATE_REQUEST_TIMEOUT_SECS", &secs)?);
        }
        if let Ok(secs) = std::env::var("MEDIGATE_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(parse_u64("MEDIGATE_CONNECT_TIMEOUT_SECS", &secs)?);
        }
        if let Ok(flag) = std::env::var("MEDIGATE_ALLOW_ANONYMOUS") {
            config.allow_anonymous = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(env) = std::env::var("MEDIGATE_ANONYMOUS_ENVIRONMENT") {
            config.anonymous_environment =
                env.parse().map_err(|e| GatewayError::Internal {
                    details: format!("invalid MEDIGATE_ANONYMOUS_ENVIRONMENT: {e}"),
                })?;
        }
        if let Ok(secs) = std::env::var("MEDIGATE_WS_PING_INTERVAL_SECS") {
            config.ws_ping_interval = Duration::from_secs(parse_u64("MEDIGATE_WS_PING_INTERVAL_SECS", &secs)?);
        }
        if let Ok(bytes) = std::env::var("MEDIGATE_MAX_BODY_BYTES") {
            config.max_body_size = parse_u64("MEDIGATE_MAX_BODY_BYTES", &bytes)? as usize;
        }

        Ok(config)
    }

    /// The upstream client configuration slice of this config.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            production_base_url: self.production_base_url.clone(),
            sandbox_base_url: self.sandbox_base_url.clone(),
            timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, GatewayError> {
    value.parse().map_err(|e| GatewayError::Internal {
        details: format!("invalid {name} '{value}': {e}"),
    })
}

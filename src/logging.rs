//! Tracing setup and the HTTP trace layer.

use axum::http::Request;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnResponse, MakeSpan, TraceLayer};
use tracing::{Level, Span};
use tracing_subscriber::EnvFilter;

use crate::transport::jsonrpc::next_request_id;

/// Initialize the global subscriber.
///
/// `RUST_LOG` overrides the default filter. In stdio mode everything goes
/// to stderr, since stdout is the protocol stream.
pub fn init(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("medigate=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if to_stderr {
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}

/// Span factory for HTTP requests.
///
/// Honors an inbound `x-request-id` so the gateway's logs line up with the
/// caller's; otherwise mints one. The API key header is never logged.
#[derive(Clone, Debug)]
pub struct GatewayMakeSpan;

impl<B> MakeSpan<B> for GatewayMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| next_request_id().to_string());
        tracing::info_span!(
            "http",
            method = %request.method(),
            path = %request.uri().path(),
            %request_id,
        )
    }
}

/// The trace layer applied to the HTTP router.
pub fn trace_layer()
-> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, GatewayMakeSpan, (), DefaultOnResponse> {
    TraceLayer::new_for_http()
        .make_span_with(GatewayMakeSpan)
        .on_request(())
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}

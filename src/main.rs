use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{error, info};

use medigate::auth::{CredentialResolver, HttpCredentialValidator};
use medigate::config::GatewayConfig;
use medigate::dispatch::{Dispatcher, SERVICE_VERSION};
use medigate::registry::ToolRegistry;
use medigate::transport::{AppState, http, stdio};
use medigate::upstream::UpstreamClient;
use medigate::usage::{HttpUsageSink, LogUsageSink, UsageSink};
use medigate::logging;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[command(
    name = "medigate",
    version,
    about = "MCP gateway for the Medikode medical-coding API"
)]
struct Cli {
    /// Serve JSON-RPC over stdin/stdout instead of binding a socket
    #[arg(long)]
    stdio: bool,

    /// Address to bind the HTTP server to
    #[arg(long, env = "MEDIGATE_LISTEN_ADDR")]
    listen_addr: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // In stdio mode stdout is the protocol stream; logs must not touch it.
    logging::init(cli.stdio);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Gateway exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = GatewayConfig::from_env()?;
    if let Some(addr) = cli.listen_addr {
        config.listen_addr = addr;
    }

    let dispatcher = build_dispatcher(&config)?;

    if cli.stdio {
        info!(version = SERVICE_VERSION, "Starting stdio session");
        stdio::serve(Arc::new(dispatcher)).await?;
        return Ok(());
    }

    let state = Arc::new(AppState {
        dispatcher,
        registry: ToolRegistry::new(),
        ws_ping_interval: config.ws_ping_interval,
        max_body_size: config.max_body_size,
    });
    let router = http::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(
        addr = %config.listen_addr,
        version = SERVICE_VERSION,
        "Gateway listening"
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Gateway shut down");
    Ok(())
}

fn build_dispatcher(config: &GatewayConfig) -> Result<Dispatcher, Box<dyn std::error::Error>> {
    // Control-plane client: credential validation and usage delivery share
    // it; it is separate from the upstream data-plane client so its
    // timeouts stay short.
    let control_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .connect_timeout(config.connect_timeout)
        .build()?;

    let validator = HttpCredentialValidator::new(
        control_client.clone(),
        config.validation_url.clone(),
    );
    let resolver = CredentialResolver::new(
        Arc::new(validator),
        config.allow_anonymous,
        config.anonymous_environment,
    );

    let usage: Arc<dyn UsageSink> = match &config.usage_url {
        Some(url) => Arc::new(HttpUsageSink::new(control_client, url.clone())),
        None => Arc::new(LogUsageSink),
    };

    let upstream = UpstreamClient::new(config.upstream_config())?;

    Ok(Dispatcher::new(
        ToolRegistry::new(),
        Arc::new(upstream),
        resolver,
        usage,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

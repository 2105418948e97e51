//! stdio adapter.
//!
//! Newline-delimited JSON-RPC: one envelope per input line, one response
//! per output line, strictly in order. The session authenticates once from
//! `MEDIGATE_API_KEY`; diagnostics go to stderr so stdout stays a clean
//! protocol stream.
//!
//! The loop is generic over reader/writer so tests drive it through
//! in-memory duplex pipes.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::info;

use super::jsonrpc::{JsonRpcResponse, next_request_id, parse_envelope};
use crate::auth::Transport;
use crate::dispatch::{CallContext, Dispatcher};

/// Environment variable the stdio session reads its API key from.
pub const API_KEY_ENV: &str = "MEDIGATE_API_KEY";

/// Serve JSON-RPC over the process's stdin/stdout until EOF.
pub async fn serve(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
    run(dispatcher, api_key, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the line loop over arbitrary reader/writer pairs.
pub async fn run<R, W>(
    dispatcher: Arc<Dispatcher>,
    api_key: Option<String>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ctx = CallContext::new(Transport::Stdio, api_key);
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match parse_envelope(line.as_bytes()) {
            Ok(envelope) => dispatcher.dispatch(envelope, &ctx).await,
            Err(e) => Some(JsonRpcResponse::error(
                None,
                e.to_jsonrpc_error(&next_request_id().to_string()),
            )),
        };

        if let Some(reply) = reply {
            let mut wire = serde_json::to_vec(&reply).map_err(std::io::Error::other)?;
            wire.push(b'\n');
            writer.write_all(&wire).await?;
            writer.flush().await?;
        }
    }

    info!("stdio session ended (EOF)");
    Ok(())
}

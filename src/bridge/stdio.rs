//! Line-delimited JSON-RPC over a reader/writer pair, normally stdin/stdout.
//!
//! The whole connection is one session, seeded from `MCP_STDIO_TOKEN`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::Transport;
use crate::error::{AppError, Result};
use crate::mcp::protocol::ServerMessage;
use crate::state::AppState;

use super::attach::attach_stream;
use super::registry::{CHANNEL_CAPACITY, DeliveryHandle, StreamGuard};
use super::resolve::resolve_stream_session;

/// Serves the process's stdin and stdout until stdin closes or the server
/// shuts down.
pub async fn serve_stdio(state: AppState) -> Result<()> {
    serve_lines(state, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// The session the connection currently runs under.
struct StdioSession {
    session_id: String,
    handle: DeliveryHandle,
    _guard: StreamGuard,
}

impl StdioSession {
    /// Resolves a session from the stdio token and attaches a channel whose
    /// messages are forwarded to `output`.
    async fn open(state: &AppState, output: &mpsc::Sender<ServerMessage>) -> Self {
        let ctx = resolve_stream_session(state, None, state.config.stdio_token.as_deref()).await;
        let (guard, mut rx) = attach_stream(state, &ctx.session_id, Transport::Stdio).await;
        tracing::info!("stdio session {} ready (role {})", ctx.session_id, ctx.role);

        let output = output.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if output.send(message).await.is_err() {
                    break;
                }
            }
        });

        Self {
            session_id: ctx.session_id,
            handle: guard.handle().clone(),
            _guard: guard,
        }
    }
}

/// Reads one request per line and writes one message per line.
///
/// Every line renews the session. If it expired anyway, because input was
/// idle for longer than the TTL, a new one is opened before the line is
/// handled.
///
/// Requests run concurrently, so replies may come back out of order. At the
/// end of input, in-flight requests are finished and their replies written
/// before the session is deleted.
pub async fn serve_lines<R, W>(state: AppState, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(CHANNEL_CAPACITY);
    let mut session = StdioSession::open(&state, &out_tx).await;

    let output = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let mut line = message.to_json();
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = reader.lines();
    let mut requests = JoinSet::new();
    loop {
        let line = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        if state.sessions.get(&session.session_id).await.is_none() {
            tracing::warn!("stdio session {} expired, opening a new one", session.session_id);
            session = StdioSession::open(&state, &out_tx).await;
        }

        let server = state.server.clone();
        let handle = session.handle.clone();
        let session_id = session.session_id.clone();
        requests.spawn(async move {
            if let Some(response) = server.handle_raw(&session_id, Transport::Stdio, &line).await {
                if let Err(e) = handle.deliver(ServerMessage::Response(response)).await {
                    tracing::warn!("Reply on stdio dropped: {}", e);
                }
            }
        });
    }

    while requests.join_next().await.is_some() {}
    tracing::info!("stdio input closed, ending session {}", session.session_id);
    state.sessions.delete(&session.session_id).await;
    drop(session);
    drop(out_tx);

    output
        .await
        .map_err(|e| AppError::Internal(format!("stdio writer failed: {}", e)))??;
    Ok(())
}

//! Streamable HTTP transport on a single endpoint.
//!
//! `POST` carries requests, `GET` opens a standalone stream for
//! server-initiated messages and `DELETE` ends the session.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    Extension,
};
use futures::stream::Stream;
use serde_json::Value;

use crate::{
    config::Transport,
    error::AppError,
    mcp::dispatcher::ToolDispatcher,
    mcp::protocol::{JsonRpcRequest, JsonRpcResponse, ServerMessage, parse_request},
    mcp::server::methods,
    state::AppState,
};

use super::attach::{attach, attach_stream};
use super::http::{json_rpc_response, session_header, set_session_header};
use super::registry::StreamGuard;
use super::resolve::{SessionContext, resolve_stream_session};
use super::sse::{channel_stream, message_event};
use super::token::TokenParams;

/// Handles one message.
///
/// The session is registered with the dispatcher again on every call so
/// notifications keep reaching it. When the session already has a live
/// stream, the reply is plain JSON and notifications go to that stream. A
/// `tools/call` without one gets a stream of its own: notifications raised
/// while the tool runs, then the response.
pub async fn post(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    body: String,
) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!("Rejected malformed message from {}: {}", ctx.session_id, error);
            return json_rpc_response(&JsonRpcResponse::failure(Value::Null, error));
        }
    };

    if let Some(handle) = state.deliveries.get(&ctx.session_id).await {
        state.server.register_session(&ctx.session_id, handle).await;
        return respond(&state, &ctx.session_id, request).await;
    }

    if request.method != methods::TOOLS_CALL || request.is_notification() {
        return respond(&state, &ctx.session_id, request).await;
    }

    let (guard, rx) = attach(&state, &ctx.session_id, Transport::Streamable).await;
    let handle = guard.handle().clone();
    let server = state.server.clone();
    let session_id = ctx.session_id.clone();
    tokio::spawn(async move {
        if let Some(response) = server.handle(&session_id, Transport::Streamable, request).await {
            if let Err(e) = handle.deliver(ServerMessage::Response(response)).await {
                tracing::warn!("Response to {} dropped: {}", session_id, e);
            }
        }
    });

    Sse::new(call_stream(guard, rx)).keep_alive(KeepAlive::default()).into_response()
}

async fn respond(state: &AppState, session_id: &str, request: JsonRpcRequest) -> Response {
    match state.server.handle(session_id, Transport::Streamable, request).await {
        Some(response) => json_rpc_response(&response),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Everything the channel carries up to and including the response.
fn call_stream(
    guard: StreamGuard,
    mut rx: tokio::sync::mpsc::Receiver<ServerMessage>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _guard = guard;
        while let Some(message) = rx.recv().await {
            let done = message.response_id().is_some();
            yield Ok(message_event(&message));
            if done {
                break;
            }
        }
    }
}

/// Opens a standalone stream. A live `Mcp-Session-Id` is reattached;
/// otherwise a session is issued from the `mcp_id` token.
pub async fn open(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenParams>,
) -> Response {
    let ctx = resolve_stream_session(&state, session_header(&headers), params.mcp_id.as_deref()).await;
    let (guard, rx) = attach_stream(&state, &ctx.session_id, Transport::Streamable).await;
    tracing::info!("Streamable stream opened for {} (role {})", ctx.session_id, ctx.role);

    let mut response = Sse::new(channel_stream(guard, rx, None))
        .keep_alive(KeepAlive::default())
        .into_response();
    if ctx.issued {
        set_session_header(&mut response, &ctx.session_id);
    }
    response
}

/// Ends the session named by `Mcp-Session-Id`.
pub async fn close(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return AppError::Validation("Mcp-Session-Id header required".to_string()).into_response();
    };

    if state.sessions.delete(session_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        AppError::NotFound(format!("session {}", session_id)).into_response()
    }
}

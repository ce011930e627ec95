//! Event-stream transport: `GET /sse` opens the stream, `POST /message`
//! carries requests whose responses come back on it.

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::Stream;
use serde::Deserialize;

use crate::{
    config::Transport,
    error::AppError,
    mcp::protocol::ServerMessage,
    state::AppState,
};

use super::attach::attach_stream;
use super::http::{session_header, set_session_header};
use super::registry::StreamGuard;
use super::resolve::resolve_stream_session;
use super::token::TokenParams;

/// Where clients post their messages.
pub const MESSAGE_PATH: &str = "/message";
/// Query parameter naming the session on [`MESSAGE_PATH`].
pub const SESSION_PARAM: &str = "sessionId";

/// Query parameters of [`MESSAGE_PATH`].
#[derive(Debug, Deserialize)]
pub struct MessageParams {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// A server message as an SSE `message` event.
pub fn message_event(message: &ServerMessage) -> Event {
    Event::default().event("message").data(message.to_json())
}

/// Streams a channel's messages until the channel closes or is replaced.
/// The guard lives as long as the stream.
pub fn channel_stream(
    guard: StreamGuard,
    mut rx: tokio::sync::mpsc::Receiver<ServerMessage>,
    first: Option<Event>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let closed = guard.handle().cancellation();
    async_stream::stream! {
        let _guard = guard;
        if let Some(event) = first {
            yield Ok(event);
        }
        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => None,
                message = rx.recv() => message,
            };
            let Some(message) = next else { break };
            yield Ok(message_event(&message));
        }
    }
}

/// Opens the event stream.
///
/// The session is resolved once, from the `mcp_id` token, and the first
/// event tells the client where to post its messages.
pub async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenParams>,
) -> Response {
    let ctx = resolve_stream_session(&state, session_header(&headers), params.mcp_id.as_deref()).await;
    let (guard, rx) = attach_stream(&state, &ctx.session_id, Transport::Sse).await;
    tracing::info!("SSE stream opened for {} (role {})", ctx.session_id, ctx.role);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{}?{}={}", MESSAGE_PATH, SESSION_PARAM, ctx.session_id));
    let stream = channel_stream(guard, rx, Some(endpoint));

    let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    set_session_header(&mut response, &ctx.session_id);
    response
}

/// Accepts one message for an open stream. The reply is delivered on the
/// stream; the POST itself only acknowledges with `202 Accepted`.
pub async fn message(
    State(state): State<AppState>,
    Query(params): Query<MessageParams>,
    body: String,
) -> Response {
    let Some(session_id) = params.session_id.filter(|id| !id.is_empty()) else {
        return AppError::Validation(format!("{} is required", SESSION_PARAM)).into_response();
    };

    if state.sessions.get(&session_id).await.is_none() {
        return AppError::SessionExpired.into_response();
    }
    let Some(handle) = state.deliveries.get(&session_id).await else {
        return AppError::NotConnected(session_id).into_response();
    };

    let server = state.server.clone();
    tokio::spawn(async move {
        if let Some(response) = server.handle_raw(&session_id, Transport::Sse, &body).await {
            if let Err(e) = handle.deliver(ServerMessage::Response(response)).await {
                tracing::warn!("Response to {} dropped: {}", session_id, e);
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}

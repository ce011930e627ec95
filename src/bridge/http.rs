use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};

use crate::{
    bridge::resolve::{SessionContext, resolve_request_session},
    bridge::token::TokenParams,
    config::Transport,
    mcp::protocol::JsonRpcResponse,
    state::AppState,
};

/// `Mcp-Session-Id`, in the lowercase form header names are stored in.
pub const SESSION_HEADER_NAME: HeaderName = HeaderName::from_static("mcp-session-id");

/// The session id a caller sent, if any.
pub fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&SESSION_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Tells the caller which session it is on.
pub fn set_session_header(response: &mut Response, session_id: &str) {
    match HeaderValue::from_str(session_id) {
        Ok(value) => {
            response.headers_mut().insert(SESSION_HEADER_NAME, value);
        }
        Err(e) => tracing::error!("Session id {} is not a valid header value: {}", session_id, e),
    }
}

/// A JSON-RPC response as an `application/json` body.
pub fn json_rpc_response(response: &JsonRpcResponse) -> Response {
    match serde_json::to_string(response) {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A middleware that binds every request to a session.
///
/// The session comes from the `Mcp-Session-Id` header or, failing that, the
/// `mcp_id` identity token; a stale header without a token is rejected with
/// 401. A session the caller did not present is returned in the
/// `Mcp-Session-Id` response header.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `params` - The query parameters, for the identity token.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`.
pub async fn resolve_session(
    State(state): State<AppState>,
    Query(params): Query<TokenParams>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let header = session_header(request.headers()).map(str::to_string);

    let ctx = match resolve_request_session(&state, header.as_deref(), params.mcp_id.as_deref()).await {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };
    tracing::debug!("Request bound to session {} (role {})", ctx.session_id, ctx.role);

    let issued = ctx.issued.then(|| ctx.session_id.clone());
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Some(session_id) = issued {
        set_session_header(&mut response, &session_id);
    }
    response
}

/// Handles one JSON-RPC message on the request/response transport.
///
/// Requests are answered in the body; notifications get `202 Accepted`.
pub async fn handle_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<SessionContext>,
    body: String,
) -> Response {
    match state.server.handle_raw(&ctx.session_id, Transport::Http, &body).await {
        Some(response) => json_rpc_response(&response),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_session_headers_are_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_header(&headers), None);
        headers.insert(SESSION_HEADER_NAME, HeaderValue::from_static("  "));
        assert_eq!(session_header(&headers), None);
        headers.insert(SESSION_HEADER_NAME, HeaderValue::from_static("mcp-session-1"));
        assert_eq!(session_header(&headers), Some("mcp-session-1"));
    }
}

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    bridge::http::session_header,
    bridge::resolve::SESSION_COOKIE,
    state::AppState,
};

/// Body of a logout response.
pub const LOGOUT_MESSAGE: &str = "logout success";

/// Handles logout.
///
/// The session is named by the `Mcp-Session-Id` header or the `SESSIONID`
/// cookie. Deleting it drops the session, its identity entry, its open
/// channel and its dispatcher registration. Logging out without a session
/// still succeeds.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap, cookies: Cookies) -> Response {
    let session_id = session_header(&headers)
        .map(str::to_string)
        .or_else(|| cookies.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .filter(|id| !id.is_empty());

    match session_id {
        Some(session_id) => {
            let existed = state.sessions.delete(&session_id).await;
            tracing::info!("Logout for session {} (existed={})", session_id, existed);
        }
        None => tracing::debug!("Logout without a session"),
    }

    if cookies.get(SESSION_COOKIE).is_some() {
        let mut cookie = Cookie::new(SESSION_COOKIE, "");
        cookie.set_max_age(Duration::seconds(0));
        cookie.set_path("/");
        cookies.remove(cookie);
    }

    (StatusCode::OK, LOGOUT_MESSAGE).into_response()
}

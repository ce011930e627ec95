//! Turns what a caller presents (a session id, an identity token, or
//! nothing) into a live session.

use crate::error::{AppError, Result};
use crate::models::identity::Identity;
use crate::models::session::{Role, Session};
use crate::state::AppState;

use super::token::resolve_identity;

/// Cookie the logout endpoint also accepts.
pub const SESSION_COOKIE: &str = "SESSIONID";

/// The session a call runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub role: Role,
    /// The caller did not present this id; it has to be told about it.
    pub issued: bool,
}

impl SessionContext {
    fn from_session(session: &Session, issued: bool) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            role: session.role,
            issued,
        }
    }
}

async fn mint(state: &AppState, identity: Option<&Identity>) -> Session {
    match identity {
        Some(identity) => state.sessions.create_with_role(&identity.name, identity.role()).await,
        None => state.sessions.create("").await,
    }
}

/// Resolves the session of a request/response call.
///
/// A live `header` session is used as is, picking up the token's role if it
/// has none. A stale `header` is only recovered when a valid token comes
/// with it; otherwise the call is rejected with
/// [`AppError::SessionExpired`]. Without a header a session is minted from
/// the token, or an anonymous one when there is no usable token.
pub async fn resolve_request_session(
    state: &AppState,
    header: Option<&str>,
    token: Option<&str>,
) -> Result<SessionContext> {
    let identity = token.and_then(|t| resolve_identity(t, &state.token_key));
    let header = header.map(str::trim).filter(|h| !h.is_empty());

    let Some(session_id) = header else {
        let session = mint(state, identity.as_ref()).await;
        tracing::debug!("No session header, issued {}", session.id);
        return Ok(SessionContext::from_session(&session, true));
    };

    if let Some(session) = state.sessions.get(session_id).await {
        let session = match identity.as_ref().map(Identity::role) {
            Some(role) if role.is_known() => state
                .sessions
                .backfill_role(session_id, role)
                .await
                .unwrap_or(session),
            _ => session,
        };
        tracing::debug!("Session {} resolved from header", session.id);
        return Ok(SessionContext::from_session(&session, false));
    }

    match identity {
        Some(identity) => {
            let session = mint(state, Some(&identity)).await;
            tracing::info!(
                "Session {} expired, re-issued {} for {}",
                session_id,
                session.id,
                identity.name
            );
            Ok(SessionContext::from_session(&session, true))
        }
        None => {
            tracing::warn!("Rejected stale session {}", session_id);
            Err(AppError::SessionExpired)
        }
    }
}

/// Resolves the session of a connection that stays open: an event stream,
/// a standalone streamable GET, or stdio.
///
/// A live `header` session is reattached. Anything else mints a session
/// from the token, or an anonymous one; there is no earlier session to
/// expire, so this never fails.
pub async fn resolve_stream_session(
    state: &AppState,
    header: Option<&str>,
    token: Option<&str>,
) -> SessionContext {
    if let Some(session_id) = header.map(str::trim).filter(|h| !h.is_empty()) {
        if let Some(session) = state.sessions.get(session_id).await {
            tracing::debug!("Stream reattached to session {}", session.id);
            return SessionContext::from_session(&session, false);
        }
        tracing::debug!("Stream header {} is stale, issuing a new session", session_id);
    }

    let identity = token.and_then(|t| resolve_identity(t, &state.token_key));
    let session = mint(state, identity.as_ref()).await;
    tracing::info!(
        "Stream session {} for {}",
        session.id,
        if session.is_anonymous() { "<anonymous>" } else { session.user_id.as_str() }
    );
    SessionContext::from_session(&session, true)
}

use tokio::sync::mpsc;

use crate::config::Transport;
use crate::mcp::protocol::ServerMessage;
use crate::state::AppState;
use crate::tools::session::register_session_tools;

use super::registry::{DeliveryHandle, StreamGuard};

/// Opens a client channel for `session_id` and makes it the session's
/// delivery target, both in the registry and with the dispatcher. A channel
/// it replaces is closed.
///
/// The returned guard detaches the channel again when dropped.
pub async fn attach(
    state: &AppState,
    session_id: &str,
    transport: Transport,
) -> (StreamGuard, mpsc::Receiver<ServerMessage>) {
    let (handle, rx) = DeliveryHandle::channel(transport, &state.shutdown);
    let previous = state
        .deliveries
        .attach(session_id, handle.clone(), &*state.server)
        .await;
    if let Some(previous) = previous {
        tracing::info!(
            "Session {} reconnected over {}, closing its previous channel",
            session_id,
            transport.as_str()
        );
        previous.close();
    }

    let guard = StreamGuard::new(
        state.deliveries.clone(),
        state.server.clone(),
        session_id.to_string(),
        handle,
    );
    (guard, rx)
}

/// [`attach`] for a long-lived stream: the session also gets its own tools.
pub async fn attach_stream(
    state: &AppState,
    session_id: &str,
    transport: Transport,
) -> (StreamGuard, mpsc::Receiver<ServerMessage>) {
    let attached = attach(state, session_id, transport).await;
    register_session_tools(&*state.server, state.sessions.clone(), session_id).await;
    attached
}

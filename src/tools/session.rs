//! Tools registered for one session only.

use serde::Serialize;
use serde_json::json;

use crate::mcp::dispatcher::{ToolDispatcher, tool_handler};
use crate::models::tool::{Tool, ToolResult};
use crate::session::store::SessionStore;

use super::names;

#[derive(Debug, Serialize)]
struct SessionInfo {
    session_id: String,
    user_id: String,
    role: String,
    transport: &'static str,
    expires_at: String,
}

/// Registers `session_info` for `session_id`. It reads the session without
/// renewing it.
pub async fn register_session_tools(dispatcher: &dyn ToolDispatcher, store: SessionStore, session_id: &str) {
    let tool = Tool::new(
        names::SESSION_INFO,
        "Show the session this connection is bound to",
        json!({ "type": "object", "properties": {} }),
    );

    dispatcher
        .register_session_tool(
            session_id,
            tool,
            tool_handler(move |ctx, _args| {
                let store = store.clone();
                async move {
                    let Some(session) = store.peek(&ctx.session_id).await else {
                        return ToolResult::error("session expired or invalid");
                    };
                    ToolResult::json(&SessionInfo {
                        session_id: session.id,
                        user_id: session.user_id,
                        role: session.role.as_str().to_string(),
                        transport: ctx.transport.as_str(),
                        expires_at: session.expires_at.to_rfc3339(),
                    })
                }
            }),
        )
        .await;
}

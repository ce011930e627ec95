//! Tool registration and notification delivery contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bridge::registry::DeliveryHandle;
use crate::config::Transport;
use crate::error::Result;
use crate::models::session::Role;
use crate::models::tool::{Tool, ToolResult};

/// What a tool handler knows about the call it is serving.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub session_id: String,
    pub role: Role,
    pub transport: Transport,
    /// Fires when the caller's channel goes away or the server shuts down.
    pub cancel: CancellationToken,
}

/// Boxed future for async tool execution
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Tool handler function type
pub type ToolHandler = Arc<dyn Fn(ToolContext, Value) -> ToolFuture + Send + Sync>;

/// Wraps an async closure as a [`ToolHandler`].
pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    Arc::new(move |ctx, args| Box::pin(f(ctx, args)))
}

/// A registered tool with metadata and handler
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Tool,
    pub handler: ToolHandler,
}

impl RegisteredTool {
    pub fn new(tool: Tool, handler: ToolHandler) -> Self {
        Self { tool, handler }
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }
}

/// The tool-dispatch collaborator the transports and push layer drive.
///
/// Sessions registered here get server-initiated notifications; tools
/// registered here are listed and invoked by name.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Adds a tool visible to every session, subject to role filtering.
    async fn register_tool(&self, tool: Tool, handler: ToolHandler);

    /// Adds a tool that only `session_id` sees. Role filtering does not apply.
    async fn register_session_tool(&self, session_id: &str, tool: Tool, handler: ToolHandler);

    /// Sends a notification to one session.
    async fn send_notification(&self, session_id: &str, method: &str, params: Value) -> Result<()>;

    /// Records where notifications for `session_id` go. Re-registering
    /// replaces the previous channel.
    async fn register_session(&self, session_id: &str, handle: DeliveryHandle);

    /// Forgets a session and any tools registered for it alone.
    async fn unregister_session(&self, session_id: &str);
}

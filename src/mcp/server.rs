//! In-process MCP server: tool catalog, per-session tools and notification
//! routing behind the [`ToolDispatcher`] contract.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::access::filter::{UnknownRolePolicy, filter_tools, is_visible};
use crate::bridge::registry::DeliveryHandle;
use crate::config::Transport;
use crate::error::{AppError, Result};
use crate::models::session::Role;
use crate::models::tool::Tool;
use crate::session::identity_index::IdentityIndex;

use super::dispatcher::{RegisteredTool, ToolContext, ToolDispatcher, ToolHandler};
use super::protocol::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpError, PROTOCOL_VERSION, ServerMessage,
    ToolCallParams, parse_request,
};

pub const SERVER_NAME: &str = "kube-mcp-gate";

/// Method names handled by the server.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const NOTIFICATION_PREFIX: &str = "notifications/";
}

pub struct McpServer {
    identities: IdentityIndex,
    policy: UnknownRolePolicy,
    shutdown: CancellationToken,
    tools: RwLock<Vec<RegisteredTool>>,
    session_tools: RwLock<HashMap<String, Vec<RegisteredTool>>>,
    sessions: RwLock<HashMap<String, DeliveryHandle>>,
}

impl McpServer {
    /// Creates a new `McpServer`.
    ///
    /// # Arguments
    ///
    /// * `identities` - Index the caller's role is read from on every listing and call.
    /// * `policy` - Visibility for callers without a recognised role.
    /// * `shutdown` - Parent of the cancellation handed to tool handlers.
    pub fn new(identities: IdentityIndex, policy: UnknownRolePolicy, shutdown: CancellationToken) -> Self {
        Self {
            identities,
            policy,
            shutdown,
            tools: RwLock::new(Vec::new()),
            session_tools: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Every globally registered tool, in registration order.
    pub async fn catalog(&self) -> Vec<Tool> {
        self.tools.read().await.iter().map(|t| t.tool.clone()).collect()
    }

    /// Tools `session_id` may see: the role-filtered catalog followed by the
    /// session's own tools.
    pub async fn list_tools(&self, session_id: &str) -> Vec<Tool> {
        let role = self.identities.role_of(session_id).await;
        let mut visible = filter_tools(role, &self.catalog().await, self.policy);
        if let Some(own) = self.session_tools.read().await.get(session_id) {
            visible.extend(own.iter().map(|t| t.tool.clone()));
        }
        visible
    }

    pub async fn is_registered(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Handles one inbound message for `session_id`. Returns `None` for
    /// notifications, which get no reply.
    pub async fn handle(
        &self,
        session_id: &str,
        transport: Transport,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let method = request.method.as_str();
        let result = match method {
            methods::INITIALIZE => Ok(initialize_result()),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.list_tools(session_id).await })),
            methods::TOOLS_CALL => self.call_tool(session_id, transport, request.params).await,
            m if m.starts_with(methods::NOTIFICATION_PREFIX) => {
                debug!("Notification {} from {}", m, session_id);
                return None;
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        let id = request.id?;
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    /// Parses and handles one raw JSON-RPC message. A message that does not
    /// parse is answered with an error carrying a null id.
    pub async fn handle_raw(&self, session_id: &str, transport: Transport, raw: &str) -> Option<JsonRpcResponse> {
        match parse_request(raw) {
            Ok(request) => self.handle(session_id, transport, request).await,
            Err(error) => {
                warn!("Rejected malformed message from {}: {}", session_id, error);
                Some(JsonRpcResponse::failure(Value::Null, error))
            }
        }
    }

    async fn call_tool(
        &self,
        session_id: &str,
        transport: Transport,
        params: Value,
    ) -> std::result::Result<Value, McpError> {
        let params: ToolCallParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;
        let role = self.identities.role_of(session_id).await;
        let registered = self.find_tool(session_id, &params.name, role).await?;

        info!(
            "Tool call: transport={}, session={}, role={}, tool={}, args={}",
            transport.as_str(),
            session_id,
            role,
            params.name,
            params.arguments
        );

        let cancel = match self.sessions.read().await.get(session_id) {
            Some(handle) => handle.cancellation(),
            None => self.shutdown.child_token(),
        };
        let ctx = ToolContext {
            session_id: session_id.to_string(),
            role,
            transport,
            cancel,
        };
        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };

        let result = (registered.handler)(ctx, arguments).await;
        if result.is_error {
            warn!("Tool {} failed for {}: {}", params.name, session_id, result.text_content());
        }
        serde_json::to_value(result).map_err(|e| McpError::Internal(e.to_string()))
    }

    /// Session tools first, then the global catalog. A hidden tool is
    /// reported exactly like an unknown one.
    async fn find_tool(
        &self,
        session_id: &str,
        name: &str,
        role: Role,
    ) -> std::result::Result<RegisteredTool, McpError> {
        if let Some(own) = self.session_tools.read().await.get(session_id) {
            if let Some(tool) = own.iter().find(|t| t.name() == name) {
                return Ok(tool.clone());
            }
        }

        let tool = self.tools.read().await.iter().find(|t| t.name() == name).cloned();
        match tool {
            Some(tool) if is_visible(role, name, self.policy) => Ok(tool),
            Some(_) => {
                warn!("Session {} (role {}) called hidden tool {}", session_id, role, name);
                Err(McpError::InvalidParams(format!("Unknown tool: {}", name)))
            }
            None => Err(McpError::InvalidParams(format!("Unknown tool: {}", name))),
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": true },
            "logging": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn upsert(tools: &mut Vec<RegisteredTool>, entry: RegisteredTool) {
    match tools.iter_mut().find(|t| t.name() == entry.name()) {
        Some(slot) => *slot = entry,
        None => tools.push(entry),
    }
}

#[async_trait]
impl ToolDispatcher for McpServer {
    async fn register_tool(&self, tool: Tool, handler: ToolHandler) {
        debug!("Registering tool {}", tool.name);
        upsert(&mut *self.tools.write().await, RegisteredTool::new(tool, handler));
    }

    async fn register_session_tool(&self, session_id: &str, tool: Tool, handler: ToolHandler) {
        debug!("Registering tool {} for session {}", tool.name, session_id);
        let mut all = self.session_tools.write().await;
        let own = all.entry(session_id.to_string()).or_default();
        upsert(own, RegisteredTool::new(tool, handler));
    }

    async fn send_notification(&self, session_id: &str, method: &str, params: Value) -> Result<()> {
        let handle = self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotConnected(format!("session {} is not registered", session_id)))?;

        let message = ServerMessage::Notification(JsonRpcNotification::new(method, params));
        if let Err(e) = handle.deliver(message).await {
            let mut sessions = self.sessions.write().await;
            if sessions.get(session_id).map(|h| h.id()) == Some(handle.id()) {
                sessions.remove(session_id);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn register_session(&self, session_id: &str, handle: DeliveryHandle) {
        self.sessions.write().await.insert(session_id.to_string(), handle);
    }

    async fn unregister_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        self.session_tools.write().await.remove(session_id);
    }
}

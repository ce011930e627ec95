use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Transport;
use crate::error::{AppError, Result};
use crate::mcp::dispatcher::ToolDispatcher;
use crate::mcp::protocol::ServerMessage;
use crate::session::store::{RemovalReason, SessionObserver};

/// Buffered messages per client channel before senders wait.
pub const CHANNEL_CAPACITY: usize = 64;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// The write half of one open client channel.
///
/// Cloning shares the channel. The handle is closed once the reader goes
/// away or [`close`](Self::close) is called.
#[derive(Clone, Debug)]
pub struct DeliveryHandle {
    id: u64,
    transport: Transport,
    opened_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerMessage>,
    closed: CancellationToken,
}

impl DeliveryHandle {
    /// Opens a channel and returns its handle with the reading end. The
    /// handle closes when `parent` is cancelled.
    pub fn channel(
        transport: Transport,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            opened_at: Utc::now(),
            tx,
            closed: parent.child_token(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Writes one message to the client.
    pub async fn deliver(&self, message: ServerMessage) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(AppError::NotConnected("client channel closed".to_string()));
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| AppError::NotConnected("client channel closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Fires when the channel is closed from this side or the server stops.
    pub fn cancellation(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Session id to live client channel.
#[derive(Clone, Default)]
pub struct DeliveryRegistry {
    handles: Arc<RwLock<HashMap<String, DeliveryHandle>>>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle` for `session_id`, returning the handle it replaced.
    pub async fn insert(&self, session_id: &str, handle: DeliveryHandle) -> Option<DeliveryHandle> {
        tracing::debug!(
            "Delivery handle {} ({}) registered for {}",
            handle.id(),
            handle.transport().as_str(),
            session_id
        );
        self.handles.write().await.insert(session_id.to_string(), handle)
    }

    /// The live handle for `session_id`. A closed handle is pruned and
    /// reported as absent.
    pub async fn get(&self, session_id: &str) -> Option<DeliveryHandle> {
        let handle = self.handles.read().await.get(session_id).cloned()?;
        if handle.is_closed() {
            self.remove_if(session_id, handle.id()).await;
            return None;
        }
        Some(handle)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).await.is_some()
    }

    pub async fn remove(&self, session_id: &str) -> Option<DeliveryHandle> {
        let removed = self.handles.write().await.remove(session_id);
        if let Some(handle) = &removed {
            handle.close();
        }
        removed
    }

    /// Removes the entry only if it still holds the handle with `handle_id`,
    /// so a reconnect is not torn down by the stream it replaced.
    pub async fn remove_if(&self, session_id: &str, handle_id: u64) -> bool {
        let mut handles = self.handles.write().await;
        match handles.get(session_id) {
            Some(current) if current.id() == handle_id => {
                handles.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Stores `handle` for `session_id` and registers it with `dispatcher`
    /// before the entry becomes visible to a concurrent [`detach`](Self::detach).
    pub async fn attach(
        &self,
        session_id: &str,
        handle: DeliveryHandle,
        dispatcher: &dyn ToolDispatcher,
    ) -> Option<DeliveryHandle> {
        let mut handles = self.handles.write().await;
        let previous = handles.insert(session_id.to_string(), handle.clone());
        dispatcher.register_session(session_id, handle).await;
        previous
    }

    /// Like [`remove_if`](Self::remove_if), but also unregisters the session
    /// from `dispatcher` while the entry is still locked. A reattach is
    /// either seen here and left alone, or lands after the unregister.
    pub async fn detach(&self, session_id: &str, handle_id: u64, dispatcher: &dyn ToolDispatcher) -> bool {
        let mut handles = self.handles.write().await;
        match handles.get(session_id) {
            Some(current) if current.id() == handle_id => {
                handles.remove(session_id);
                dispatcher.unregister_session(session_id).await;
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}

/// Ties a stream's lifetime to its registry entry: dropping the guard closes
/// the handle and removes it, unless it has been replaced meanwhile.
pub struct StreamGuard {
    registry: DeliveryRegistry,
    dispatcher: Arc<dyn ToolDispatcher>,
    session_id: String,
    handle: DeliveryHandle,
}

impl StreamGuard {
    pub fn new(
        registry: DeliveryRegistry,
        dispatcher: Arc<dyn ToolDispatcher>,
        session_id: String,
        handle: DeliveryHandle,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            session_id,
            handle,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn handle(&self) -> &DeliveryHandle {
        &self.handle
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.handle.close();
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let session_id = std::mem::take(&mut self.session_id);
        let handle_id = self.handle.id();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if registry.detach(&session_id, handle_id, &*dispatcher).await {
                    tracing::info!("Client stream closed for {}", session_id);
                }
            });
        }
    }
}

/// Drops delivery state for sessions that leave the store.
pub struct SessionCleanup {
    registry: DeliveryRegistry,
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl SessionCleanup {
    pub fn new(registry: DeliveryRegistry, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }
}

#[async_trait]
impl SessionObserver for SessionCleanup {
    async fn session_removed(&self, session_id: &str, reason: RemovalReason) {
        let had_channel = self.registry.remove(session_id).await.is_some();
        self.dispatcher.unregister_session(session_id).await;
        tracing::debug!(
            "Cleaned up session {} ({:?}), channel_closed={}",
            session_id,
            reason,
            had_channel
        );
    }
}

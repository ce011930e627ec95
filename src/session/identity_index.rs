use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::models::identity::UserInfo;
use crate::models::session::Role;

/// Session id to `(user, role)` lookups for paths that only carry an id.
///
/// Has its own lock so role checks on every catalog listing never wait on
/// session mutation. Writes happen only from inside the session store's
/// critical section, store lock first, so readers never see an entry for a
/// session the store has dropped.
#[derive(Clone, Default)]
pub struct IdentityIndex {
    entries: Arc<RwLock<HashMap<String, UserInfo>>>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role held by `session_id`, `Role::Unknown` when the id is not indexed.
    pub async fn role_of(&self, session_id: &str) -> Role {
        let role = self
            .entries
            .read()
            .await
            .get(session_id)
            .map(|info| info.role)
            .unwrap_or_default();
        tracing::debug!("Role lookup: session_id={}, role={}", session_id, role);
        role
    }

    pub async fn get(&self, session_id: &str) -> Option<UserInfo> {
        self.entries.read().await.get(session_id).cloned()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.entries.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, UserInfo>> {
        self.entries.write().await
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::identity::UserInfo;
use crate::models::session::{Role, Session};

use super::clock::{Clock, SystemClock};
use super::identity_index::IdentityIndex;

/// Prefix of every server-minted session id.
pub const SESSION_ID_PREFIX: &str = "mcp-session-";

/// Why a session left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Explicitly deleted, e.g. on logout.
    Deleted,
    /// Found past its expiry on lookup.
    Expired,
    /// Collected by the periodic sweep.
    Swept,
}

/// Told about every session that leaves the store, after the store lock is
/// released.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn session_removed(&self, session_id: &str, reason: RemovalReason);
}

/// Settings the store is built with.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub ttl: Duration,
    pub allow_multi_session: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            allow_multi_session: false,
        }
    }
}

struct StoreInner {
    sessions: Mutex<HashMap<String, Session>>,
    identities: IdentityIndex,
    ttl: chrono::Duration,
    allow_multi_session: bool,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn SessionObserver>>,
}

/// In-memory session store with sliding expiry.
///
/// Every operation, lookups included, takes the single exclusive lock:
/// a successful lookup renews the session, so it is a write.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(options: StoreOptions) -> Self {
        Self::build(options, Arc::new(SystemClock), IdentityIndex::new(), None)
    }

    /// Creates a store with an explicit clock, a shared identity index and an
    /// optional removal observer.
    ///
    /// The index is passed in so components that only resolve roles can hold
    /// it before the store itself exists.
    pub fn build(
        options: StoreOptions,
        clock: Arc<dyn Clock>,
        identities: IdentityIndex,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Self {
        let ttl = chrono::Duration::from_std(options.ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        Self {
            inner: Arc::new(StoreInner {
                sessions: Mutex::new(HashMap::new()),
                identities,
                ttl,
                allow_multi_session: options.allow_multi_session,
                clock,
                observer,
            }),
        }
    }

    /// The identity index kept in step with this store.
    pub fn identities(&self) -> &IdentityIndex {
        &self.inner.identities
    }

    /// Role of a session, straight from the identity index.
    pub async fn role_of(&self, session_id: &str) -> Role {
        self.inner.identities.role_of(session_id).await
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Creates a session for `user_id`, which may be empty for an anonymous caller.
    pub async fn create(&self, user_id: &str) -> Session {
        self.create_with_role(user_id, Role::Unknown).await
    }

    /// Creates a session for `user_id` holding `role`.
    ///
    /// Unless several sessions per user are allowed, a named user who already
    /// has a live session gets that session back. Its role is filled in from
    /// `role` only if it has none yet.
    pub async fn create_with_role(&self, user_id: &str, role: Role) -> Session {
        let now = self.now();
        let mut sessions = self.inner.sessions.lock().await;
        let mut identities = self.inner.identities.write().await;

        if !self.inner.allow_multi_session && !user_id.is_empty() {
            let existing = sessions
                .values_mut()
                .find(|s| s.user_id == user_id && !s.is_expired_at(now));
            if let Some(session) = existing {
                if !session.role.is_known() && role.is_known() {
                    session.set_role(role);
                    identities.insert(
                        session.id.clone(),
                        UserInfo {
                            user_id: session.user_id.clone(),
                            role,
                        },
                    );
                }
                tracing::debug!("Reusing session {} for user {}", session.id, user_id);
                return session.clone();
            }
        }

        let id = loop {
            let candidate = format!("{}{}", SESSION_ID_PREFIX, Uuid::new_v4());
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Session::new(id.clone(), user_id.to_string(), role, now, self.inner.ttl);
        identities.insert(
            id.clone(),
            UserInfo {
                user_id: user_id.to_string(),
                role,
            },
        );
        sessions.insert(id.clone(), session.clone());

        tracing::info!(
            "Session created: id={}, user={}, role={}",
            id,
            if user_id.is_empty() { "<anonymous>" } else { user_id },
            role
        );
        session
    }

    /// Looks a session up and renews it.
    ///
    /// Absent and expired ids are indistinguishable: both return `None`, and
    /// an expired entry is evicted on the way out.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let now = self.now();
        let expired = {
            let mut sessions = self.inner.sessions.lock().await;
            let live = match sessions.get(session_id) {
                None => return None,
                Some(session) => !session.is_expired_at(now),
            };

            if live {
                let mut identities = self.inner.identities.write().await;
                let session = sessions.get_mut(session_id)?;
                session.last_access = now;
                let renewed = now + self.inner.ttl;
                if renewed > session.expires_at {
                    session.expires_at = renewed;
                }
                if !identities.contains_key(session_id) {
                    tracing::warn!("Identity index was missing live session {}, restoring", session_id);
                    identities.insert(
                        session_id.to_string(),
                        UserInfo {
                            user_id: session.user_id.clone(),
                            role: session.role,
                        },
                    );
                }
                return Some(session.clone());
            }

            let mut identities = self.inner.identities.write().await;
            sessions.remove(session_id);
            identities.remove(session_id);
            session_id.to_string()
        };

        tracing::info!("Session expired on access: {}", expired);
        self.notify(&expired, RemovalReason::Expired).await;
        None
    }

    /// Returns a session without renewing it.
    pub async fn peek(&self, session_id: &str) -> Option<Session> {
        let now = self.now();
        self.inner
            .sessions
            .lock()
            .await
            .get(session_id)
            .filter(|s| !s.is_expired_at(now))
            .cloned()
    }

    /// Gives a live session a role if it has none. An existing role is never
    /// overwritten. Returns the session as it stands afterwards.
    pub async fn backfill_role(&self, session_id: &str, role: Role) -> Option<Session> {
        let now = self.now();
        let mut sessions = self.inner.sessions.lock().await;
        let session = sessions.get_mut(session_id).filter(|s| !s.is_expired_at(now))?;

        if !session.role.is_known() && role.is_known() {
            let mut identities = self.inner.identities.write().await;
            session.set_role(role);
            identities.insert(
                session_id.to_string(),
                UserInfo {
                    user_id: session.user_id.clone(),
                    role,
                },
            );
            tracing::debug!("Session {} role set to {}", session_id, role);
        } else if role.is_known() && session.role != role {
            tracing::debug!(
                "Ignoring role {} for session {}, it already holds {}",
                role,
                session_id,
                session.role
            );
        }

        Some(session.clone())
    }

    /// Removes a session. Deleting an unknown id is a no-op for the store, but
    /// observers are still told so any leftover delivery state is dropped.
    pub async fn delete(&self, session_id: &str) -> bool {
        let existed = {
            let mut sessions = self.inner.sessions.lock().await;
            let mut identities = self.inner.identities.write().await;
            identities.remove(session_id);
            sessions.remove(session_id).is_some()
        };

        if existed {
            tracing::info!("Session deleted: {}", session_id);
        }
        self.notify(session_id, RemovalReason::Deleted).await;
        existed
    }

    /// Drops every session past its expiry and returns their ids.
    pub async fn sweep(&self) -> Vec<String> {
        let now = self.now();
        let removed: Vec<String> = {
            let mut sessions = self.inner.sessions.lock().await;
            let mut identities = self.inner.identities.write().await;
            let expired: Vec<String> = sessions
                .values()
                .filter(|s| s.is_expired_at(now))
                .map(|s| s.id.clone())
                .collect();
            for id in &expired {
                sessions.remove(id);
                identities.remove(id);
            }
            expired
        };

        for id in &removed {
            self.notify(id, RemovalReason::Swept).await;
        }
        if !removed.is_empty() {
            tracing::info!("Swept {} expired session(s)", removed.len());
        }
        removed
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.sweep().await;
                    }
                }
            }
        })
    }

    /// Number of sessions currently held, expired ones included until collected.
    pub async fn len(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.lock().await.is_empty()
    }

    /// Copies of every stored session, for diagnostics.
    pub async fn snapshot(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.inner.sessions.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    async fn notify(&self, session_id: &str, reason: RemovalReason) {
        if let Some(observer) = &self.inner.observer {
            observer.session_removed(session_id, reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::clock::ManualClock;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingObserver {
        removed: StdMutex<Vec<(String, RemovalReason)>>,
    }

    #[async_trait]
    impl SessionObserver for RecordingObserver {
        async fn session_removed(&self, session_id: &str, reason: RemovalReason) {
            self.removed.lock().unwrap().push((session_id.to_string(), reason));
        }
    }

    fn store_with_clock(allow_multi_session: bool) -> (SessionStore, Arc<ManualClock>, Arc<RecordingObserver>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let observer = Arc::new(RecordingObserver::default());
        let store = SessionStore::build(
            StoreOptions {
                ttl: Duration::from_secs(30 * 60),
                allow_multi_session,
            },
            clock.clone(),
            IdentityIndex::new(),
            Some(observer.clone()),
        );
        (store, clock, observer)
    }

    #[tokio::test]
    async fn ids_carry_the_prefix_and_are_distinct() {
        let (store, _, _) = store_with_clock(false);
        let a = store.create("").await;
        let b = store.create("").await;
        assert!(a.id.starts_with(SESSION_ID_PREFIX));
        assert_ne!(a.id, b.id);
        assert!(a.is_anonymous());
    }

    #[tokio::test]
    async fn same_user_gets_the_same_session() {
        let (store, _, _) = store_with_clock(false);
        let first = store.create("bob").await;
        let second = store.create("bob").await;
        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);

        store.delete(&first.id).await;
        let third = store.create("bob").await;
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn multi_session_mode_mints_new_ids() {
        let (store, _, _) = store_with_clock(true);
        let first = store.create("bob").await;
        let second = store.create("bob").await;
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn anonymous_sessions_are_never_shared() {
        let (store, _, _) = store_with_clock(false);
        let a = store.create("").await;
        let b = store.create("").await;
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn concurrent_creates_for_one_user_converge() {
        let (store, _, _) = store_with_clock(false);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.create("carol").await.id }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found_and_touch_nothing() {
        let (store, clock, _) = store_with_clock(false);
        let session = store.create("dave").await;
        clock.advance(ChronoDuration::minutes(5));

        assert!(store.get("mcp-session-missing").await.is_none());

        let untouched = store.peek(&session.id).await.unwrap();
        assert_eq!(untouched.last_access, session.last_access);
        assert_eq!(untouched.expires_at, session.expires_at);
    }

    #[tokio::test]
    async fn lookups_slide_the_expiry_forward() {
        let (store, clock, _) = store_with_clock(false);
        let session = store.create("erin").await;

        clock.advance(ChronoDuration::minutes(29));
        let renewed = store.get(&session.id).await.unwrap();
        assert!(renewed.expires_at > session.expires_at);

        clock.advance(ChronoDuration::minutes(29));
        assert!(store.get(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn expired_sessions_report_not_found_once_and_stay_gone() {
        let (store, clock, observer) = store_with_clock(false);
        let session = store.create_with_role("frank", Role::User).await;

        clock.advance(ChronoDuration::minutes(31));
        assert!(store.get(&session.id).await.is_none());
        assert!(!store.identities().contains(&session.id).await);
        assert_eq!(store.len().await, 0);

        clock.advance(ChronoDuration::minutes(-30));
        assert!(store.get(&session.id).await.is_none());

        let removed = observer.removed.lock().unwrap().clone();
        assert_eq!(removed, vec![(session.id.clone(), RemovalReason::Expired)]);
    }

    #[tokio::test]
    async fn renewed_session_survives_while_idle_one_is_swept() {
        let (store, clock, observer) = store_with_clock(false);
        let active = store.create("active").await;
        let idle = store.create("idle").await;

        clock.advance(ChronoDuration::minutes(29));
        assert!(store.get(&active.id).await.is_some());

        clock.advance(ChronoDuration::minutes(2));
        let swept = store.sweep().await;
        assert_eq!(swept, vec![idle.id.clone()]);
        assert!(!store.identities().contains(&idle.id).await);

        clock.advance(ChronoDuration::minutes(27));
        assert!(store.get(&active.id).await.is_some());

        let removed = observer.removed.lock().unwrap().clone();
        assert_eq!(removed, vec![(idle.id.clone(), RemovalReason::Swept)]);
    }

    #[tokio::test]
    async fn expired_user_session_is_not_reused() {
        let (store, clock, _) = store_with_clock(false);
        let old = store.create("gina").await;
        clock.advance(ChronoDuration::minutes(31));
        let fresh = store.create("gina").await;
        assert_ne!(old.id, fresh.id);
    }

    #[tokio::test]
    async fn delete_clears_store_and_index_and_is_idempotent() {
        let (store, _, observer) = store_with_clock(false);
        let session = store.create_with_role("hank", Role::Admin).await;
        assert_eq!(store.role_of(&session.id).await, Role::Admin);

        assert!(store.delete(&session.id).await);
        assert!(!store.delete(&session.id).await);

        assert!(store.get(&session.id).await.is_none());
        assert_eq!(store.role_of(&session.id).await, Role::Unknown);
        assert!(store.identities().is_empty().await);
        assert_eq!(observer.removed.lock().unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_never_see_a_half_deleted_session() {
        let (store, _, _) = store_with_clock(true);
        let mut ids = Vec::new();
        for i in 0..64 {
            ids.push(store.create_with_role(&format!("user-{}", i), Role::User).await.id);
        }
        let ids = Arc::new(ids);

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let ids = ids.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    for id in ids.iter() {
                        if store.peek(id).await.is_none() {
                            assert!(!store.identities().contains(id).await, "{} still indexed", id);
                        }
                        if store.role_of(id).await == Role::Unknown {
                            assert!(store.peek(id).await.is_none(), "{} unindexed but live", id);
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let deleter = {
            let store = store.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                for id in ids.iter() {
                    assert!(store.delete(id).await);
                    assert!(store.peek(id).await.is_none());
                    assert!(!store.identities().contains(id).await);
                }
            })
        };

        deleter.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert!(store.is_empty().await);
        assert!(store.identities().is_empty().await);
    }

    #[tokio::test]
    async fn first_role_wins() {
        let (store, _, _) = store_with_clock(false);
        let session = store.create("ivy").await;
        assert_eq!(store.role_of(&session.id).await, Role::Unknown);

        let updated = store.backfill_role(&session.id, Role::User).await.unwrap();
        assert_eq!(updated.role, Role::User);

        let unchanged = store.backfill_role(&session.id, Role::Admin).await.unwrap();
        assert_eq!(unchanged.role, Role::User);
        assert_eq!(store.role_of(&session.id).await, Role::User);
    }

    #[tokio::test]
    async fn reusing_a_session_backfills_a_missing_role() {
        let (store, _, _) = store_with_clock(false);
        let first = store.create("jack").await;
        let second = store.create_with_role("jack", Role::Guest).await;
        assert_eq!(first.id, second.id);
        assert_eq!(second.role, Role::Guest);

        let third = store.create_with_role("jack", Role::Admin).await;
        assert_eq!(third.role, Role::Guest);
    }

    #[tokio::test]
    async fn index_tracks_every_live_session() {
        let (store, _, _) = store_with_clock(true);
        for i in 0..5 {
            store.create_with_role(&format!("user{}", i), Role::User).await;
        }
        assert_eq!(store.identities().len().await, store.len().await);
        for session in store.snapshot().await {
            let info = store.identities().get(&session.id).await.unwrap();
            assert_eq!(info.user_id, session.user_id);
            assert_eq!(info.role, Role::User);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_shutdown() {
        let store = SessionStore::new(StoreOptions::default());
        let shutdown = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_secs(60), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bridge::registry::{DeliveryRegistry, SessionCleanup};
use crate::config::Config;
use crate::crypto::token::TokenKey;
use crate::error::Result;
use crate::k8s::cluster_repo::{ClusterDirectory, PgClusterDirectory, UnconfiguredDirectory};
use crate::k8s::ops::{ClusterOps, KubeOps};
use crate::mcp::server::McpServer;
use crate::push::notifier::Notifier;
use crate::session::clock::{Clock, SystemClock};
use crate::session::identity_index::IdentityIndex;
use crate::session::store::{SessionStore, StoreOptions};
use crate::tools::catalog::register_catalog;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Live sessions and their identity index.
    pub sessions: SessionStore,
    /// Open client channels, by session id.
    pub deliveries: DeliveryRegistry,
    /// The tool dispatcher every transport feeds.
    pub server: Arc<McpServer>,
    /// Key identity tokens are opened with.
    pub token_key: Arc<TokenKey>,
    /// Server-initiated notifications.
    pub notifier: Notifier,
    /// Cancelled once the process starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL and the live clusters.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let directory: Arc<dyn ClusterDirectory> = match &config.database_url {
            Some(url) => {
                let pool = crate::db::create_pool(url)?;
                tracing::info!("PostgreSQL pool initialized");
                Arc::new(PgClusterDirectory::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, cluster tools will report an error");
                Arc::new(UnconfiguredDirectory)
            }
        };

        let ops: Arc<dyn ClusterOps> = Arc::new(KubeOps::new(directory.clone(), config.proxy.clone()));
        if let Some(proxy) = &config.proxy {
            tracing::info!("Kubernetes calls go through proxy {}", proxy);
        }

        Ok(Self::build(config.clone(), directory, ops, Arc::new(SystemClock)).await)
    }

    /// Wires the session core around the given collaborators and registers
    /// the tool catalog.
    ///
    /// The identity index is created first and shared by the store and the
    /// server. The server exists before the store so the store can tell it
    /// about every session that goes away.
    pub async fn build(
        config: Config,
        directory: Arc<dyn ClusterDirectory>,
        ops: Arc<dyn ClusterOps>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let identities = IdentityIndex::new();
        let server = Arc::new(McpServer::new(
            identities.clone(),
            config.unknown_role_policy,
            shutdown.clone(),
        ));
        let deliveries = DeliveryRegistry::new();

        let cleanup = Arc::new(SessionCleanup::new(deliveries.clone(), server.clone()));
        let sessions = SessionStore::build(
            StoreOptions {
                ttl: config.session_ttl,
                allow_multi_session: config.allow_multi_session,
            },
            clock,
            identities,
            Some(cleanup),
        );

        let notifier = Notifier::new(deliveries.clone(), server.clone());
        register_catalog(&*server, directory, ops, notifier.clone()).await;
        tracing::info!(
            "Session store ready: ttl={}s, multi_session={}, unknown_role_policy={:?}",
            config.session_ttl.as_secs(),
            config.allow_multi_session,
            config.unknown_role_policy
        );

        Self {
            token_key: Arc::new(TokenKey::from_secret(&config.aes_key)),
            config: Arc::new(config),
            sessions,
            deliveries,
            server,
            notifier,
            shutdown,
        }
    }
}

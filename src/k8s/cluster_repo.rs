use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

use crate::error::{AppError, Result};

/// A registered cluster as listed to callers. The kubeconfig never leaves
/// the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub ip: String,
}

/// Where cluster metadata and credentials live.
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    /// Every registered cluster.
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>>;

    /// The kubeconfig text stored for `cluster_name`.
    async fn kubeconfig(&self, cluster_name: &str) -> Result<String>;
}

/// A helper function to map a `tokio_postgres::Row` to a `ClusterInfo`.
fn row_to_cluster(row: &Row) -> Result<ClusterInfo> {
    Ok(ClusterInfo {
        cluster_name: row
            .try_get("cluster_name")
            .map_err(|_| AppError::Internal("clusters.cluster_name missing".to_string()))?,
        ip: row
            .try_get::<_, Option<String>>("ip")
            .map_err(|_| AppError::Internal("clusters.ip missing".to_string()))?
            .unwrap_or_default(),
    })
}

/// The `clusters` table in PostgreSQL.
#[derive(Clone)]
pub struct PgClusterDirectory {
    pool: Pool,
}

impl PgClusterDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClusterDirectory for PgClusterDirectory {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT cluster_name, ip
                FROM clusters
                ORDER BY cluster_name
                "#,
            )
            .await?;
        let rows = client.query(&statement, &[]).await?;
        rows.iter().map(row_to_cluster).collect()
    }

    async fn kubeconfig(&self, cluster_name: &str) -> Result<String> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                SELECT kube_config
                FROM clusters
                WHERE cluster_name = $1
                "#,
            )
            .await?;
        let row = client
            .query_opt(&statement, &[&cluster_name])
            .await?
            .ok_or_else(|| AppError::NotFound(format!("cluster '{}'", cluster_name)))?;

        let kubeconfig: Option<String> = row
            .try_get("kube_config")
            .map_err(|_| AppError::Internal("clusters.kube_config missing".to_string()))?;
        kubeconfig
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::NotFound(format!("kubeconfig for cluster '{}'", cluster_name)))
    }
}

/// Stands in when no database is configured; every lookup fails with a
/// message saying so.
pub struct UnconfiguredDirectory;

#[async_trait]
impl ClusterDirectory for UnconfiguredDirectory {
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>> {
        Err(AppError::Internal("no cluster database configured (set DATABASE_URL)".to_string()))
    }

    async fn kubeconfig(&self, _cluster_name: &str) -> Result<String> {
        Err(AppError::Internal("no cluster database configured (set DATABASE_URL)".to_string()))
    }
}

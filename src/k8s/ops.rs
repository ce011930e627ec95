use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::Result;

use super::client::build_client;
use super::cluster_repo::ClusterDirectory;

/// Pod template annotation that triggers a rolling restart when changed.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Namespaced resources whose names can be listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Pod,
    Deployment,
    DaemonSet,
    ConfigMap,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::Deployment => "deployments",
            ResourceKind::DaemonSet => "daemonsets",
            ResourceKind::ConfigMap => "configmaps",
        }
    }
}

/// Workloads that support a rolling restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartKind {
    Deployment,
    DaemonSet,
}

impl RestartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartKind::Deployment => "Deployment",
            RestartKind::DaemonSet => "DaemonSet",
        }
    }
}

/// Operations against a registered cluster, addressed by cluster name.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn namespaces(&self, cluster: &str) -> Result<Vec<String>>;

    /// Names of every `kind` object in `namespace`.
    async fn query(&self, cluster: &str, namespace: &str, kind: ResourceKind) -> Result<Vec<String>>;

    /// Rolls every pod of the named workload.
    async fn restart(&self, cluster: &str, namespace: &str, kind: RestartKind, name: &str) -> Result<()>;

    /// The API server's version string.
    async fn version(&self, cluster: &str) -> Result<String>;

    /// The data of one config map.
    async fn configmap_detail(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>>;
}

/// [`ClusterOps`] over live API servers, with credentials from a
/// [`ClusterDirectory`]. A client is built per call.
pub struct KubeOps {
    directory: Arc<dyn ClusterDirectory>,
    proxy: Option<String>,
}

impl KubeOps {
    pub fn new(directory: Arc<dyn ClusterDirectory>, proxy: Option<String>) -> Self {
        Self { directory, proxy }
    }

    async fn client(&self, cluster: &str) -> Result<Client> {
        let kubeconfig = self.directory.kubeconfig(cluster).await?;
        build_client(&kubeconfig, self.proxy.as_deref(), true).await
    }
}

async fn list_names<K>(api: Api<K>) -> Result<Vec<String>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await?;
    Ok(list.items.iter().map(|item| item.name_any()).collect())
}

async fn restart_workload<K>(client: Client, namespace: &str, name: &str) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let mut annotations = Map::new();
    annotations.insert(
        RESTARTED_AT_ANNOTATION.to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    let patch = json!({
        "spec": { "template": { "metadata": { "annotations": annotations } } }
    });

    let api: Api<K> = Api::namespaced(client, namespace);
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

#[async_trait]
impl ClusterOps for KubeOps {
    async fn namespaces(&self, cluster: &str) -> Result<Vec<String>> {
        let client = self.client(cluster).await?;
        list_names(Api::<Namespace>::all(client)).await
    }

    async fn query(&self, cluster: &str, namespace: &str, kind: ResourceKind) -> Result<Vec<String>> {
        let client = self.client(cluster).await?;
        tracing::debug!("Listing {} in {}/{}", kind.as_str(), cluster, namespace);
        match kind {
            ResourceKind::Pod => list_names(Api::<Pod>::namespaced(client, namespace)).await,
            ResourceKind::Deployment => list_names(Api::<Deployment>::namespaced(client, namespace)).await,
            ResourceKind::DaemonSet => list_names(Api::<DaemonSet>::namespaced(client, namespace)).await,
            ResourceKind::ConfigMap => list_names(Api::<ConfigMap>::namespaced(client, namespace)).await,
        }
    }

    async fn restart(&self, cluster: &str, namespace: &str, kind: RestartKind, name: &str) -> Result<()> {
        let client = self.client(cluster).await?;
        match kind {
            RestartKind::Deployment => restart_workload::<Deployment>(client, namespace, name).await?,
            RestartKind::DaemonSet => restart_workload::<DaemonSet>(client, namespace, name).await?,
        }
        tracing::info!("Restarted {} {}/{} on {}", kind.as_str(), namespace, name, cluster);
        Ok(())
    }

    async fn version(&self, cluster: &str) -> Result<String> {
        let client = self.client(cluster).await?;
        let info = client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn configmap_detail(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let client = self.client(cluster).await?;
        let configmap = Api::<ConfigMap>::namespaced(client, namespace).get(name).await?;
        Ok(configmap.data.unwrap_or_default())
    }
}

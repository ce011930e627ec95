//! Cluster tools. Each one answers a single virtual route and rejects
//! anything else with an error result.

use std::sync::Arc;

use serde_json::Value;

use crate::error::AppError;
use crate::k8s::cluster_repo::ClusterDirectory;
use crate::k8s::ops::{ClusterOps, ResourceKind, RestartKind};
use crate::mcp::dispatcher::{ToolDispatcher, tool_handler};
use crate::models::tool::{Tool, ToolResult};
use crate::validation::envelope::validate_envelope;

use super::envelope::{Envelope, Route, envelope_schema};
use super::names;

const CLUSTER: &[&str] = &["cluster_name"];
const NAMESPACED: &[&str] = &["cluster_name", "namespace"];
const NAMED: &[&str] = &["cluster_name", "namespace", "name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ListClusters,
    ListNamespaces,
    List(ResourceKind),
    Restart(RestartKind),
    Version,
    ConfigMapDetail,
}

struct ClusterTool {
    name: &'static str,
    description: &'static str,
    route: Route,
    action: Action,
}

const CATALOG: &[ClusterTool] = &[
    ClusterTool {
        name: names::GET_CLUSTERS,
        description: "Get all clusters from the database",
        route: Route::new("GET", "/clusters", &[]),
        action: Action::ListClusters,
    },
    ClusterTool {
        name: names::GET_NAMESPACES,
        description: "Get the namespaces of a cluster",
        route: Route::new("GET", "/namespaces", CLUSTER),
        action: Action::ListNamespaces,
    },
    ClusterTool {
        name: names::GET_PODS,
        description: "Get the pods in a namespace of a cluster",
        route: Route::new("GET", "/pods", NAMESPACED),
        action: Action::List(ResourceKind::Pod),
    },
    ClusterTool {
        name: names::GET_DEPLOYMENTS,
        description: "Get the deployments in a namespace of a cluster",
        route: Route::new("GET", "/deployments", NAMESPACED),
        action: Action::List(ResourceKind::Deployment),
    },
    ClusterTool {
        name: names::GET_DAEMONSETS,
        description: "Get the daemonsets in a namespace of a cluster",
        route: Route::new("GET", "/daemonsets", NAMESPACED),
        action: Action::List(ResourceKind::DaemonSet),
    },
    ClusterTool {
        name: names::ROLLOUT_RESTART_DEPLOYMENT,
        description: "Rolling restart of a Deployment",
        route: Route::new("POST", "/rollout_restart_deployment", NAMED),
        action: Action::Restart(RestartKind::Deployment),
    },
    ClusterTool {
        name: names::ROLLOUT_RESTART_DAEMONSET,
        description: "Rolling restart of a DaemonSet",
        route: Route::new("POST", "/rollout_restart_daemonset", NAMED),
        action: Action::Restart(RestartKind::DaemonSet),
    },
    ClusterTool {
        name: names::GET_K8S_VERSION,
        description: "Get the Kubernetes version of a cluster",
        route: Route::new("GET", "/k8s_version", CLUSTER),
        action: Action::Version,
    },
    ClusterTool {
        name: names::GET_CONFIGMAPS,
        description: "Get the configmaps in a namespace of a cluster",
        route: Route::new("GET", "/configmaps", NAMESPACED),
        action: Action::List(ResourceKind::ConfigMap),
    },
    ClusterTool {
        name: names::GET_CONFIGMAP_DETAIL,
        description: "Get the data of one configmap",
        route: Route::new("GET", "/configmap_detail", NAMED),
        action: Action::ConfigMapDetail,
    },
];

/// Registers every cluster tool with `dispatcher`.
pub async fn register(
    dispatcher: &dyn ToolDispatcher,
    directory: Arc<dyn ClusterDirectory>,
    ops: Arc<dyn ClusterOps>,
) {
    for spec in CATALOG {
        let tool = Tool::new(spec.name, spec.description, envelope_schema());
        let directory = directory.clone();
        let ops = ops.clone();
        let route = spec.route;
        let action = spec.action;
        dispatcher
            .register_tool(
                tool,
                tool_handler(move |_ctx, args| {
                    let directory = directory.clone();
                    let ops = ops.clone();
                    async move { run(route, action, directory.as_ref(), ops.as_ref(), args).await }
                }),
            )
            .await;
    }
    tracing::info!("Registered {} cluster tools", CATALOG.len());
}

fn describe(err: &AppError) -> String {
    match err {
        AppError::Validation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

async fn run(
    route: Route,
    action: Action,
    directory: &dyn ClusterDirectory,
    ops: &dyn ClusterOps,
    args: Value,
) -> ToolResult {
    let query = match Envelope::from_args(&args).and_then(|env| validate_envelope(&env, &route)) {
        Ok(query) => query,
        Err(e) => return ToolResult::error(describe(&e)),
    };
    let param = |key: &str| query.get(key).map(String::as_str).unwrap_or_default();
    let cluster = param("cluster_name");
    let namespace = param("namespace");
    let name = param("name");

    let outcome = match action {
        Action::ListClusters => directory
            .list_clusters()
            .await
            .map(|clusters| ToolResult::json(&clusters))
            .map_err(|e| format!("failed to query clusters: {}", describe(&e))),
        Action::ListNamespaces => ops
            .namespaces(cluster)
            .await
            .map(|items| ToolResult::json(&items))
            .map_err(|e| format!("failed to get namespaces: {}", describe(&e))),
        Action::List(kind) => ops
            .query(cluster, namespace, kind)
            .await
            .map(|items| ToolResult::json(&items))
            .map_err(|e| format!("failed to get {}: {}", kind.as_str(), describe(&e))),
        Action::Restart(kind) => ops
            .restart(cluster, namespace, kind, name)
            .await
            .map(|()| ToolResult::text(format!("{} rollout restarted successfully.", kind.as_str())))
            .map_err(|e| format!("failed to restart {}: {}", kind.as_str(), describe(&e))),
        Action::Version => ops
            .version(cluster)
            .await
            .map(ToolResult::text)
            .map_err(|e| format!("failed to get k8s version: {}", describe(&e))),
        Action::ConfigMapDetail => ops
            .configmap_detail(cluster, namespace, name)
            .await
            .map(|data| ToolResult::json(&data))
            .map_err(|e| format!("failed to get configmap: {}", describe(&e))),
    };

    outcome.unwrap_or_else(|msg| {
        tracing::error!("{}", msg);
        ToolResult::error(msg)
    })
}

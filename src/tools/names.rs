//! Names of every tool in the catalog.

pub const GET_CLUSTERS: &str = "get_clusters";
pub const GET_NAMESPACES: &str = "get_namespaces";
pub const GET_PODS: &str = "get_pods";
pub const GET_DEPLOYMENTS: &str = "get_deployments";
pub const GET_DAEMONSETS: &str = "get_daemonsets";
pub const ROLLOUT_RESTART_DEPLOYMENT: &str = "rollout_restart_deployment";
pub const ROLLOUT_RESTART_DAEMONSET: &str = "rollout_restart_daemonset";
pub const GET_K8S_VERSION: &str = "get_k8s_version";
pub const GET_CONFIGMAPS: &str = "get_configmaps";
pub const GET_CONFIGMAP_DETAIL: &str = "get_configmap_detail";

pub const PUSH_MESSAGE: &str = "push_message";
pub const START_SSE_PUSH: &str = "start_sse_push";
pub const START_STREAM: &str = "start_stream";

/// Registered per session when a stream transport attaches.
pub const SESSION_INFO: &str = "session_info";

use std::sync::Arc;

use crate::k8s::cluster_repo::ClusterDirectory;
use crate::k8s::ops::ClusterOps;
use crate::mcp::dispatcher::ToolDispatcher;
use crate::push::notifier::Notifier;

/// Registers every global tool: the cluster tools followed by the push tools.
pub async fn register_catalog(
    dispatcher: &dyn ToolDispatcher,
    directory: Arc<dyn ClusterDirectory>,
    ops: Arc<dyn ClusterOps>,
    notifier: Notifier,
) {
    super::k8s::register(dispatcher, directory, ops).await;
    super::push::register(dispatcher, notifier).await;
}

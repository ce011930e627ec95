use clap::ValueEnum;

use crate::models::session::Role;
use crate::models::tool::Tool;
use crate::tools::names;

/// Read-only inventory tools a `user` may see.
pub const USER_TOOLS: &[&str] = &[
    names::GET_CLUSTERS,
    names::GET_PODS,
    names::GET_DEPLOYMENTS,
    names::GET_DAEMONSETS,
];

/// The only tool a `guest` may see.
pub const GUEST_TOOLS: &[&str] = &[names::GET_CLUSTERS];

const NO_TOOLS: &[&str] = &[];

/// What a caller whose role is empty or unrecognised may see.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UnknownRolePolicy {
    /// Same as `guest`.
    #[default]
    Guest,
    /// Nothing at all.
    Deny,
}

/// Narrows `catalog` to what `role` may see, preserving catalog order.
pub fn filter_tools(role: Role, catalog: &[Tool], policy: UnknownRolePolicy) -> Vec<Tool> {
    let allowed: Option<&[&str]> = match (role, policy) {
        (Role::Admin, _) => None,
        (Role::User, _) => Some(USER_TOOLS),
        (Role::Guest, _) | (Role::Unknown, UnknownRolePolicy::Guest) => Some(GUEST_TOOLS),
        (Role::Unknown, UnknownRolePolicy::Deny) => Some(NO_TOOLS),
    };

    let visible: Vec<Tool> = match allowed {
        None => catalog.to_vec(),
        Some(allowed) => catalog
            .iter()
            .filter(|tool| allowed.contains(&tool.name.as_str()))
            .cloned()
            .collect(),
    };

    tracing::debug!(
        "Tool filter: role={}, all={}, visible={:?}",
        if role.is_known() { role.as_str() } else { "<none>" },
        catalog.len(),
        visible.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
    );
    visible
}

/// Whether `role` may call the tool named `name`.
pub fn is_visible(role: Role, name: &str, policy: UnknownRolePolicy) -> bool {
    match (role, policy) {
        (Role::Admin, _) => true,
        (Role::User, _) => USER_TOOLS.contains(&name),
        (Role::Guest, _) | (Role::Unknown, UnknownRolePolicy::Guest) => GUEST_TOOLS.contains(&name),
        (Role::Unknown, UnknownRolePolicy::Deny) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Vec<Tool> {
        [
            names::GET_CLUSTERS,
            names::GET_NAMESPACES,
            names::GET_PODS,
            names::GET_DEPLOYMENTS,
            names::GET_DAEMONSETS,
            names::ROLLOUT_RESTART_DEPLOYMENT,
            names::ROLLOUT_RESTART_DAEMONSET,
            names::GET_K8S_VERSION,
            names::GET_CONFIGMAPS,
            names::GET_CONFIGMAP_DETAIL,
            names::PUSH_MESSAGE,
        ]
        .iter()
        .map(|n| Tool::new(*n, "", json!({"type": "object"})))
        .collect()
    }

    fn names_of(tools: &[Tool]) -> Vec<&str> {
        tools.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn admin_sees_everything() {
        let all = catalog();
        assert_eq!(filter_tools(Role::Admin, &all, UnknownRolePolicy::Guest), all);
    }

    #[test]
    fn user_sees_only_inventory() {
        let visible = filter_tools(Role::User, &catalog(), UnknownRolePolicy::Guest);
        assert_eq!(
            names_of(&visible),
            vec!["get_clusters", "get_pods", "get_deployments", "get_daemonsets"]
        );
        assert!(!names_of(&visible).iter().any(|n| n.starts_with("rollout_restart")));
    }

    #[test]
    fn guest_sees_cluster_listing_only() {
        let visible = filter_tools(Role::Guest, &catalog(), UnknownRolePolicy::Guest);
        assert_eq!(names_of(&visible), vec!["get_clusters"]);
    }

    #[test]
    fn unknown_role_follows_policy() {
        let as_guest = filter_tools(Role::Unknown, &catalog(), UnknownRolePolicy::Guest);
        assert_eq!(names_of(&as_guest), vec!["get_clusters"]);

        let denied = filter_tools(Role::Unknown, &catalog(), UnknownRolePolicy::Deny);
        assert!(denied.is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        for role in [Role::Admin, Role::User, Role::Guest, Role::Unknown] {
            let once = filter_tools(role, &catalog(), UnknownRolePolicy::Guest);
            let twice = filter_tools(role, &once, UnknownRolePolicy::Guest);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn visibility_agrees_with_filter() {
        let all = catalog();
        for role in [Role::Admin, Role::User, Role::Guest, Role::Unknown] {
            for policy in [UnknownRolePolicy::Guest, UnknownRolePolicy::Deny] {
                let visible = filter_tools(role, &all, policy);
                for tool in &all {
                    assert_eq!(is_visible(role, &tool.name, policy), visible.contains(tool));
                }
            }
        }
    }
}

//! Cluster access boundary.
//!
//! The scan engine consumes cluster state through the [`ClusterReader`]
//! trait and never talks to an API server directly. The in-repo
//! implementation is [`snapshot::SnapshotCluster`], which reads a YAML
//! manifest tree; a live client implements the same trait externally.

pub mod object;
pub mod snapshot;

use crate::error::Result;
use object::{
    ClusterRole, ClusterRoleBinding, NamespaceInfo, NetworkPolicy, Pod, Role, RoleBinding,
    Service, Workload,
};

/// Namespaces excluded from scans unless explicitly requested.
pub const SYSTEM_NAMESPACES: [&str; 3] = ["kube-system", "kube-public", "kube-node-lease"];

/// Returns true for namespaces owned by the cluster itself.
pub fn is_system_namespace(name: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&name)
}

/// Read-only view of the cluster state a scan inspects.
///
/// Listing methods return an error when enumeration fails; callers decide
/// whether that is fatal (namespace resolution) or skippable (per-namespace
/// resource listing).
pub trait ClusterReader: Send + Sync {
    /// Human-readable name of the cluster, used in results.
    fn cluster_name(&self) -> String;

    /// Namespaces in scope for a scan. An empty request means all
    /// namespaces, minus the system ones unless `include_system` is set.
    fn namespaces_for_scan(&self, requested: &[String], include_system: bool) -> Result<Vec<String>> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }
        let mut names: Vec<String> = self
            .list_namespaces()?
            .into_iter()
            .map(|ns| ns.name)
            .filter(|name| include_system || !is_system_namespace(name))
            .collect();
        names.sort();
        Ok(names)
    }

    fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>>;
    fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;
    fn list_services(&self, namespace: &str) -> Result<Vec<Service>>;
    fn list_network_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>>;
    fn list_roles(&self, namespace: &str) -> Result<Vec<Role>>;
    fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>>;
    fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>>;
    fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>>;
    fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>>;

    /// Raw pod manifests for rule evaluation.
    fn list_pods_json(&self, namespace: &str) -> Result<Vec<serde_json::Value>>;

    /// Raw workload manifests for rule evaluation.
    fn list_workloads_json(&self, namespace: &str) -> Result<Vec<serde_json::Value>>;
}

//! Simplified typed model for the Kubernetes resources the scan engine
//! inspects. Only the fields the checks read are modelled; everything else
//! stays in the raw JSON the rule evaluator receives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container security context fields relevant to the checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityContext {
    pub privileged: Option<bool>,
    pub allow_privilege_escalation: Option<bool>,
    pub run_as_non_root: Option<bool>,
    pub run_as_user: Option<i64>,
    pub read_only_root_filesystem: Option<bool>,
    pub proc_mount: Option<String>,
    pub capabilities: Option<Capabilities>,
    pub seccomp_profile: Option<SeccompProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub add: Vec<String>,
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeccompProfile {
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

/// Pod-level security context. Shares field shapes with the container-level
/// context where the checks fall back from one to the other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSecurityContext {
    pub run_as_non_root: Option<bool>,
    pub run_as_user: Option<i64>,
    pub seccomp_profile: Option<SeccompProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerPort {
    pub container_port: Option<i32>,
    pub host_port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub name: String,
    pub image: Option<String>,
    pub ports: Vec<ContainerPort>,
    pub security_context: Option<SecurityContext>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    pub name: String,
    pub host_path: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSpec {
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
    pub ephemeral_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub host_network: bool,
    #[serde(rename = "hostPID")]
    pub host_pid: bool,
    #[serde(rename = "hostIPC")]
    pub host_ipc: bool,
    pub security_context: Option<PodSecurityContext>,
}

impl PodSpec {
    /// All containers in check order: init, then regular, then ephemeral.
    pub fn all_containers(&self) -> impl Iterator<Item = &Container> {
        self.init_containers
            .iter()
            .chain(self.containers.iter())
            .chain(self.ephemeral_containers.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub spec: PodSpec,
}

/// A pod-template-bearing workload (Deployment, DaemonSet, StatefulSet).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub template: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicePort {
    pub port: Option<i32>,
    pub node_port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    /// ClusterIP, NodePort, LoadBalancer or ExternalName.
    pub type_: String,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<serde_json::Value>,
}

impl LabelSelector {
    /// An empty selector matches every pod in the namespace.
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }
}

/// NetworkPolicy with the rule lists kept as `Option` so an absent field
/// (select-and-deny) stays distinct from an empty list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPolicy {
    #[serde(skip)]
    pub name: String,
    #[serde(skip)]
    pub namespace: String,
    pub pod_selector: LabelSelector,
    pub policy_types: Vec<String>,
    pub ingress: Option<Vec<serde_json::Value>>,
    pub egress: Option<Vec<serde_json::Value>>,
}

impl NetworkPolicy {
    fn covers(&self, direction: &str, rules: &Option<Vec<serde_json::Value>>) -> bool {
        self.policy_types.iter().any(|t| t == direction) || rules.is_some()
    }

    pub fn applies_to_ingress(&self) -> bool {
        self.covers("Ingress", &self.ingress)
    }

    pub fn applies_to_egress(&self) -> bool {
        self.covers("Egress", &self.egress)
    }

    /// Default-deny for a direction: selects all pods, declares the policy
    /// type, and the rule list is absent. `Some(vec![])` is an allow-none
    /// policy spelled differently and still counts as rules being present.
    pub fn is_default_deny(&self, direction: &str) -> bool {
        if !self.pod_selector.is_empty() {
            return false;
        }
        if !self.policy_types.iter().any(|t| t == direction) {
            return false;
        }
        match direction {
            "Ingress" => self.ingress.is_none(),
            "Egress" => self.egress.is_none(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub namespace: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRole {
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleRef {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subject {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleBinding {
    #[serde(skip)]
    pub name: String,
    #[serde(skip)]
    pub namespace: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterRoleBinding {
    #[serde(skip)]
    pub name: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_from_spec(yaml: &str) -> NetworkPolicy {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn default_deny_requires_absent_rule_list() {
        let deny = policy_from_spec(
            r#"
podSelector: {}
policyTypes: ["Ingress"]
"#,
        );
        assert!(deny.is_default_deny("Ingress"));

        // An empty list is present, not absent.
        let empty_rules = policy_from_spec(
            r#"
podSelector: {}
policyTypes: ["Ingress"]
ingress: []
"#,
        );
        assert!(!empty_rules.is_default_deny("Ingress"));
        assert_eq!(empty_rules.ingress, Some(vec![]));
    }

    #[test]
    fn default_deny_requires_empty_selector() {
        let scoped = policy_from_spec(
            r#"
podSelector:
  matchLabels:
    app: web
policyTypes: ["Egress"]
"#,
        );
        assert!(!scoped.is_default_deny("Egress"));
    }

    #[test]
    fn policy_direction_from_types_or_rules() {
        let p = policy_from_spec(
            r#"
podSelector: {}
ingress:
  - from:
      - podSelector: {}
"#,
        );
        assert!(p.applies_to_ingress());
        assert!(!p.applies_to_egress());
    }

    #[test]
    fn all_containers_order_is_init_regular_ephemeral() {
        let spec = PodSpec {
            containers: vec![Container {
                name: "main".into(),
                ..Default::default()
            }],
            init_containers: vec![Container {
                name: "init".into(),
                ..Default::default()
            }],
            ephemeral_containers: vec![Container {
                name: "debug".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let names: Vec<_> = spec.all_containers().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["init", "main", "debug"]);
    }
}

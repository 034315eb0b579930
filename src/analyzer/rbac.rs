//! RBAC structural checks.
//!
//! Five checks over roles and bindings: cluster-admin grants, wildcard
//! permissions, unused roles, bindings to the default ServiceAccount, and
//! a privilege-escalation heuristic.

use crate::analyzer::{Analyzer, ScanContext};
use crate::cluster::object::{ClusterRole, PolicyRule, Role, RoleRef, Subject};
use crate::error::Result;
use crate::scanner::types::{Finding, FindingStatus, Severity};
use log::warn;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Verbs that grant write access for escalation purposes.
static ESCALATING_VERBS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["create", "update", "patch", "*"]));

/// RBAC resources whose write access implies privilege escalation.
static SENSITIVE_RESOURCES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "roles",
        "rolebindings",
        "clusterroles",
        "clusterrolebindings",
    ])
});

/// Built-in roles that legitimately hold broad permissions.
static WELL_KNOWN_ROLES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["cluster-admin", "admin", "edit", "view"]));

#[derive(Debug, Default)]
pub struct RbacAnalyzer;

impl RbacAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for RbacAnalyzer {
    fn name(&self) -> &'static str {
        "rbac"
    }

    fn analyze(&self, ctx: &ScanContext<'_>, namespaces: &[String]) -> Result<Vec<Finding>> {
        let cluster_roles = ctx.cluster.list_cluster_roles()?;
        let cluster_bindings = ctx.cluster.list_cluster_role_bindings()?;

        let mut roles: Vec<Role> = Vec::new();
        let mut bindings = Vec::new();
        for ns in namespaces {
            if ctx.cancel.is_cancelled() {
                break;
            }
            match ctx.cluster.list_roles(ns) {
                Ok(listed) => roles.extend(listed),
                Err(err) => {
                    warn!("failed to list roles in {}: {}", ns, err);
                    continue;
                }
            }
            match ctx.cluster.list_role_bindings(ns) {
                Ok(listed) => bindings.extend(listed),
                Err(err) => {
                    warn!("failed to list role bindings in {}: {}", ns, err);
                    continue;
                }
            }
        }

        let mut findings = Vec::new();
        check_cluster_admin_bindings(&cluster_bindings, &mut findings);
        check_wildcard_permissions(&roles, &cluster_roles, &mut findings);
        check_unused_roles(&roles, &cluster_roles, &bindings, &cluster_bindings, &mut findings);
        check_default_service_accounts(&bindings, &cluster_bindings, &mut findings);
        check_privilege_escalation(&roles, &cluster_roles, &mut findings);
        Ok(findings)
    }
}

/// RBAC-001: subjects bound to cluster-admin. One finding per subject; a
/// single pass finding when no such binding exists.
fn check_cluster_admin_bindings(
    bindings: &[crate::cluster::object::ClusterRoleBinding],
    findings: &mut Vec<Finding>,
) {
    let mut found = false;
    for binding in bindings {
        if binding.role_ref.name != "cluster-admin" {
            continue;
        }
        // Default system bindings are the platform's own.
        if binding.name.starts_with("system:") {
            continue;
        }
        for subject in &binding.subjects {
            found = true;
            findings.push(
                Finding::new(
                    "RBAC-001",
                    "cluster-admin binding detected",
                    Severity::Critical,
                    FindingStatus::Fail,
                )
                .with_description(format!(
                    "{} {:?} is bound to the cluster-admin role",
                    subject.kind, subject.name
                ))
                .with_category("rbac")
                .with_resource(format!("ClusterRoleBinding/{}", binding.name))
                .with_remediation(
                    "Replace cluster-admin with a least-privilege role scoped to what the subject needs",
                )
                .with_detail("subject_kind", subject.kind.clone())
                .with_detail("subject_name", subject.name.clone()),
            );
        }
    }
    if !found {
        findings.push(
            Finding::new(
                "RBAC-001",
                "No cluster-admin bindings",
                Severity::Info,
                FindingStatus::Pass,
            )
            .with_category("rbac")
            .with_description("No subjects are bound to the cluster-admin role"),
        );
    }
}

fn rule_has_wildcard(rule: &PolicyRule) -> bool {
    let has = |values: &[String]| values.iter().any(|v| v == "*");
    has(&rule.verbs) || has(&rule.resources) || has(&rule.api_groups)
}

/// RBAC-002: wildcard verbs, resources or apiGroups. At most one finding
/// per role; `system:` roles are the platform's own and are skipped.
fn check_wildcard_permissions(
    roles: &[Role],
    cluster_roles: &[ClusterRole],
    findings: &mut Vec<Finding>,
) {
    let mut flag = |kind: &str, name: &str, namespace: &str, rules: &[PolicyRule]| {
        if name.starts_with("system:") {
            return;
        }
        if rules.iter().any(rule_has_wildcard) {
            findings.push(
                Finding::new(
                    "RBAC-002",
                    "Role grants wildcard permissions",
                    Severity::High,
                    FindingStatus::Fail,
                )
                .with_description(format!(
                    "{} {:?} uses a wildcard in verbs, resources or apiGroups",
                    kind, name
                ))
                .with_category("rbac")
                .with_resource(format!("{}/{}", kind, name))
                .with_namespace(namespace)
                .with_remediation("Enumerate the specific verbs and resources the role needs"),
            );
        }
    };

    for role in roles {
        flag("Role", &role.name, &role.namespace, &role.rules);
    }
    for role in cluster_roles {
        flag("ClusterRole", &role.name, "", &role.rules);
    }
}

/// RBAC-003: roles no binding references. Kind and namespace take part in
/// the key so a ClusterRole never masks a namespaced Role of the same name.
fn check_unused_roles(
    roles: &[Role],
    cluster_roles: &[ClusterRole],
    bindings: &[crate::cluster::object::RoleBinding],
    cluster_bindings: &[crate::cluster::object::ClusterRoleBinding],
    findings: &mut Vec<Finding>,
) {
    let key = |role_ref: &RoleRef, namespace: &str| {
        if role_ref.kind == "ClusterRole" {
            format!("ClusterRole//{}", role_ref.name)
        } else {
            format!("Role/{}/{}", namespace, role_ref.name)
        }
    };

    let mut referenced: HashSet<String> = HashSet::new();
    for binding in bindings {
        referenced.insert(key(&binding.role_ref, &binding.namespace));
    }
    for binding in cluster_bindings {
        referenced.insert(key(&binding.role_ref, ""));
    }

    for role in roles {
        if !referenced.contains(&format!("Role/{}/{}", role.namespace, role.name)) {
            findings.push(
                Finding::new(
                    "RBAC-003",
                    "Unused role",
                    Severity::Low,
                    FindingStatus::Warning,
                )
                .with_description(format!("Role {:?} is not referenced by any binding", role.name))
                .with_category("rbac")
                .with_resource(format!("Role/{}", role.name))
                .with_namespace(role.namespace.clone())
                .with_remediation("Delete the role or bind it to the subject that needs it"),
            );
        }
    }
    for role in cluster_roles {
        if role.name.starts_with("system:") || WELL_KNOWN_ROLES.contains(role.name.as_str()) {
            continue;
        }
        if !referenced.contains(&format!("ClusterRole//{}", role.name)) {
            findings.push(
                Finding::new(
                    "RBAC-003",
                    "Unused cluster role",
                    Severity::Low,
                    FindingStatus::Warning,
                )
                .with_description(format!(
                    "ClusterRole {:?} is not referenced by any binding",
                    role.name
                ))
                .with_category("rbac")
                .with_resource(format!("ClusterRole/{}", role.name))
                .with_remediation("Delete the role or bind it to the subject that needs it"),
            );
        }
    }
}

fn is_default_sa(subject: &Subject) -> bool {
    subject.kind == "ServiceAccount" && subject.name == "default"
}

/// RBAC-004: grants to the default ServiceAccount, which every pod without
/// an explicit serviceAccountName runs as.
fn check_default_service_accounts(
    bindings: &[crate::cluster::object::RoleBinding],
    cluster_bindings: &[crate::cluster::object::ClusterRoleBinding],
    findings: &mut Vec<Finding>,
) {
    let mut flag = |resource: String, namespace: &str| {
        findings.push(
            Finding::new(
                "RBAC-004",
                "Default ServiceAccount has role bindings",
                Severity::Medium,
                FindingStatus::Fail,
            )
            .with_description(
                "Binding grants permissions to the default ServiceAccount, inherited by every pod that does not set one",
            )
            .with_category("rbac")
            .with_resource(resource)
            .with_namespace(namespace)
            .with_remediation("Create a dedicated ServiceAccount for the workload and bind that instead"),
        );
    };

    for binding in bindings {
        if binding.subjects.iter().any(is_default_sa) {
            flag(format!("RoleBinding/{}", binding.name), &binding.namespace);
        }
    }
    for binding in cluster_bindings {
        if binding.subjects.iter().any(is_default_sa) {
            flag(format!("ClusterRoleBinding/{}", binding.name), "");
        }
    }
}

fn rule_escalates(rule: &PolicyRule) -> bool {
    let sensitive = rule
        .resources
        .iter()
        .any(|r| r == "*" || SENSITIVE_RESOURCES.contains(r.as_str()));
    sensitive
        && rule
            .verbs
            .iter()
            .any(|v| ESCALATING_VERBS.contains(v.as_str()))
}

/// RBAC-005: rules that grant write access to RBAC resources, letting a
/// subject rewrite its own permissions.
fn check_privilege_escalation(
    roles: &[Role],
    cluster_roles: &[ClusterRole],
    findings: &mut Vec<Finding>,
) {
    let mut flag = |kind: &str, name: &str, namespace: &str, rules: &[PolicyRule]| {
        if name.starts_with("system:") || WELL_KNOWN_ROLES.contains(name) {
            return;
        }
        if rules.iter().any(rule_escalates) {
            findings.push(
                Finding::new(
                    "RBAC-005",
                    "Role allows privilege escalation",
                    Severity::High,
                    FindingStatus::Fail,
                )
                .with_description(format!(
                    "{} {:?} grants write access to RBAC resources",
                    kind, name
                ))
                .with_category("rbac")
                .with_resource(format!("{}/{}", kind, name))
                .with_namespace(namespace)
                .with_remediation(
                    "Restrict create/update/patch on roles and bindings to dedicated administrative subjects",
                ),
            );
        }
    };

    for role in roles {
        flag("Role", &role.name, &role.namespace, &role.rules);
    }
    for role in cluster_roles {
        flag("ClusterRole", &role.name, "", &role.rules);
    }
}

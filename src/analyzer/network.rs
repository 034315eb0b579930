//! NetworkPolicy coverage and service exposure checks.

use crate::analyzer::{Analyzer, ScanContext};
use crate::cluster::object::{NetworkPolicy, Service};
use crate::error::Result;
use crate::scanner::types::{Finding, FindingStatus, Severity};
use log::warn;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct NetworkAnalyzer;

impl NetworkAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

/// Per-namespace policy digest.
#[derive(Debug, Default)]
struct PolicyInfo {
    policy_count: usize,
    has_ingress: bool,
    has_egress: bool,
    default_deny_ingress: bool,
    default_deny_egress: bool,
}

fn digest(policies: &[NetworkPolicy]) -> PolicyInfo {
    let mut info = PolicyInfo {
        policy_count: policies.len(),
        ..Default::default()
    };
    for policy in policies {
        info.has_ingress |= policy.applies_to_ingress();
        info.has_egress |= policy.applies_to_egress();
        info.default_deny_ingress |= policy.is_default_deny("Ingress");
        info.default_deny_egress |= policy.is_default_deny("Egress");
    }
    info
}

impl Analyzer for NetworkAnalyzer {
    fn name(&self) -> &'static str {
        "network"
    }

    fn analyze(&self, ctx: &ScanContext<'_>, namespaces: &[String]) -> Result<Vec<Finding>> {
        let mut ns_policies: BTreeMap<String, Vec<NetworkPolicy>> = BTreeMap::new();
        let mut ns_services: BTreeMap<String, Vec<Service>> = BTreeMap::new();
        for ns in namespaces {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let policies = match ctx.cluster.list_network_policies(ns) {
                Ok(policies) => policies,
                Err(e) => {
                    warn!("skipping namespace {}: listing network policies failed: {}", ns, e);
                    continue;
                }
            };
            let services = match ctx.cluster.list_services(ns) {
                Ok(services) => services,
                Err(e) => {
                    warn!("skipping namespace {}: listing services failed: {}", ns, e);
                    continue;
                }
            };
            ns_policies.insert(ns.clone(), policies);
            ns_services.insert(ns.clone(), services);
        }

        let mut findings = Vec::new();
        check_namespace_coverage(&ns_policies, &mut findings);
        check_default_deny(&ns_policies, &mut findings);
        check_direction_coverage(&ns_policies, &mut findings);
        check_exposed_services(&ns_services, &ns_policies, &mut findings);
        Ok(findings)
    }
}

/// Severity band for a coverage percentage.
fn coverage_severity(pct: f64) -> Severity {
    if pct >= 100.0 {
        Severity::Info
    } else if pct >= 75.0 {
        Severity::Low
    } else if pct >= 50.0 {
        Severity::Medium
    } else if pct >= 25.0 {
        Severity::High
    } else {
        Severity::Critical
    }
}

fn coverage_status(pct: f64) -> FindingStatus {
    if pct >= 100.0 {
        FindingStatus::Pass
    } else if pct >= 50.0 {
        FindingStatus::Warning
    } else {
        FindingStatus::Fail
    }
}

/// NET-001 per uncovered namespace, NET-002 for overall coverage. A scan
/// with zero user namespaces has nothing left unprotected and reports a
/// trivial 100% pass.
fn check_namespace_coverage(
    ns_policies: &BTreeMap<String, Vec<NetworkPolicy>>,
    findings: &mut Vec<Finding>,
) {
    let total = ns_policies.len();
    let mut covered = 0usize;

    for (ns, policies) in ns_policies {
        if policies.is_empty() {
            findings.push(
                Finding::new(
                    "NET-001",
                    "Namespace has no NetworkPolicies",
                    Severity::High,
                    FindingStatus::Fail,
                )
                .with_description(format!(
                    "Namespace {:?} has no NetworkPolicies, meaning all pods accept unrestricted traffic",
                    ns
                ))
                .with_category("network")
                .with_resource(format!("Namespace/{}", ns))
                .with_namespace(ns.clone())
                .with_remediation(
                    "Create NetworkPolicies to restrict ingress and egress traffic. Start with a default-deny policy and add explicit allow rules.",
                ),
            );
        } else {
            covered += 1;
        }
    }

    let pct = if total > 0 {
        covered as f64 / total as f64 * 100.0
    } else {
        100.0
    };
    findings.push(
        Finding::new(
            "NET-002",
            "NetworkPolicy namespace coverage",
            coverage_severity(pct),
            coverage_status(pct),
        )
        .with_description(format!(
            "{:.0}% of namespaces ({}/{}) have at least one NetworkPolicy",
            pct, covered, total
        ))
        .with_category("network")
        .with_detail("covered", covered.to_string())
        .with_detail("total", total.to_string())
        .with_detail("coverage", format!("{:.1}%", pct)),
    );
}

/// NET-003/NET-004: namespaces with policies but no default-deny for a
/// direction. Namespaces without any policy are already covered by NET-001.
fn check_default_deny(
    ns_policies: &BTreeMap<String, Vec<NetworkPolicy>>,
    findings: &mut Vec<Finding>,
) {
    for (ns, policies) in ns_policies {
        if policies.is_empty() {
            continue;
        }
        let info = digest(policies);

        if !info.default_deny_ingress {
            findings.push(
                Finding::new(
                    "NET-003",
                    "Missing default-deny ingress policy",
                    Severity::Medium,
                    FindingStatus::Fail,
                )
                .with_description(format!(
                    "Namespace {:?} lacks a default-deny ingress NetworkPolicy; pods without explicit policies accept all ingress",
                    ns
                ))
                .with_category("network")
                .with_resource(format!("Namespace/{}", ns))
                .with_namespace(ns.clone())
                .with_remediation(
                    "Create a NetworkPolicy with podSelector: {} and policyTypes: [Ingress] with no ingress rules to deny all ingress by default.",
                ),
            );
        }
        if !info.default_deny_egress {
            findings.push(
                Finding::new(
                    "NET-004",
                    "Missing default-deny egress policy",
                    Severity::Medium,
                    FindingStatus::Warning,
                )
                .with_description(format!(
                    "Namespace {:?} lacks a default-deny egress NetworkPolicy; pods without explicit policies can send traffic anywhere",
                    ns
                ))
                .with_category("network")
                .with_resource(format!("Namespace/{}", ns))
                .with_namespace(ns.clone())
                .with_remediation(
                    "Create a NetworkPolicy with podSelector: {} and policyTypes: [Egress] with no egress rules to deny all egress by default.",
                ),
            );
        }
    }
}

/// NET-005: policies cover ingress but never egress.
fn check_direction_coverage(
    ns_policies: &BTreeMap<String, Vec<NetworkPolicy>>,
    findings: &mut Vec<Finding>,
) {
    for (ns, policies) in ns_policies {
        if policies.is_empty() {
            continue;
        }
        let info = digest(policies);
        if info.has_ingress && !info.has_egress {
            findings.push(
                Finding::new(
                    "NET-005",
                    "Namespace has ingress policies but no egress policies",
                    Severity::Low,
                    FindingStatus::Warning,
                )
                .with_description(format!(
                    "Namespace {:?} has {} NetworkPolicies covering ingress but none covering egress",
                    ns, info.policy_count
                ))
                .with_category("network")
                .with_resource(format!("Namespace/{}", ns))
                .with_namespace(ns.clone())
                .with_remediation(
                    "Add egress NetworkPolicies to control outbound traffic and prevent data exfiltration.",
                ),
            );
        }
    }
}

/// NET-006/NET-007 for exposed services, escalated to NET-008 when the
/// service sits in a namespace with no policies at all.
fn check_exposed_services(
    ns_services: &BTreeMap<String, Vec<Service>>,
    ns_policies: &BTreeMap<String, Vec<NetworkPolicy>>,
    findings: &mut Vec<Finding>,
) {
    for (ns, services) in ns_services {
        let unprotected = ns_policies
            .get(ns)
            .map(|p| p.is_empty())
            .unwrap_or(true);

        for svc in services {
            let exposed = match svc.type_.as_str() {
                "NodePort" => {
                    for port in &svc.ports {
                        if let Some(node_port) = port.node_port {
                            findings.push(
                                Finding::new(
                                    "NET-006",
                                    "NodePort service detected",
                                    Severity::Medium,
                                    FindingStatus::Warning,
                                )
                                .with_description(format!(
                                    "Service {}/{} exposes NodePort {}",
                                    ns, svc.name, node_port
                                ))
                                .with_category("network")
                                .with_resource(format!("Service/{}/{}", ns, svc.name))
                                .with_namespace(ns.clone())
                                .with_remediation(
                                    "Consider using a LoadBalancer or Ingress controller instead of NodePort to avoid exposing ports on all cluster nodes.",
                                )
                                .with_detail("node_port", node_port.to_string()),
                            );
                        }
                    }
                    true
                }
                "LoadBalancer" => {
                    findings.push(
                        Finding::new(
                            "NET-007",
                            "LoadBalancer service detected",
                            Severity::Low,
                            FindingStatus::Warning,
                        )
                        .with_description(format!(
                            "Service {}/{} is exposed via LoadBalancer",
                            ns, svc.name
                        ))
                        .with_category("network")
                        .with_resource(format!("Service/{}/{}", ns, svc.name))
                        .with_namespace(ns.clone())
                        .with_remediation(
                            "Verify that the LoadBalancer has appropriate security group rules and is not publicly accessible unless intended.",
                        ),
                    );
                    true
                }
                _ => false,
            };

            if exposed && unprotected {
                findings.push(
                    Finding::new(
                        "NET-008",
                        "Exposed service in unprotected namespace",
                        Severity::High,
                        FindingStatus::Fail,
                    )
                    .with_description(format!(
                        "Service {}/{} is externally reachable and namespace {:?} has no NetworkPolicies to limit where its traffic can go",
                        ns, svc.name, ns
                    ))
                    .with_category("network")
                    .with_resource(format!("Service/{}/{}", ns, svc.name))
                    .with_namespace(ns.clone())
                    .with_remediation(
                        "Add NetworkPolicies to the namespace before exposing services outside the cluster.",
                    ),
                );
            }
        }
    }
}

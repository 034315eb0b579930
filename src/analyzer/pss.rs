//! Pod Security Standards checks (Baseline and Restricted profiles).
//!
//! Each rule scans every container of a pod spec, init then regular then
//! ephemeral, with no short-circuit. Pods are checked directly; workloads
//! through their pod templates.

use crate::analyzer::{Analyzer, ScanContext};
use crate::cluster::object::{Container, PodSpec};
use crate::error::Result;
use crate::scanner::types::{Finding, FindingStatus, Severity};
use log::warn;
use once_cell::sync::Lazy;
use std::collections::HashSet;

const BASELINE: &str = "baseline";
const RESTRICTED: &str = "restricted";

/// Capabilities the Baseline profile allows adding.
static SAFE_CAPABILITIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "AUDIT_WRITE",
        "CHOWN",
        "DAC_OVERRIDE",
        "FOWNER",
        "FSETID",
        "KILL",
        "MKNOD",
        "NET_BIND_SERVICE",
        "SETFCAP",
        "SETGID",
        "SETPCAP",
        "SETUID",
        "SYS_CHROOT",
    ])
});

#[derive(Debug, Default)]
pub struct PssChecker;

impl PssChecker {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for PssChecker {
    fn name(&self) -> &'static str {
        "pss"
    }

    fn analyze(&self, ctx: &ScanContext<'_>, namespaces: &[String]) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();

        for ns in namespaces {
            if ctx.cancel.is_cancelled() {
                break;
            }
            match ctx.cluster.list_pods(ns) {
                Ok(pods) => {
                    for pod in &pods {
                        let resource = format!("Pod/{}/{}", pod.namespace, pod.name);
                        check_pod_spec(&pod.spec, &resource, &pod.namespace, &mut findings);
                    }
                }
                Err(err) => {
                    warn!("failed to list pods in {}: {}", ns, err);
                    continue;
                }
            }
            match ctx.cluster.list_workloads(ns) {
                Ok(workloads) => {
                    for w in &workloads {
                        let resource = format!("{}/{}/{}", w.kind, w.namespace, w.name);
                        check_pod_spec(&w.template, &resource, &w.namespace, &mut findings);
                    }
                }
                Err(err) => {
                    warn!("failed to list workloads in {}: {}", ns, err);
                    continue;
                }
            }
        }

        Ok(findings)
    }
}

fn check_pod_spec(spec: &PodSpec, resource: &str, namespace: &str, findings: &mut Vec<Finding>) {
    // Baseline.
    check_privileged(spec, resource, namespace, findings);
    check_host_namespaces(spec, resource, namespace, findings);
    check_host_ports(spec, resource, namespace, findings);
    check_capabilities(spec, resource, namespace, findings);
    check_volume_types(spec, resource, namespace, findings);
    check_proc_mount(spec, resource, namespace, findings);

    // Restricted.
    check_run_as_non_root(spec, resource, namespace, findings);
    check_seccomp_profile(spec, resource, namespace, findings);
    check_drop_all_capabilities(spec, resource, namespace, findings);
    check_allow_privilege_escalation(spec, resource, namespace, findings);
    check_read_only_root_filesystem(spec, resource, namespace, findings);
}

fn pss_finding(
    id: &str,
    title: &str,
    severity: Severity,
    status: FindingStatus,
    resource: &str,
    namespace: &str,
    profile: &str,
) -> Finding {
    Finding::new(id, title, severity, status)
        .with_category("pss")
        .with_resource(resource)
        .with_namespace(namespace)
        .with_detail("profile", profile)
}

fn check_privileged(spec: &PodSpec, resource: &str, namespace: &str, findings: &mut Vec<Finding>) {
    for container in spec.all_containers() {
        let privileged = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.privileged)
            .unwrap_or(false);
        if privileged {
            findings.push(
                pss_finding(
                    "PSS-B001",
                    "Privileged container",
                    Severity::Critical,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    BASELINE,
                )
                .with_description(format!(
                    "Container {:?} in {} runs in privileged mode",
                    container.name, resource
                ))
                .with_remediation(
                    "Set securityContext.privileged to false. Privileged containers have full access to the host.",
                )
                .with_detail("container", container.name.clone()),
            );
        }
    }
}

fn check_host_namespaces(
    spec: &PodSpec,
    resource: &str,
    namespace: &str,
    findings: &mut Vec<Finding>,
) {
    if spec.host_network {
        findings.push(
            pss_finding(
                "PSS-B002",
                "hostNetwork enabled",
                Severity::High,
                FindingStatus::Fail,
                resource,
                namespace,
                BASELINE,
            )
            .with_description(format!(
                "{} uses hostNetwork, sharing the host's network namespace",
                resource
            ))
            .with_remediation(
                "Set spec.hostNetwork to false unless the pod genuinely requires host network access.",
            ),
        );
    }
    if spec.host_pid {
        findings.push(
            pss_finding(
                "PSS-B003",
                "hostPID enabled",
                Severity::High,
                FindingStatus::Fail,
                resource,
                namespace,
                BASELINE,
            )
            .with_description(format!(
                "{} uses hostPID, sharing the host's PID namespace",
                resource
            ))
            .with_remediation(
                "Set spec.hostPID to false. Sharing the host PID namespace allows containers to see and signal host processes.",
            ),
        );
    }
    if spec.host_ipc {
        findings.push(
            pss_finding(
                "PSS-B004",
                "hostIPC enabled",
                Severity::High,
                FindingStatus::Fail,
                resource,
                namespace,
                BASELINE,
            )
            .with_description(format!(
                "{} uses hostIPC, sharing the host's IPC namespace",
                resource
            ))
            .with_remediation(
                "Set spec.hostIPC to false. Sharing the host IPC namespace enables container access to host shared memory.",
            ),
        );
    }
}

fn check_host_ports(spec: &PodSpec, resource: &str, namespace: &str, findings: &mut Vec<Finding>) {
    for container in spec.all_containers() {
        for port in &container.ports {
            if let Some(host_port) = port.host_port.filter(|p| *p != 0) {
                findings.push(
                    pss_finding(
                        "PSS-B005",
                        "Container uses hostPort",
                        Severity::Medium,
                        FindingStatus::Fail,
                        resource,
                        namespace,
                        BASELINE,
                    )
                    .with_description(format!(
                        "Container {:?} in {} uses hostPort {}",
                        container.name, resource, host_port
                    ))
                    .with_remediation(
                        "Remove hostPort mapping. Use Services or Ingress to expose ports instead.",
                    )
                    .with_detail("container", container.name.clone())
                    .with_detail("host_port", host_port.to_string()),
                );
            }
        }
    }
}

fn check_capabilities(spec: &PodSpec, resource: &str, namespace: &str, findings: &mut Vec<Finding>) {
    for container in spec.all_containers() {
        let added = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.capabilities.as_ref())
            .map(|c| c.add.as_slice())
            .unwrap_or(&[]);
        for cap in added {
            if !SAFE_CAPABILITIES.contains(cap.as_str()) {
                findings.push(
                    pss_finding(
                        "PSS-B006",
                        "Dangerous capability added",
                        Severity::High,
                        FindingStatus::Fail,
                        resource,
                        namespace,
                        BASELINE,
                    )
                    .with_description(format!(
                        "Container {:?} in {} adds capability {} which is not in the Baseline safe set",
                        container.name, resource, cap
                    ))
                    .with_remediation(format!(
                        "Remove capability {} from securityContext.capabilities.add. Only baseline-approved capabilities should be added.",
                        cap
                    ))
                    .with_detail("container", container.name.clone())
                    .with_detail("capability", cap.clone()),
                );
            }
        }
    }
}

fn check_volume_types(spec: &PodSpec, resource: &str, namespace: &str, findings: &mut Vec<Finding>) {
    for volume in &spec.volumes {
        if let Some(host_path) = &volume.host_path {
            let path = host_path
                .get("path")
                .and_then(|p| p.as_str())
                .unwrap_or("")
                .to_string();
            findings.push(
                pss_finding(
                    "PSS-B007",
                    "HostPath volume mount",
                    Severity::High,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    BASELINE,
                )
                .with_description(format!(
                    "{} mounts a hostPath volume {:?} at {}",
                    resource, volume.name, path
                ))
                .with_remediation(
                    "Replace hostPath volumes with persistent volumes, ConfigMaps, or Secrets.",
                )
                .with_detail("volume_name", volume.name.clone())
                .with_detail("host_path", path),
            );
        }
    }
}

fn check_proc_mount(spec: &PodSpec, resource: &str, namespace: &str, findings: &mut Vec<Finding>) {
    for container in spec.all_containers() {
        let proc_mount = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.proc_mount.as_deref());
        if let Some(mount) = proc_mount.filter(|m| *m != "Default") {
            findings.push(
                pss_finding(
                    "PSS-B008",
                    "Non-default procMount",
                    Severity::Medium,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    BASELINE,
                )
                .with_description(format!(
                    "Container {:?} in {} uses procMount {:?} instead of Default",
                    container.name, resource, mount
                ))
                .with_remediation("Set securityContext.procMount to Default or remove the field.")
                .with_detail("container", container.name.clone())
                .with_detail("procMount", mount.to_string()),
            );
        }
    }
}

fn check_run_as_non_root(
    spec: &PodSpec,
    resource: &str,
    namespace: &str,
    findings: &mut Vec<Finding>,
) {
    let pod_sc = spec.security_context.as_ref();
    let pod_non_root = pod_sc.and_then(|sc| sc.run_as_non_root).unwrap_or(false);
    let pod_has_uid = pod_sc.and_then(|sc| sc.run_as_user).map(|u| u > 0).unwrap_or(false);

    for container in spec.all_containers() {
        let sc = container.security_context.as_ref();
        let container_non_root = sc.and_then(|s| s.run_as_non_root).unwrap_or(false);
        let container_has_uid = sc.and_then(|s| s.run_as_user).map(|u| u > 0).unwrap_or(false);

        if !pod_non_root && !container_non_root && !pod_has_uid && !container_has_uid {
            findings.push(
                pss_finding(
                    "PSS-R001",
                    "Container may run as root",
                    Severity::High,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    RESTRICTED,
                )
                .with_description(format!(
                    "Container {:?} in {} does not set runAsNonRoot: true and does not specify a non-root runAsUser",
                    container.name, resource
                ))
                .with_remediation(
                    "Set securityContext.runAsNonRoot: true or specify a non-root runAsUser at the pod or container level.",
                )
                .with_detail("container", container.name.clone()),
            );
        }
    }
}

fn has_restricted_seccomp(profile: Option<&crate::cluster::object::SeccompProfile>) -> bool {
    profile
        .and_then(|p| p.type_.as_deref())
        .map(|t| t == "RuntimeDefault" || t == "Localhost")
        .unwrap_or(false)
}

fn check_seccomp_profile(
    spec: &PodSpec,
    resource: &str,
    namespace: &str,
    findings: &mut Vec<Finding>,
) {
    let pod_has_seccomp = has_restricted_seccomp(
        spec.security_context
            .as_ref()
            .and_then(|sc| sc.seccomp_profile.as_ref()),
    );

    for container in spec.all_containers() {
        let container_has_seccomp = has_restricted_seccomp(
            container
                .security_context
                .as_ref()
                .and_then(|sc| sc.seccomp_profile.as_ref()),
        );
        if !pod_has_seccomp && !container_has_seccomp {
            findings.push(
                pss_finding(
                    "PSS-R002",
                    "Missing seccomp profile",
                    Severity::Medium,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    RESTRICTED,
                )
                .with_description(format!(
                    "Container {:?} in {} does not have a seccomp profile set (RuntimeDefault or Localhost required)",
                    container.name, resource
                ))
                .with_remediation(
                    "Set securityContext.seccompProfile.type to RuntimeDefault or Localhost.",
                )
                .with_detail("container", container.name.clone()),
            );
        }
    }
}

fn drops_all(container: &Container) -> bool {
    container
        .security_context
        .as_ref()
        .and_then(|sc| sc.capabilities.as_ref())
        .map(|c| c.drop.iter().any(|d| d.eq_ignore_ascii_case("ALL")))
        .unwrap_or(false)
}

fn check_drop_all_capabilities(
    spec: &PodSpec,
    resource: &str,
    namespace: &str,
    findings: &mut Vec<Finding>,
) {
    for container in spec.all_containers() {
        if !drops_all(container) {
            findings.push(
                pss_finding(
                    "PSS-R003",
                    "Capabilities not dropped",
                    Severity::Medium,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    RESTRICTED,
                )
                .with_description(format!(
                    "Container {:?} in {} does not drop ALL capabilities",
                    container.name, resource
                ))
                .with_remediation(
                    "Set securityContext.capabilities.drop: [ALL]. You may then add back only NET_BIND_SERVICE if needed.",
                )
                .with_detail("container", container.name.clone()),
            );
        }
    }
}

fn check_allow_privilege_escalation(
    spec: &PodSpec,
    resource: &str,
    namespace: &str,
    findings: &mut Vec<Finding>,
) {
    for container in spec.all_containers() {
        // Defaults to true when unset, so only an explicit false passes.
        let explicitly_false = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.allow_privilege_escalation)
            == Some(false);
        if !explicitly_false {
            findings.push(
                pss_finding(
                    "PSS-R004",
                    "Privilege escalation allowed",
                    Severity::Medium,
                    FindingStatus::Fail,
                    resource,
                    namespace,
                    RESTRICTED,
                )
                .with_description(format!(
                    "Container {:?} in {} allows privilege escalation (allowPrivilegeEscalation is not set to false)",
                    container.name, resource
                ))
                .with_remediation("Set securityContext.allowPrivilegeEscalation: false.")
                .with_detail("container", container.name.clone()),
            );
        }
    }
}

fn check_read_only_root_filesystem(
    spec: &PodSpec,
    resource: &str,
    namespace: &str,
    findings: &mut Vec<Finding>,
) {
    for container in spec.all_containers() {
        let read_only = container
            .security_context
            .as_ref()
            .and_then(|sc| sc.read_only_root_filesystem)
            .unwrap_or(false);
        if !read_only {
            findings.push(
                pss_finding(
                    "PSS-R005",
                    "Root filesystem is writable",
                    Severity::Low,
                    FindingStatus::Warning,
                    resource,
                    namespace,
                    RESTRICTED,
                )
                .with_description(format!(
                    "Container {:?} in {} does not have a read-only root filesystem",
                    container.name, resource
                ))
                .with_remediation(
                    "Set securityContext.readOnlyRootFilesystem: true and use emptyDir or tmpfs volumes for writable paths.",
                )
                .with_detail("container", container.name.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::snapshot::SnapshotCluster;
    use crate::cluster::ClusterReader;

    fn scan(yaml: &str) -> Vec<Finding> {
        let cluster = SnapshotCluster::from_yaml("test", yaml).unwrap();
        let ctx = ScanContext::new(&cluster);
        let namespaces = cluster.namespaces_for_scan(&[], false).unwrap();
        PssChecker::new().analyze(&ctx, &namespaces).unwrap()
    }

    fn ids(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.id.as_str()).collect()
    }

    const HARDENED_POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: hardened
  namespace: dev
spec:
  securityContext:
    runAsNonRoot: true
    seccompProfile:
      type: RuntimeDefault
  containers:
    - name: app
      image: app:1.0
      securityContext:
        allowPrivilegeEscalation: false
        readOnlyRootFilesystem: true
        capabilities:
          drop: ["ALL"]
"#;

    #[test]
    fn hardened_pod_yields_no_findings() {
        assert!(scan(HARDENED_POD).is_empty());
    }

    #[test]
    fn privileged_container_is_critical_fail() {
        let findings = scan(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: priv
  namespace: dev
spec:
  containers:
    - name: app
      securityContext:
        privileged: true
"#,
        );
        let priv_findings: Vec<_> = findings.iter().filter(|f| f.id == "PSS-B001").collect();
        assert_eq!(priv_findings.len(), 1);
        assert_eq!(priv_findings[0].severity, Severity::Critical);
        assert_eq!(priv_findings[0].status, FindingStatus::Fail);
        assert_eq!(priv_findings[0].resource, "Pod/dev/priv");
    }

    #[test]
    fn unset_allow_privilege_escalation_fails() {
        let findings = scan(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: lax
  namespace: dev
spec:
  securityContext:
    runAsNonRoot: true
    seccompProfile:
      type: RuntimeDefault
  containers:
    - name: app
      securityContext:
        readOnlyRootFilesystem: true
        capabilities:
          drop: ["ALL"]
"#,
        );
        assert_eq!(ids(&findings), vec!["PSS-R004"]);
    }

    #[test]
    fn host_namespaces_each_produce_a_finding() {
        let findings = scan(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: hosty
  namespace: dev
spec:
  hostNetwork: true
  hostPID: true
  hostIPC: true
  containers: []
"#,
        );
        let got = ids(&findings);
        assert!(got.contains(&"PSS-B002"));
        assert!(got.contains(&"PSS-B003"));
        assert!(got.contains(&"PSS-B004"));
    }

    #[test]
    fn every_container_is_checked_without_short_circuit() {
        let findings = scan(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: multi
  namespace: dev
spec:
  initContainers:
    - name: setup
      securityContext:
        privileged: true
  containers:
    - name: app
      securityContext:
        privileged: true
  ephemeralContainers:
    - name: debug
      securityContext:
        privileged: true
"#,
        );
        let privileged: Vec<_> = findings
            .iter()
            .filter(|f| f.id == "PSS-B001")
            .map(|f| f.details["container"].as_str())
            .collect();
        assert_eq!(privileged, vec!["setup", "app", "debug"]);
    }

    #[test]
    fn unsafe_capability_and_hostpath_are_flagged() {
        let findings = scan(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: capful
  namespace: dev
spec:
  volumes:
    - name: host
      hostPath:
        path: /var/run
  containers:
    - name: app
      securityContext:
        capabilities:
          add: ["NET_BIND_SERVICE", "SYS_ADMIN"]
"#,
        );
        let caps: Vec<_> = findings.iter().filter(|f| f.id == "PSS-B006").collect();
        assert_eq!(caps.len(), 1);
        assert_eq!(caps[0].details["capability"], "SYS_ADMIN");
        let host_path: Vec<_> = findings.iter().filter(|f| f.id == "PSS-B007").collect();
        assert_eq!(host_path.len(), 1);
        assert_eq!(host_path[0].details["host_path"], "/var/run");
    }

    #[test]
    fn workload_templates_are_checked() {
        let findings = scan(
            r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  namespace: prod
spec:
  template:
    spec:
      containers:
        - name: api
          ports:
            - containerPort: 8080
              hostPort: 8080
          securityContext:
            runAsNonRoot: true
            allowPrivilegeEscalation: false
            readOnlyRootFilesystem: true
            seccompProfile:
              type: RuntimeDefault
            capabilities:
              drop: ["all"]
"#,
        );
        assert_eq!(ids(&findings), vec!["PSS-B005"]);
        assert_eq!(findings[0].resource, "Deployment/prod/api");
    }

    #[test]
    fn writable_root_filesystem_is_a_low_warning() {
        let findings = scan(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: writable
  namespace: dev
spec:
  securityContext:
    runAsUser: 1000
    seccompProfile:
      type: Localhost
  containers:
    - name: app
      securityContext:
        allowPrivilegeEscalation: false
        capabilities:
          drop: ["ALL"]
"#,
        );
        assert_eq!(ids(&findings), vec!["PSS-R005"]);
        assert_eq!(findings[0].severity, Severity::Low);
        assert_eq!(findings[0].status, FindingStatus::Warning);
    }
}

//! Manifest-snapshot-backed [`ClusterReader`].
//!
//! Parses a YAML file or directory tree of Kubernetes manifests into the
//! typed model, keeping the raw JSON alongside for rule evaluation. Files
//! that fail to parse are logged and skipped so one bad manifest does not
//! sink the snapshot.

use crate::cluster::object::*;
use crate::cluster::ClusterReader;
use crate::error::{Result, ScanError};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct SnapshotCluster {
    name: String,
    namespaces: BTreeSet<String>,
    pods: Vec<Pod>,
    workloads: Vec<Workload>,
    services: Vec<Service>,
    network_policies: Vec<NetworkPolicy>,
    roles: Vec<Role>,
    role_bindings: Vec<RoleBinding>,
    cluster_roles: Vec<ClusterRole>,
    cluster_role_bindings: Vec<ClusterRoleBinding>,
    pods_raw: Vec<(String, serde_json::Value)>,
    workloads_raw: Vec<(String, serde_json::Value)>,
}

impl SnapshotCluster {
    /// Load a snapshot from a single YAML file or a directory of them.
    pub fn from_path(cluster_name: impl Into<String>, path: &Path) -> Result<Self> {
        let mut snapshot = Self {
            name: cluster_name.into(),
            ..Default::default()
        };

        if !path.exists() {
            return Err(ScanError::Config(format!(
                "manifest path does not exist: {}",
                path.display()
            )));
        }

        let mut loaded = 0usize;
        if path.is_file() {
            snapshot.ingest_file(path)?;
            loaded += 1;
        } else {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if !p.is_file() {
                    continue;
                }
                let is_yaml = p
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
                    .unwrap_or(false);
                if !is_yaml {
                    continue;
                }
                if let Err(err) = snapshot.ingest_file(p) {
                    warn!("skipping manifest {}: {}", p.display(), err);
                    continue;
                }
                loaded += 1;
            }
        }
        debug!("snapshot loaded from {} files", loaded);
        Ok(snapshot)
    }

    /// Build a snapshot from inline YAML content. Used by tests and the
    /// stdin path of the CLI.
    pub fn from_yaml(cluster_name: impl Into<String>, content: &str) -> Result<Self> {
        let mut snapshot = Self {
            name: cluster_name.into(),
            ..Default::default()
        };
        snapshot.ingest_content(content)?;
        Ok(snapshot)
    }

    fn ingest_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.ingest_content(&content)
    }

    fn ingest_content(&mut self, content: &str) -> Result<()> {
        for document in serde_yaml::Deserializer::from_str(content) {
            let value: serde_yaml::Value = match serde_yaml::Value::deserialize(document) {
                Ok(v) => v,
                Err(err) => return Err(ScanError::Parse(err.to_string())),
            };
            if value.is_null() {
                continue;
            }
            if let Err(err) = self.ingest_document(&value) {
                warn!("skipping document: {}", err);
            }
        }
        Ok(())
    }

    fn ingest_document(&mut self, doc: &serde_yaml::Value) -> Result<()> {
        let kind = doc
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| ScanError::Parse("document has no kind".into()))?
            .to_string();

        let metadata = doc.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string();
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(|n| n.as_str())
            .unwrap_or("default")
            .to_string();

        match kind.as_str() {
            "Namespace" => {
                self.namespaces.insert(name);
            }
            "Pod" => {
                let spec = decode_section::<PodSpec>(doc, "spec")?;
                self.namespaces.insert(namespace.clone());
                self.pods_raw
                    .push((namespace.clone(), to_json(doc)?));
                self.pods.push(Pod {
                    name,
                    namespace,
                    spec,
                });
            }
            "Deployment" | "DaemonSet" | "StatefulSet" => {
                let template = doc
                    .get("spec")
                    .and_then(|s| s.get("template"))
                    .and_then(|t| t.get("spec"))
                    .cloned()
                    .unwrap_or(serde_yaml::Value::Null);
                let template: PodSpec = if template.is_null() {
                    PodSpec::default()
                } else {
                    serde_yaml::from_value(template)
                        .map_err(|e| ScanError::Parse(e.to_string()))?
                };
                self.namespaces.insert(namespace.clone());
                self.workloads_raw
                    .push((namespace.clone(), to_json(doc)?));
                self.workloads.push(Workload {
                    kind,
                    name,
                    namespace,
                    template,
                });
            }
            "Service" => {
                let type_ = doc
                    .get("spec")
                    .and_then(|s| s.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("ClusterIP")
                    .to_string();
                let ports = doc
                    .get("spec")
                    .and_then(|s| s.get("ports"))
                    .map(|p| {
                        serde_yaml::from_value(p.clone())
                            .map_err(|e| ScanError::Parse(e.to_string()))
                    })
                    .transpose()?
                    .unwrap_or_default();
                self.namespaces.insert(namespace.clone());
                self.services.push(Service {
                    name,
                    namespace,
                    type_,
                    ports,
                });
            }
            "NetworkPolicy" => {
                let mut policy = decode_section::<NetworkPolicy>(doc, "spec")?;
                policy.name = name;
                policy.namespace = namespace.clone();
                self.namespaces.insert(namespace);
                self.network_policies.push(policy);
            }
            "Role" => {
                let rules = decode_rules(doc)?;
                self.namespaces.insert(namespace.clone());
                self.roles.push(Role {
                    name,
                    namespace,
                    rules,
                });
            }
            "ClusterRole" => {
                let rules = decode_rules(doc)?;
                self.cluster_roles.push(ClusterRole { name, rules });
            }
            "RoleBinding" => {
                let role_ref = decode_section::<RoleRef>(doc, "roleRef")?;
                let subjects = decode_subjects(doc)?;
                self.namespaces.insert(namespace.clone());
                self.role_bindings.push(RoleBinding {
                    name,
                    namespace,
                    role_ref,
                    subjects,
                });
            }
            "ClusterRoleBinding" => {
                let role_ref = decode_section::<RoleRef>(doc, "roleRef")?;
                let subjects = decode_subjects(doc)?;
                self.cluster_role_bindings.push(ClusterRoleBinding {
                    name,
                    role_ref,
                    subjects,
                });
            }
            other => {
                debug!("ignoring unsupported kind {:?}", other);
            }
        }
        Ok(())
    }
}

fn to_json(doc: &serde_yaml::Value) -> Result<serde_json::Value> {
    serde_json::to_value(doc).map_err(|e| ScanError::Parse(e.to_string()))
}

fn decode_section<T: Default + serde::de::DeserializeOwned>(
    doc: &serde_yaml::Value,
    key: &str,
) -> Result<T> {
    match doc.get(key) {
        Some(section) => {
            serde_yaml::from_value(section.clone()).map_err(|e| ScanError::Parse(e.to_string()))
        }
        None => Ok(T::default()),
    }
}

fn decode_rules(doc: &serde_yaml::Value) -> Result<Vec<PolicyRule>> {
    match doc.get("rules") {
        Some(rules) => {
            serde_yaml::from_value(rules.clone()).map_err(|e| ScanError::Parse(e.to_string()))
        }
        None => Ok(Vec::new()),
    }
}

fn decode_subjects(doc: &serde_yaml::Value) -> Result<Vec<Subject>> {
    match doc.get("subjects") {
        Some(subjects) => {
            serde_yaml::from_value(subjects.clone()).map_err(|e| ScanError::Parse(e.to_string()))
        }
        None => Ok(Vec::new()),
    }
}

impl ClusterReader for SnapshotCluster {
    fn cluster_name(&self) -> String {
        self.name.clone()
    }

    fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>> {
        Ok(self
            .namespaces
            .iter()
            .map(|name| NamespaceInfo {
                name: name.clone(),
                labels: Default::default(),
            })
            .collect())
    }

    fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        Ok(self
            .services
            .iter()
            .filter(|s| s.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_network_policies(&self, namespace: &str) -> Result<Vec<NetworkPolicy>> {
        Ok(self
            .network_policies
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_roles(&self, namespace: &str) -> Result<Vec<Role>> {
        Ok(self
            .roles
            .iter()
            .filter(|r| r.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>> {
        Ok(self
            .role_bindings
            .iter()
            .filter(|b| b.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>> {
        Ok(self.cluster_roles.clone())
    }

    fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>> {
        Ok(self.cluster_role_bindings.clone())
    }

    fn list_workloads(&self, namespace: &str) -> Result<Vec<Workload>> {
        Ok(self
            .workloads
            .iter()
            .filter(|w| w.namespace == namespace)
            .cloned()
            .collect())
    }

    fn list_pods_json(&self, namespace: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .pods_raw
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn list_workloads_json(&self, namespace: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .workloads_raw
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::is_system_namespace;

    const MANIFESTS: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: prod
---
apiVersion: v1
kind: Pod
metadata:
  name: web
  namespace: prod
spec:
  containers:
    - name: web
      image: nginx
---
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: deny-all
  namespace: prod
spec:
  podSelector: {}
  policyTypes: ["Ingress"]
---
apiVersion: v1
kind: Service
metadata:
  name: web
  namespace: prod
spec:
  type: NodePort
  ports:
    - port: 80
      nodePort: 30080
---
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
          image: api:1.0
          securityContext:
            privileged: true
"#;

    #[test]
    fn parses_multi_document_yaml() {
        let cluster = SnapshotCluster::from_yaml("test", MANIFESTS).unwrap();
        assert_eq!(cluster.list_pods("prod").unwrap().len(), 1);
        assert_eq!(cluster.list_services("prod").unwrap().len(), 1);
        assert_eq!(cluster.list_network_policies("prod").unwrap().len(), 1);
        let workloads = cluster.list_workloads("prod").unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].kind, "Deployment");
        assert_eq!(
            workloads[0].template.containers[0]
                .security_context
                .as_ref()
                .unwrap()
                .privileged,
            Some(true)
        );
    }

    #[test]
    fn namespaces_are_implied_by_resources() {
        let cluster = SnapshotCluster::from_yaml("test", MANIFESTS).unwrap();
        let names: Vec<_> = cluster
            .list_namespaces()
            .unwrap()
            .into_iter()
            .map(|ns| ns.name)
            .collect();
        assert_eq!(names, vec!["prod"]);
    }

    #[test]
    fn system_namespaces_excluded_by_default() {
        let yaml = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: kube-system
---
apiVersion: v1
kind: Namespace
metadata:
  name: dev
"#;
        let cluster = SnapshotCluster::from_yaml("test", yaml).unwrap();
        assert_eq!(
            cluster.namespaces_for_scan(&[], false).unwrap(),
            vec!["dev".to_string()]
        );
        assert_eq!(
            cluster.namespaces_for_scan(&[], true).unwrap(),
            vec!["dev".to_string(), "kube-system".to_string()]
        );
        assert!(is_system_namespace("kube-public"));
    }

    #[test]
    fn unknown_kinds_are_ignored() {
        let yaml = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: dev
data:
  key: value
"#;
        let cluster = SnapshotCluster::from_yaml("test", yaml).unwrap();
        assert!(cluster.list_pods("dev").unwrap().is_empty());
    }
}

//! Rule-module table and evaluation.
//!
//! A [`RuleSet`] owns a named table of rule sources and a backend that
//! compiles and evaluates them. Loading validates each source eagerly so a
//! broken module never reaches evaluation; evaluation snapshots the table
//! under a read lock and normalizes whatever shape the rules emit into
//! [`Violation`] records.

pub mod backend;

use crate::error::{Result, ScanError};
use crate::scanner::types::{Finding, FindingStatus, Severity};
use backend::RuleBackend;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

/// Query path the orchestrator evaluates per resource.
pub const VIOLATIONS_QUERY: &str = "data.compliance.violations";

/// A named set of rule modules with shared metadata.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RuleBundle {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Module name to source text.
    pub modules: HashMap<String, String>,
}

/// One normalized rule violation before conversion to a finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub remediation: String,
    pub message: String,
    /// Resource reference named by the rule itself, if any.
    pub resource: String,
    /// Namespace named by the rule itself, if any.
    pub namespace: String,
    /// Category named by the rule itself, if any.
    pub category: String,
}

impl Violation {
    /// Convert to a finding. The rule's own resource, namespace, and
    /// category take precedence; the caller's values fill the gaps, with
    /// "cis" as the category of last resort.
    pub fn to_finding(&self, resource: &str, namespace: &str) -> Finding {
        let category = if self.category.is_empty() {
            "cis"
        } else {
            &self.category
        };
        let resource = if self.resource.is_empty() {
            resource
        } else {
            &self.resource
        };
        let namespace = if self.namespace.is_empty() {
            namespace
        } else {
            &self.namespace
        };
        let mut finding = Finding::new(
            self.id.clone(),
            self.title.clone(),
            self.severity,
            FindingStatus::Fail,
        )
        .with_description(self.description.clone())
        .with_category(category)
        .with_resource(resource)
        .with_namespace(namespace)
        .with_remediation(self.remediation.clone());
        if !self.message.is_empty() {
            finding = finding.with_detail("message", self.message.clone());
        }
        finding
    }
}

/// Table of loaded rule modules. Loads take the write lock, evaluations
/// share the read lock, so loading never interleaves with evaluation.
pub struct RuleSet {
    modules: RwLock<HashMap<String, String>>,
    backend: Box<dyn RuleBackend>,
}

impl RuleSet {
    pub fn new(backend: Box<dyn RuleBackend>) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            backend,
        }
    }

    pub fn module_count(&self) -> usize {
        self.modules.read().len()
    }

    /// Load every `.rego` file under a directory, skipping `*_test.rego`.
    /// A file that fails validation is logged and skipped; only a path
    /// that is not a directory is an error. Returns the number of modules
    /// loaded.
    pub fn load_from_dir(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(ScanError::Config(format!(
                "rule path is not a directory: {}",
                dir.display()
            )));
        }

        let mut loaded = 0usize;
        for entry in WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if !file_name.ends_with(".rego") || file_name.ends_with("_test.rego") {
                continue;
            }

            let name = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .to_string_lossy()
                .trim_end_matches(".rego")
                .to_string();
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(err) => {
                    warn!("skipping rule file {}: {}", path.display(), err);
                    continue;
                }
            };

            match self.load_inline(&name, &source) {
                Ok(()) => loaded += 1,
                Err(err) => warn!("skipping rule module {:?}: {}", name, err),
            }
        }
        debug!("loaded {} rule modules from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Register a single module. Errors if the source fails validation.
    pub fn load_inline(&self, name: &str, source: &str) -> Result<()> {
        self.backend.check(name, source)?;
        self.modules
            .write()
            .insert(name.to_string(), source.to_string());
        Ok(())
    }

    /// Register every module of a bundle, prefixed with the bundle name.
    /// The first invalid module aborts the bundle load.
    pub fn load_bundle(&self, bundle: &RuleBundle) -> Result<usize> {
        let mut staged = Vec::with_capacity(bundle.modules.len());
        for (name, source) in &bundle.modules {
            let qualified = format!("{}/{}", bundle.name, name);
            self.backend.check(&qualified, source)?;
            staged.push((qualified, source.clone()));
        }
        let count = staged.len();
        let mut table = self.modules.write();
        for (name, source) in staged {
            table.insert(name, source);
        }
        Ok(count)
    }

    /// Evaluate the query against one resource manifest and return the
    /// normalized violations. With zero modules loaded this is a no-op.
    pub fn evaluate_resource(
        &self,
        resource: &serde_json::Value,
        query: &str,
    ) -> Result<Vec<Violation>> {
        let table = self.modules.read();
        if table.is_empty() {
            return Ok(Vec::new());
        }
        let modules: Vec<(String, String)> = table
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let value = self.backend.eval(&modules, resource, query)?;
        Ok(normalize_violations(&value))
    }
}

/// Normalize the raw query result into violation records.
///
/// Accepted shapes: an array of violation objects, a map whose values are
/// violation objects, or bare strings (generic medium-severity violation).
/// Anything else is logged and skipped.
fn normalize_violations(value: &serde_json::Value) -> Vec<Violation> {
    match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(normalize_one)
            .collect(),
        serde_json::Value::Object(map) => map
            .values()
            .filter_map(normalize_one)
            .collect(),
        other => {
            warn!("unrecognized violations shape: {}", shape_name(other));
            Vec::new()
        }
    }
}

fn normalize_one(value: &serde_json::Value) -> Option<Violation> {
    match value {
        serde_json::Value::Object(map) => {
            let field = |key: &str| {
                map.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let severity = map
                .get("severity")
                .and_then(|v| v.as_str())
                .and_then(|s| Severity::parse(s).ok())
                .unwrap_or(Severity::Medium);
            let title = {
                let t = field("title");
                if t.is_empty() {
                    "Policy Violation".to_string()
                } else {
                    t
                }
            };
            let id = {
                let i = field("id");
                if i.is_empty() {
                    "POLICY".to_string()
                } else {
                    i
                }
            };
            Some(Violation {
                id,
                title,
                description: field("description"),
                severity,
                remediation: field("remediation"),
                message: field("msg"),
                resource: field("resource"),
                namespace: field("namespace"),
                category: field("category"),
            })
        }
        serde_json::Value::String(msg) => Some(Violation {
            id: "POLICY".to_string(),
            title: "Policy Violation".to_string(),
            description: String::new(),
            severity: Severity::Medium,
            remediation: String::new(),
            message: msg.clone(),
            resource: String::new(),
            namespace: String::new(),
            category: String::new(),
        }),
        other => {
            warn!("skipping violation with shape {}", shape_name(other));
            None
        }
    }
}

fn shape_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::backend::StaticBackend;
    use super::*;
    use serde_json::json;

    fn rule_set(result: serde_json::Value) -> RuleSet {
        let rs = RuleSet::new(Box::new(StaticBackend::returning(result)));
        rs.load_inline("compliance", "package compliance").unwrap();
        rs
    }

    #[test]
    fn empty_table_short_circuits() {
        let rs = RuleSet::new(Box::new(StaticBackend::empty()));
        let out = rs
            .evaluate_resource(&json!({"kind": "Pod"}), VIOLATIONS_QUERY)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(rs.module_count(), 0);
    }

    #[test]
    fn invalid_inline_module_is_rejected() {
        let rs = RuleSet::new(Box::new(StaticBackend::empty()));
        let err = rs.load_inline("bad", "INVALID source").unwrap_err();
        assert!(matches!(err, ScanError::RuleCompile { .. }));
        assert_eq!(rs.module_count(), 0);
    }

    #[test]
    fn array_of_objects_normalizes() {
        let rs = rule_set(json!([
            {
                "id": "CIS-5.1.1",
                "title": "No privileged containers",
                "severity": "high",
                "msg": "container web is privileged"
            }
        ]));
        let out = rs
            .evaluate_resource(&json!({}), VIOLATIONS_QUERY)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "CIS-5.1.1");
        assert_eq!(out[0].severity, Severity::High);

        let finding = out[0].to_finding("Pod/default/web", "default");
        assert_eq!(finding.status, FindingStatus::Fail);
        assert_eq!(finding.details["message"], "container web is privileged");
    }

    #[test]
    fn rule_supplied_location_wins_over_caller_fallbacks() {
        let rs = rule_set(json!([
            {
                "id": "CIS-5.2.1",
                "title": "Host namespace sharing",
                "severity": "high",
                "resource": "Deployment/payments/api",
                "namespace": "payments",
                "category": "workload"
            },
            {
                "id": "CIS-5.2.2",
                "title": "Anonymous violation",
                "severity": "low"
            }
        ]));
        let out = rs.evaluate_resource(&json!({}), VIOLATIONS_QUERY).unwrap();
        assert_eq!(out.len(), 2);

        let located = out[0].to_finding("Pod/default/web", "default");
        assert_eq!(located.resource, "Deployment/payments/api");
        assert_eq!(located.namespace, "payments");
        assert_eq!(located.category, "workload");

        let fallback = out[1].to_finding("Pod/default/web", "default");
        assert_eq!(fallback.resource, "Pod/default/web");
        assert_eq!(fallback.namespace, "default");
        assert_eq!(fallback.category, "cis");
    }

    #[test]
    fn map_of_objects_normalizes() {
        let rs = rule_set(json!({
            "first": {"title": "A", "severity": "low"},
            "second": {"title": "B"}
        }));
        let mut out = rs
            .evaluate_resource(&json!({}), VIOLATIONS_QUERY)
            .unwrap();
        out.sort_by(|a, b| a.title.cmp(&b.title));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].severity, Severity::Low);
        // Missing severity defaults to medium.
        assert_eq!(out[1].severity, Severity::Medium);
    }

    #[test]
    fn bare_strings_become_generic_violations() {
        let rs = rule_set(json!(["pod runs as root"]));
        let out = rs
            .evaluate_resource(&json!({}), VIOLATIONS_QUERY)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Policy Violation");
        assert_eq!(out[0].severity, Severity::Medium);
        assert_eq!(out[0].message, "pod runs as root");
    }

    #[test]
    fn garbage_shapes_are_skipped() {
        let rs = rule_set(json!([42, true, {"title": "kept"}]));
        let out = rs
            .evaluate_resource(&json!({}), VIOLATIONS_QUERY)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "kept");

        let scalar = rule_set(json!(17));
        assert!(scalar
            .evaluate_resource(&json!({}), VIOLATIONS_QUERY)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn bundle_load_is_all_or_nothing() {
        let rs = RuleSet::new(Box::new(StaticBackend::empty()));
        let mut bundle = RuleBundle {
            name: "cis".to_string(),
            ..Default::default()
        };
        bundle
            .modules
            .insert("ok".to_string(), "package ok".to_string());
        bundle
            .modules
            .insert("bad".to_string(), "INVALID".to_string());
        assert!(rs.load_bundle(&bundle).is_err());
        assert_eq!(rs.module_count(), 0);

        bundle.modules.remove("bad");
        assert_eq!(rs.load_bundle(&bundle).unwrap(), 1);
        assert_eq!(rs.module_count(), 1);
    }
}

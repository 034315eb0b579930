//! Scan orchestration.
//!
//! A [`Scanner`] owns the cluster handle, an optional rule set, and a
//! name-keyed analyzer registry. `run` resolves namespaces, dispatches on
//! the scan type, aggregates findings and finalizes the result: end-time
//! stamping, summary computation, then the severity-threshold filter.

pub mod types;

use crate::analyzer::{Analyzer, CancelToken, ScanContext};
use crate::cluster::ClusterReader;
use crate::error::{Result, ScanError};
use crate::rules::{RuleSet, VIOLATIONS_QUERY};
use chrono::Utc;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use types::{Finding, ScanConfig, ScanResult, ScanType};

pub struct Scanner {
    cluster: Arc<dyn ClusterReader>,
    rules: Option<Arc<RuleSet>>,
    // Name-ordered so full scans visit analyzers in a stable order.
    analyzers: BTreeMap<&'static str, Box<dyn Analyzer>>,
}

impl Scanner {
    pub fn new(cluster: Arc<dyn ClusterReader>) -> Self {
        Self {
            cluster,
            rules: None,
            analyzers: BTreeMap::new(),
        }
    }

    /// Attach the rule set used by cis and full scans.
    pub fn with_rules(mut self, rules: Arc<RuleSet>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Register an analyzer under its stable name.
    pub fn register(mut self, analyzer: Box<dyn Analyzer>) -> Self {
        self.analyzers.insert(analyzer.name(), analyzer);
        self
    }

    pub fn run(&self, config: &ScanConfig) -> Result<ScanResult> {
        self.run_with_cancel(config, CancelToken::new())
    }

    pub fn run_with_cancel(&self, config: &ScanConfig, cancel: CancelToken) -> Result<ScanResult> {
        let start = Utc::now();
        let mut result = ScanResult::new(
            format!("scan-{}", start.timestamp_millis()),
            config.scan_type,
            self.cluster.cluster_name(),
        );
        result.start_time = start;

        // Namespace resolution failure is the one listing error that is
        // fatal: nothing downstream can run without a scope.
        let namespaces = self
            .cluster
            .namespaces_for_scan(&config.namespaces, false)
            .map_err(|e| ScanError::listing("namespaces", e))?;
        result.namespaces = namespaces.clone();
        info!(
            "starting {} scan {} over {} namespaces",
            config.scan_type,
            result.id,
            namespaces.len()
        );

        // Extra rule sources are best-effort.
        if let Some(rules) = &self.rules {
            for path in &config.rule_paths {
                match rules.load_from_dir(path) {
                    Ok(count) => info!("loaded {} rule modules from {}", count, path.display()),
                    Err(err) => warn!("failed to load rules from {}: {}", path.display(), err),
                }
            }
        }

        let ctx = ScanContext::with_cancel(self.cluster.as_ref(), cancel.clone());
        match config.scan_type {
            ScanType::Full => {
                self.run_rules(&namespaces, &cancel, &mut result.findings);
                for (name, analyzer) in &self.analyzers {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match analyzer.analyze(&ctx, &namespaces) {
                        Ok(findings) => result.findings.extend(findings),
                        Err(err) => warn!("analyzer {:?} failed: {}", name, err),
                    }
                }
            }
            ScanType::Cis => {
                self.run_rules(&namespaces, &cancel, &mut result.findings);
            }
            single => match self.analyzers.get(single.as_str()) {
                Some(analyzer) => {
                    let findings = analyzer
                        .analyze(&ctx, &namespaces)
                        .map_err(|e| ScanError::analyzer(single.as_str(), e))?;
                    result.findings.extend(findings);
                }
                None => warn!("no analyzer registered for scan type {:?}", single.as_str()),
            },
        }

        result.partial = cancel.is_cancelled();
        result.end_time = Utc::now();
        result.duration_ms = (result.end_time - result.start_time).num_milliseconds();
        for finding in &mut result.findings {
            if finding.timestamp.is_none() {
                finding.timestamp = Some(result.end_time);
            }
        }
        result.compute_summary();

        let result = match config.severity_threshold {
            Some(threshold) => result.filter_by_threshold(threshold),
            None => result,
        };
        info!(
            "scan {} finished: {}/{} checks passed, score {:.1}",
            result.id,
            result.summary.passed_checks,
            result.summary.total_checks,
            result.summary.score
        );
        Ok(result)
    }

    /// Evaluate the loaded rules against every pod and workload manifest in
    /// scope. Listing failures skip the namespace; evaluation failures skip
    /// the resource.
    fn run_rules(&self, namespaces: &[String], cancel: &CancelToken, findings: &mut Vec<Finding>) {
        let rules = match &self.rules {
            Some(rules) if rules.module_count() > 0 => rules,
            _ => return,
        };

        for ns in namespaces {
            if cancel.is_cancelled() {
                return;
            }
            let mut resources: Vec<(String, serde_json::Value)> = Vec::new();
            match self.cluster.list_pods_json(ns) {
                Ok(pods) => {
                    for (i, pod) in pods.into_iter().enumerate() {
                        let name = manifest_name(&pod)
                            .map(|n| format!("Pod/{}/{}", ns, n))
                            .unwrap_or_else(|| format!("Pod/{}/pod-{}", ns, i));
                        resources.push((name, pod));
                    }
                }
                Err(err) => {
                    warn!("skipping namespace {}: {}", ns, err);
                    continue;
                }
            }
            match self.cluster.list_workloads_json(ns) {
                Ok(workloads) => {
                    for (i, workload) in workloads.into_iter().enumerate() {
                        let kind = workload
                            .get("kind")
                            .and_then(|k| k.as_str())
                            .unwrap_or("Workload")
                            .to_string();
                        let name = manifest_name(&workload)
                            .map(|n| format!("{}/{}/{}", kind, ns, n))
                            .unwrap_or_else(|| format!("{}/{}/workload-{}", kind, ns, i));
                        resources.push((name, workload));
                    }
                }
                Err(err) => {
                    warn!("skipping workloads in namespace {}: {}", ns, err);
                }
            }

            for (resource, manifest) in resources {
                if cancel.is_cancelled() {
                    return;
                }
                match rules.evaluate_resource(&manifest, VIOLATIONS_QUERY) {
                    Ok(violations) => {
                        findings.extend(violations.iter().map(|v| v.to_finding(&resource, ns)));
                    }
                    Err(err) => warn!("skipping resource {}: {}", resource, err),
                }
            }
        }
    }
}

fn manifest_name(manifest: &serde_json::Value) -> Option<String> {
    manifest
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::pss::PssChecker;
    use crate::analyzer::rbac::RbacAnalyzer;
    use crate::cluster::snapshot::SnapshotCluster;
    use crate::rules::backend::StaticBackend;
    use crate::scanner::types::{FindingStatus, Severity};
    use serde_json::json;

    const POD_YAML: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: web
  namespace: dev
spec:
  containers:
    - name: web
      image: nginx
"#;

    fn cluster() -> Arc<SnapshotCluster> {
        Arc::new(SnapshotCluster::from_yaml("test", POD_YAML).unwrap())
    }

    fn rules_with(result: serde_json::Value) -> Arc<RuleSet> {
        let rules = RuleSet::new(Box::new(StaticBackend::returning(result)));
        rules.load_inline("compliance", "package compliance").unwrap();
        Arc::new(rules)
    }

    #[test]
    fn cis_scan_emits_rule_findings_with_resource_names() {
        let scanner = Scanner::new(cluster()).with_rules(rules_with(json!([
            {"id": "CIS-1", "title": "violation", "severity": "high"}
        ])));
        let result = scanner.run(&ScanConfig::new(ScanType::Cis)).unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].resource, "Pod/dev/web");
        assert_eq!(result.findings[0].namespace, "dev");
    }

    #[test]
    fn cis_scan_without_rules_is_empty() {
        let scanner = Scanner::new(cluster());
        let result = scanner.run(&ScanConfig::new(ScanType::Cis)).unwrap();
        assert!(result.findings.is_empty());
        assert_eq!(result.summary.total_checks, 0);
    }

    #[test]
    fn single_type_scan_dispatches_to_one_analyzer() {
        let scanner = Scanner::new(cluster())
            .register(Box::new(RbacAnalyzer::new()))
            .register(Box::new(PssChecker::new()));
        let result = scanner.run(&ScanConfig::new(ScanType::Rbac)).unwrap();
        assert!(result.findings.iter().all(|f| f.category == "rbac"));
    }

    #[test]
    fn unregistered_single_type_scan_is_a_no_op() {
        let scanner = Scanner::new(cluster());
        let result = scanner.run(&ScanConfig::new(ScanType::Network)).unwrap();
        assert!(result.findings.is_empty());
    }

    #[test]
    fn full_scan_combines_rules_and_analyzers() {
        let scanner = Scanner::new(cluster())
            .with_rules(rules_with(json!(["bare string violation"])))
            .register(Box::new(PssChecker::new()));
        let result = scanner.run(&ScanConfig::new(ScanType::Full)).unwrap();
        assert!(result.findings.iter().any(|f| f.category == "cis"));
        assert!(result.findings.iter().any(|f| f.category == "pss"));
    }

    #[test]
    fn full_scan_finding_order_is_stable() {
        let build = || {
            Scanner::new(cluster())
                .register(Box::new(PssChecker::new()))
                .register(Box::new(RbacAnalyzer::new()))
                .register(Box::new(crate::analyzer::network::NetworkAnalyzer::new()))
        };
        let ids = |scanner: Scanner| -> Vec<String> {
            scanner
                .run(&ScanConfig::new(ScanType::Full))
                .unwrap()
                .findings
                .into_iter()
                .map(|f| f.id)
                .collect()
        };
        let first = ids(build());
        assert!(!first.is_empty());
        for _ in 0..5 {
            assert_eq!(ids(build()), first);
        }
    }

    #[test]
    fn findings_are_timestamped_with_end_time() {
        let scanner = Scanner::new(cluster()).register(Box::new(PssChecker::new()));
        let result = scanner.run(&ScanConfig::new(ScanType::Pss)).unwrap();
        assert!(!result.findings.is_empty());
        for f in &result.findings {
            assert_eq!(f.timestamp, Some(result.end_time));
        }
    }

    #[test]
    fn threshold_is_applied_after_aggregation() {
        let scanner = Scanner::new(cluster()).register(Box::new(PssChecker::new()));
        let mut config = ScanConfig::new(ScanType::Pss);
        config.severity_threshold = Some(Severity::Critical);
        let result = scanner.run(&config).unwrap();
        assert!(result
            .findings
            .iter()
            .all(|f| f.status == FindingStatus::Pass || f.severity == Severity::Critical));
    }

    #[test]
    fn cancelled_run_is_marked_partial() {
        let scanner = Scanner::new(cluster()).register(Box::new(PssChecker::new()));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = scanner
            .run_with_cancel(&ScanConfig::new(ScanType::Full), cancel)
            .unwrap();
        assert!(result.partial);
        assert!(result.findings.is_empty());
    }
}

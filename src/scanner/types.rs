//! Core result-model types for compliance scanning.
//!
//! - `Severity` - finding severity levels, totally ordered for ranking
//! - `FindingStatus` - pass/fail outcome of a single check
//! - `Finding` - one check outcome with remediation guidance
//! - `ScanSummary` - aggregated counts and compliance score
//! - `ScanResult` - the complete output of one scan run
//! - `ScanConfig` / `ScanType` - how a run is executed

use crate::error::{Result, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Severity of a compliance finding.
///
/// Ordered from least to most severe so the derived `Ord` gives
/// `Critical > High > Medium > Low > Info`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank for comparison. Higher rank means more severe.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 5,
            Self::High => 4,
            Self::Medium => 3,
            Self::Low => 2,
            Self::Info => 1,
        }
    }

    /// Parse a severity from a string (case-insensitive). Unknown values
    /// are a configuration error.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "info" => Ok(Self::Info),
            other => Err(ScanError::Config(format!(
                "invalid severity: {:?} (valid: critical, high, medium, low, info)",
                other
            ))),
        }
    }

    /// Get the string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    /// True if this severity meets or exceeds the threshold.
    pub fn meets_threshold(self, threshold: Severity) -> bool {
        self.rank() >= threshold.rank()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Pass/fail status of a compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl FindingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single compliance check result.
///
/// Immutable once appended to a `ScanResult`; the orchestrator only stamps
/// a missing timestamp during finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Unique identifier for the check (e.g., "RBAC-001").
    pub id: String,

    /// Short description of the check.
    pub title: String,

    /// Detailed information about the check.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Importance of the finding.
    pub severity: Severity,

    /// Whether the check passed or failed.
    pub status: FindingStatus,

    /// Grouping of the finding (cis, rbac, network, pss).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    /// The cluster resource this finding pertains to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,

    /// Namespace of the affected resource.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Guidance on how to fix the issue.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remediation: String,

    /// Additional context about the finding.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,

    /// When the finding was generated. Stamped with the run's end time
    /// when a check does not set it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Finding {
    /// Create a new finding with the required fields.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
        status: FindingStatus,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            severity,
            status,
            category: String::new(),
            resource: String::new(),
            namespace: String::new(),
            remediation: String::new(),
            details: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

/// Aggregated scan statistics. Always recomputed from the finding list,
/// never hand-edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub warning_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,

    /// Compliance score: passed / (passed + failed) * 100, or 0 when no
    /// actionable checks exist.
    pub score: f64,

    /// Finding counts by severity, populated from fail and warning
    /// findings only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub findings_by_severity: BTreeMap<Severity, usize>,
}

/// Which checks a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Rule evaluation only.
    Cis,
    /// RBAC analyzer only.
    Rbac,
    /// NetworkPolicy analyzer only.
    Network,
    /// Pod Security Standards checker only.
    Pss,
    /// Rule evaluation plus all registered analyzers.
    Full,
}

impl ScanType {
    /// Parse a scan type. Unknown values are a configuration error, so an
    /// invalid type fails before any cluster I/O.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cis" => Ok(Self::Cis),
            "rbac" => Ok(Self::Rbac),
            "network" => Ok(Self::Network),
            "pss" => Ok(Self::Pss),
            "full" => Ok(Self::Full),
            other => Err(ScanError::Config(format!(
                "unknown scan type: {:?} (valid: cis, rbac, network, pss, full)",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cis => "cis",
            Self::Rbac => "rbac",
            Self::Network => "network",
            Self::Pss => "pss",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Controls how a scan is executed. Constructed once per invocation by the
/// caller and never mutated during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Which checks to run.
    pub scan_type: ScanType,

    /// Namespaces to scope the scan. Empty means all non-system namespaces.
    #[serde(default)]
    pub namespaces: Vec<String>,

    /// Retain only findings at or above this level (pass findings are
    /// always retained).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_threshold: Option<Severity>,

    /// Additional directories containing rule modules.
    #[serde(default)]
    pub rule_paths: Vec<std::path::PathBuf>,
}

impl ScanConfig {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            scan_type,
            namespaces: Vec::new(),
            severity_threshold: None,
            rule_paths: Vec::new(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(ScanType::Full)
    }
}

/// The complete output of one compliance scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    /// Unique identifier for this run.
    pub id: String,

    /// The scan type that was performed.
    pub scan_type: ScanType,

    /// When the scan began.
    pub start_time: DateTime<Utc>,

    /// When the scan completed.
    pub end_time: DateTime<Utc>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,

    /// Name of the scanned cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// Namespaces that were scanned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// True when the run was cancelled and the findings are incomplete.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,

    /// All individual check results.
    pub findings: Vec<Finding>,

    /// Aggregated statistics.
    pub summary: ScanSummary,
}

impl ScanResult {
    /// Create a result at run start.
    pub fn new(id: impl Into<String>, scan_type: ScanType, cluster_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            scan_type,
            start_time: now,
            end_time: now,
            duration_ms: 0,
            cluster_name: cluster_name.into(),
            namespaces: Vec::new(),
            partial: false,
            findings: Vec::new(),
            summary: ScanSummary::default(),
        }
    }

    /// Recalculate the summary from the finding list.
    pub fn compute_summary(&mut self) {
        let mut summary = ScanSummary::default();

        for f in &self.findings {
            summary.total_checks += 1;
            match f.status {
                FindingStatus::Pass => summary.passed_checks += 1,
                FindingStatus::Fail => {
                    summary.failed_checks += 1;
                    *summary.findings_by_severity.entry(f.severity).or_insert(0) += 1;
                }
                FindingStatus::Warning => {
                    summary.warning_count += 1;
                    *summary.findings_by_severity.entry(f.severity).or_insert(0) += 1;
                }
                FindingStatus::Error => summary.error_count += 1,
                FindingStatus::Skipped => summary.skipped_count += 1,
            }
        }

        let actionable = summary.passed_checks + summary.failed_checks;
        if actionable > 0 {
            summary.score = summary.passed_checks as f64 / actionable as f64 * 100.0;
        }

        self.summary = summary;
    }

    /// Return a new result containing only findings at or above the given
    /// severity threshold. Pass findings are always retained. Applying the
    /// same threshold twice is idempotent.
    pub fn filter_by_threshold(&self, threshold: Severity) -> ScanResult {
        let mut filtered = ScanResult {
            id: self.id.clone(),
            scan_type: self.scan_type,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_ms: self.duration_ms,
            cluster_name: self.cluster_name.clone(),
            namespaces: self.namespaces.clone(),
            partial: self.partial,
            findings: Vec::new(),
            summary: ScanSummary::default(),
        };

        for f in &self.findings {
            if f.status == FindingStatus::Pass || f.severity.meets_threshold(threshold) {
                filtered.findings.push(f.clone());
            }
        }

        filtered.compute_summary();
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, status: FindingStatus) -> Finding {
        Finding::new("T-001", "test", severity, status)
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn severity_parse() {
        assert_eq!(Severity::parse("CRITICAL").unwrap(), Severity::Critical);
        assert_eq!(Severity::parse("low").unwrap(), Severity::Low);
        assert!(Severity::parse("urgent").is_err());
    }

    #[test]
    fn scan_type_parse() {
        assert_eq!(ScanType::parse("full").unwrap(), ScanType::Full);
        assert_eq!(ScanType::parse("PSS").unwrap(), ScanType::Pss);
        assert!(matches!(
            ScanType::parse("everything"),
            Err(crate::error::ScanError::Config(_))
        ));
    }

    #[test]
    fn score_is_passed_over_actionable() {
        let mut result = ScanResult::new("scan-1", ScanType::Full, "test");
        result.findings.push(finding(Severity::High, FindingStatus::Pass));
        result.findings.push(finding(Severity::High, FindingStatus::Pass));
        result.findings.push(finding(Severity::High, FindingStatus::Fail));
        // Warnings and errors are not actionable for the score.
        result.findings.push(finding(Severity::Low, FindingStatus::Warning));
        result.findings.push(finding(Severity::Low, FindingStatus::Error));
        result.compute_summary();

        assert_eq!(result.summary.total_checks, 5);
        assert_eq!(result.summary.passed_checks, 2);
        assert_eq!(result.summary.failed_checks, 1);
        assert!((result.summary.score - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn score_is_zero_without_actionable_checks() {
        let mut result = ScanResult::new("scan-1", ScanType::Full, "test");
        result.findings.push(finding(Severity::Low, FindingStatus::Warning));
        result.compute_summary();
        assert_eq!(result.summary.score, 0.0);
    }

    #[test]
    fn severity_buckets_count_fail_and_warning_only() {
        let mut result = ScanResult::new("scan-1", ScanType::Full, "test");
        result.findings.push(finding(Severity::Critical, FindingStatus::Fail));
        result.findings.push(finding(Severity::Critical, FindingStatus::Pass));
        result.findings.push(finding(Severity::Medium, FindingStatus::Warning));
        result.findings.push(finding(Severity::High, FindingStatus::Error));
        result.compute_summary();

        assert_eq!(result.summary.findings_by_severity[&Severity::Critical], 1);
        assert_eq!(result.summary.findings_by_severity[&Severity::Medium], 1);
        assert!(!result.summary.findings_by_severity.contains_key(&Severity::High));
    }

    #[test]
    fn threshold_filter_retains_pass_and_is_idempotent() {
        let mut result = ScanResult::new("scan-1", ScanType::Full, "test");
        result.findings.push(finding(Severity::Info, FindingStatus::Pass));
        result.findings.push(finding(Severity::Low, FindingStatus::Fail));
        result.findings.push(finding(Severity::High, FindingStatus::Fail));
        result.compute_summary();

        let filtered = result.filter_by_threshold(Severity::High);
        assert_eq!(filtered.findings.len(), 2);
        assert!(filtered
            .findings
            .iter()
            .any(|f| f.status == FindingStatus::Pass));

        let twice = filtered.filter_by_threshold(Severity::High);
        assert_eq!(twice.findings, filtered.findings);
        assert_eq!(twice.summary, filtered.summary);
    }

    #[test]
    fn result_round_trips_through_json() {
        let mut result = ScanResult::new("scan-42", ScanType::Rbac, "prod");
        result.namespaces = vec!["default".to_string()];
        result.findings.push(
            Finding::new("RBAC-001", "binding", Severity::Critical, FindingStatus::Fail)
                .with_namespace("default")
                .with_detail("subject_name", "bob")
                .with_timestamp(Utc::now()),
        );
        result.compute_summary();

        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: ScanResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.findings, result.findings);
        assert_eq!(decoded.summary, result.summary);
    }
}

//! Scan-job reconciliation.
//!
//! Jobs move `Pending -> Running -> {Completed, Failed}`. Running and
//! not-yet-due Completed jobs are skipped idempotently; a failed run
//! requeues after a fixed backoff; a scheduled success requeues at
//! completion time plus the interval.

use crate::analyzer::CancelToken;
use crate::delivery::DeliveryClient;
use crate::error::{Result, ScanError};
use crate::scanner::types::{ScanConfig, ScanResult, Severity};
use crate::scanner::Scanner;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Retry delay after a failed run.
pub fn failure_backoff() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// One observed condition on a job, replaced in place by type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Fail/warning finding counts per severity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityBuckets {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityBuckets {
    pub fn from_result(result: &ScanResult) -> Self {
        let count = |s: Severity| {
            result
                .summary
                .findings_by_severity
                .get(&s)
                .copied()
                .unwrap_or(0)
        };
        Self {
            critical: count(Severity::Critical),
            high: count(Severity::High),
            medium: count(Severity::Medium),
            low: count(Severity::Low),
            info: count(Severity::Info),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStatus {
    pub phase: Phase,
    pub compliance_score: f64,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub findings: SeverityBuckets,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
    /// Held while the job owns external state (delivered results).
    pub finalizer: bool,
}

/// Where a completed run's results are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySpec {
    pub enabled: bool,
    pub endpoint: String,
    pub token: String,
}

impl DeliverySpec {
    /// Delivery happens only when enabled with both endpoint and token.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.endpoint.is_empty() && !self.token.is_empty()
    }
}

/// A persisted scan job definition plus its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub name: String,
    pub config: ScanConfig,
    /// Interval expression like `30m`, `6h` or `1d`. Absent means one-shot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliverySpec>,
    /// Set by the owner to request teardown.
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default)]
    pub status: JobStatus,
}

impl ScanJob {
    pub fn new(name: impl Into<String>, config: ScanConfig) -> Self {
        Self {
            name: name.into(),
            config,
            schedule: None,
            delivery: None,
            deletion_requested: false,
            status: JobStatus::default(),
        }
    }
}

/// Parse an interval expression: an integer with an `s`, `m`, `h` or `d`
/// suffix. Zero and negative intervals are invalid.
pub fn parse_interval(expr: &str) -> Result<Duration> {
    let expr = expr.trim();
    let (value, unit) = expr.split_at(expr.len().saturating_sub(1));
    let amount: i64 = value
        .parse()
        .map_err(|_| ScanError::Config(format!("invalid schedule interval: {:?}", expr)))?;
    if amount <= 0 {
        return Err(ScanError::Config(format!(
            "schedule interval must be positive: {:?}",
            expr
        )));
    }
    match unit {
        "s" => Ok(Duration::seconds(amount)),
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        _ => Err(ScanError::Config(format!(
            "invalid schedule unit in {:?} (expected s, m, h or d)",
            expr
        ))),
    }
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing further to do for this job.
    Done,
    /// Look at the job again after the given delay.
    RequeueAfter(Duration),
}

fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    for existing in conditions.iter_mut() {
        if existing.type_ == condition.type_ {
            *existing = condition;
            return;
        }
    }
    conditions.push(condition);
}

pub struct Reconciler {
    scanner: Scanner,
}

impl Reconciler {
    pub fn new(scanner: Scanner) -> Self {
        Self { scanner }
    }

    pub fn reconcile(&self, job: &mut ScanJob) -> Result<ReconcileAction> {
        self.reconcile_at(job, Utc::now())
    }

    /// Reconcile with an explicit clock, so schedules are testable.
    pub fn reconcile_at(&self, job: &mut ScanJob, now: DateTime<Utc>) -> Result<ReconcileAction> {
        if job.deletion_requested {
            if job.status.finalizer {
                info!("cleaning up job {:?} before deletion", job.name);
                job.status.finalizer = false;
            }
            return Ok(ReconcileAction::Done);
        }
        job.status.finalizer = true;

        match job.status.phase {
            Phase::Running => {
                info!("job {:?} is already running, skipping", job.name);
                return Ok(ReconcileAction::Done);
            }
            Phase::Completed => match job.status.next_run {
                Some(next) if next <= now => {
                    // Scheduled run is due, fall through and execute.
                }
                Some(next) => return Ok(ReconcileAction::RequeueAfter(next - now)),
                None => return Ok(ReconcileAction::Done),
            },
            Phase::Pending | Phase::Failed => {}
        }

        // Fail fast on a bad schedule before any scanning happens.
        let interval = match &job.schedule {
            Some(expr) => Some(parse_interval(expr)?),
            None => None,
        };

        job.status.phase = Phase::Running;
        info!("running scan job {:?}", job.name);

        match self.scanner.run_with_cancel(&job.config, CancelToken::new()) {
            Ok(result) => {
                let completed = Utc::now();
                job.status.phase = Phase::Completed;
                job.status.compliance_score = result.summary.score;
                job.status.total_checks = result.summary.total_checks;
                job.status.passed_checks = result.summary.passed_checks;
                job.status.failed_checks = result.summary.failed_checks;
                job.status.findings = SeverityBuckets::from_result(&result);
                job.status.last_run = Some(completed);
                set_condition(
                    &mut job.status.conditions,
                    Condition {
                        type_: "ScanComplete".to_string(),
                        status: true,
                        reason: "ScanSucceeded".to_string(),
                        message: format!(
                            "Scan completed with score {:.1}% ({}/{} checks passed)",
                            result.summary.score,
                            result.summary.passed_checks,
                            result.summary.total_checks
                        ),
                        timestamp: completed,
                    },
                );

                self.deliver(job, &result);

                match interval {
                    Some(interval) => {
                        job.status.next_run = Some(completed + interval);
                        Ok(ReconcileAction::RequeueAfter(interval))
                    }
                    None => {
                        job.status.next_run = None;
                        Ok(ReconcileAction::Done)
                    }
                }
            }
            Err(err) => {
                job.status.phase = Phase::Failed;
                set_condition(
                    &mut job.status.conditions,
                    Condition {
                        type_: "ScanComplete".to_string(),
                        status: false,
                        reason: "ScanFailed".to_string(),
                        message: err.to_string(),
                        timestamp: Utc::now(),
                    },
                );
                warn!("scan job {:?} failed: {}", job.name, err);
                Ok(ReconcileAction::RequeueAfter(failure_backoff()))
            }
        }
    }

    /// Best-effort delivery; failures are logged, never propagated.
    fn deliver(&self, job: &ScanJob, result: &ScanResult) {
        let spec = match &job.delivery {
            Some(spec) if spec.is_active() => spec,
            _ => return,
        };
        match DeliveryClient::new(&spec.endpoint, &spec.token) {
            Ok(client) => {
                if let Err(err) = client.upload(result) {
                    warn!("delivery for job {:?} failed: {}", job.name, err);
                }
            }
            Err(err) => warn!("delivery for job {:?} not configured: {}", job.name, err),
        }
    }
}

/// Drives a set of named jobs through the reconciler.
pub struct Scheduler {
    jobs: BTreeMap<String, ScanJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, job: ScanJob) {
        self.jobs.insert(job.name.clone(), job);
    }

    pub fn jobs(&self) -> impl Iterator<Item = &ScanJob> {
        self.jobs.values()
    }

    /// Reconcile every job once and return the shortest requeue delay, if
    /// any job asked to be looked at again.
    pub fn run_once(&mut self, reconciler: &Reconciler) -> Option<Duration> {
        let mut wake: Option<Duration> = None;
        for job in self.jobs.values_mut() {
            match reconciler.reconcile(job) {
                Ok(ReconcileAction::RequeueAfter(delay)) => {
                    wake = Some(match wake {
                        Some(current) => current.min(delay),
                        None => delay,
                    });
                }
                Ok(ReconcileAction::Done) => {}
                Err(err) => warn!("reconcile of job {:?} errored: {}", job.name, err),
            }
        }
        self.jobs.retain(|_, job| {
            !(job.deletion_requested && !job.status.finalizer)
        });
        wake
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads job definitions from a YAML file and persists their status as
/// JSON next to it.
pub struct JobStore {
    jobs_path: PathBuf,
}

impl JobStore {
    pub fn new(jobs_path: impl Into<PathBuf>) -> Self {
        Self {
            jobs_path: jobs_path.into(),
        }
    }

    fn status_path(&self) -> PathBuf {
        self.jobs_path.with_extension("status.json")
    }

    /// Read the job definitions, merging in any previously persisted
    /// status so restarts do not rerun completed one-shot jobs.
    pub fn load(&self) -> Result<Vec<ScanJob>> {
        let content = std::fs::read_to_string(&self.jobs_path)?;
        let mut jobs: Vec<ScanJob> =
            serde_yaml::from_str(&content).map_err(|e| ScanError::Parse(e.to_string()))?;

        if let Ok(saved) = std::fs::read_to_string(self.status_path()) {
            if let Ok(statuses) = serde_json::from_str::<BTreeMap<String, JobStatus>>(&saved) {
                for job in &mut jobs {
                    if let Some(status) = statuses.get(&job.name) {
                        job.status = status.clone();
                    }
                }
            }
        }
        Ok(jobs)
    }

    pub fn save_status<'a>(&self, jobs: impl Iterator<Item = &'a ScanJob>) -> Result<()> {
        let statuses: BTreeMap<&str, &JobStatus> =
            jobs.map(|job| (job.name.as_str(), &job.status)).collect();
        let encoded = serde_json::to_string_pretty(&statuses)
            .map_err(|e| ScanError::Parse(e.to_string()))?;
        std::fs::write(self.status_path(), encoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::pss::PssChecker;
    use crate::cluster::snapshot::SnapshotCluster;
    use crate::scanner::types::ScanType;
    use std::sync::Arc;

    fn reconciler() -> Reconciler {
        let cluster = Arc::new(
            SnapshotCluster::from_yaml(
                "test",
                r#"
apiVersion: v1
kind: Pod
metadata:
  name: web
  namespace: dev
spec:
  containers:
    - name: web
      securityContext:
        privileged: true
"#,
            )
            .unwrap(),
        );
        Reconciler::new(Scanner::new(cluster).register(Box::new(PssChecker::new())))
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_interval("6h").unwrap(), Duration::hours(6));
        assert_eq!(parse_interval("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_interval("45s").unwrap(), Duration::seconds(45));
        assert!(parse_interval("0m").is_err());
        assert!(parse_interval("-5m").is_err());
        assert!(parse_interval("10w").is_err());
        assert!(parse_interval("soon").is_err());
        assert!(parse_interval("").is_err());
    }

    #[test]
    fn one_shot_job_completes_and_stays_done() {
        let r = reconciler();
        let mut job = ScanJob::new("nightly", ScanConfig::new(ScanType::Pss));

        assert_eq!(r.reconcile(&mut job).unwrap(), ReconcileAction::Done);
        assert_eq!(job.status.phase, Phase::Completed);
        assert!(job.status.total_checks > 0);
        assert!(job.status.last_run.is_some());
        assert!(job.status.next_run.is_none());
        let condition = &job.status.conditions[0];
        assert_eq!(condition.type_, "ScanComplete");
        assert!(condition.status);
        assert_eq!(condition.reason, "ScanSucceeded");

        // A second pass must not rerun the scan.
        let last_run = job.status.last_run;
        assert_eq!(r.reconcile(&mut job).unwrap(), ReconcileAction::Done);
        assert_eq!(job.status.last_run, last_run);
    }

    #[test]
    fn running_job_is_skipped() {
        let r = reconciler();
        let mut job = ScanJob::new("busy", ScanConfig::new(ScanType::Pss));
        job.status.phase = Phase::Running;
        assert_eq!(r.reconcile(&mut job).unwrap(), ReconcileAction::Done);
        assert_eq!(job.status.phase, Phase::Running);
        assert!(job.status.last_run.is_none());
    }

    #[test]
    fn scheduled_job_requeues_at_interval() {
        let r = reconciler();
        let mut job = ScanJob::new("periodic", ScanConfig::new(ScanType::Pss));
        job.schedule = Some("6h".to_string());

        let action = r.reconcile(&mut job).unwrap();
        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::hours(6)));
        let next = job.status.next_run.unwrap();
        assert_eq!(next, job.status.last_run.unwrap() + Duration::hours(6));

        // Not due yet: requeued for the remaining time.
        match r.reconcile(&mut job).unwrap() {
            ReconcileAction::RequeueAfter(delay) => assert!(delay <= Duration::hours(6)),
            other => panic!("expected requeue, got {:?}", other),
        }

        // Past the deadline the job runs again.
        let first_run = job.status.last_run;
        let action = r.reconcile_at(&mut job, next + Duration::seconds(1)).unwrap();
        assert_eq!(action, ReconcileAction::RequeueAfter(Duration::hours(6)));
        assert!(job.status.last_run > first_run);
    }

    #[test]
    fn bad_schedule_fails_before_scanning() {
        let r = reconciler();
        let mut job = ScanJob::new("broken", ScanConfig::new(ScanType::Pss));
        job.schedule = Some("whenever".to_string());
        assert!(r.reconcile(&mut job).is_err());
        assert!(job.status.last_run.is_none());
    }

    #[test]
    fn deletion_releases_finalizer_and_skips_scan() {
        let r = reconciler();
        let mut job = ScanJob::new("old", ScanConfig::new(ScanType::Pss));
        job.status.finalizer = true;
        job.deletion_requested = true;
        assert_eq!(r.reconcile(&mut job).unwrap(), ReconcileAction::Done);
        assert!(!job.status.finalizer);
        assert!(job.status.last_run.is_none());
    }

    #[test]
    fn severity_buckets_reflect_summary() {
        let r = reconciler();
        let mut job = ScanJob::new("buckets", ScanConfig::new(ScanType::Pss));
        r.reconcile(&mut job).unwrap();
        // The privileged pod guarantees at least one critical finding.
        assert!(job.status.findings.critical >= 1);
    }

    #[test]
    fn scheduler_removes_deleted_jobs() {
        let r = reconciler();
        let mut scheduler = Scheduler::new();
        let mut doomed = ScanJob::new("doomed", ScanConfig::new(ScanType::Pss));
        doomed.deletion_requested = true;
        scheduler.insert(doomed);
        scheduler.insert(ScanJob::new("kept", ScanConfig::new(ScanType::Pss)));

        scheduler.run_once(&r);
        let names: Vec<_> = scheduler.jobs().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[test]
    fn job_store_round_trips_status() {
        let dir = tempfile::tempdir().unwrap();
        let jobs_path = dir.path().join("jobs.yaml");
        std::fs::write(
            &jobs_path,
            r#"
- name: nightly
  config:
    scanType: pss
  schedule: 1d
"#,
        )
        .unwrap();

        let store = JobStore::new(&jobs_path);
        let mut jobs = store.load().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].config.scan_type, ScanType::Pss);

        jobs[0].status.phase = Phase::Completed;
        jobs[0].status.compliance_score = 87.5;
        store.save_status(jobs.iter()).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded[0].status.phase, Phase::Completed);
        assert_eq!(reloaded[0].status.compliance_score, 87.5);
    }
}

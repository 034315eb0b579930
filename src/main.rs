use clap::Parser;
use clusterscan::analyzer::network::NetworkAnalyzer;
use clusterscan::analyzer::pss::PssChecker;
use clusterscan::analyzer::rbac::RbacAnalyzer;
use clusterscan::cli::{Cli, Commands};
use clusterscan::cluster::snapshot::SnapshotCluster;
use clusterscan::controller::{JobStore, Reconciler, Scheduler};
use clusterscan::delivery::DeliveryClient;
use clusterscan::report::{write_json, write_table, Format};
use clusterscan::rules::backend::OpaExecBackend;
use clusterscan::rules::RuleSet;
use clusterscan::scanner::types::{ScanConfig, ScanType, Severity};
use clusterscan::scanner::Scanner;
use clusterscan::Result;
use log::warn;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

fn main() {
    let cli = Cli::parse();
    cli.init_logging();

    let result = match cli.command {
        Commands::Scan {
            manifests,
            scan_type,
            namespaces,
            severity_threshold,
            rule_paths,
            format,
            output,
            cluster_name,
            deliver_endpoint,
            deliver_token,
        } => handle_scan(
            manifests,
            &scan_type,
            namespaces,
            severity_threshold.as_deref(),
            rule_paths,
            &format,
            output,
            &cluster_name,
            deliver_endpoint.as_deref(),
            deliver_token.as_deref(),
        ),
        Commands::Agent {
            jobs,
            manifests,
            once,
            cluster_name,
        } => handle_agent(jobs, manifests, once, &cluster_name),
    };

    // Exit 0 means the run executed; finding outcomes never change it.
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn build_scanner(cluster: Arc<SnapshotCluster>, rule_paths: &[PathBuf]) -> Scanner {
    let mut scanner = Scanner::new(cluster)
        .register(Box::new(RbacAnalyzer::new()))
        .register(Box::new(NetworkAnalyzer::new()))
        .register(Box::new(PssChecker::new()));

    if !rule_paths.is_empty() {
        let backend = OpaExecBackend::new();
        if backend.is_available() {
            scanner = scanner.with_rules(Arc::new(RuleSet::new(Box::new(backend))));
        } else {
            warn!("opa binary not found on PATH, skipping rule evaluation");
        }
    }
    scanner
}

#[allow(clippy::too_many_arguments)]
fn handle_scan(
    manifests: PathBuf,
    scan_type: &str,
    namespaces: Vec<String>,
    severity_threshold: Option<&str>,
    rule_paths: Vec<PathBuf>,
    format: &str,
    output: Option<PathBuf>,
    cluster_name: &str,
    deliver_endpoint: Option<&str>,
    deliver_token: Option<&str>,
) -> Result<()> {
    // Validate everything user-supplied before touching the snapshot.
    let mut config = ScanConfig::new(ScanType::parse(scan_type)?);
    config.namespaces = namespaces;
    config.severity_threshold = severity_threshold.map(Severity::parse).transpose()?;
    config.rule_paths = rule_paths;
    let format: Format = format.parse()?;

    let cluster = Arc::new(SnapshotCluster::from_path(cluster_name, &manifests)?);
    let scanner = build_scanner(cluster, &config.rule_paths);
    let result = scanner.run(&config)?;

    match output {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            render(&mut file, format, &result)?;
        }
        None => {
            let mut stdout = std::io::stdout();
            render(&mut stdout, format, &result)?;
        }
    }

    // Delivery is best-effort and runs after rendering, so a bad endpoint
    // never fails an otherwise completed scan.
    if let (Some(endpoint), Some(token)) = (deliver_endpoint, deliver_token) {
        match DeliveryClient::new(endpoint, token) {
            Ok(client) => {
                if let Err(e) = client.upload(&result) {
                    warn!("result delivery failed: {}", e);
                }
            }
            Err(e) => warn!("result delivery skipped: {}", e),
        }
    }
    Ok(())
}

fn render<W: std::io::Write>(
    out: &mut W,
    format: Format,
    result: &clusterscan::scanner::types::ScanResult,
) -> Result<()> {
    match format {
        Format::Json => write_json(out, result),
        Format::Table => write_table(out, result),
    }
}

fn handle_agent(jobs: PathBuf, manifests: PathBuf, once: bool, cluster_name: &str) -> Result<()> {
    let cluster = Arc::new(SnapshotCluster::from_path(cluster_name, &manifests)?);
    let reconciler = Reconciler::new(build_scanner(cluster, &[]));

    let store = JobStore::new(jobs);
    let mut scheduler = Scheduler::new();
    for job in store.load()? {
        scheduler.insert(job);
    }

    loop {
        let wake = scheduler.run_once(&reconciler);
        store.save_status(scheduler.jobs())?;
        if once {
            return Ok(());
        }
        let sleep = wake
            .and_then(|d| d.to_std().ok())
            .unwrap_or(std::time::Duration::from_secs(30));
        std::thread::sleep(sleep);
    }
}

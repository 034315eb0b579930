use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clusterscan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate Kubernetes cluster configuration against security and compliance rules")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a compliance scan over a manifest snapshot
    Scan {
        /// YAML manifest file or directory representing the cluster
        #[arg(long, value_name = "PATH")]
        manifests: PathBuf,

        /// Scan type: cis, rbac, network, pss or full
        #[arg(long = "type", value_name = "TYPE", default_value = "full")]
        scan_type: String,

        /// Namespace to scan (repeatable; default is all non-system namespaces)
        #[arg(short = 'n', long = "namespace", value_name = "NS")]
        namespaces: Vec<String>,

        /// Keep only findings at or above this severity (pass findings are kept)
        #[arg(long, value_name = "SEVERITY")]
        severity_threshold: Option<String>,

        /// Directory of rule modules (repeatable)
        #[arg(long = "rules", value_name = "DIR")]
        rule_paths: Vec<PathBuf>,

        /// Output format: table or json
        #[arg(long, value_name = "FORMAT", default_value = "table")]
        format: String,

        /// Write the report to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Cluster name recorded in the result
        #[arg(long, value_name = "NAME", default_value = "local")]
        cluster_name: String,

        /// Deliver the result to this endpoint after the scan
        #[arg(long, value_name = "URL")]
        deliver_endpoint: Option<String>,

        /// Bearer token for result delivery
        #[arg(long, value_name = "TOKEN", env = "CLUSTERSCAN_TOKEN")]
        deliver_token: Option<String>,
    },

    /// Run the reconciliation agent over a job definition file
    Agent {
        /// YAML file of scan job definitions
        #[arg(long, value_name = "FILE")]
        jobs: PathBuf,

        /// YAML manifest file or directory representing the cluster
        #[arg(long, value_name = "PATH")]
        manifests: PathBuf,

        /// Reconcile every job once and exit instead of looping
        #[arg(long)]
        once: bool,

        /// Cluster name recorded in results
        #[arg(long, value_name = "NAME", default_value = "local")]
        cluster_name: String,
    },
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }
}

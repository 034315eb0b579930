//! Analyzer capability trait and scan context.

pub mod network;
pub mod pss;
pub mod rbac;

use crate::cluster::ClusterReader;
use crate::error::Result;
use crate::scanner::types::Finding;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a run and its owner.
/// Checked at namespace and resource granularity, so a cancelled run stops
/// within one resource's worth of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Shared state handed to every analyzer in a run.
pub struct ScanContext<'a> {
    pub cluster: &'a dyn ClusterReader,
    pub cancel: CancelToken,
}

impl<'a> ScanContext<'a> {
    pub fn new(cluster: &'a dyn ClusterReader) -> Self {
        Self {
            cluster,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(cluster: &'a dyn ClusterReader, cancel: CancelToken) -> Self {
        Self { cluster, cancel }
    }
}

/// A self-contained family of compliance checks.
pub trait Analyzer: Send + Sync {
    /// Stable name used for registry lookup and scan-type dispatch.
    fn name(&self) -> &'static str;

    /// Run the checks against the given namespaces and return findings.
    fn analyze(&self, ctx: &ScanContext<'_>, namespaces: &[String]) -> Result<Vec<Finding>>;
}

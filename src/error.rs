//! Error types for scan execution.
//!
//! The taxonomy distinguishes configuration mistakes (which fail a run
//! before any I/O), listing failures (fatal only for namespace resolution),
//! and the per-source / per-resource errors that are logged and skipped.

use thiserror::Error;

/// Errors that can occur while executing a compliance scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Invalid configuration (unknown scan type, bad severity string).
    /// Fails the run before any cluster I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Resource enumeration failed. Fatal when the scope is namespace
    /// resolution; otherwise the affected namespace is skipped.
    #[error("listing {scope}: {message}")]
    Listing { scope: String, message: String },

    /// A rule module failed to compile. The source is skipped, other
    /// sources load normally.
    #[error("rule module {module:?} failed to compile: {message}")]
    RuleCompile { module: String, message: String },

    /// Rule evaluation failed for a single resource. That resource's
    /// findings are skipped, the run continues.
    #[error("rule evaluation failed for {resource}: {message}")]
    RuleEval { resource: String, message: String },

    /// An analyzer failed. Logged and skipped in full scans; aborts the
    /// run when the analyzer is the sole target of a single-type scan.
    #[error("analyzer {name:?} failed: {message}")]
    Analyzer { name: String, message: String },

    /// Uploading results to an external endpoint failed. Logged only,
    /// never fails the scan.
    #[error("result delivery failed: {0}")]
    Delivery(String),

    /// Malformed manifest or job definition.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem access failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Listing error helper carrying the scope that failed.
    pub fn listing(scope: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Listing {
            scope: scope.into(),
            message: err.to_string(),
        }
    }

    /// Analyzer error helper.
    pub fn analyzer(name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Analyzer {
            name: name.into(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, ScanError>;

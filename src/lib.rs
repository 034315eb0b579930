//! Kubernetes security and compliance scan engine.
//!
//! The crate evaluates cluster configuration against rule modules and
//! built-in analyzers (RBAC, NetworkPolicy, Pod Security Standards),
//! producing a scored [`scanner::types::ScanResult`]. The `controller`
//! module drives recurring scans; `delivery` ships results to an external
//! endpoint.

pub mod analyzer;
pub mod cli;
pub mod cluster;
pub mod controller;
pub mod delivery;
pub mod error;
pub mod report;
pub mod rules;
pub mod scanner;

pub use error::{Result, ScanError};

//! Scan result renderers.

mod json;
mod table;

pub use json::write_json;
pub use table::write_table;

use crate::error::{Result, ScanError};
use std::str::FromStr;

/// Output format for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Table,
    Json,
}

impl FromStr for Format {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(ScanError::Config(format!(
                "unknown output format: {:?} (valid: table, json)",
                other
            ))),
        }
    }
}

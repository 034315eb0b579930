use crate::error::{Result, ScanError};
use crate::scanner::types::ScanResult;
use std::io::Write;

/// Write a result as pretty-printed JSON.
pub fn write_json<W: Write>(out: &mut W, result: &ScanResult) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, result)
        .map_err(|e| ScanError::Parse(e.to_string()))?;
    writeln!(out)?;
    Ok(())
}

use crate::error::Result;
use crate::scanner::types::{FindingStatus, ScanResult, Severity};
use colored::Colorize;
use prettytable::{format, row, Table};
use std::io::Write;

fn severity_cell(severity: Severity) -> String {
    let label = severity.as_str().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold().to_string(),
        Severity::High => label.red().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::Low => label.blue().to_string(),
        Severity::Info => label.dimmed().to_string(),
    }
}

fn status_cell(status: FindingStatus) -> String {
    match status {
        FindingStatus::Pass => status.as_str().green().to_string(),
        FindingStatus::Fail => status.as_str().red().bold().to_string(),
        FindingStatus::Warning => status.as_str().yellow().to_string(),
        FindingStatus::Error => status.as_str().red().to_string(),
        FindingStatus::Skipped => status.as_str().dimmed().to_string(),
    }
}

/// Write a human-readable summary table of the findings.
pub fn write_table<W: Write>(out: &mut W, result: &ScanResult) -> Result<()> {
    writeln!(
        out,
        "{} scan of cluster {:?} ({} namespaces{})",
        result.scan_type,
        result.cluster_name,
        result.namespaces.len(),
        if result.partial { ", partial" } else { "" }
    )?;

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BOX_CHARS);
    table.set_titles(row!["ID", "SEVERITY", "STATUS", "RESOURCE", "TITLE"]);
    for finding in &result.findings {
        let resource = if finding.resource.is_empty() {
            "-".to_string()
        } else {
            finding.resource.clone()
        };
        table.add_row(row![
            finding.id,
            severity_cell(finding.severity),
            status_cell(finding.status),
            resource,
            finding.title,
        ]);
    }
    table.print(out)?;

    let summary = &result.summary;
    writeln!(
        out,
        "\n{} checks: {} passed, {} failed, {} warnings ({} errors, {} skipped)",
        summary.total_checks,
        summary.passed_checks.to_string().green(),
        summary.failed_checks.to_string().red(),
        summary.warning_count.to_string().yellow(),
        summary.error_count,
        summary.skipped_count,
    )?;
    writeln!(out, "compliance score: {:.1}%", summary.score)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::{Finding, ScanType};

    #[test]
    fn table_renders_findings_and_score() {
        colored::control::set_override(false);
        let mut result = ScanResult::new("scan-1", ScanType::Full, "test");
        result.findings.push(
            Finding::new("PSS-B001", "Privileged container", Severity::Critical, FindingStatus::Fail)
                .with_resource("Pod/dev/web"),
        );
        result.findings.push(Finding::new(
            "RBAC-001",
            "No cluster-admin bindings",
            Severity::Info,
            FindingStatus::Pass,
        ));
        result.compute_summary();

        let mut buffer = Vec::new();
        write_table(&mut buffer, &result).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("PSS-B001"));
        assert!(text.contains("Pod/dev/web"));
        assert!(text.contains("compliance score: 50.0%"));
    }
}

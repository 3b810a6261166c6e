use crate::error::{CollectionError, ReportError};
use crate::model::Severity;
use crate::report::Report;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

fn file_stem(report: &Report) -> String {
    format!("run-{}", report.generated_at.format("%Y%m%dT%H%M%SZ"))
}

/// Write the report as pretty-printed JSON into `dir`
///
/// The file is named `run-<UTC timestamp>.json`. Returns the path written.
pub fn write_json(report: &Report, dir: &Path) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", file_stem(report)));
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json)?;
    info!("Wrote JSON report to {}", path.display());
    Ok(path)
}

/// Write the Markdown rendering of the report into `dir`
pub fn write_markdown(report: &Report, dir: &Path) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.md", file_stem(report)));
    fs::write(&path, render_markdown(report))?;
    info!("Wrote Markdown report to {}", path.display());
    Ok(path)
}

fn status_label(error: &Option<CollectionError>, partial: bool) -> String {
    match (error, partial) {
        (None, _) => "ok".to_string(),
        (Some(CollectionError::Timeout), true) => "timeout (partial data)".to_string(),
        (Some(err), _) => err.to_string(),
    }
}

/// Render the report as a human-readable Markdown document
pub fn render_markdown(report: &Report) -> String {
    let summary = report.summary();
    let mut out = String::new();

    out.push_str("# Diagnostic report\n\n");
    out.push_str(&format!(
        "Generated {} for {} to {}\n\n",
        report.generated_at.to_rfc3339(),
        report.window.start.to_rfc3339(),
        report.window.end.to_rfc3339()
    ));

    out.push_str("## Summary\n\n");
    out.push_str("| Resources | Healthy | Partial | Failed | Critical | Warning | Info |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");
    out.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} | {} |\n",
        summary.resources,
        summary.healthy,
        summary.partial,
        summary.failed,
        summary.critical,
        summary.warning,
        summary.info
    ));

    if !report.discovery_failures.is_empty() {
        out.push_str("\n## Discovery failures\n\n");
        for (resource_type, error) in &report.discovery_failures {
            out.push_str(&format!("- **{}**: {}\n", resource_type, error));
        }
    }

    out.push_str("\n## Findings\n");
    for severity in [Severity::Critical, Severity::Warning, Severity::Info] {
        let findings: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect();
        if findings.is_empty() {
            continue;
        }
        out.push_str(&format!("\n### {} ({})\n\n", severity, findings.len()));
        for finding in findings {
            out.push_str(&format!(
                "- `{}` {} ({}): {}\n",
                finding.rule_id,
                finding.resource.short_name(),
                finding.resource.resource_type,
                finding.message
            ));
        }
    }
    if report.findings.is_empty() {
        out.push_str("\nNo findings.\n");
    }

    out.push_str("\n## Resources\n\n");
    out.push_str("| Type | Resource | Status | Samples | Log excerpts | Missing metrics |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for result in report.results_by_resource.values() {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            result.resource.resource_type,
            result.resource.identifier,
            status_label(&result.error, result.partial),
            result.metrics.len(),
            result.logs.len(),
            result.missing_metrics.join(", ")
        ));
    }

    out
}

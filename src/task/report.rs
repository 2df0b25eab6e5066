#![forbid(unsafe_code)]

use std::fmt::Write as _;

use crate::config::Config;
use crate::core::fs::write_atomic;
use crate::task::model::RunReport;

/// Makes `s` safe for a single Markdown table cell.
fn cell(s: &str) -> String {
    if s.is_empty() {
        return "-".to_owned();
    }
    s.replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace("\r\n", "<br>")
        .replace(['\n', '\r'], "<br>")
}

#[must_use]
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("# Nightshift Run Report\n\n");
    let _ = writeln!(out, "- Run ID: {}", report.run_id);
    let _ = writeln!(out, "- Started at: {}", report.started_at);
    let _ = writeln!(out, "- Verify only: {}", report.verify_only);
    let _ = writeln!(out, "- Require verify commands: {}", report.require_verify);
    let _ = writeln!(out, "- Tasks file: {}", report.tasks_file);
    out.push('\n');
    out.push_str("| Task | Status | Verify | Branch | Error | Log |\n");
    out.push_str("| --- | --- | --- | --- | --- | --- |\n");
    for t in &report.tasks {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            cell(&t.task_id),
            t.status,
            cell(&t.verify),
            cell(&t.branch),
            cell(&t.error),
            cell(&t.log_file)
        );
    }
    out.push_str("\n## Summary\n\n");
    let _ = writeln!(out, "- Done: {}", report.summary.done);
    let _ = writeln!(out, "- Failed: {}", report.summary.failed);
    let _ = writeln!(out, "- Skipped: {}", report.summary.skipped);
    let _ = writeln!(out, "- Finished at: {}", report.finished_at);
    out
}

pub fn render_json(report: &RunReport) -> anyhow::Result<String> {
    let mut out = serde_json::to_string_pretty(report)?;
    out.push('\n');
    Ok(out)
}

/// Overwrites the last-run Markdown and JSON reports.
pub fn write_reports(cfg: &Config, report: &RunReport) -> anyhow::Result<()> {
    write_atomic(&cfg.last_report_file, render_markdown(report).as_bytes())?;
    write_atomic(&cfg.last_report_json_file, render_json(report)?.as_bytes())?;
    tracing::debug!(path = %cfg.last_report_file.display(), "wrote run report");
    Ok(())
}

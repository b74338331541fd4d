use std::fmt::Write;

use stratum_core::{BatchReport, MigrationOutcome, MigrationStatus, StatusReport};

/// One line per migration touched by a batch.
pub fn batch_lines(report: &BatchReport) -> String {
    let mut out = String::new();
    if report.results.is_empty() && !report.cancelled {
        out.push_str("nothing to do\n");
    }
    for result in &report.results {
        let (label, detail) = match &result.outcome {
            MigrationOutcome::Applied { duration } => {
                ("applied", format!("{:.3}s", duration.as_secs_f64()))
            }
            MigrationOutcome::Skipped => ("skipped", "should_execute returned false".to_string()),
            MigrationOutcome::AlreadyApplied => ("present", "applied by another runner".to_string()),
            MigrationOutcome::Reverted { duration } => {
                ("reverted", format!("{:.3}s", duration.as_secs_f64()))
            }
            MigrationOutcome::Blocked => ("blocked", "breakpoint set".to_string()),
            MigrationOutcome::Failed(e) => ("FAILED", e.to_string()),
        };
        let _ = writeln!(
            out,
            "{label:<9} {:>14}  {}  ({detail})",
            result.version, result.name
        );
    }
    if report.cancelled {
        out.push_str("cancelled\n");
    }
    out
}

pub fn status_table(report: &StatusReport) -> String {
    let mut out = String::new();
    if report.entries.is_empty() {
        out.push_str("no migrations found\n");
        return out;
    }

    let name_width = report
        .entries
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    let _ = writeln!(
        out,
        "{:<8} {:>14}  {:<name_width$}  {}",
        "Status", "Version", "Name", "Applied at"
    );
    for entry in &report.entries {
        let (status, applied) = match &entry.status {
            MigrationStatus::Applied {
                applied_at,
                breakpoint,
            } => (
                if *breakpoint { "up [bp]" } else { "up" },
                applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            MigrationStatus::Pending => ("down", String::new()),
            MigrationStatus::Missing {
                applied_at,
                breakpoint,
            } => (
                if *breakpoint { "missing*" } else { "missing" },
                applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
        };
        let _ = writeln!(
            out,
            "{status:<8} {:>14}  {:<name_width$}  {applied}",
            entry.version, entry.name
        );
    }
    if report.has_missing() {
        out.push_str("\nmissing: applied versions with no migration file\n");
    }
    out
}

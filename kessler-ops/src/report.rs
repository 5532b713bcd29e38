//! Human-readable output for operator commands

use kessler_common::auditor::{AuditReport, DriftReport};
use kessler_common::promotion::{BatchPlan, BatchReport};
use kessler_common::store::SearchPage;
use kessler_common::Envelope;
use std::fmt::Write;
use std::io::{self, BufRead};

const RULE_WIDTH: usize = 60;

/// Ask a yes/no question; anything but `y`/`yes` (including EOF) is no
pub fn confirm<R, W>(input: &mut R, output: &mut W, prompt: &str) -> io::Result<bool>
where
    R: BufRead,
    W: io::Write,
{
    write!(output, "{} [y/N] ", prompt)?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Ok(false);
    }
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// [`confirm`] on the blocking thread pool, for use from async commands
pub async fn confirm_blocking<R, W>(mut input: R, mut output: W, prompt: String) -> io::Result<bool>
where
    R: BufRead + Send + 'static,
    W: io::Write + Send + 'static,
{
    tokio::task::spawn_blocking(move || confirm(&mut input, &mut output, &prompt))
        .await
        .map_err(io::Error::other)?
}

pub fn format_plan(plan: &BatchPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Promoting: {} -> {}",
        plan.request.source_field(),
        plan.request.target_field()
    );
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    let _ = writeln!(out, "Found {} candidate envelopes", plan.candidates.len());
    if !plan.missing.is_empty() {
        let _ = writeln!(out, "Not found: {}", plan.missing.join(", "));
    }
    if plan.conflicts.count > 0 {
        let _ = writeln!(
            out,
            "Warning: {} envelopes already have a value at {} (e.g. {})",
            plan.conflicts.count,
            plan.request.target_field(),
            plan.conflicts.sample.join(", ")
        );
    }
    if plan.dry_run {
        let _ = writeln!(out, "[DRY-RUN MODE] No changes will be applied.");
    }
    out
}

pub fn format_batch_report(report: &BatchReport) -> String {
    let mut out = String::new();
    let heading = if report.dry_run {
        "Promotion preview"
    } else {
        "Promotion complete"
    };
    let _ = writeln!(out, "{}", heading);
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    let _ = writeln!(out, "  total:   {}", report.total);
    let _ = writeln!(out, "  applied: {}", report.applied);
    let _ = writeln!(out, "  skipped: {}", report.skipped);
    let _ = writeln!(out, "  errors:  {}", report.errors);
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "    {} [{:?}] {}",
            failure.identifier, failure.kind, failure.message
        );
    }
    out
}

pub fn format_drift(findings: &[DriftReport]) -> String {
    let mut out = String::new();
    for finding in findings {
        let _ = writeln!(
            out,
            "{}: no '{}' node for {}",
            finding.identifier,
            finding.missing_source_name,
            finding.untraced_fields.join(", ")
        );
    }
    let _ = writeln!(out, "{} drifted envelopes", findings.len());
    out
}

pub fn format_audit_report(report: &AuditReport) -> String {
    format!(
        "scanned: {}  drifted: {}  repaired: {}  errors: {}\n",
        report.scanned, report.drifted, report.repaired, report.errors
    )
}

pub fn format_search_page(page: &SearchPage) -> String {
    let mut out = String::new();
    for envelope in &page.matches {
        let _ = writeln!(out, "{}", summary_line(envelope));
    }
    let shown_from = if page.matches.is_empty() { 0 } else { page.skip as u64 + 1 };
    let shown_to = page.skip as u64 + page.matches.len() as u64;
    let _ = writeln!(out, "Showing {}-{} of {}", shown_from, shown_to, page.total);
    out
}

fn summary_line(envelope: &Envelope) -> String {
    let name = envelope
        .canonical_str("name")
        .or_else(|| envelope.canonical_str("object_name"))
        .unwrap_or("-");
    let designator = envelope.canonical_str("international_designator").unwrap_or("-");
    let status = envelope.canonical_str("status").unwrap_or("-");
    format!("{:<16} {:<32} {:<12} {}", envelope.identifier, name, designator, status)
}

//! Human and machine renderings of check results

use crate::compare::{BenchComparison, ComparisonStatus, RegressionReport};
use crate::ingest::{BatchOutcome, Disposition, IngestOutcome, Verdict};
use crate::model::Entry;
use std::fmt::Write as _;

fn status_icon(status: ComparisonStatus) -> &'static str {
    match status {
        ComparisonStatus::Regressed => "❌",
        ComparisonStatus::Improved => "🚀",
        ComparisonStatus::Unchanged => "✅",
        ComparisonStatus::NoBaseline | ComparisonStatus::ZeroBaseline => "➖",
    }
}

fn fmt_delta(delta: Option<f64>) -> String {
    delta.map_or_else(|| "n/a".to_string(), |d| format!("{:+.2}%", d))
}

fn fmt_value(value: Option<f64>, unit: &str) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{} {}", v, unit))
}

fn bench_line(bench: &BenchComparison) -> String {
    format!(
        "  {} {} baseline={} current={} {} delta={}\n",
        status_icon(bench.status),
        bench.name,
        fmt_value(bench.baseline_value, &bench.unit),
        bench.current_value,
        bench.unit,
        fmt_delta(bench.percent_delta),
    )
}

/// Plain-text report for one comparison
pub fn report_text(report: &RegressionReport) -> String {
    let mut out = String::new();

    let regressions = report.regressions().count();
    if regressions > 0 {
        let _ = writeln!(out, "❌ REGRESSION DETECTED ({} benches)\n", regressions);
    } else if !report.has_baseline() {
        out.push_str("⚠️  NO BASELINE\n\n");
    } else {
        out.push_str("✅ NO REGRESSION DETECTED\n\n");
    }

    let _ = writeln!(out, "Suite: {}", report.suite);
    let _ = writeln!(out, "Commit: {}", report.commit_id);
    let _ = writeln!(
        out,
        "Baseline: {}{}",
        report.baseline_policy,
        report
            .baseline_commit
            .as_deref()
            .map(|c| format!(" ({})", c))
            .unwrap_or_default()
    );
    let _ = writeln!(out, "Threshold: {}%", report.threshold);

    if !report.benches.is_empty() {
        out.push_str("\n📊 Benches:\n");
        for bench in &report.benches {
            out.push_str(&bench_line(bench));
        }
    }

    out
}

fn outcome_text(outcome: &IngestOutcome, out: &mut String) {
    let state = match &outcome.disposition {
        Disposition::Stored { append } if append.is_replace() => "replaced",
        Disposition::Stored { .. } => "stored",
        Disposition::DryRun { .. } => "dry run, not stored",
        Disposition::Rejected => "rejected",
    };
    let _ = writeln!(out, "── {} @ {} ({})", outcome.suite, outcome.commit_id, state);

    for failure in &outcome.aggregation_failures {
        let _ = writeln!(out, "  ⚠️  dropped {}: {}", failure.bench, failure.reason);
    }
    if let Some(validation) = &outcome.validation {
        for violation in &validation.violations {
            let _ = writeln!(out, "  ⚠️  {}", violation);
        }
    }
    for warning in &outcome.warnings {
        let _ = writeln!(out, "  ℹ️  {}", warning);
    }
    if let Some(err) = &outcome.compare_error {
        let _ = writeln!(out, "  ⚠️  {}", err);
    }
    if let Some(report) = &outcome.report {
        for line in report_text(report).lines() {
            let _ = writeln!(out, "  {}", line);
        }
    }
}

/// Plain-text report for a whole `check` run
pub fn batch_text(batch: &BatchOutcome) -> String {
    let mut out = String::new();

    match batch.verdict() {
        Verdict::Clean => out.push_str("✅ NO REGRESSION DETECTED\n"),
        Verdict::Regression => out.push_str("❌ REGRESSION DETECTED\n"),
        Verdict::InvalidInput => out.push_str("⚠️  INVALID INPUT\n"),
    }

    for failure in &batch.load_failures {
        let _ = writeln!(out, "\n⚠️  {}: {}", failure.source, failure.reason);
    }
    for outcome in &batch.outcomes {
        out.push('\n');
        outcome_text(outcome, &mut out);
    }
    if let Some(failure) = &batch.store_failure {
        let _ = writeln!(
            out,
            "\n⚠️  STORE FAILURE at {} (later files skipped): {}",
            failure.source, failure.reason
        );
    }

    out
}

/// Markdown table for one comparison, suitable for a PR comment
pub fn report_markdown(report: &RegressionReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "### {} `{}`\n", report.suite, report.commit_id);
    out.push_str("| Bench | Baseline | Current | Delta | Status |\n");
    out.push_str("|-------|----------|---------|-------|--------|\n");
    for bench in &report.benches {
        let _ = writeln!(
            out,
            "| {} | {} | {} {} | {} | {} |",
            bench.name,
            fmt_value(bench.baseline_value, &bench.unit),
            bench.current_value,
            bench.unit,
            fmt_delta(bench.percent_delta),
            status_icon(bench.status),
        );
    }
    let _ = writeln!(
        out,
        "\nThreshold {}%, baseline `{}`",
        report.threshold, report.baseline_policy
    );

    out
}

pub fn batch_markdown(batch: &BatchOutcome) -> String {
    let mut out = String::new();

    let headline = match batch.verdict() {
        Verdict::Clean => "## ✅ No regression detected",
        Verdict::Regression => "## ❌ Regression detected",
        Verdict::InvalidInput => "## ⚠️ Invalid input",
    };
    let _ = writeln!(out, "{}\n", headline);

    for failure in &batch.load_failures {
        let _ = writeln!(out, "- `{}`: {}", failure.source, failure.reason);
    }
    for outcome in &batch.outcomes {
        if let Some(validation) = &outcome.validation {
            let _ = writeln!(out, "- {}", validation);
        }
        for failure in &outcome.aggregation_failures {
            let _ = writeln!(out, "- dropped `{}`: {}", failure.bench, failure.reason);
        }
        if let Some(report) = &outcome.report {
            out.push('\n');
            out.push_str(&report_markdown(report));
        }
    }
    if let Some(failure) = &batch.store_failure {
        let _ = writeln!(
            out,
            "\n- store failure at `{}`, later files skipped: {}",
            failure.source, failure.reason
        );
    }

    out
}

/// Entry listing for `query`
pub fn entries_text(suite: &str, entries: &[Entry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Suite: {} ({} entries)", suite, entries.len());

    for entry in entries {
        let _ = writeln!(out, "\n{} date={} tool={}", entry.commit_id(), entry.date, entry.tool);
        for bench in &entry.benches {
            let _ = writeln!(
                out,
                "  {} = {} {}{}",
                bench.name,
                bench.value,
                bench.unit,
                bench
                    .extra
                    .as_deref()
                    .map(|e| format!(" ({})", e))
                    .unwrap_or_default()
            );
        }
    }

    out
}

pub fn entries_markdown(suite: &str, entries: &[Entry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "### {}\n", suite);
    out.push_str("| Commit | Date | Bench | Value |\n");
    out.push_str("|--------|------|-------|-------|\n");
    for entry in entries {
        for bench in &entry.benches {
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} {} |",
                entry.commit_id(),
                entry.date,
                bench.name,
                bench.value,
                bench.unit
            );
        }
    }
    out
}

/// Pretty JSON for anything serializable
pub fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

//! Text and JSON report printers.
//!
//! Text output shows failing checks always and everything else behind
//! `--all-checks`; JSON output is the stable wire shape downstream tooling
//! consumes, so nothing here ever renames a serialized field.

use std::io::Write;

use mcp_conformance_core::{
    BaselineEvaluation, CheckStatus, ConformanceCheck, ScenarioRunResult,
};
use owo_colors::OwoColorize;
use serde_json::json;

fn status_label(status: CheckStatus) -> String {
    match status {
        CheckStatus::Success => format!("{}", "PASS".green()),
        CheckStatus::Failure => format!("{}", "FAIL".red()),
        CheckStatus::Warning => format!("{}", "WARN".yellow()),
        CheckStatus::Info => format!("{}", "INFO".blue()),
        CheckStatus::Skipped => format!("{}", "SKIP".dimmed()),
    }
}

fn print_check(out: &mut impl Write, check: &ConformanceCheck) -> std::io::Result<()> {
    writeln!(out, "  {} {}", status_label(check.status), check.id)?;
    if let Some(message) = &check.error_message {
        writeln!(out, "       {message}")?;
    }
    for reference in &check.spec_references {
        writeln!(out, "       {} <{}>", reference.id, reference.url)?;
    }
    Ok(())
}

/// Per-scenario text report.
pub fn print_text(
    out: &mut impl Write,
    results: &[ScenarioRunResult],
    all_checks: bool,
) -> std::io::Result<()> {
    let mut scenarios_failed = 0usize;
    for result in results {
        let failing: Vec<_> = result
            .checks
            .iter()
            .filter(|c| c.status.is_failing())
            .collect();
        let verdict = if failing.is_empty() {
            format!("{}", "ok".green())
        } else {
            scenarios_failed += 1;
            format!("{}", "failed".red())
        };
        writeln!(out, "{} ... {verdict}", result.scenario_name.bold())?;

        for check in &result.checks {
            if check.status.is_failing() || all_checks {
                print_check(out, check)?;
            }
        }
    }

    writeln!(
        out,
        "\n{} scenario(s), {} failed",
        results.len(),
        scenarios_failed
    )
}

/// Reconciliation section appended after the scenario report.
pub fn print_baseline_text(
    out: &mut impl Write,
    eval: &BaselineEvaluation,
) -> std::io::Result<()> {
    if !eval.expected_failures.is_empty() {
        writeln!(
            out,
            "{} known failure(s) matched the baseline",
            eval.expected_failures.len()
        )?;
    }
    for name in &eval.unexpected_failures {
        writeln!(out, "{} {name}: failed but not in the baseline", "UNEXPECTED".red())?;
    }
    for name in &eval.stale_entries {
        writeln!(out, "{} {name}: baselined but now passing", "STALE".yellow())?;
    }
    if eval.unexpected_failures.is_empty() && eval.stale_entries.is_empty() {
        writeln!(out, "baseline: {}", "clean".green())?;
    }
    Ok(())
}

/// The machine-readable report. `baseline` is present only when a baseline
/// was supplied.
pub fn render_json(
    results: &[ScenarioRunResult],
    baseline: Option<&BaselineEvaluation>,
) -> serde_json::Value {
    let scenarios: Vec<_> = results
        .iter()
        .map(|result| {
            json!({
                "scenario": result.scenario_name,
                "hasFailure": result.has_failure(),
                "checks": result.checks,
            })
        })
        .collect();

    let mut report = json!({ "scenarios": scenarios });
    if let Some(eval) = baseline {
        report["baseline"] = json!({
            "expectedFailures": eval.expected_failures,
            "unexpectedFailures": eval.unexpected_failures,
            "staleEntries": eval.stale_entries,
            "exitCode": eval.exit_code,
        });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mcp_conformance_core::SpecReference;

    fn check(id: &str, status: CheckStatus) -> ConformanceCheck {
        ConformanceCheck {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            status,
            timestamp: Utc::now(),
            error_message: matches!(status, CheckStatus::Failure)
                .then(|| "broke".to_string()),
            details: None,
            spec_references: vec![SpecReference::new(
                "RFC6750#3",
                "https://www.rfc-editor.org/rfc/rfc6750",
            )],
        }
    }

    fn result(name: &str, statuses: &[CheckStatus]) -> ScenarioRunResult {
        ScenarioRunResult {
            scenario_name: name.to_string(),
            checks: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| check(&format!("c{i}"), *s))
                .collect(),
        }
    }

    #[test]
    fn text_hides_passes_unless_asked() {
        let results = vec![result("a", &[CheckStatus::Success, CheckStatus::Failure])];

        let mut terse = Vec::new();
        print_text(&mut terse, &results, false).unwrap();
        let terse = String::from_utf8(terse).unwrap();
        assert!(terse.contains("c1"));
        assert!(!terse.contains("c0"));

        let mut full = Vec::new();
        print_text(&mut full, &results, true).unwrap();
        let full = String::from_utf8(full).unwrap();
        assert!(full.contains("c0"));
        assert!(full.contains("c1"));
    }

    #[test]
    fn json_report_shape() {
        let results = vec![result("a", &[CheckStatus::Warning])];
        let report = render_json(&results, None);
        assert_eq!(report["scenarios"][0]["scenario"], "a");
        assert_eq!(report["scenarios"][0]["hasFailure"], true);
        assert_eq!(
            report["scenarios"][0]["checks"][0]["status"],
            "WARNING"
        );
        assert!(report.get("baseline").is_none());
    }

    #[test]
    fn json_report_includes_baseline_when_present() {
        let eval = BaselineEvaluation {
            unexpected_failures: vec!["a".to_string()],
            exit_code: 1,
            ..BaselineEvaluation::default()
        };
        let report = render_json(&[], Some(&eval));
        assert_eq!(report["baseline"]["unexpectedFailures"][0], "a");
        assert_eq!(report["baseline"]["exitCode"], 1);
    }
}

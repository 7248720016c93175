//! Expected-failures baseline loading and reconciliation.
//!
//! The baseline is a small YAML document naming scenarios currently
//! permitted to fail. Reconciliation is symmetric by design: a run is
//! violated both by new failures (not in the baseline) and by baseline
//! entries that no longer reproduce (stale), forcing active maintenance of
//! the file rather than letting it rot into a mask over regressions.

use serde_yaml::Value;

use crate::check::ConformanceCheck;

/// Scenarios expected to fail, split by which side of the protocol the
/// suite is testing. Both keys optional; an empty document is a valid,
/// empty baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectedFailures {
    pub server: Option<Vec<String>>,
    pub client: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("invalid baseline file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid baseline file: expected an object")]
    NotAnObject,
    #[error("invalid baseline file: '{0}' must be an array")]
    NotAnArray(&'static str),
}

fn string_list(value: &Value, key: &'static str) -> Result<Option<Vec<String>>, BaselineError> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Sequence(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => return Err(BaselineError::NotAnArray(key)),
                }
            }
            Ok(Some(out))
        }
        Some(_) => Err(BaselineError::NotAnArray(key)),
    }
}

impl ExpectedFailures {
    /// Parse a baseline document.
    ///
    /// An empty document is valid and yields the empty baseline. A non-map
    /// top level or non-sequence `server`/`client` entry is an explicit
    /// error, not a silent default.
    pub fn parse(text: &str) -> Result<Self, BaselineError> {
        let value: Value = serde_yaml::from_str(text)?;
        match value {
            Value::Null => Ok(Self::default()),
            Value::Mapping(_) => Ok(Self {
                server: string_list(&value, "server")?,
                client: string_list(&value, "client")?,
            }),
            _ => Err(BaselineError::NotAnObject),
        }
    }

    /// The expected-failure list for one side, empty if the key is absent.
    pub fn for_side(&self, server_side: bool) -> &[String] {
        let list = if server_side { &self.server } else { &self.client };
        list.as_deref().unwrap_or(&[])
    }
}

/// The finished check list of one scenario invocation.
#[derive(Debug, Clone)]
pub struct ScenarioRunResult {
    pub scenario_name: String,
    pub checks: Vec<ConformanceCheck>,
}

impl ScenarioRunResult {
    /// A scenario "has a failure" for reconciliation purposes if any check
    /// is FAILURE or WARNING. Deliberately broader than the exit-code
    /// definition: an un-reviewed WARNING in a baseline is a tolerated
    /// deviation and must stay tracked.
    pub fn has_failure(&self) -> bool {
        self.checks.iter().any(|c| c.status.is_failing())
    }
}

/// Outcome of reconciling one run-set against a baseline. Derived, never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineEvaluation {
    pub expected_failures: Vec<String>,
    pub unexpected_failures: Vec<String>,
    pub stale_entries: Vec<String>,
    pub exit_code: i32,
}

/// Diff the current run against the expected-failures set.
///
/// Baseline entries naming scenarios absent from `results` are silently
/// ignored: the baseline may be broader than one invocation's selection.
pub fn evaluate_baseline(
    results: &[ScenarioRunResult],
    expected: &[String],
) -> BaselineEvaluation {
    let mut eval = BaselineEvaluation::default();

    for result in results {
        let listed = expected.iter().any(|name| *name == result.scenario_name);
        match (result.has_failure(), listed) {
            (true, true) => eval.expected_failures.push(result.scenario_name.clone()),
            (true, false) => eval.unexpected_failures.push(result.scenario_name.clone()),
            (false, true) => eval.stale_entries.push(result.scenario_name.clone()),
            (false, false) => {}
        }
    }

    eval.exit_code = if eval.unexpected_failures.is_empty() && eval.stale_entries.is_empty() {
        0
    } else {
        1
    };
    eval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckStatus;
    use chrono::Utc;

    fn result(name: &str, statuses: &[CheckStatus]) -> ScenarioRunResult {
        ScenarioRunResult {
            scenario_name: name.to_string(),
            checks: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| ConformanceCheck {
                    id: format!("{name}.{i}"),
                    name: format!("{name} check {i}"),
                    description: String::new(),
                    status: *status,
                    timestamp: Utc::now(),
                    error_message: None,
                    details: None,
                    spec_references: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn parse_server_only_document() {
        let parsed = ExpectedFailures::parse("server:\n  - a\n  - b\n").unwrap();
        assert_eq!(parsed.server.as_deref(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(parsed.client, None);
    }

    #[test]
    fn parse_empty_document() {
        assert_eq!(ExpectedFailures::parse("").unwrap(), ExpectedFailures::default());
    }

    #[test]
    fn top_level_sequence_is_rejected() {
        let err = ExpectedFailures::parse("- a\n- b\n").unwrap_err();
        assert!(err.to_string().contains("expected an object"));
    }

    #[test]
    fn non_sequence_side_is_rejected() {
        let err = ExpectedFailures::parse("server: nope\n").unwrap_err();
        assert!(err.to_string().contains("'server' must be an array"));
        let err = ExpectedFailures::parse("client: 3\n").unwrap_err();
        assert!(err.to_string().contains("'client' must be an array"));
    }

    #[test]
    fn stale_entry_fails_the_run() {
        let eval = evaluate_baseline(
            &[result("a", &[CheckStatus::Success])],
            &["a".to_string()],
        );
        assert_eq!(eval.stale_entries, vec!["a"]);
        assert!(eval.expected_failures.is_empty());
        assert_eq!(eval.exit_code, 1);
    }

    #[test]
    fn unexpected_failure_fails_the_run() {
        let eval = evaluate_baseline(&[result("a", &[CheckStatus::Failure])], &[]);
        assert_eq!(eval.unexpected_failures, vec!["a"]);
        assert_eq!(eval.exit_code, 1);
    }

    #[test]
    fn expected_failure_plus_clean_pass_is_green() {
        let eval = evaluate_baseline(
            &[
                result("a", &[CheckStatus::Failure]),
                result("b", &[CheckStatus::Success]),
            ],
            &["a".to_string()],
        );
        assert_eq!(eval.expected_failures, vec!["a"]);
        assert!(eval.unexpected_failures.is_empty());
        assert!(eval.stale_entries.is_empty());
        assert_eq!(eval.exit_code, 0);
    }

    #[test]
    fn warning_counts_as_failing_for_reconciliation() {
        let eval = evaluate_baseline(
            &[result("a", &[CheckStatus::Success, CheckStatus::Warning])],
            &[],
        );
        assert_eq!(eval.unexpected_failures, vec!["a"]);
    }

    #[test]
    fn baseline_entries_absent_from_run_are_ignored() {
        let eval = evaluate_baseline(
            &[result("a", &[CheckStatus::Success])],
            &["ghost".to_string()],
        );
        assert!(eval.expected_failures.is_empty());
        assert!(eval.unexpected_failures.is_empty());
        assert!(eval.stale_entries.is_empty());
        assert_eq!(eval.exit_code, 0);
    }
}

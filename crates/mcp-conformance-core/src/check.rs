//! Conformance check model.
//!
//! A check is the canonical record of one assertion's outcome. Checks are
//! created once and never mutated after being recorded; scenarios only ever
//! append through [`CheckRecorder`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single conformance assertion.
///
/// Two distinct "failing" predicates exist on purpose and must not be
/// conflated:
/// - [`CheckStatus::is_failing`] is the baseline-reconciliation sense:
///   WARNING and FAILURE both count, so a tolerated SHOULD-level deviation in
///   the baseline stays tracked.
/// - [`CheckStatus::fails_exit`] is the plain exit-code sense: only FAILURE
///   counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Success,
    Failure,
    Warning,
    Info,
    Skipped,
}

impl CheckStatus {
    /// Failing in the baseline-reconciliation sense (FAILURE or WARNING).
    pub fn is_failing(self) -> bool {
        matches!(self, Self::Failure | Self::Warning)
    }

    /// Failing in the plain exit-code sense (FAILURE only).
    pub fn fails_exit(self) -> bool {
        matches!(self, Self::Failure)
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Citation of the normative text an assertion is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecReference {
    pub id: String,
    pub url: String,
}

impl SpecReference {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// One recorded assertion outcome.
///
/// `id` is stable across runs of the same scenario; baseline matching works
/// by scenario name, never by check id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceCheck {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: CheckStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spec_references: Vec<SpecReference>,
}

/// Static description of an assertion a scenario intends to make.
///
/// Scenarios declare their full assertion set up front so that an
/// implementation under test which dies early cannot appear to pass by
/// omission: any declared assertion that was never recorded is synthesized
/// as a terminal FAILURE by [`CheckRecorder::finish`].
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub spec_references: &'static [(&'static str, &'static str)],
}

impl CheckSpec {
    fn references(&self) -> Vec<SpecReference> {
        self.spec_references
            .iter()
            .map(|(id, url)| SpecReference::new(*id, *url))
            .collect()
    }
}

/// Append-only sink for a scenario's checks.
///
/// Exactly one terminal check is recorded per declared assertion id; a
/// second record for the same id is ignored rather than overwriting the
/// first.
#[derive(Debug, Default)]
pub struct CheckRecorder {
    declared: Vec<CheckSpec>,
    checks: Vec<ConformanceCheck>,
}

impl CheckRecorder {
    pub fn new(declared: Vec<CheckSpec>) -> Self {
        Self {
            declared,
            checks: Vec::new(),
        }
    }

    fn spec_for(&self, id: &str) -> Option<&CheckSpec> {
        self.declared.iter().find(|s| s.id == id)
    }

    fn already_recorded(&self, id: &str) -> bool {
        self.checks.iter().any(|c| c.id == id)
    }

    fn record(
        &mut self,
        id: &str,
        status: CheckStatus,
        error_message: Option<String>,
        details: Option<serde_json::Value>,
    ) {
        if self.already_recorded(id) {
            return;
        }
        let (name, description, refs) = match self.spec_for(id) {
            Some(spec) => (
                spec.name.to_string(),
                spec.description.to_string(),
                spec.references(),
            ),
            None => (id.to_string(), String::new(), Vec::new()),
        };
        self.checks.push(ConformanceCheck {
            id: id.to_string(),
            name,
            description,
            status,
            timestamp: Utc::now(),
            error_message,
            details,
            spec_references: refs,
        });
    }

    pub fn success(&mut self, id: &str) {
        self.record(id, CheckStatus::Success, None, None);
    }

    /// Record a pass together with its structured evidence. Checks are
    /// immutable once recorded, so evidence has to arrive with the outcome.
    pub fn success_with_details(&mut self, id: &str, details: serde_json::Value) {
        self.record(id, CheckStatus::Success, None, Some(details));
    }

    pub fn failure(&mut self, id: &str, message: impl Into<String>) {
        self.record(id, CheckStatus::Failure, Some(message.into()), None);
    }

    pub fn warning(&mut self, id: &str, message: impl Into<String>) {
        self.record(id, CheckStatus::Warning, Some(message.into()), None);
    }

    pub fn info(&mut self, id: &str, message: impl Into<String>) {
        self.record(id, CheckStatus::Info, Some(message.into()), None);
    }

    /// Record an assertion as skipped because its prerequisite never ran.
    ///
    /// SKIPPED is explicitly distinct from FAILURE: "untested" must never be
    /// conflated with "broken", and one upstream problem must not cascade
    /// into a pile of spurious failures.
    pub fn skipped(&mut self, id: &str, reason: impl Into<String>) {
        self.record(id, CheckStatus::Skipped, Some(reason.into()), None);
    }

    /// Record a pass/fail pair in one call.
    pub fn assert(&mut self, id: &str, ok: bool, failure_message: impl Into<String>) {
        if ok {
            self.success(id);
        } else {
            self.failure(id, failure_message);
        }
    }

    /// Number of checks recorded so far.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Finalize the list: every declared assertion that was never reached is
    /// synthesized as a terminal FAILURE naming the reason.
    pub fn finish(mut self, missing_reason: &str) -> Vec<ConformanceCheck> {
        let missing: Vec<String> = self
            .declared
            .iter()
            .filter(|spec| !self.already_recorded(spec.id))
            .map(|spec| spec.id.to_string())
            .collect();
        for id in missing {
            let reason = format!("assertion never evaluated: {missing_reason}");
            self.record(&id, CheckStatus::Failure, Some(reason), None);
        }
        self.checks
    }

    /// Snapshot of the checks recorded so far, without synthesizing missing
    /// assertions.
    pub fn snapshot(&self) -> Vec<ConformanceCheck> {
        self.checks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[CheckSpec] = &[
        CheckSpec {
            id: "a",
            name: "first",
            description: "first assertion",
            spec_references: &[("RFC9728#3", "https://www.rfc-editor.org/rfc/rfc9728#section-3")],
        },
        CheckSpec {
            id: "b",
            name: "second",
            description: "second assertion",
            spec_references: &[],
        },
    ];

    #[test]
    fn finish_synthesizes_missing_assertions_as_failures() {
        let mut rec = CheckRecorder::new(SPECS.to_vec());
        rec.success("a");
        let checks = rec.finish("client exited before the token request");

        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].status, CheckStatus::Success);
        assert_eq!(checks[1].id, "b");
        assert_eq!(checks[1].status, CheckStatus::Failure);
        assert!(
            checks[1]
                .error_message
                .as_deref()
                .unwrap()
                .contains("never evaluated")
        );
    }

    #[test]
    fn first_terminal_record_wins() {
        let mut rec = CheckRecorder::new(SPECS.to_vec());
        rec.failure("a", "broke");
        rec.success("a");
        let checks = rec.finish("n/a");
        assert_eq!(checks.iter().filter(|c| c.id == "a").count(), 1);
        assert_eq!(checks[0].status, CheckStatus::Failure);
    }

    #[test]
    fn spec_references_carry_through() {
        let mut rec = CheckRecorder::new(SPECS.to_vec());
        rec.success("a");
        let checks = rec.finish("n/a");
        assert_eq!(checks[0].spec_references[0].id, "RFC9728#3");
    }

    #[test]
    fn wire_shape_uses_camel_case_and_omits_empty_fields() {
        let mut rec = CheckRecorder::new(SPECS.to_vec());
        rec.failure("b", "no challenge header");
        let checks = rec.snapshot();
        let json = serde_json::to_value(&checks[0]).unwrap();
        assert_eq!(json["status"], "FAILURE");
        assert_eq!(json["errorMessage"], "no challenge header");
        assert!(json.get("specReferences").is_none());
        assert!(json.get("details").is_none());
    }

    #[test]
    fn details_arrive_with_the_outcome_and_never_change() {
        let mut rec = CheckRecorder::new(SPECS.to_vec());
        rec.success_with_details("a", serde_json::json!({ "resolvedFrom": "oidc" }));
        rec.success_with_details("a", serde_json::json!({ "resolvedFrom": "rfc8414" }));
        let checks = rec.finish("n/a");

        let check = checks.iter().find(|c| c.id == "a").unwrap();
        assert_eq!(check.status, CheckStatus::Success);
        assert_eq!(
            check.details,
            Some(serde_json::json!({ "resolvedFrom": "oidc" }))
        );
    }

    #[test]
    fn warning_fails_baseline_but_not_exit() {
        assert!(CheckStatus::Warning.is_failing());
        assert!(!CheckStatus::Warning.fails_exit());
        assert!(CheckStatus::Failure.fails_exit());
        assert!(!CheckStatus::Skipped.is_failing());
    }
}

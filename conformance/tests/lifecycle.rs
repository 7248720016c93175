//! Scenario lifecycle and runner isolation.
//!
//! Exercises the CREATED → STARTED → STOPPED state machine and the runner's
//! failure-isolation guarantees with stub bodies, no sockets involved.

use async_trait::async_trait;
use mcp_conformance::{runner, Registry, RunContext, ScenarioDef, Side, StartInfo};
use mcp_conformance::scenario::{Scenario, ScenarioBody, ScenarioError, SetupError};
use mcp_conformance_core::{CheckRecorder, CheckSpec, CheckStatus};

static TWO_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "first",
        name: "first",
        description: "",
        spec_references: &[],
    },
    CheckSpec {
        id: "second",
        name: "second",
        description: "",
        spec_references: &[],
    },
];

struct Stub {
    fail_setup: bool,
    err_run: bool,
    record_first_only: bool,
}

#[async_trait]
impl ScenarioBody for Stub {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        if self.fail_setup {
            return Err(SetupError::Config("no harness today".to_string()));
        }
        Ok(StartInfo::at("http://127.0.0.1:1/mcp"))
    }

    async fn run(
        &mut self,
        _ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        recorder.success("first");
        if self.err_run {
            return Err(ScenarioError::flow("wire fell over"));
        }
        if !self.record_first_only {
            recorder.success("second");
        }
        Ok(())
    }

    async fn stop(&mut self) {}
}

static HAPPY: ScenarioDef = ScenarioDef {
    name: "stub.happy",
    side: Side::Server,
    description: "records everything",
    assertions: TWO_CHECKS,
    build: || {
        Box::new(Stub {
            fail_setup: false,
            err_run: false,
            record_first_only: false,
        })
    },
};

static FORGETFUL: ScenarioDef = ScenarioDef {
    name: "stub.forgetful",
    side: Side::Server,
    description: "never reaches its second assertion",
    assertions: TWO_CHECKS,
    build: || {
        Box::new(Stub {
            fail_setup: false,
            err_run: false,
            record_first_only: true,
        })
    },
};

static BROKEN_SETUP: ScenarioDef = ScenarioDef {
    name: "stub.broken-setup",
    side: Side::Server,
    description: "cannot provision",
    assertions: TWO_CHECKS,
    build: || {
        Box::new(Stub {
            fail_setup: true,
            err_run: false,
            record_first_only: false,
        })
    },
};

static ERRORING: ScenarioDef = ScenarioDef {
    name: "stub.erroring",
    side: Side::Server,
    description: "dies mid-interaction",
    assertions: TWO_CHECKS,
    build: || {
        Box::new(Stub {
            fail_setup: false,
            err_run: true,
            record_first_only: false,
        })
    },
};

struct PanickingStub;

#[async_trait]
impl ScenarioBody for PanickingStub {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        Ok(StartInfo::at("http://127.0.0.1:1/mcp"))
    }

    async fn run(
        &mut self,
        _ctx: &RunContext,
        _recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        panic!("stub body blew up");
    }

    async fn stop(&mut self) {}
}

static PANICKING: ScenarioDef = ScenarioDef {
    name: "stub.panicking",
    side: Side::Server,
    description: "panics mid-interaction",
    assertions: TWO_CHECKS,
    build: || Box::new(PanickingStub),
};

#[tokio::test]
async fn checks_empty_before_start() {
    let scenario = Scenario::new(&HAPPY);
    assert!(scenario.checks().is_empty());
}

#[tokio::test]
async fn happy_path_records_all_declared_checks() {
    let ctx = RunContext::default();
    let mut scenario = Scenario::new(&HAPPY);
    scenario.start(&ctx).await.unwrap();
    scenario.run(&ctx).await;
    scenario.stop().await;

    let checks = scenario.checks();
    assert_eq!(checks.len(), 2);
    assert!(checks.iter().all(|c| c.status == CheckStatus::Success));
}

#[tokio::test]
async fn unreached_assertion_becomes_failure() {
    let ctx = RunContext::default();
    let mut scenario = Scenario::new(&FORGETFUL);
    scenario.start(&ctx).await.unwrap();
    scenario.run(&ctx).await;
    scenario.stop().await;

    let checks = scenario.checks();
    let second = checks.iter().find(|c| c.id == "second").unwrap();
    assert_eq!(second.status, CheckStatus::Failure);
    assert!(second
        .error_message
        .as_deref()
        .unwrap()
        .contains("without reaching"));
}

#[tokio::test]
async fn setup_failure_finalizes_one_failure_check() {
    let ctx = RunContext::default();
    let mut scenario = Scenario::new(&BROKEN_SETUP);
    assert!(scenario.start(&ctx).await.is_err());
    // run() after a failed start must be a no-op and stop() must be safe.
    scenario.run(&ctx).await;
    scenario.stop().await;
    scenario.stop().await;

    let checks = scenario.checks();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].id, "stub.broken-setup.setup");
    assert_eq!(checks[0].status, CheckStatus::Failure);
}

#[tokio::test]
async fn body_error_keeps_collected_checks_and_appends_terminal_failure() {
    let ctx = RunContext::default();
    let mut scenario = Scenario::new(&ERRORING);
    scenario.start(&ctx).await.unwrap();
    scenario.run(&ctx).await;
    scenario.stop().await;

    let checks = scenario.checks();
    assert!(checks.iter().any(|c| c.id == "first" && c.status == CheckStatus::Success));
    assert!(checks.iter().any(|c| c.id == "second" && c.status == CheckStatus::Failure));
    assert!(checks
        .iter()
        .any(|c| c.id == "stub.erroring.interaction" && c.status == CheckStatus::Failure));
}

#[tokio::test]
async fn runner_isolates_failures_between_scenarios() {
    let ctx = RunContext::default();
    let selection = [&ERRORING, &HAPPY];
    let results = runner::run_suite(&selection, &ctx, false).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].has_failure());
    assert!(!results[1].has_failure());
}

#[tokio::test]
async fn sequential_run_survives_a_panicking_scenario() {
    let ctx = RunContext::default();
    let selection = [&PANICKING, &HAPPY];
    let results = runner::run_suite(&selection, &ctx, false).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].scenario_name, "stub.panicking");
    assert!(results[0].has_failure());
    assert_eq!(results[0].checks[0].id, "stub.panicking.panic");
    assert!(!results[1].has_failure());
}

#[tokio::test]
async fn parallel_run_preserves_selection_order() {
    let ctx = RunContext::default();
    let selection = [&HAPPY, &FORGETFUL, &HAPPY];
    let results = runner::run_suite(&selection, &ctx, true).await;

    let names: Vec<_> = results.iter().map(|r| r.scenario_name.as_str()).collect();
    assert_eq!(names, ["stub.happy", "stub.forgetful", "stub.happy"]);
}

#[test]
fn builtin_registry_selects_by_side_and_category() {
    let registry = Registry::builtin();
    assert!(registry.get("client.discovery.root").is_some());

    let server_side = registry.select(Side::Server, None);
    assert!(!server_side.is_empty());
    assert!(server_side.iter().all(|d| d.side == Side::Server));

    let discovery = registry.select(Side::Client, Some("client.discovery"));
    assert_eq!(discovery.len(), 2);
}

#[test]
fn disposable_registry_over_stub_definitions() {
    let registry = Registry::from_defs(vec![&HAPPY, &ERRORING]);
    assert!(registry.get("stub.happy").is_some());
    assert!(registry.get("client.discovery.root").is_none());
    assert_eq!(registry.select(Side::Server, Some("stub")).len(), 2);
}

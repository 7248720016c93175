//! Suite orchestration.
//!
//! Runs scenarios sequentially or fanned out as independent tokio tasks.
//! Scenario instances share no memory, so parallelism needs no locking; one
//! scenario's failure (including a panic) is isolated into a synthetic
//! FAILURE result and never cancels or blocks siblings. Teardown always
//! runs, so a failed scenario cannot leak listening ports or zombie
//! processes into the next one.

use mcp_conformance_core::{CheckStatus, ConformanceCheck, ScenarioRunResult};

use crate::scenario::{RunContext, Scenario, ScenarioDef};

/// Execute a selection of scenarios and collect their results in selection
/// order.
pub async fn run_suite(
    selection: &[&'static ScenarioDef],
    ctx: &RunContext,
    parallel: bool,
) -> Vec<ScenarioRunResult> {
    if !parallel {
        let mut results = Vec::with_capacity(selection.len());
        for def in selection {
            results.push(run_isolated(def, ctx.clone()).await);
        }
        return results;
    }

    let handles: Vec<_> = selection
        .iter()
        .map(|def| {
            let def: &'static ScenarioDef = def;
            tokio::spawn(run_isolated(def, ctx.clone()))
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(result) = handle.await {
            results.push(result);
        }
    }
    results
}

/// Run one scenario on its own task so a panic inside the scenario body is
/// converted into a synthetic FAILURE instead of tearing down the suite.
/// This helper never panics, so joining it cannot fail.
async fn run_isolated(def: &'static ScenarioDef, ctx: RunContext) -> ScenarioRunResult {
    match tokio::spawn(run_one(def, ctx)).await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(scenario = def.name, error = %join_err, "scenario task panicked");
            panicked_result(def.name, &join_err)
        }
    }
}

/// Run one scenario through its full lifecycle. Setup failures become a
/// single top-level FAILURE; `stop()` runs on every path.
pub async fn run_one(def: &'static ScenarioDef, ctx: RunContext) -> ScenarioRunResult {
    tracing::info!(scenario = def.name, "running");
    let mut scenario = Scenario::new(def);

    match scenario.start(&ctx).await {
        Ok(_) => scenario.run(&ctx).await,
        Err(err) => {
            tracing::error!(scenario = def.name, error = %err, "setup failed");
        }
    }
    scenario.stop().await;

    let checks = scenario.checks();
    let failed = checks.iter().filter(|c| c.status.fails_exit()).count();
    tracing::info!(scenario = def.name, checks = checks.len(), failed, "finished");

    ScenarioRunResult {
        scenario_name: def.name.to_string(),
        checks,
    }
}

fn panicked_result(name: &str, join_err: &tokio::task::JoinError) -> ScenarioRunResult {
    ScenarioRunResult {
        scenario_name: name.to_string(),
        checks: vec![ConformanceCheck {
            id: format!("{name}.panic"),
            name: format!("{name} execution"),
            description: "scenario task ran to completion".to_string(),
            status: CheckStatus::Failure,
            timestamp: chrono::Utc::now(),
            error_message: Some(join_err.to_string()),
            details: None,
            spec_references: Vec::new(),
        }],
    }
}

//! Scope step-up scenarios.

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec};

use super::common::{authorize_requests, ClientHarness, HarnessSpec};
use super::{MCP_AUTH, RFC6750};
use crate::harness::FakeMcpServer;
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

// =============================================================================
// client.step-up.insufficient-scope
// =============================================================================
// The resource demands `mcp:write` but the challenge advertises `mcp:read`,
// so the first token is under-scoped and the protocol request comes back
// 403 insufficient_scope. The client must re-authorize for the scope named
// in the 403 challenge and retry.

static CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "insufficient-scope-handled",
        name: "403 insufficient_scope not treated as fatal",
        description: "the client kept going after the under-scoped request was refused",
        spec_references: &[("RFC6750#3.1", RFC6750)],
    },
    CheckSpec {
        id: "step-up-requested",
        name: "re-authorization requested the stepped-up scope",
        description: "a later authorization request named the scope from the 403 challenge",
        spec_references: &[("RFC6750#3.1", RFC6750), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "retry-succeeded",
        name: "retry with the stepped-up token succeeded",
        description: "the protocol request was accepted after re-authorization",
        spec_references: &[("MCP-AUTH", MCP_AUTH)],
    },
];

pub static INSUFFICIENT_SCOPE: ScenarioDef = ScenarioDef {
    name: "client.step-up.insufficient-scope",
    side: Side::Client,
    description: "client steps up its scope after a 403 insufficient_scope",
    assertions: CHECKS,
    build: || Box::new(InsufficientScope::default()),
};

/// An authorized protocol request that was refused for scope.
fn saw_403(mcp: &FakeMcpServer) -> bool {
    mcp.inbound().iter().any(|r| {
        r.method == "POST" && r.path.ends_with("/mcp") && r.response_status == 403
    })
}

fn authorized_200(mcp: &FakeMcpServer) -> bool {
    mcp.inbound().iter().any(|r| {
        r.method == "POST"
            && r.path.ends_with("/mcp")
            && r.headers.contains_key("authorization")
            && r.response_status == 200
    })
}

#[derive(Default)]
struct InsufficientScope {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for InsufficientScope {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let spec = HarnessSpec {
            required_scope: Some("mcp:write".to_string()),
            challenge_scope: Some("mcp:read".to_string()),
            ..HarnessSpec::default()
        };
        self.harness.start(spec).await
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        self.harness
            .drive_client(ctx, |_, mcp| saw_403(mcp) && authorized_200(mcp))
            .await?;

        let auth = self.harness.auth.as_ref().expect("started");
        let mcp = self.harness.mcp.as_ref().expect("started");

        if !saw_403(mcp) {
            // The under-scoped request never happened, so nothing below can
            // be judged.
            recorder.failure(
                "insufficient-scope-handled",
                "client never hit the 403 insufficient_scope response",
            );
            recorder.skipped("step-up-requested", "no 403 was ever observed");
            recorder.skipped("retry-succeeded", "no 403 was ever observed");
            return Ok(());
        }

        // Handling means any AS or resource traffic after the 403.
        let refusal_at = mcp
            .inbound()
            .iter()
            .position(|r| r.response_status == 403)
            .expect("403 observed above");
        let continued = mcp.inbound().len() > refusal_at + 1 || {
            let authorizes = authorize_requests(auth);
            authorizes.len() > 1
        };
        recorder.assert(
            "insufficient-scope-handled",
            continued,
            "client went silent after the 403 insufficient_scope",
        );

        let stepped_up = authorize_requests(auth).iter().any(|r| {
            r.param("scope")
                .is_some_and(|s| s.split_whitespace().any(|part| part == "mcp:write"))
        });
        recorder.assert(
            "step-up-requested",
            stepped_up,
            "no authorization request asked for the mcp:write scope named by the 403 challenge",
        );

        recorder.assert(
            "retry-succeeded",
            authorized_200(mcp),
            "no protocol request succeeded after re-authorization",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

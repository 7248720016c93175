//! Refresh-token scenarios.

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec};

use super::common::{
    authorize_requests, authorized_protocol_ok, token_requests, ClientHarness, HarnessSpec,
};
use super::{MCP_AUTH, RFC6749};
use crate::harness::FakeMcpServer;
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

// =============================================================================
// client.refresh.rotation
// =============================================================================
// The resource revokes the first access token and answers 401
// invalid_token. The client should recover with its refresh token rather
// than a second interactive authorization, and must cope with the AS
// rotating the refresh token on use.

static CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "invalid-token-recovered",
        name: "401 invalid_token recovered",
        description: "the client obtained fresh credentials after the revocation",
        spec_references: &[("RFC6749#6", RFC6749), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "refresh-grant-used",
        name: "refresh_token grant used for recovery",
        description: "recovery went through the refresh grant, not a second interactive flow",
        spec_references: &[("RFC6749#6", RFC6749)],
    },
    CheckSpec {
        id: "retry-succeeded",
        name: "retry with the refreshed token succeeded",
        description: "the protocol request was accepted after recovery",
        spec_references: &[("MCP-AUTH", MCP_AUTH)],
    },
];

pub static ROTATION: ScenarioDef = ScenarioDef {
    name: "client.refresh.rotation",
    side: Side::Client,
    description: "client recovers from token revocation via the rotating refresh grant",
    assertions: CHECKS,
    build: || Box::new(Rotation::default()),
};

fn saw_invalid_token(mcp: &FakeMcpServer) -> bool {
    mcp.inbound().iter().any(|r| {
        r.method == "POST"
            && r.path.ends_with("/mcp")
            && r.headers.contains_key("authorization")
            && r.response_status == 401
    })
}

#[derive(Default)]
struct Rotation {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for Rotation {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        // rotate_refresh_tokens defaults to true on the fake AS.
        let spec = HarnessSpec {
            reject_token_once: true,
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
            .drive_client(ctx, |_, mcp| {
                saw_invalid_token(mcp) && authorized_protocol_ok(mcp)
            })
            .await?;

        let auth = self.harness.auth.as_ref().expect("started");
        let mcp = self.harness.mcp.as_ref().expect("started");

        if !saw_invalid_token(mcp) {
            recorder.failure(
                "invalid-token-recovered",
                "client never hit the 401 invalid_token after revocation",
            );
            recorder.skipped("refresh-grant-used", "no revocation was ever observed");
            recorder.skipped("retry-succeeded", "no revocation was ever observed");
            return Ok(());
        }

        let tokens = token_requests(auth);
        let refreshes: Vec<_> = tokens
            .iter()
            .filter(|r| r.param("grant_type") == Some("refresh_token"))
            .collect();

        recorder.assert(
            "invalid-token-recovered",
            tokens.iter().filter(|r| r.response_status == 200).count() > 1,
            "client never obtained a second set of credentials",
        );

        if refreshes.iter().any(|r| r.response_status == 200) {
            recorder.success("refresh-grant-used");
        } else if authorize_requests(auth).len() > 1 {
            recorder.warning(
                "refresh-grant-used",
                "client recovered via a second interactive authorization instead of its refresh token",
            );
        } else {
            recorder.failure(
                "refresh-grant-used",
                "no successful refresh_token grant was observed",
            );
        }

        recorder.assert(
            "retry-succeeded",
            authorized_protocol_ok(mcp),
            "no protocol request succeeded after recovery",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

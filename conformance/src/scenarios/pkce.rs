//! PKCE scenarios.

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec};

use super::common::{
    authorize_requests, authorized_protocol_ok, token_requests, ClientHarness, HarnessSpec,
};
use super::{MCP_AUTH, RFC7636};
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

// =============================================================================
// client.pkce.s256
// =============================================================================
// The AS requires PKCE and accepts only S256. The client must send a
// code_challenge on the authorization request and the matching
// code_verifier on the token request.

static CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "challenge-sent",
        name: "code_challenge sent with S256",
        description: "the authorization request carried code_challenge_method=S256",
        spec_references: &[("RFC7636#4.3", RFC7636), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "verifier-sent",
        name: "code_verifier sent at the token endpoint",
        description: "the token request carried the PKCE code_verifier",
        spec_references: &[("RFC7636#4.5", RFC7636)],
    },
    CheckSpec {
        id: "verifier-accepted",
        name: "verifier matched the challenge",
        description: "the AS verified S256(code_verifier) against the stored challenge",
        spec_references: &[("RFC7636#4.6", RFC7636)],
    },
];

pub static S256: ScenarioDef = ScenarioDef {
    name: "client.pkce.s256",
    side: Side::Client,
    description: "authorization-code flow protected by PKCE S256",
    assertions: CHECKS,
    build: || Box::new(S256Body::default()),
};

#[derive(Default)]
struct S256Body {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for S256Body {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        // require_pkce defaults to true; the default harness is already strict.
        self.harness.start(HarnessSpec::default()).await
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        self.harness
            .drive_client(ctx, |_, mcp| authorized_protocol_ok(mcp))
            .await?;

        let auth = self.harness.auth.as_ref().expect("started");

        let authorize = authorize_requests(auth);
        let challenge_ok = authorize.iter().any(|r| {
            r.param("code_challenge").is_some()
                && r.param("code_challenge_method") == Some("S256")
        });
        recorder.assert(
            "challenge-sent",
            challenge_ok,
            "authorization request carried no S256 code_challenge",
        );

        let tokens = token_requests(auth);
        let verifier_sent = tokens.iter().any(|r| r.form.contains_key("code_verifier"));
        recorder.assert(
            "verifier-sent",
            verifier_sent,
            "token request carried no code_verifier",
        );

        // The AS rejects a bad or missing verifier, so an accepted exchange
        // is the proof that the pair matched.
        recorder.assert(
            "verifier-accepted",
            tokens.iter().any(|r| r.response_status == 200),
            "the AS never accepted a code exchange; the verifier did not match",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

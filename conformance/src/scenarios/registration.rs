//! Dynamic client registration scenarios.

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec};

use super::common::{
    authorize_requests, authorized_protocol_ok, registration_requests, token_requests,
    ClientHarness, HarnessSpec,
};
use super::{MCP_AUTH, RFC7591};
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

// =============================================================================
// client.registration.dynamic
// =============================================================================
// The AS advertises a registration_endpoint and nothing is preregistered;
// the client must register itself via RFC 7591 before authorizing.

static CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "registration-attempted",
        name: "registration endpoint used",
        description: "the client POSTed a registration request to the advertised endpoint",
        spec_references: &[("RFC7591#3.1", RFC7591), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "redirect-uris-declared",
        name: "redirect_uris declared at registration",
        description: "the registration request named at least one redirect URI",
        spec_references: &[("RFC7591#2", RFC7591)],
    },
    CheckSpec {
        id: "registered-id-used",
        name: "issued client_id used downstream",
        description: "the client_id minted at registration appeared in the token exchange",
        spec_references: &[("RFC7591#3.2.1", RFC7591)],
    },
];

pub static DYNAMIC: ScenarioDef = ScenarioDef {
    name: "client.registration.dynamic",
    side: Side::Client,
    description: "client self-registers via RFC 7591 before authorizing",
    assertions: CHECKS,
    build: || Box::new(Dynamic::default()),
};

#[derive(Default)]
struct Dynamic {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for Dynamic {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
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

        let registrations = registration_requests(auth);
        recorder.assert(
            "registration-attempted",
            !registrations.is_empty(),
            "client never POSTed to the registration endpoint",
        );

        let declared = registrations.iter().any(|r| {
            r.body_json
                .as_ref()
                .and_then(|b| b.get("redirect_uris"))
                .and_then(|v| v.as_array())
                .is_some_and(|a| !a.is_empty())
        });
        recorder.assert(
            "redirect-uris-declared",
            declared,
            "registration request carried no redirect_uris",
        );

        // The fake AS only mints `client-` prefixed ids via registration, so
        // seeing one downstream proves the issued id was used. Confidential
        // clients carry it in the Basic header rather than the form, in which
        // case the authorize request is where it shows.
        let reused = token_requests(auth)
            .iter()
            .chain(authorize_requests(auth).iter())
            .any(|r| {
                r.param("client_id")
                    .is_some_and(|id| id.starts_with("client-"))
            });
        recorder.assert(
            "registered-id-used",
            reused,
            "neither the authorize nor the token request used the client_id issued at registration",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

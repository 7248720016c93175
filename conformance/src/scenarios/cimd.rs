//! Client ID Metadata Document scenarios.

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec};

use super::common::{
    authorize_requests, authorized_protocol_ok, registration_requests, token_requests,
    ClientHarness, HarnessSpec,
};
use super::CIMD_DRAFT;
use crate::harness::AuthServerConfig;
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

// =============================================================================
// client.cimd.url-client-id
// =============================================================================
// The AS advertises client_id_metadata_document_supported and no
// registration endpoint. A capable client uses an https URL as its
// client_id instead of registering.

static CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "url-client-id-used",
        name: "https URL used as client_id",
        description: "the client identified itself with a metadata-document URL",
        spec_references: &[("CIMD#4", CIMD_DRAFT)],
    },
    CheckSpec {
        id: "no-registration",
        name: "no registration attempted",
        description: "the client did not fall back to dynamic registration",
        spec_references: &[("CIMD#1", CIMD_DRAFT)],
    },
    CheckSpec {
        id: "token-obtained",
        name: "token obtained with the URL client_id",
        description: "the AS accepted the code exchange from the URL-identified client",
        spec_references: &[("CIMD#4", CIMD_DRAFT)],
    },
];

pub static URL_CLIENT_ID: ScenarioDef = ScenarioDef {
    name: "client.cimd.url-client-id",
    side: Side::Client,
    description: "client identifies by metadata-document URL when the AS supports it",
    assertions: CHECKS,
    build: || Box::new(UrlClientId::default()),
};

fn is_https_url(id: &str) -> bool {
    id.starts_with("https://")
}

#[derive(Default)]
struct UrlClientId {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for UrlClientId {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let spec = HarnessSpec {
            auth: AuthServerConfig {
                accept_url_client_ids: true,
                token_auth_methods: vec!["none".to_string()],
                ..AuthServerConfig::default()
            },
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
            .drive_client(ctx, |_, mcp| authorized_protocol_ok(mcp))
            .await?;

        let auth = self.harness.auth.as_ref().expect("started");

        let url_id_seen = authorize_requests(auth)
            .iter()
            .chain(token_requests(auth).iter())
            .any(|r| r.param("client_id").is_some_and(is_https_url));
        recorder.assert(
            "url-client-id-used",
            url_id_seen,
            "client never presented an https URL as its client_id",
        );

        recorder.assert(
            "no-registration",
            registration_requests(auth).is_empty(),
            "client attempted dynamic registration despite CIMD support and no registration endpoint",
        );

        let accepted = token_requests(auth).iter().any(|r| {
            r.response_status == 200 && r.param("client_id").is_some_and(is_https_url)
        });
        recorder.assert(
            "token-obtained",
            accepted,
            "no token exchange with a URL client_id was accepted",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

//! Token-endpoint authentication method scenarios.

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec};

use super::common::{authorized_protocol_ok, token_requests, ClientHarness, HarnessSpec};
use super::{RFC6749, RFC7591};
use crate::harness::AuthServerConfig;
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

// =============================================================================
// client.token-auth.secret-basic
// =============================================================================
// The AS offers only client_secret_basic. The client must register for a
// secret and present it in the Authorization header, not the form body.

static BASIC_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "basic-auth-used",
        name: "client_secret_basic used at the token endpoint",
        description: "the token request authenticated with an HTTP Basic header",
        spec_references: &[("RFC6749#2.3.1", RFC6749)],
    },
    CheckSpec {
        id: "secret-not-in-form",
        name: "client secret kept out of the form body",
        description: "the token request did not also send client_secret as a form field",
        spec_references: &[("RFC6749#2.3.1", RFC6749)],
    },
    CheckSpec {
        id: "token-accepted",
        name: "token exchange accepted",
        description: "the AS accepted the authenticated token request",
        spec_references: &[("RFC6749#4.1.3", RFC6749)],
    },
];

pub static SECRET_BASIC: ScenarioDef = ScenarioDef {
    name: "client.token-auth.secret-basic",
    side: Side::Client,
    description: "confidential client authenticates with client_secret_basic",
    assertions: BASIC_CHECKS,
    build: || Box::new(SecretBasic::default()),
};

#[derive(Default)]
struct SecretBasic {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for SecretBasic {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let spec = HarnessSpec {
            auth: AuthServerConfig {
                token_auth_methods: vec!["client_secret_basic".to_string()],
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
        let requests = token_requests(auth);
        let Some(token_req) = requests.first() else {
            return Err(ScenarioError::flow(
                "client never reached the token endpoint",
            ));
        };

        let basic = token_req
            .headers
            .get("authorization")
            .is_some_and(|v| v.starts_with("Basic "));
        recorder.assert(
            "basic-auth-used",
            basic,
            "token request carried no Basic Authorization header",
        );

        recorder.assert(
            "secret-not-in-form",
            !token_req.form.contains_key("client_secret"),
            "client sent client_secret in the form body alongside (or instead of) the Basic header",
        );

        recorder.assert(
            "token-accepted",
            requests.iter().any(|r| r.response_status == 200),
            "no token request was accepted by the authorization server",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

// =============================================================================
// client.token-auth.public-none
// =============================================================================
// The AS offers only `none`: a public client must identify itself by
// client_id in the form and send no credentials at all.

static PUBLIC_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "no-credential-header",
        name: "no Authorization header at the token endpoint",
        description: "a public client sent no client credentials",
        spec_references: &[("RFC6749#2.1", RFC6749), ("RFC7591#2", RFC7591)],
    },
    CheckSpec {
        id: "client-id-in-form",
        name: "client_id present in the token request form",
        description: "the public client identified itself by client_id",
        spec_references: &[("RFC6749#4.1.3", RFC6749)],
    },
    CheckSpec {
        id: "token-accepted",
        name: "token exchange accepted",
        description: "the AS accepted the public client's token request",
        spec_references: &[("RFC6749#4.1.3", RFC6749)],
    },
];

pub static PUBLIC_NONE: ScenarioDef = ScenarioDef {
    name: "client.token-auth.public-none",
    side: Side::Client,
    description: "public client uses token_endpoint_auth_method none",
    assertions: PUBLIC_CHECKS,
    build: || Box::new(PublicNone::default()),
};

#[derive(Default)]
struct PublicNone {
    harness: ClientHarness,
}

#[async_trait]
impl ScenarioBody for PublicNone {
    async fn start(&mut self, _ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let spec = HarnessSpec {
            auth: AuthServerConfig {
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
        let requests = token_requests(auth);
        let Some(token_req) = requests.first() else {
            return Err(ScenarioError::flow(
                "client never reached the token endpoint",
            ));
        };

        recorder.assert(
            "no-credential-header",
            !token_req.headers.contains_key("authorization"),
            "public client sent an Authorization header to the token endpoint",
        );
        recorder.assert(
            "client-id-in-form",
            token_req.form.contains_key("client_id"),
            "token request form carried no client_id",
        );
        recorder.assert(
            "token-accepted",
            requests.iter().any(|r| r.response_status == 200),
            "no token request was accepted by the authorization server",
        );
        Ok(())
    }

    async fn stop(&mut self) {
        self.harness.stop().await;
    }
}

//! Server-side scenarios.
//!
//! These act as a correct MCP client against an external server named by
//! `--server-url`, judging the server's side of the authorization handshake.
//! They share a prelude: probe the protocol endpoint without credentials and
//! capture the challenge. When a prerequisite step fails, downstream checks
//! are SKIPPED with the reason rather than piled on as extra failures.

use async_trait::async_trait;
use mcp_conformance_core::{AuthChallenge, CheckRecorder, CheckSpec};
use serde_json::Value;
use url::Url;

use super::{MCP_AUTH, RFC6750, RFC8414, RFC9728};
use crate::driver::{AuthFlowDriver, Pkce, RedirectListener};
use crate::observe::ObservingClient;
use crate::scenario::{RunContext, ScenarioBody, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

fn server_url(ctx: &RunContext) -> Result<Url, SetupError> {
    ctx.server_url
        .clone()
        .ok_or_else(|| SetupError::Config("server-side scenarios need --server-url".to_string()))
}

fn run_server_url(ctx: &RunContext) -> Result<Url, ScenarioError> {
    ctx.server_url
        .clone()
        .ok_or_else(|| ScenarioError::flow("server-side scenarios need --server-url"))
}

// =============================================================================
// server.auth.challenge
// =============================================================================

static CHALLENGE_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "unauthenticated-401",
        name: "unauthenticated request refused with 401",
        description: "the protocol endpoint answered 401 to a request without credentials",
        spec_references: &[("RFC6750#3", RFC6750), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "www-authenticate-present",
        name: "WWW-Authenticate Bearer challenge present",
        description: "the 401 carried a parseable Bearer challenge",
        spec_references: &[("RFC6750#3", RFC6750)],
    },
    CheckSpec {
        id: "resource-metadata-advertised",
        name: "challenge advertises resource_metadata",
        description: "the challenge pointed at the RFC 9728 metadata document",
        spec_references: &[("RFC9728#5.1", RFC9728), ("MCP-AUTH", MCP_AUTH)],
    },
];

pub static CHALLENGE: ScenarioDef = ScenarioDef {
    name: "server.auth.challenge",
    side: Side::Server,
    description: "server challenges unauthenticated protocol requests",
    assertions: CHALLENGE_CHECKS,
    build: || Box::new(Challenge::default()),
};

#[derive(Default)]
struct Challenge {
    client: ObservingClient,
}

#[async_trait]
impl ScenarioBody for Challenge {
    async fn start(&mut self, ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let url = server_url(ctx)?;
        Ok(StartInfo {
            entry_url: Some(url.to_string()),
            context: Value::Null,
        })
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        let url = run_server_url(ctx)?;
        let driver = AuthFlowDriver::new(&self.client, ctx);
        let response = driver.initial_request(&url).await?;

        recorder.assert(
            "unauthenticated-401",
            response.status == 401,
            format!(
                "expected 401 for the unauthenticated request, got {}",
                response.status
            ),
        );

        let Some(challenge) = &response.challenge else {
            recorder.failure(
                "www-authenticate-present",
                "response carried no parseable WWW-Authenticate challenge",
            );
            recorder.skipped("resource-metadata-advertised", "no challenge to inspect");
            return Ok(());
        };
        if challenge.scheme.eq_ignore_ascii_case("bearer") {
            recorder.success("www-authenticate-present");
        } else {
            recorder.failure(
                "www-authenticate-present",
                format!("challenge scheme was {:?}, not Bearer", challenge.scheme),
            );
        }

        match challenge.param("resource_metadata") {
            Some(_) => recorder.success("resource-metadata-advertised"),
            // Discovery can still proceed through the well-known fallback,
            // so this is degraded rather than broken.
            None => recorder.warning(
                "resource-metadata-advertised",
                "challenge has no resource_metadata parameter; clients must fall back to well-known probing",
            ),
        }
        Ok(())
    }

    async fn stop(&mut self) {}
}

// =============================================================================
// server.auth.prm
// =============================================================================

static PRM_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "prm-available",
        name: "protected resource metadata served",
        description: "an RFC 9728 metadata document was retrievable for the resource",
        spec_references: &[("RFC9728#3", RFC9728), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "authorization-servers-listed",
        name: "authorization_servers is a non-empty array",
        description: "the metadata names at least one authorization server",
        spec_references: &[("RFC9728#3.1", RFC9728)],
    },
    CheckSpec {
        id: "resource-identifier-consistent",
        name: "resource identifier matches the endpoint",
        description: "the metadata's resource value covers the protocol endpoint",
        spec_references: &[("RFC9728#3.1", RFC9728)],
    },
];

pub static PRM: ScenarioDef = ScenarioDef {
    name: "server.auth.prm",
    side: Side::Server,
    description: "server publishes protected resource metadata",
    assertions: PRM_CHECKS,
    build: || Box::new(Prm::default()),
};

#[derive(Default)]
struct Prm {
    client: ObservingClient,
}

#[async_trait]
impl ScenarioBody for Prm {
    async fn start(&mut self, ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let url = server_url(ctx)?;
        Ok(StartInfo {
            entry_url: Some(url.to_string()),
            context: Value::Null,
        })
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        let url = run_server_url(ctx)?;
        let driver = AuthFlowDriver::new(&self.client, ctx);
        let challenge = driver.initial_request(&url).await?.challenge;

        let Some(doc) = driver.fetch_prm(&url, challenge.as_ref()).await else {
            recorder.failure(
                "prm-available",
                "no protected-resource metadata document at any candidate URL",
            );
            recorder.skipped("authorization-servers-listed", "no metadata document");
            recorder.skipped("resource-identifier-consistent", "no metadata document");
            return Ok(());
        };
        recorder.success("prm-available");

        let servers = doc.get("authorization_servers").and_then(Value::as_array);
        recorder.assert(
            "authorization-servers-listed",
            servers.is_some_and(|a| !a.is_empty()),
            "authorization_servers is missing, not an array, or empty",
        );

        match doc.get("resource").and_then(Value::as_str) {
            Some(resource) if url.as_str().starts_with(resource.trim_end_matches('/')) => {
                recorder.success("resource-identifier-consistent");
            }
            Some(resource) => recorder.failure(
                "resource-identifier-consistent",
                format!(
                    "metadata resource {resource:?} does not cover the endpoint {}",
                    url
                ),
            ),
            None => recorder.failure(
                "resource-identifier-consistent",
                "metadata document has no resource field",
            ),
        }
        Ok(())
    }

    async fn stop(&mut self) {}
}

// =============================================================================
// server.auth.as-discovery
// =============================================================================

static DISCOVERY_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "issuer-resolvable",
        name: "advertised issuer resolves to AS metadata",
        description: "the ordered well-known fallback found a metadata document",
        spec_references: &[("RFC8414#3", RFC8414), ("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "issuer-matches",
        name: "metadata issuer matches the advertised issuer",
        description: "the issuer field round-trips exactly",
        spec_references: &[("RFC8414#3.3", RFC8414)],
    },
    CheckSpec {
        id: "endpoints-present",
        name: "authorization and token endpoints present",
        description: "the metadata names both endpoints a code flow needs",
        spec_references: &[("RFC8414#2", RFC8414)],
    },
];

pub static AS_DISCOVERY: ScenarioDef = ScenarioDef {
    name: "server.auth.as-discovery",
    side: Side::Server,
    description: "authorization server advertised by the resource is discoverable",
    assertions: DISCOVERY_CHECKS,
    build: || Box::new(AsDiscovery::default()),
};

#[derive(Default)]
struct AsDiscovery {
    client: ObservingClient,
}

#[async_trait]
impl ScenarioBody for AsDiscovery {
    async fn start(&mut self, ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let url = server_url(ctx)?;
        Ok(StartInfo {
            entry_url: Some(url.to_string()),
            context: Value::Null,
        })
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        let url = run_server_url(ctx)?;
        let driver = AuthFlowDriver::new(&self.client, ctx);
        let challenge = driver.initial_request(&url).await?.challenge;

        let issuer = driver
            .fetch_prm(&url, challenge.as_ref())
            .await
            .and_then(|doc| {
                doc.get("authorization_servers")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first())
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let Some(issuer) = issuer else {
            recorder.failure(
                "issuer-resolvable",
                "no authorization server advertised by the resource metadata",
            );
            recorder.skipped("issuer-matches", "no issuer to resolve");
            recorder.skipped("endpoints-present", "no issuer to resolve");
            return Ok(());
        };
        let issuer_url =
            Url::parse(&issuer).map_err(|e| ScenarioError::flow(format!("bad issuer: {e}")))?;

        let resolved = match driver.resolve_as_metadata(&issuer_url).await {
            Ok(resolved) => resolved,
            Err(exhausted) => {
                recorder.failure("issuer-resolvable", exhausted.to_string());
                recorder.skipped("issuer-matches", "metadata never resolved");
                recorder.skipped("endpoints-present", "metadata never resolved");
                return Ok(());
            }
        };
        recorder.success_with_details(
            "issuer-resolvable",
            serde_json::json!({ "resolved_from": resolved.attempt.url }),
        );

        let metadata_issuer = resolved.document.get("issuer").and_then(Value::as_str);
        recorder.assert(
            "issuer-matches",
            metadata_issuer == Some(issuer.as_str()),
            format!(
                "metadata issuer {metadata_issuer:?} does not match the advertised {issuer:?}"
            ),
        );

        let has_endpoints = resolved
            .document
            .get("authorization_endpoint")
            .and_then(Value::as_str)
            .is_some()
            && resolved
                .document
                .get("token_endpoint")
                .and_then(Value::as_str)
                .is_some();
        recorder.assert(
            "endpoints-present",
            has_endpoints,
            "metadata lacks authorization_endpoint or token_endpoint",
        );
        Ok(())
    }

    async fn stop(&mut self) {}
}

// =============================================================================
// server.auth.full-flow
// =============================================================================
// The complete handshake, including the interactive authorization step. A
// human has to approve the consent page, so this scenario runs on the
// minutes-scale timeout.

static FULL_CHECKS: &[CheckSpec] = &[
    CheckSpec {
        id: "registration-accepted",
        name: "dynamic registration accepted",
        description: "the AS issued a client_id for the conformance client",
        spec_references: &[("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "code-exchanged",
        name: "authorization code exchanged for tokens",
        description: "the token endpoint accepted the PKCE-protected exchange",
        spec_references: &[("MCP-AUTH", MCP_AUTH)],
    },
    CheckSpec {
        id: "token-honored",
        name: "access token honored by the resource",
        description: "the protocol endpoint accepted the issued bearer token",
        spec_references: &[("RFC6750#2.1", RFC6750), ("MCP-AUTH", MCP_AUTH)],
    },
];

pub static FULL_AUTH: ScenarioDef = ScenarioDef {
    name: "server.auth.full-flow",
    side: Side::Server,
    description: "end-to-end authorization including the interactive consent step",
    assertions: FULL_CHECKS,
    build: || Box::new(FullAuth::default()),
};

#[derive(Default)]
struct FullAuth {
    client: ObservingClient,
}

impl FullAuth {
    /// Discovery prelude shared with the narrower scenarios: challenge, PRM,
    /// AS metadata. Errors here are flow errors; the narrower scenarios give
    /// the precise diagnosis.
    async fn discover(
        driver: &AuthFlowDriver<'_>,
        url: &Url,
    ) -> Result<(Value, Option<String>, Option<AuthChallenge>), ScenarioError> {
        let challenge = driver.initial_request(url).await?.challenge;
        let prm = driver
            .fetch_prm(url, challenge.as_ref())
            .await
            .ok_or_else(|| ScenarioError::flow("no protected-resource metadata"))?;
        let issuer = prm
            .get("authorization_servers")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ScenarioError::flow("no authorization server advertised"))?;
        let issuer_url =
            Url::parse(issuer).map_err(|e| ScenarioError::flow(format!("bad issuer: {e}")))?;
        let resolved = driver
            .resolve_as_metadata(&issuer_url)
            .await
            .map_err(ScenarioError::Discovery)?;
        let resource = prm.get("resource").and_then(Value::as_str).map(str::to_string);
        Ok((resolved.document, resource, challenge))
    }
}

#[async_trait]
impl ScenarioBody for FullAuth {
    async fn start(&mut self, ctx: &RunContext) -> Result<StartInfo, SetupError> {
        let url = server_url(ctx)?;
        Ok(StartInfo {
            entry_url: Some(url.to_string()),
            context: Value::Null,
        })
    }

    async fn run(
        &mut self,
        ctx: &RunContext,
        recorder: &mut CheckRecorder,
    ) -> Result<(), ScenarioError> {
        let url = run_server_url(ctx)?;
        let driver = AuthFlowDriver::new(&self.client, ctx);
        let (as_metadata, resource, challenge) = Self::discover(&driver, &url).await?;

        let listener = RedirectListener::bind().await?;
        let redirect_uri = listener.redirect_uri().to_string();

        let client_id = if as_metadata.get("registration_endpoint").is_some() {
            let registered = driver.register_client(&as_metadata, &redirect_uri).await?;
            let id = registered
                .get("client_id")
                .and_then(Value::as_str)
                .ok_or_else(|| ScenarioError::flow("registration response has no client_id"))?
                .to_string();
            recorder.success("registration-accepted");
            id
        } else {
            recorder.skipped(
                "registration-accepted",
                "authorization server advertises no registration_endpoint",
            );
            "mcp-conformance".to_string()
        };

        let scope = challenge.as_ref().and_then(|c| c.param("scope"));
        let pkce = Pkce::generate();
        let code = driver
            .authorize_interactive(
                &as_metadata,
                &client_id,
                scope,
                resource.as_deref(),
                &pkce,
                listener,
            )
            .await?;

        let tokens = driver
            .exchange_code(
                &as_metadata,
                &client_id,
                &code,
                &redirect_uri,
                &pkce,
                resource.as_deref(),
            )
            .await?;
        let access_token = tokens
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ScenarioError::flow("token response has no access_token"))?;
        recorder.success("code-exchanged");

        let response = driver.authenticated_request(&url, access_token).await?;
        recorder.assert(
            "token-honored",
            response.status == 200,
            format!(
                "protocol endpoint answered {} to the freshly issued token",
                response.status
            ),
        );
        Ok(())
    }

    async fn stop(&mut self) {}
}

//! Shared plumbing for client-side scenarios.
//!
//! Every client-side scenario owns the same harness shape: one fake
//! authorization server, one fake MCP server wired to its token store, and
//! at most one spawned client IUT. The provisioning, driving and teardown
//! live here once, so scenario modules contribute only the config knobs and
//! the assertions.

use std::time::Duration;

use serde_json::json;

use crate::harness::{
    AuthServerConfig, FakeAuthServer, FakeMcpServer, InboundRequest, McpServerConfig,
};
use crate::process::ClientProcess;
use crate::scenario::{RunContext, ScenarioError, SetupError, StartInfo};

/// Harness configuration one scenario wants.
pub struct HarnessSpec {
    pub auth: AuthServerConfig,
    pub required_scope: Option<String>,
    pub challenge_scope: Option<String>,
    pub reject_token_once: bool,
}

impl Default for HarnessSpec {
    fn default() -> Self {
        Self {
            auth: AuthServerConfig::default(),
            required_scope: None,
            challenge_scope: None,
            reject_token_once: false,
        }
    }
}

/// How the driven client session ended.
#[derive(Debug)]
pub struct DriveOutcome {
    /// The scenario's completion condition was observed.
    pub completed: bool,
    /// Exit status if the client terminated on its own.
    pub exit: Option<std::process::ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

/// The fake-server pair plus the driven client, with idempotent teardown.
#[derive(Default)]
pub struct ClientHarness {
    pub auth: Option<FakeAuthServer>,
    pub mcp: Option<FakeMcpServer>,
    client: Option<ClientProcess>,
}

impl ClientHarness {
    /// Stand up both servers. The entry URL is the fake MCP server's
    /// protocol endpoint; the context names the issuer so a driven client
    /// has everything a real deployment would publish.
    pub async fn start(&mut self, spec: HarnessSpec) -> Result<StartInfo, SetupError> {
        let auth = FakeAuthServer::start(spec.auth).await?;
        let mcp = FakeMcpServer::start(McpServerConfig {
            authorization_servers: vec![auth.issuer()],
            tokens: auth.tokens(),
            required_scope: spec.required_scope,
            challenge_scope: spec.challenge_scope,
            reject_token_once: spec.reject_token_once,
        })
        .await?;

        let info = StartInfo {
            entry_url: Some(mcp.mcp_url()),
            context: json!({
                "mcp_url": mcp.mcp_url(),
                "authorization_server": auth.issuer(),
            }),
        };
        self.auth = Some(auth);
        self.mcp = Some(mcp);
        Ok(info)
    }

    /// Spawn the client IUT and poll until `done` observes the scenario's
    /// completion condition, the client exits, or the long interaction
    /// timeout passes. The client is left running for `stop()` to reap so
    /// trailing requests still land in the logs.
    pub async fn drive_client(
        &mut self,
        ctx: &RunContext,
        mut done: impl FnMut(&FakeAuthServer, &FakeMcpServer) -> bool,
    ) -> Result<DriveOutcome, ScenarioError> {
        let (auth, mcp) = match (&self.auth, &self.mcp) {
            (Some(auth), Some(mcp)) => (auth, mcp),
            _ => return Err(ScenarioError::flow("harness not started")),
        };
        let Some(template) = &ctx.client_command else {
            return Err(ScenarioError::flow(
                "client-side scenarios need --client-cmd",
            ));
        };

        let env = [(
            "MCP_AUTHORIZATION_SERVER".to_string(),
            auth.issuer(),
        )];
        let mut client = ClientProcess::spawn(template, &mcp.mcp_url(), &env)
            .map_err(|e| ScenarioError::flow(e.to_string()))?;

        let started = tokio::time::Instant::now();
        let mut completed = false;
        let mut exit = None;
        loop {
            if done(auth, mcp) {
                completed = true;
                break;
            }
            // wait() with a short deadline doubles as the poll interval.
            if let Some(status) = client.wait(Duration::from_millis(50)).await? {
                exit = Some(status);
                // One more predicate evaluation after exit: the final
                // request may have landed between polls.
                completed = done(auth, mcp);
                break;
            }
            if started.elapsed() >= ctx.interactive_timeout {
                tracing::warn!("client IUT still running at interaction timeout");
                break;
            }
        }

        let (stdout, stderr) = client.output();
        self.client = Some(client);
        Ok(DriveOutcome {
            completed,
            exit,
            stdout,
            stderr,
        })
    }

    pub async fn stop(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.kill().await;
        }
        if let Some(mut mcp) = self.mcp.take() {
            mcp.stop().await;
        }
        if let Some(mut auth) = self.auth.take() {
            auth.stop().await;
        }
    }
}

// --- inbound-log queries shared by assertion code ---

/// An authorized protocol request that the fake MCP server accepted.
pub fn authorized_protocol_ok(mcp: &FakeMcpServer) -> bool {
    mcp.inbound().iter().any(|r| {
        r.method == "POST"
            && r.path.ends_with("/mcp")
            && r.headers.contains_key("authorization")
            && r.response_status == 200
    })
}

/// Token-endpoint requests, oldest first.
pub fn token_requests(auth: &FakeAuthServer) -> Vec<InboundRequest> {
    auth.inbound()
        .into_iter()
        .filter(|r| r.method == "POST" && r.path == "/token")
        .collect()
}

/// Authorization-endpoint requests, oldest first.
pub fn authorize_requests(auth: &FakeAuthServer) -> Vec<InboundRequest> {
    auth.inbound()
        .into_iter()
        .filter(|r| r.path == "/authorize")
        .collect()
}

/// Registration-endpoint requests, oldest first.
pub fn registration_requests(auth: &FakeAuthServer) -> Vec<InboundRequest> {
    auth.inbound()
        .into_iter()
        .filter(|r| r.method == "POST" && r.path == "/register")
        .collect()
}

/// Metadata probes (any well-known path), oldest first.
pub fn metadata_probes(auth: &FakeAuthServer) -> Vec<InboundRequest> {
    auth.inbound()
        .into_iter()
        .filter(|r| r.path.contains("/.well-known/"))
        .collect()
}

//! Scenario lifecycle.
//!
//! A scenario decomposes into three roles: a harness/driver body
//! ([`ScenarioBody`]) that provisions servers and drives or awaits the
//! interaction, a check sink (`CheckRecorder` from the core crate), and the
//! lifecycle state machine, which is written exactly once here in
//! [`Scenario`]. Bodies never see the state machine and the state machine
//! never sees sockets, so each is unit-testable on its own.
//!
//! Lifecycle: CREATED → STARTED → STOPPED. `checks()` before `start()` is
//! the empty list. `stop()` is idempotent and safe after a partially failed
//! `start()`.

use std::time::Duration;

use async_trait::async_trait;
use mcp_conformance_core::{CheckRecorder, CheckSpec, CheckStatus, ConformanceCheck};
use url::Url;

/// Which side of the protocol a scenario exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// We provision fake servers; an external client IUT talks to them.
    Client,
    /// We drive our own observing client against an external server URL.
    Server,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

/// What `start()` hands back: the externally reachable entry URL plus
/// auxiliary context a driven client may need to discover (for example
/// pre-provisioned credentials).
#[derive(Debug, Clone, Default)]
pub struct StartInfo {
    pub entry_url: Option<String>,
    pub context: serde_json::Value,
}

impl StartInfo {
    pub fn at(entry_url: impl Into<String>) -> Self {
        Self {
            entry_url: Some(entry_url.into()),
            context: serde_json::Value::Null,
        }
    }
}

/// Fatal problems provisioning a scenario's harness. These abort the
/// scenario before assertions are meaningful and surface as one top-level
/// FAILURE check.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to bind harness listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{what} not ready within {deadline:?}")]
    Deadline { what: String, deadline: Duration },
    #[error("scenario misconfigured: {0}")]
    Config(String),
}

/// Non-fatal problems during the driven interaction. Converted by the
/// runner into one terminal FAILURE check; checks already collected are
/// kept.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Discovery(#[from] mcp_conformance_core::DiscoveryExhausted),
    #[error("{0}")]
    Flow(String),
}

impl ScenarioError {
    pub fn flow(msg: impl Into<String>) -> Self {
        Self::Flow(msg.into())
    }
}

/// Per-invocation configuration shared by all scenarios.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Entry URL of the external MCP server (server-side scenarios).
    pub server_url: Option<Url>,
    /// Command template for the client IUT (client-side scenarios).
    /// `{url}` is replaced with the scenario's entry URL.
    pub client_command: Option<String>,
    /// Deadline for a spawned process or harness to become reachable.
    /// Exceeding it is a fatal setup failure.
    pub setup_deadline: Duration,
    /// Long timeout for a human-driven authorization step.
    pub interactive_timeout: Duration,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            server_url: None,
            client_command: None,
            setup_deadline: Duration::from_secs(10),
            interactive_timeout: Duration::from_secs(300),
        }
    }
}

/// The harness + driver portion of a scenario.
#[async_trait]
pub trait ScenarioBody: Send {
    /// Provision any ephemeral servers. May record setup-stage checks.
    async fn start(&mut self, ctx: &RunContext) -> Result<StartInfo, SetupError>;

    /// Drive the interaction (server-side) or await the external client and
    /// judge the traffic the harness received (client-side), appending
    /// checks to the recorder.
    async fn run(&mut self, ctx: &RunContext, recorder: &mut CheckRecorder)
        -> Result<(), ScenarioError>;

    /// Tear down everything owned by the body. Must be idempotent.
    async fn stop(&mut self);
}

/// Static description of one scenario: its identity, its declared assertion
/// set, and a constructor for its body.
///
/// The declared assertion set is the contract that makes early death
/// visible: any assertion the body never records is synthesized as a
/// terminal FAILURE when the scenario finalizes.
pub struct ScenarioDef {
    pub name: &'static str,
    pub side: Side,
    pub description: &'static str,
    pub assertions: &'static [CheckSpec],
    pub build: fn() -> Box<dyn ScenarioBody>,
}

impl ScenarioDef {
    /// Unique normative reference ids cited by this scenario's checks, in
    /// listing order.
    pub fn rule_ids(&self) -> Vec<&'static str> {
        let mut ids = Vec::new();
        for spec in self.assertions {
            for (id, _) in spec.spec_references {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

/// A scenario instance: body + check sink + state machine.
pub struct Scenario {
    def: &'static ScenarioDef,
    body: Box<dyn ScenarioBody>,
    recorder: CheckRecorder,
    state: Lifecycle,
    finalized: Option<Vec<ConformanceCheck>>,
}

impl Scenario {
    pub fn new(def: &'static ScenarioDef) -> Self {
        Self {
            def,
            body: (def.build)(),
            recorder: CheckRecorder::new(def.assertions.to_vec()),
            state: Lifecycle::Created,
            finalized: None,
        }
    }

    /// Provision the harness. On error the scenario is finalized with a
    /// single top-level FAILURE describing the setup problem.
    pub async fn start(&mut self, ctx: &RunContext) -> Result<StartInfo, SetupError> {
        debug_assert_eq!(self.state, Lifecycle::Created);
        tracing::debug!(scenario = self.def.name, "starting");
        match self.body.start(ctx).await {
            Ok(info) => {
                self.state = Lifecycle::Started;
                Ok(info)
            }
            Err(err) => {
                self.state = Lifecycle::Started; // stop() must still tear down partial state
                self.finalized = Some(vec![setup_failure_check(self.def, &err)]);
                Err(err)
            }
        }
    }

    /// Drive the interaction. A body error becomes one terminal FAILURE
    /// check; checks already collected survive, and declared assertions
    /// never reached are synthesized as FAILUREs.
    pub async fn run(&mut self, ctx: &RunContext) {
        if self.finalized.is_some() || self.state != Lifecycle::Started {
            return;
        }
        let outcome = self.body.run(ctx, &mut self.recorder).await;
        let recorder = std::mem::take(&mut self.recorder);
        self.finalized = Some(match outcome {
            Ok(()) => recorder.finish("scenario completed without reaching this assertion"),
            Err(err) => {
                tracing::warn!(scenario = self.def.name, error = %err, "scenario errored");
                let mut checks =
                    recorder.finish(&format!("interaction aborted: {err}"));
                checks.push(terminal_failure_check(self.def, &err));
                checks
            }
        });
    }

    /// Tear down owned servers and processes. Idempotent; safe after a
    /// partially failed `start()`.
    pub async fn stop(&mut self) {
        if self.state == Lifecycle::Stopped {
            return;
        }
        tracing::debug!(scenario = self.def.name, "stopping");
        self.body.stop().await;
        self.state = Lifecycle::Stopped;
    }

    /// The finalized, immutable check list. Empty before `start()`; a
    /// snapshot of collected checks if the scenario has not finalized yet.
    pub fn checks(&self) -> Vec<ConformanceCheck> {
        match (&self.finalized, self.state) {
            (Some(checks), _) => checks.clone(),
            (None, Lifecycle::Created) => Vec::new(),
            (None, _) => self.recorder.snapshot(),
        }
    }
}

fn setup_failure_check(def: &ScenarioDef, err: &SetupError) -> ConformanceCheck {
    ConformanceCheck {
        id: format!("{}.setup", def.name),
        name: format!("{} setup", def.name),
        description: "scenario harness provisioning".to_string(),
        status: CheckStatus::Failure,
        timestamp: chrono::Utc::now(),
        error_message: Some(err.to_string()),
        details: None,
        spec_references: Vec::new(),
    }
}

fn terminal_failure_check(def: &ScenarioDef, err: &ScenarioError) -> ConformanceCheck {
    ConformanceCheck {
        id: format!("{}.interaction", def.name),
        name: format!("{} interaction", def.name),
        description: "driven interaction completed".to_string(),
        status: CheckStatus::Failure,
        timestamp: chrono::Utc::now(),
        error_message: Some(err.to_string()),
        details: None,
        spec_references: Vec::new(),
    }
}

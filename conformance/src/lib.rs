//! Scenario-driven conformance suite for MCP authorization.
//!
//! The suite drives scripted interaction scenarios against an implementation
//! under test (IUT), either an MCP client or an MCP server, and produces
//! machine-checkable verdicts against the normative text (the MCP
//! authorization spec plus RFC 8414, RFC 9728, RFC 7591 and OIDC discovery).
//!
//! Two directions exist:
//! - **client-side** scenarios stand up ephemeral fake servers (an
//!   authorization server and a protected MCP server) and judge an external
//!   client IUT by the traffic those fakes receive;
//! - **server-side** scenarios drive this crate's own observing HTTP client
//!   against an externally supplied server URL and judge the responses.
//!
//! # Usage
//!
//! ```bash
//! mcp-conformance --list
//! mcp-conformance --scenario server.auth.challenge --server-url http://localhost:3000/mcp
//! mcp-conformance --side client --client-cmd './my-client {url}' --parallel
//! mcp-conformance --side server --server-url ... --baseline expected-failures.yaml
//! ```
//!
//! Exit codes:
//! - 0: no FAILURE checks (with `--baseline`: reconciliation clean)
//! - 1: at least one FAILURE (with `--baseline`: unexpected or stale entries)
//! - 2: internal error (bad arguments, unreadable baseline)

pub mod driver;
pub mod harness;
pub mod observe;
pub mod process;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod scenarios;

pub use registry::Registry;
pub use scenario::{RunContext, Scenario, ScenarioDef, ScenarioError, SetupError, Side, StartInfo};

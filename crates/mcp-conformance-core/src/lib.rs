//! Core model and algorithms for the MCP authorization conformance suite.
//!
//! This crate is deliberately free of sockets and processes: everything here
//! is either a pure function or takes its I/O as an injected async callback.
//! The runnable suite (ephemeral harness servers, the observing HTTP client,
//! the scenario registry and orchestrator) lives in the `mcp-conformance`
//! crate on top of this one.
//!
//! Contents:
//! - [`check`]: the conformance check/verdict model and the append-only
//!   recorder scenarios write into.
//! - [`challenge`]: tolerant `WWW-Authenticate` challenge-header parsing.
//! - [`classify`]: observed-request records and the fixed-priority
//!   URL/method classification table.
//! - [`discovery`]: the ordered authorization-server metadata fallback
//!   (RFC 8414 path-insert vs. OIDC path-insert/path-append) and the
//!   resolver that walks it.
//! - [`baseline`]: the expected-failures baseline document and the
//!   symmetric reconciliation algorithm.

pub mod baseline;
pub mod challenge;
pub mod check;
pub mod classify;
pub mod discovery;

pub use baseline::{evaluate_baseline, BaselineEvaluation, ExpectedFailures, ScenarioRunResult};
pub use challenge::AuthChallenge;
pub use check::{CheckRecorder, CheckSpec, CheckStatus, ConformanceCheck, SpecReference};
pub use classify::{classify_request, BodySnapshot, ObservedRequest, RequestKind};
pub use discovery::{
    discovery_attempts, resolve_metadata, DiscoveryAttempt, DiscoveryExhausted, DiscoveryFamily,
    DiscoveryVariant, FetchOutcome, ResolvedMetadata,
};

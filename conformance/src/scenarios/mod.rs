//! Scenario catalog.
//!
//! One module per conformance area. Client-side modules provision fake
//! servers and judge an external client IUT; the `server` module drives our
//! own observing client against an external MCP server. Scenario names are
//! `side.area.case` and are the unit of baseline matching, so they must stay
//! stable across releases.

pub mod common;

mod cimd;
mod discovery;
mod pkce;
mod refresh;
mod registration;
mod server;
mod step_up;
mod token_auth;

use crate::scenario::ScenarioDef;

// Normative sources cited by checks.
pub(crate) const MCP_AUTH: &str =
    "https://modelcontextprotocol.io/specification/2025-06-18/basic/authorization";
pub(crate) const RFC8414: &str = "https://www.rfc-editor.org/rfc/rfc8414";
pub(crate) const RFC9728: &str = "https://www.rfc-editor.org/rfc/rfc9728";
pub(crate) const RFC7591: &str = "https://www.rfc-editor.org/rfc/rfc7591";
pub(crate) const RFC7636: &str = "https://www.rfc-editor.org/rfc/rfc7636";
pub(crate) const RFC6749: &str = "https://www.rfc-editor.org/rfc/rfc6749";
pub(crate) const RFC6750: &str = "https://www.rfc-editor.org/rfc/rfc6750";
pub(crate) const CIMD_DRAFT: &str =
    "https://datatracker.ietf.org/doc/draft-ietf-oauth-client-id-metadata-document/";

/// Every built-in scenario, in listing order.
pub fn all() -> Vec<&'static ScenarioDef> {
    vec![
        &discovery::ROOT,
        &discovery::PATH_ISSUER,
        &token_auth::SECRET_BASIC,
        &token_auth::PUBLIC_NONE,
        &pkce::S256,
        &registration::DYNAMIC,
        &cimd::URL_CLIENT_ID,
        &step_up::INSUFFICIENT_SCOPE,
        &refresh::ROTATION,
        &server::CHALLENGE,
        &server::PRM,
        &server::AS_DISCOVERY,
        &server::FULL_AUTH,
    ]
}

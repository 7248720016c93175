//! Observed-request records and classification.
//!
//! The observing client records every outbound call the conformance side
//! makes; assertion logic never touches transport mechanics directly, only
//! this structured stream. Classification is pure pattern matching on
//! URL/method against a fixed rule table, evaluated in priority order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::challenge::AuthChallenge;

/// What a recorded request was, judged from its URL and method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    PrmDiscovery,
    AsMetadata,
    DcrRegistration,
    TokenRequest,
    Authorization,
    ProtocolRequest,
    Unknown,
}

/// Classify a request by URL/method.
///
/// Rules are tried strictly in this order; the first match wins:
/// 1. path contains the protected-resource well-known suffix
/// 2. path contains the AS-metadata or OIDC well-known suffix
/// 3. POST to a path containing `register`
/// 4. POST to a path containing `token`
/// 5. path containing `authorize`
/// 6. POST to the protocol endpoint (path ending in `/mcp`)
pub fn classify_request(method: &str, url: &str) -> RequestKind {
    let path = url
        .split_once("://")
        .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(url);
    // Query strings never participate in classification.
    let path = path.split('?').next().unwrap_or(path);
    let is_post = method.eq_ignore_ascii_case("POST");

    if path.contains("/.well-known/oauth-protected-resource") {
        RequestKind::PrmDiscovery
    } else if path.contains("/.well-known/oauth-authorization-server")
        || path.contains("/.well-known/openid-configuration")
    {
        RequestKind::AsMetadata
    } else if is_post && path.contains("register") {
        RequestKind::DcrRegistration
    } else if is_post && path.contains("token") {
        RequestKind::TokenRequest
    } else if path.contains("authorize") {
        RequestKind::Authorization
    } else if is_post && (path.ends_with("/mcp") || path == "/mcp") {
        RequestKind::ProtocolRequest
    } else {
        RequestKind::Unknown
    }
}

/// Best-effort snapshot of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySnapshot {
    Json(serde_json::Value),
    Text(String),
    Empty,
}

impl BodySnapshot {
    /// Parse raw bytes: JSON if parseable, else lossy text, else empty.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

}

/// One observed request/response pair.
///
/// Lifetime is one scenario invocation; discarded after checks are derived.
#[derive(Debug, Clone)]
pub struct ObservedRequest {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub request_headers: BTreeMap<String, String>,
    pub response_status: u16,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: BodySnapshot,
    pub challenge: Option<AuthChallenge>,
    pub kind: RequestKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prm_beats_everything() {
        assert_eq!(
            classify_request("GET", "https://rs.example/.well-known/oauth-protected-resource"),
            RequestKind::PrmDiscovery
        );
        // Even a POST containing "token" elsewhere in the path.
        assert_eq!(
            classify_request(
                "POST",
                "https://rs.example/token/.well-known/oauth-protected-resource"
            ),
            RequestKind::PrmDiscovery
        );
    }

    #[test]
    fn both_metadata_suffixes_classify_as_as_metadata() {
        assert_eq!(
            classify_request("GET", "https://as.example/.well-known/oauth-authorization-server"),
            RequestKind::AsMetadata
        );
        assert_eq!(
            classify_request(
                "GET",
                "https://as.example/.well-known/openid-configuration/tenant"
            ),
            RequestKind::AsMetadata
        );
    }

    #[test]
    fn registration_and_token_require_post() {
        assert_eq!(
            classify_request("POST", "https://as.example/oauth/register"),
            RequestKind::DcrRegistration
        );
        assert_eq!(
            classify_request("GET", "https://as.example/oauth/register"),
            RequestKind::Unknown
        );
        assert_eq!(
            classify_request("POST", "https://as.example/oauth/token"),
            RequestKind::TokenRequest
        );
    }

    #[test]
    fn registration_outranks_token() {
        // A registration path containing "token" is still a registration.
        assert_eq!(
            classify_request("POST", "https://as.example/token/register"),
            RequestKind::DcrRegistration
        );
    }

    #[test]
    fn authorization_matches_any_method() {
        assert_eq!(
            classify_request("GET", "https://as.example/oauth/authorize?client_id=x"),
            RequestKind::Authorization
        );
    }

    #[test]
    fn protocol_endpoint_is_post_to_mcp_path() {
        assert_eq!(
            classify_request("POST", "https://rs.example/mcp"),
            RequestKind::ProtocolRequest
        );
        assert_eq!(
            classify_request("POST", "https://rs.example/api/mcp"),
            RequestKind::ProtocolRequest
        );
        assert_eq!(
            classify_request("GET", "https://rs.example/mcp"),
            RequestKind::Unknown
        );
    }

    #[test]
    fn body_snapshot_prefers_json() {
        assert_eq!(
            BodySnapshot::from_bytes(b"{\"a\":1}"),
            BodySnapshot::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            BodySnapshot::from_bytes(b"plain text"),
            BodySnapshot::Text("plain text".to_string())
        );
        assert_eq!(BodySnapshot::from_bytes(b""), BodySnapshot::Empty);
    }
}

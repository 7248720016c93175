//! Authorization-flow driver.
//!
//! Server-side scenarios use this to act as a correct MCP client against the
//! server under test: hit the protocol endpoint, read the challenge, walk
//! protected-resource and authorization-server discovery, register, obtain a
//! token, and retry with credentials. Every round trip goes through the
//! observing client, so scenario assertions judge the structured observation
//! stream rather than anything this module returns.

use std::collections::BTreeMap;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::Engine;
use mcp_conformance_core::{resolve_metadata, AuthChallenge, FetchOutcome, ResolvedMetadata};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use url::Url;

use crate::harness::ServerHandle;
use crate::observe::{ObservedResponse, ObservingClient};
use crate::scenario::{RunContext, ScenarioError};

pub struct AuthFlowDriver<'a> {
    pub client: &'a ObservingClient,
    pub ctx: &'a RunContext,
}

/// A fresh PKCE verifier/challenge pair (S256).
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier = format!("{:032x}{:032x}", rand::random::<u128>(), rand::random::<u128>());
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Loopback listener for the authorization redirect.
///
/// Bound before registration so the `redirect_uri` the AS learns is the one
/// the callback will actually arrive on.
pub struct RedirectListener {
    handle: ServerHandle,
    rx: mpsc::Receiver<BTreeMap<String, String>>,
    redirect_uri: String,
}

impl RedirectListener {
    pub async fn bind() -> Result<Self, ScenarioError> {
        let (tx, rx) = mpsc::channel::<BTreeMap<String, String>>(1);
        let router = Router::new().route(
            "/callback",
            get(move |Query(params): Query<BTreeMap<String, String>>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(params).await;
                    Html("<p>Authorization received. You can close this tab.</p>")
                }
            }),
        );
        let handle = ServerHandle::spawn(router)
            .await
            .map_err(|e| ScenarioError::flow(format!("redirect listener: {e}")))?;
        let redirect_uri = format!("{}/callback", handle.base_url());
        Ok(Self {
            handle,
            rx,
            redirect_uri,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
}

impl<'a> AuthFlowDriver<'a> {
    pub fn new(client: &'a ObservingClient, ctx: &'a RunContext) -> Self {
        Self { client, ctx }
    }

    /// Unauthenticated probe of the protocol endpoint.
    pub async fn initial_request(&self, mcp_url: &Url) -> Result<ObservedResponse, ScenarioError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "mcp-conformance", "version": env!("CARGO_PKG_VERSION") },
            },
        });
        Ok(self.client.post_json(mcp_url.as_str(), &body, None).await?)
    }

    /// Candidate PRM URLs, most specific first: the challenge's
    /// `resource_metadata` parameter, then the RFC 9728 path-insert form,
    /// then the root well-known.
    pub fn prm_candidates(mcp_url: &Url, challenge: Option<&AuthChallenge>) -> Vec<String> {
        let origin = mcp_url.origin().ascii_serialization();
        let mut candidates = Vec::new();
        if let Some(url) = challenge.and_then(|c| c.param("resource_metadata")) {
            candidates.push(url.to_string());
        }
        let path = mcp_url.path();
        if path != "/" && !path.is_empty() {
            candidates.push(format!(
                "{origin}/.well-known/oauth-protected-resource{path}"
            ));
        }
        candidates.push(format!("{origin}/.well-known/oauth-protected-resource"));
        candidates.dedup();
        candidates
    }

    /// Fetch the protected-resource metadata, trying candidates in order.
    /// Individual fetch defects are swallowed; `None` means exhaustion.
    pub async fn fetch_prm(
        &self,
        mcp_url: &Url,
        challenge: Option<&AuthChallenge>,
    ) -> Option<Value> {
        for candidate in Self::prm_candidates(mcp_url, challenge) {
            match self.client.get(&candidate).await {
                Ok(response) if response.status == 200 => {
                    if let Some(doc) = response.json().filter(Value::is_object) {
                        return Some(doc);
                    }
                }
                Ok(_) | Err(_) => {}
            }
        }
        None
    }

    /// Run the ordered AS-metadata fallback through the observing client.
    pub async fn resolve_as_metadata(
        &self,
        issuer: &Url,
    ) -> Result<ResolvedMetadata, mcp_conformance_core::DiscoveryExhausted> {
        let client = self.client.clone();
        resolve_metadata(issuer, move |attempt| {
            let client = client.clone();
            async move {
                let response = client.get(&attempt.url).await?;
                Ok::<_, reqwest::Error>(FetchOutcome {
                    status: response.status,
                    body: response.json().unwrap_or(Value::Null),
                })
            }
        })
        .await
    }

    /// Dynamic client registration against the AS metadata's
    /// `registration_endpoint`.
    pub async fn register_client(
        &self,
        as_metadata: &Value,
        redirect_uri: &str,
    ) -> Result<Value, ScenarioError> {
        let Some(endpoint) = as_metadata
            .get("registration_endpoint")
            .and_then(Value::as_str)
        else {
            return Err(ScenarioError::flow(
                "authorization server metadata has no registration_endpoint",
            ));
        };
        let body = json!({
            "client_name": "mcp-conformance",
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        });
        let response = self.client.post_json(endpoint, &body, None).await?;
        if response.status != 200 && response.status != 201 {
            return Err(ScenarioError::flow(format!(
                "registration rejected with status {}",
                response.status
            )));
        }
        response
            .json()
            .ok_or_else(|| ScenarioError::flow("registration response was not JSON"))
    }

    /// Interactive authorization-code step.
    ///
    /// Prints the authorization URL for a human to open and waits up to the
    /// context's interactive timeout for the callback on the previously
    /// bound listener. This is the minutes-scale timeout class; running past
    /// it fails the flow. Returns the authorization code.
    pub async fn authorize_interactive(
        &self,
        as_metadata: &Value,
        client_id: &str,
        scope: Option<&str>,
        resource: Option<&str>,
        pkce: &Pkce,
        listener: RedirectListener,
    ) -> Result<String, ScenarioError> {
        let Some(authorize_endpoint) = as_metadata
            .get("authorization_endpoint")
            .and_then(Value::as_str)
        else {
            return Err(ScenarioError::flow(
                "authorization server metadata has no authorization_endpoint",
            ));
        };

        let RedirectListener {
            mut handle,
            mut rx,
            redirect_uri,
        } = listener;

        let state_param = format!("{:016x}", rand::random::<u64>());
        let authorize_url = build_authorize_url(
            authorize_endpoint,
            client_id,
            &redirect_uri,
            &state_param,
            pkce,
            scope,
            resource,
        )?;

        tracing::info!(url = %authorize_url, "open this URL to authorize the conformance client");
        eprintln!("\nAuthorize the conformance client by opening:\n  {authorize_url}\n");

        let outcome = tokio::time::timeout(self.ctx.interactive_timeout, rx.recv()).await;
        handle.stop().await;

        let params = match outcome {
            Ok(Some(params)) => params,
            Ok(None) => return Err(ScenarioError::flow("redirect listener closed early")),
            Err(_) => {
                return Err(ScenarioError::flow(format!(
                    "no authorization callback within {:?}",
                    self.ctx.interactive_timeout
                )));
            }
        };

        if params.get("state") != Some(&state_param) {
            return Err(ScenarioError::flow("authorization callback state mismatch"));
        }
        if let Some(error) = params.get("error") {
            return Err(ScenarioError::flow(format!(
                "authorization server returned error: {error}"
            )));
        }
        let code = params
            .get("code")
            .ok_or_else(|| ScenarioError::flow("authorization callback carried no code"))?;
        Ok(code.clone())
    }

    /// Exchange an authorization code for tokens at the token endpoint.
    pub async fn exchange_code(
        &self,
        as_metadata: &Value,
        client_id: &str,
        code: &str,
        redirect_uri: &str,
        pkce: &Pkce,
        resource: Option<&str>,
    ) -> Result<Value, ScenarioError> {
        let Some(endpoint) = as_metadata.get("token_endpoint").and_then(Value::as_str) else {
            return Err(ScenarioError::flow(
                "authorization server metadata has no token_endpoint",
            ));
        };
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        if let Some(resource) = resource {
            form.push(("resource", resource));
        }
        let response = self.client.post_form(endpoint, &form, None).await?;
        if response.status != 200 {
            return Err(ScenarioError::flow(format!(
                "token endpoint answered {}",
                response.status
            )));
        }
        response
            .json()
            .ok_or_else(|| ScenarioError::flow("token response was not JSON"))
    }

    /// Retry the protocol endpoint with a bearer token.
    pub async fn authenticated_request(
        &self,
        mcp_url: &Url,
        access_token: &str,
    ) -> Result<ObservedResponse, ScenarioError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "mcp-conformance", "version": env!("CARGO_PKG_VERSION") },
            },
        });
        Ok(self
            .client
            .post_json(mcp_url.as_str(), &body, Some(access_token))
            .await?)
    }
}

fn build_authorize_url(
    authorize_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    pkce: &Pkce,
    scope: Option<&str>,
    resource: Option<&str>,
) -> Result<Url, ScenarioError> {
    let mut url = Url::parse(authorize_endpoint)
        .map_err(|e| ScenarioError::flow(format!("bad authorization_endpoint: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        if let Some(scope) = scope {
            query.append_pair("scope", scope);
        }
        if let Some(resource) = resource {
            query.append_pair("resource", resource);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_challenge_is_s256_of_verifier() {
        let pkce = Pkce::generate();
        let digest = Sha256::digest(pkce.verifier.as_bytes());
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        assert_eq!(pkce.challenge, expected);
        assert!(pkce.verifier.len() >= 43);
    }

    #[tokio::test]
    async fn authorize_url_carries_listener_redirect_uri() {
        let listener = RedirectListener::bind().await.unwrap();
        let pkce = Pkce::generate();
        let url = build_authorize_url(
            "https://as.example/authorize",
            "client-1",
            listener.redirect_uri(),
            "feedbeef",
            &pkce,
            Some("mcp:read"),
            Some("https://rs.example/mcp"),
        )
        .unwrap();
        let pairs: BTreeMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs.get("redirect_uri").map(String::as_str),
            Some(listener.redirect_uri())
        );
        assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("client-1"));
        assert_eq!(pairs.get("state").map(String::as_str), Some("feedbeef"));
        assert_eq!(
            pairs.get("code_challenge").map(String::as_str),
            Some(pkce.challenge.as_str())
        );
        assert_eq!(
            pairs.get("code_challenge_method").map(String::as_str),
            Some("S256")
        );
        assert_eq!(pairs.get("scope").map(String::as_str), Some("mcp:read"));
    }

    #[test]
    fn prm_candidates_prefer_challenge_then_path_insert() {
        let mcp = Url::parse("https://rs.example/api/mcp").unwrap();
        let challenge =
            AuthChallenge::parse(r#"Bearer resource_metadata="https://rs.example/custom/prm""#)
                .unwrap();
        let candidates = AuthFlowDriver::prm_candidates(&mcp, Some(&challenge));
        assert_eq!(
            candidates,
            vec![
                "https://rs.example/custom/prm",
                "https://rs.example/.well-known/oauth-protected-resource/api/mcp",
                "https://rs.example/.well-known/oauth-protected-resource",
            ]
        );
    }

    #[test]
    fn prm_candidates_without_challenge_on_root_path() {
        let mcp = Url::parse("https://rs.example/mcp").unwrap();
        let candidates = AuthFlowDriver::prm_candidates(&mcp, None);
        assert_eq!(
            candidates,
            vec![
                "https://rs.example/.well-known/oauth-protected-resource/mcp",
                "https://rs.example/.well-known/oauth-protected-resource",
            ]
        );
    }
}

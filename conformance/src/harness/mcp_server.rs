//! Fake protected MCP server.
//!
//! Serves a `POST /mcp` protocol endpoint guarded by bearer tokens and the
//! RFC 9728 protected-resource metadata document. Token validation is a
//! lookup in the [`TokenStore`] shared with the scenario's fake
//! authorization server; no network hop, no crypto.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::{new_inbound_log, InboundLog, InboundRequest, ServerHandle, TokenStore};
use crate::scenario::SetupError;

/// Behavior knobs for one scenario's protected resource.
#[derive(Clone)]
pub struct McpServerConfig {
    /// Authorization servers advertised in the PRM document.
    pub authorization_servers: Vec<String>,
    /// Tokens this resource accepts (shared with the fake AS).
    pub tokens: TokenStore,
    /// Scope that must be present in the token to use the protocol
    /// endpoint. Missing scope yields 403 `insufficient_scope` carrying the
    /// needed scope, the step-up trigger.
    pub required_scope: Option<String>,
    /// Scope advertised in the initial 401 challenge.
    pub challenge_scope: Option<String>,
    /// Reject the first otherwise-valid bearer token with `invalid_token`
    /// and revoke it, forcing a driven client onto the refresh path.
    pub reject_token_once: bool,
}

struct Shared {
    config: McpServerConfig,
    base_url: String,
    rejected_once: std::sync::atomic::AtomicBool,
}

type AppState = Arc<Shared>;

/// A running fake MCP server.
pub struct FakeMcpServer {
    handle: ServerHandle,
    state: AppState,
    inbound: InboundLog,
}

impl FakeMcpServer {
    pub async fn start(config: McpServerConfig) -> Result<Self, SetupError> {
        let (listener, addr) = super::bind_for_state().await?;
        let base_url = format!("http://{addr}");
        let state: AppState = Arc::new(Shared {
            config,
            base_url: base_url.clone(),
            rejected_once: std::sync::atomic::AtomicBool::new(false),
        });
        let inbound = new_inbound_log();

        let router = Router::new()
            .route("/mcp", post(protocol_endpoint))
            .route(
                "/.well-known/oauth-protected-resource",
                get(resource_metadata),
            )
            .layer(axum::middleware::from_fn_with_state(
                inbound.clone(),
                super::record_inbound,
            ))
            .with_state(state.clone());

        tracing::debug!(%base_url, "fake mcp server up");
        Ok(Self {
            handle: ServerHandle::spawn_on(listener, addr, router),
            state,
            inbound,
        })
    }

    pub fn base_url(&self) -> String {
        self.state.base_url.clone()
    }

    /// The protocol entry URL handed to the client IUT.
    pub fn mcp_url(&self) -> String {
        format!("{}/mcp", self.state.base_url)
    }

    pub fn inbound(&self) -> Vec<InboundRequest> {
        self.inbound.lock().clone()
    }

    pub async fn stop(&mut self) {
        self.handle.stop().await;
    }
}

async fn resource_metadata(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "resource": format!("{}/mcp", state.base_url),
        "authorization_servers": state.config.authorization_servers,
        "bearer_methods_supported": ["header"],
        "scopes_supported": ["mcp:read", "mcp:write"],
    }))
}

async fn protocol_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = bearer else {
        return challenge_401(&state, None);
    };

    let grant = state.config.tokens.lock().get(token).cloned();
    let grant = match grant {
        Some(grant) if !grant.revoked => grant,
        _ => return challenge_401(&state, Some("invalid_token")),
    };

    if state.config.reject_token_once
        && !state
            .rejected_once
            .swap(true, std::sync::atomic::Ordering::SeqCst)
    {
        if let Some(stored) = state.config.tokens.lock().get_mut(token) {
            stored.revoked = true;
        }
        return challenge_401(&state, Some("invalid_token"));
    }

    if let Some(required) = &state.config.required_scope {
        let granted: Vec<&str> = grant.scope.split_whitespace().collect();
        if !granted.contains(&required.as_str()) {
            let challenge = format!(
                "Bearer error=\"insufficient_scope\", scope=\"{required}\", resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
                state.base_url
            );
            return (
                StatusCode::FORBIDDEN,
                [(header::WWW_AUTHENTICATE, challenge)],
                Json(json!({ "error": "insufficient_scope" })),
            )
                .into_response();
        }
    }

    // Minimal JSON-RPC so a real client can finish its handshake.
    let (id, method) = body
        .as_ref()
        .map(|Json(v)| (v.get("id").cloned(), v.get("method").and_then(Value::as_str)))
        .unwrap_or((None, None));
    let result = match method {
        Some("initialize") => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "serverInfo": { "name": "mcp-conformance-fake", "version": env!("CARGO_PKG_VERSION") },
        }),
        Some("ping") | None => json!({}),
        Some(_) => json!({}),
    };
    Json(json!({
        "jsonrpc": "2.0",
        "id": id.unwrap_or(Value::Null),
        "result": result,
    }))
    .into_response()
}

fn challenge_401(state: &Shared, error: Option<&str>) -> Response {
    let mut challenge = String::from("Bearer ");
    if let Some(error) = error {
        challenge.push_str(&format!("error=\"{error}\", "));
    }
    if let Some(scope) = &state.config.challenge_scope {
        challenge.push_str(&format!("scope=\"{scope}\", "));
    }
    challenge.push_str(&format!(
        "resource_metadata=\"{}/.well-known/oauth-protected-resource\"",
        state.base_url
    ));
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(json!({ "error": error.unwrap_or("unauthorized") })),
    )
        .into_response()
}

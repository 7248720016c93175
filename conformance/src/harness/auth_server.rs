//! Fake OAuth authorization server.
//!
//! Implements just enough of RFC 8414 metadata, RFC 7591 registration and
//! the authorization-code + refresh-token grants (PKCE S256) to exercise a
//! client IUT. The authorize endpoint auto-approves so client-side
//! scenarios run unattended. Behavior knobs live in [`AuthServerConfig`];
//! scenarios judge the IUT by the inbound log, never by this server's own
//! bookkeeping.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::{fresh_token, new_inbound_log, InboundLog, InboundRequest, ServerHandle};
use crate::scenario::SetupError;

/// Behavior knobs for one scenario's authorization server.
#[derive(Debug, Clone)]
pub struct AuthServerConfig {
    /// Issuer path component, `""` for a root issuer, e.g. `"/tenant"`.
    pub issuer_path: String,
    /// Serve `/.well-known/oauth-authorization-server` (path-insert form).
    pub serve_rfc8414: bool,
    /// Serve `/.well-known/openid-configuration` (path-insert form; the
    /// root form for a root issuer).
    pub serve_oidc_insert: bool,
    /// Serve `<path>/.well-known/openid-configuration` (path-append form;
    /// only meaningful for a non-root issuer).
    pub serve_oidc_append: bool,
    pub token_auth_methods: Vec<String>,
    pub require_pkce: bool,
    pub grant_types: Vec<String>,
    /// Issue a fresh refresh token on every refresh grant and invalidate
    /// the one that was just used.
    pub rotate_refresh_tokens: bool,
    /// Accept `https://` client ids without prior registration (CIMD).
    pub accept_url_client_ids: bool,
    pub access_token_ttl_secs: u64,
    pub scopes_supported: Vec<String>,
}

impl Default for AuthServerConfig {
    fn default() -> Self {
        Self {
            issuer_path: String::new(),
            serve_rfc8414: true,
            serve_oidc_insert: true,
            serve_oidc_append: true,
            token_auth_methods: vec!["client_secret_basic".into(), "none".into()],
            require_pkce: true,
            grant_types: vec!["authorization_code".into(), "refresh_token".into()],
            rotate_refresh_tokens: true,
            accept_url_client_ids: false,
            access_token_ttl_secs: 3600,
            scopes_supported: vec!["mcp:read".into(), "mcp:write".into()],
        }
    }
}

/// An access token the server has issued. Shared with the fake MCP server
/// so it can validate bearer tokens without any network hop.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub scope: String,
    pub resource: Option<String>,
    pub revoked: bool,
}

pub type TokenStore = Arc<Mutex<HashMap<String, TokenGrant>>>;

#[derive(Debug, Clone)]
struct RegisteredClient {
    secret: Option<String>,
    redirect_uris: Vec<String>,
    auth_method: String,
}

#[derive(Debug, Clone)]
struct CodeGrant {
    client_id: String,
    redirect_uri: String,
    scope: String,
    resource: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

#[derive(Debug, Clone)]
struct RefreshGrant {
    client_id: String,
    scope: String,
    resource: Option<String>,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<String, RegisteredClient>,
    codes: HashMap<String, CodeGrant>,
    refresh: HashMap<String, RefreshGrant>,
}

struct Shared {
    config: AuthServerConfig,
    issuer: String,
    base_url: String,
    inner: Mutex<Inner>,
    tokens: TokenStore,
}

type AppState = Arc<Shared>;

/// A running fake authorization server.
pub struct FakeAuthServer {
    handle: ServerHandle,
    state: AppState,
    inbound: InboundLog,
}

impl FakeAuthServer {
    pub async fn start(config: AuthServerConfig) -> Result<Self, SetupError> {
        let (listener, addr) = super::bind_for_state().await?;
        let base_url = format!("http://{addr}");
        let issuer = format!("{base_url}{}", config.issuer_path);

        let state: AppState = Arc::new(Shared {
            config,
            issuer,
            base_url: base_url.clone(),
            inner: Mutex::new(Inner::default()),
            tokens: Arc::new(Mutex::new(HashMap::new())),
        });
        let inbound = new_inbound_log();

        let mut router = Router::new()
            .route("/authorize", get(authorize))
            .route("/token", post(token))
            .route("/register", post(register));

        let cfg = &state.config;
        let path = cfg.issuer_path.clone();
        if path.is_empty() {
            if cfg.serve_rfc8414 {
                router = router.route("/.well-known/oauth-authorization-server", get(metadata));
            }
            if cfg.serve_oidc_insert {
                router = router.route("/.well-known/openid-configuration", get(metadata));
            }
        } else {
            if cfg.serve_rfc8414 {
                router = router.route(
                    &format!("/.well-known/oauth-authorization-server{path}"),
                    get(metadata),
                );
            }
            if cfg.serve_oidc_insert {
                router = router.route(
                    &format!("/.well-known/openid-configuration{path}"),
                    get(metadata),
                );
            }
            if cfg.serve_oidc_append {
                router = router.route(
                    &format!("{path}/.well-known/openid-configuration"),
                    get(metadata),
                );
            }
        }

        let router = router
            .layer(axum::middleware::from_fn_with_state(
                inbound.clone(),
                super::record_inbound,
            ))
            .with_state(state.clone());

        tracing::debug!(%base_url, "fake authorization server up");
        Ok(Self {
            handle: ServerHandle::spawn_on(listener, addr, router),
            state,
            inbound,
        })
    }

    pub fn base_url(&self) -> String {
        self.state.base_url.clone()
    }

    pub fn issuer(&self) -> String {
        self.state.issuer.clone()
    }

    pub fn tokens(&self) -> TokenStore {
        self.state.tokens.clone()
    }

    /// Everything the IUT sent us, including probes that hit no route.
    pub fn inbound(&self) -> Vec<InboundRequest> {
        self.inbound.lock().clone()
    }

    /// Provision a client out of band, for scenarios whose context hands the
    /// IUT pre-shared credentials instead of exercising registration.
    pub fn preregister(&self, client_id: &str, secret: Option<&str>, auth_method: &str) {
        self.state.inner.lock().clients.insert(
            client_id.to_string(),
            RegisteredClient {
                secret: secret.map(str::to_string),
                redirect_uris: Vec::new(),
                auth_method: auth_method.to_string(),
            },
        );
    }

    /// Revoke every outstanding access token, forcing a driven client onto
    /// the refresh path.
    pub fn revoke_access_tokens(&self) {
        for grant in self.state.tokens.lock().values_mut() {
            grant.revoked = true;
        }
    }

    pub async fn stop(&mut self) {
        self.handle.stop().await;
    }
}

async fn metadata(State(state): State<AppState>) -> Json<Value> {
    let cfg = &state.config;
    let mut doc = json!({
        "issuer": state.issuer,
        "authorization_endpoint": format!("{}/authorize", state.base_url),
        "token_endpoint": format!("{}/token", state.base_url),
        "response_types_supported": ["code"],
        "grant_types_supported": cfg.grant_types,
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": cfg.token_auth_methods,
        "scopes_supported": cfg.scopes_supported,
    });
    if cfg.accept_url_client_ids {
        // CIMD: URL client ids work without prior registration, and we omit
        // the registration endpoint so a capable client prefers them.
        doc["client_id_metadata_document_supported"] = Value::Bool(true);
    } else {
        doc["registration_endpoint"] = Value::String(format!("{}/register", state.base_url));
    }
    Json(doc)
}

async fn register(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let Some(redirect_uris) = body
        .get("redirect_uris")
        .and_then(Value::as_array)
        .map(|uris| {
            uris.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|uris| !uris.is_empty())
    else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            "redirect_uris is required",
        );
    };

    let auth_method = body
        .get("token_endpoint_auth_method")
        .and_then(Value::as_str)
        .unwrap_or("client_secret_basic")
        .to_string();
    if !state.config.token_auth_methods.contains(&auth_method) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            &format!("token_endpoint_auth_method {auth_method} not supported"),
        );
    }

    let client_id = fresh_token("client");
    let secret = (auth_method != "none").then(|| fresh_token("secret"));
    state.inner.lock().clients.insert(
        client_id.clone(),
        RegisteredClient {
            secret: secret.clone(),
            redirect_uris: redirect_uris.clone(),
            auth_method: auth_method.clone(),
        },
    );

    let mut response = json!({
        "client_id": client_id,
        "redirect_uris": redirect_uris,
        "token_endpoint_auth_method": auth_method,
        "grant_types": state.config.grant_types,
        "client_id_issued_at": chrono::Utc::now().timestamp(),
    });
    if let Some(secret) = secret {
        response["client_secret"] = Value::String(secret);
    }
    (StatusCode::CREATED, Json(response)).into_response()
}

async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Response {
    let client_id = params.get("client_id").cloned().unwrap_or_default();
    let redirect_uri = params.get("redirect_uri").cloned().unwrap_or_default();

    if redirect_uri.is_empty() {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is required",
        );
    }

    let registered = state.inner.lock().clients.get(&client_id).cloned();
    let url_client = state.config.accept_url_client_ids
        && (client_id.starts_with("https://") || client_id.starts_with("http://"));
    match &registered {
        Some(client)
            if !client.redirect_uris.is_empty()
                && !client.redirect_uris.contains(&redirect_uri) =>
        {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "redirect_uri not registered for this client",
            );
        }
        Some(_) => {}
        None if url_client => {}
        None => return error_redirect(&redirect_uri, &params, "invalid_client"),
    }

    if params.get("response_type").map(String::as_str) != Some("code") {
        return error_redirect(&redirect_uri, &params, "unsupported_response_type");
    }

    let code_challenge = params.get("code_challenge").cloned();
    let method = params.get("code_challenge_method").cloned();
    if state.config.require_pkce && code_challenge.is_none() {
        return error_redirect(&redirect_uri, &params, "invalid_request");
    }
    if code_challenge.is_some() && method.as_deref() != Some("S256") {
        // `plain` (or a missing method) is rejected outright.
        return error_redirect(&redirect_uri, &params, "invalid_request");
    }

    let code = fresh_token("code");
    state.inner.lock().codes.insert(
        code.clone(),
        CodeGrant {
            client_id,
            redirect_uri: redirect_uri.clone(),
            scope: params.get("scope").cloned().unwrap_or_default(),
            resource: params.get("resource").cloned(),
            code_challenge,
            code_challenge_method: method,
        },
    );

    let mut location = format!("{redirect_uri}{}code={code}", query_joiner(&redirect_uri));
    if let Some(state_param) = params.get("state") {
        location.push_str("&state=");
        location.push_str(&urlencode(state_param));
    }
    redirect(&location)
}

async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<BTreeMap<String, String>>,
) -> Response {
    let auth = match authenticate_client(&state, &headers, &form) {
        Ok(client_id) => client_id,
        Err(response) => return *response,
    };

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => authorization_code_grant(&state, &auth, &form),
        Some("refresh_token") => refresh_token_grant(&state, &auth, &form),
        _ => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "only authorization_code and refresh_token are supported",
        ),
    }
}

/// Work out which token-endpoint auth method the request used and validate
/// it against the configured allow list.
fn authenticate_client(
    state: &Shared,
    headers: &HeaderMap,
    form: &BTreeMap<String, String>,
) -> Result<String, Box<Response>> {
    let invalid = |detail: &str| {
        Box::new(oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            detail,
        ))
    };

    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|b64| {
            base64::engine::general_purpose::STANDARD
                .decode(b64)
                .ok()
        })
        .and_then(|raw| String::from_utf8(raw).ok())
        .and_then(|creds| {
            creds
                .split_once(':')
                .map(|(id, secret)| (id.to_string(), secret.to_string()))
        });

    let (client_id, method, secret) = if let Some((id, secret)) = basic {
        (id, "client_secret_basic", Some(secret))
    } else if let Some(secret) = form.get("client_secret") {
        (
            form.get("client_id").cloned().unwrap_or_default(),
            "client_secret_post",
            Some(secret.clone()),
        )
    } else {
        (
            form.get("client_id").cloned().unwrap_or_default(),
            "none",
            None,
        )
    };

    if !state
        .config
        .token_auth_methods
        .iter()
        .any(|m| m == method)
    {
        return Err(invalid(&format!("auth method {method} not allowed")));
    }

    let inner = state.inner.lock();
    match inner.clients.get(&client_id) {
        Some(client) => {
            if client.auth_method != method {
                return Err(invalid("wrong auth method for this client"));
            }
            if client.secret.as_deref() != secret.as_deref() {
                return Err(invalid("bad client credentials"));
            }
        }
        None => {
            let url_client = state.config.accept_url_client_ids
                && (client_id.starts_with("https://") || client_id.starts_with("http://"));
            if !url_client {
                return Err(invalid("unknown client"));
            }
        }
    }
    Ok(client_id)
}

fn authorization_code_grant(
    state: &Shared,
    client_id: &str,
    form: &BTreeMap<String, String>,
) -> Response {
    let Some(code) = form.get("code") else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "code is required");
    };
    let Some(grant) = state.inner.lock().codes.remove(code) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "unknown code");
    };
    if grant.client_id != client_id {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code client mismatch");
    }
    if form.get("redirect_uri").map(String::as_str) != Some(grant.redirect_uri.as_str()) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "redirect_uri mismatch",
        );
    }

    if let Some(challenge) = &grant.code_challenge {
        let Some(verifier) = form.get("code_verifier") else {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "code_verifier is required",
            );
        };
        if grant.code_challenge_method.as_deref() == Some("S256") {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
            if computed != *challenge {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "PKCE verification failed",
                );
            }
        }
    }

    issue_tokens(state, client_id, &grant.scope, grant.resource.as_deref())
}

fn refresh_token_grant(
    state: &Shared,
    client_id: &str,
    form: &BTreeMap<String, String>,
) -> Response {
    let Some(token) = form.get("refresh_token") else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "refresh_token is required",
        );
    };

    let grant = {
        let mut inner = state.inner.lock();
        let grant = inner.refresh.get(token).cloned();
        if grant.is_some() && state.config.rotate_refresh_tokens {
            // The used token is spent the moment it is accepted.
            inner.refresh.remove(token);
        }
        grant
    };
    let Some(grant) = grant else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "unknown or already-rotated refresh token",
        );
    };
    if grant.client_id != client_id {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "refresh token client mismatch",
        );
    }

    issue_tokens(state, client_id, &grant.scope, grant.resource.as_deref())
}

fn issue_tokens(state: &Shared, client_id: &str, scope: &str, resource: Option<&str>) -> Response {
    let access_token = fresh_token("at");
    state.tokens.lock().insert(
        access_token.clone(),
        TokenGrant {
            scope: scope.to_string(),
            resource: resource.map(str::to_string),
            revoked: false,
        },
    );

    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": state.config.access_token_ttl_secs,
        "scope": scope,
    });

    if state.config.grant_types.iter().any(|g| g == "refresh_token") {
        let refresh_token = fresh_token("rt");
        state.inner.lock().refresh.insert(
            refresh_token.clone(),
            RefreshGrant {
                client_id: client_id.to_string(),
                scope: scope.to_string(),
                resource: resource.map(str::to_string),
            },
        );
        body["refresh_token"] = Value::String(refresh_token);
    }

    (StatusCode::OK, Json(body)).into_response()
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

fn error_redirect(redirect_uri: &str, params: &BTreeMap<String, String>, error: &str) -> Response {
    let mut location = format!("{redirect_uri}{}error={error}", query_joiner(redirect_uri));
    if let Some(state_param) = params.get("state") {
        location.push_str("&state=");
        location.push_str(&urlencode(state_param));
    }
    redirect(&location)
}

fn redirect(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

fn query_joiner(url: &str) -> &'static str {
    if url.contains('?') { "&" } else { "?" }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

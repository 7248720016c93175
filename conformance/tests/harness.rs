//! Observing client against the fake servers, over real loopback sockets.
//!
//! Walks the full non-interactive portion of the authorization handshake
//! (challenge, protected-resource metadata, AS metadata, registration, code
//! grant, authenticated retry), exercising both harness servers and the
//! observation pipeline end to end. The interactive consent step is driven
//! here by the test itself (the fake AS auto-approves and the test follows
//! the 302 by hand), not by a human.

use mcp_conformance::driver::{AuthFlowDriver, Pkce};
use mcp_conformance::harness::{
    AuthServerConfig, FakeAuthServer, FakeMcpServer, McpServerConfig,
};
use mcp_conformance::observe::ObservingClient;
use mcp_conformance::RunContext;
use mcp_conformance_core::RequestKind;
use serde_json::Value;
use url::Url;

async fn harness_pair(auth_cfg: AuthServerConfig) -> (FakeAuthServer, FakeMcpServer) {
    let auth = FakeAuthServer::start(auth_cfg).await.unwrap();
    let mcp = FakeMcpServer::start(McpServerConfig {
        authorization_servers: vec![auth.issuer()],
        tokens: auth.tokens(),
        required_scope: None,
        challenge_scope: None,
        reject_token_once: false,
    })
    .await
    .unwrap();
    (auth, mcp)
}

/// Pull the authorization code out of the auto-approve 302.
fn code_from_redirect(location: &str) -> String {
    let url = Url::parse(location).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn full_code_flow_against_the_fakes() {
    let (mut auth, mut mcp) = harness_pair(AuthServerConfig::default()).await;
    let client = ObservingClient::new();
    let ctx = RunContext::default();
    let driver = AuthFlowDriver::new(&client, &ctx);
    let mcp_url = Url::parse(&mcp.mcp_url()).unwrap();

    // Unauthenticated probe: 401 plus a parseable Bearer challenge.
    let probe = driver.initial_request(&mcp_url).await.unwrap();
    assert_eq!(probe.status, 401);
    let challenge = probe.challenge.clone().unwrap();
    assert!(challenge.scheme.eq_ignore_ascii_case("bearer"));
    assert!(challenge.param("resource_metadata").is_some());

    // Discovery.
    let prm = driver.fetch_prm(&mcp_url, Some(&challenge)).await.unwrap();
    let issuer = prm["authorization_servers"][0].as_str().unwrap();
    assert_eq!(issuer, auth.issuer());

    let issuer_url = Url::parse(issuer).unwrap();
    let resolved = driver.resolve_as_metadata(&issuer_url).await.unwrap();
    let metadata = &resolved.document;
    assert_eq!(metadata["issuer"].as_str().unwrap(), issuer);

    // Registration.
    let redirect_uri = "http://127.0.0.1:1/callback";
    let registered = driver.register_client(metadata, redirect_uri).await.unwrap();
    let client_id = registered["client_id"].as_str().unwrap().to_string();
    assert!(client_id.starts_with("client-"));

    // Authorization: the fake AS auto-approves, so follow the 302 by hand.
    let pkce = Pkce::generate();
    let mut authorize = Url::parse(metadata["authorization_endpoint"].as_str().unwrap()).unwrap();
    authorize
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", "st-1")
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256");
    let approval = client.get(authorize.as_str()).await.unwrap();
    assert_eq!(approval.status, 302);
    let location = approval.headers.get("location").unwrap();
    let code = code_from_redirect(location);

    // Token exchange and authenticated retry.
    let tokens = driver
        .exchange_code(metadata, &client_id, &code, redirect_uri, &pkce, None)
        .await
        .unwrap();
    let access_token = tokens["access_token"].as_str().unwrap();
    assert!(tokens.get("refresh_token").is_some());

    let authed = driver.authenticated_request(&mcp_url, access_token).await.unwrap();
    assert_eq!(authed.status, 200);
    let body = authed.json().unwrap();
    assert_eq!(body["jsonrpc"], "2.0");

    // The observation log classified every hop of the walk.
    let kinds: Vec<RequestKind> = client.observed().iter().map(|r| r.kind).collect();
    for expected in [
        RequestKind::ProtocolRequest,
        RequestKind::PrmDiscovery,
        RequestKind::AsMetadata,
        RequestKind::DcrRegistration,
        RequestKind::Authorization,
        RequestKind::TokenRequest,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }

    // The bearer token never appears verbatim in the log.
    for record in client.observed() {
        if let Some(value) = record.request_headers.get("authorization") {
            assert!(!value.contains(access_token));
        }
    }

    mcp.stop().await;
    auth.stop().await;
}

#[tokio::test]
async fn wrong_pkce_verifier_is_rejected() {
    let (mut auth, mut mcp) = harness_pair(AuthServerConfig::default()).await;
    let client = ObservingClient::new();
    let ctx = RunContext::default();
    let driver = AuthFlowDriver::new(&client, &ctx);
    let mcp_url = Url::parse(&mcp.mcp_url()).unwrap();

    let challenge = driver.initial_request(&mcp_url).await.unwrap().challenge.unwrap();
    let prm = driver.fetch_prm(&mcp_url, Some(&challenge)).await.unwrap();
    let issuer_url = Url::parse(prm["authorization_servers"][0].as_str().unwrap()).unwrap();
    let metadata = driver.resolve_as_metadata(&issuer_url).await.unwrap().document;

    let redirect_uri = "http://127.0.0.1:1/callback";
    let registered = driver.register_client(&metadata, redirect_uri).await.unwrap();
    let client_id = registered["client_id"].as_str().unwrap();

    let pkce = Pkce::generate();
    let mut authorize = Url::parse(metadata["authorization_endpoint"].as_str().unwrap()).unwrap();
    authorize
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", "st-2")
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256");
    let approval = client.get(authorize.as_str()).await.unwrap();
    let code = code_from_redirect(approval.headers.get("location").unwrap());

    // Exchange with a verifier that does not hash to the stored challenge.
    let wrong = Pkce::generate();
    let err = driver
        .exchange_code(&metadata, client_id, &code, redirect_uri, &wrong, None)
        .await;
    assert!(err.is_err());

    mcp.stop().await;
    auth.stop().await;
}

#[tokio::test]
async fn preregistered_confidential_client_uses_basic_auth_and_survives_revocation() {
    let (mut auth, mut mcp) = harness_pair(AuthServerConfig::default()).await;
    auth.preregister("client-fixed", Some("s3cret"), "client_secret_basic");

    let client = ObservingClient::new();
    let redirect_uri = "http://127.0.0.1:1/callback";
    let pkce = Pkce::generate();

    let mut authorize = Url::parse(&format!("{}/authorize", auth.base_url())).unwrap();
    authorize
        .query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", "client-fixed")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", "st-3")
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256");
    let approval = client.get(authorize.as_str()).await.unwrap();
    let code = code_from_redirect(approval.headers.get("location").unwrap());

    let exchanged = client
        .post_form(
            &format!("{}/token", auth.base_url()),
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", &pkce.verifier),
            ],
            Some(("client-fixed", "s3cret")),
        )
        .await
        .unwrap();
    assert_eq!(exchanged.status, 200);
    let tokens = exchanged.json().unwrap();
    let access_token = tokens["access_token"].as_str().unwrap().to_string();

    let ping = serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
    let accepted = client
        .post_json(&mcp.mcp_url(), &ping, Some(&access_token))
        .await
        .unwrap();
    assert_eq!(accepted.status, 200);

    // Revocation turns the same token into a 401 invalid_token challenge.
    auth.revoke_access_tokens();
    let denied = client
        .post_json(&mcp.mcp_url(), &ping, Some(&access_token))
        .await
        .unwrap();
    assert_eq!(denied.status, 401);
    assert_eq!(
        denied.challenge.unwrap().param("error"),
        Some("invalid_token")
    );

    mcp.stop().await;
    auth.stop().await;
}

#[tokio::test]
async fn path_issuer_serves_metadata_only_at_the_insert_url() {
    let mut auth = FakeAuthServer::start(AuthServerConfig {
        issuer_path: "/tenant".to_string(),
        serve_oidc_insert: false,
        serve_oidc_append: false,
        ..AuthServerConfig::default()
    })
    .await
    .unwrap();

    let client = ObservingClient::new();
    let insert = format!(
        "{}/.well-known/oauth-authorization-server/tenant",
        auth.base_url()
    );
    let hit = client.get(&insert).await.unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(
        hit.json().unwrap()["issuer"].as_str().unwrap(),
        auth.issuer()
    );

    let append = format!("{}/tenant/.well-known/openid-configuration", auth.base_url());
    let miss = client.get(&append).await.unwrap();
    assert_eq!(miss.status, 404);

    // Even the 404 probe is on the inbound log for ordering assertions.
    assert!(auth
        .inbound()
        .iter()
        .any(|r| r.path.contains("openid-configuration") && r.response_status == 404));

    auth.stop().await;
}

#[tokio::test]
async fn insufficient_scope_answers_403_with_step_up_challenge() {
    let mut auth = FakeAuthServer::start(AuthServerConfig::default()).await.unwrap();
    let mut mcp = FakeMcpServer::start(McpServerConfig {
        authorization_servers: vec![auth.issuer()],
        tokens: auth.tokens(),
        required_scope: Some("mcp:write".to_string()),
        challenge_scope: Some("mcp:read".to_string()),
        reject_token_once: false,
    })
    .await
    .unwrap();

    // Mint an under-scoped token directly in the store.
    auth.tokens().lock().insert(
        "at-test-underscoped".to_string(),
        mcp_conformance::harness::TokenGrant {
            scope: "mcp:read".to_string(),
            resource: None,
            revoked: false,
        },
    );

    let client = ObservingClient::new();
    let response = client
        .post_json(
            &mcp.mcp_url(),
            &serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }),
            Some("at-test-underscoped"),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 403);
    let challenge = response.challenge.unwrap();
    assert_eq!(challenge.param("error"), Some("insufficient_scope"));
    assert_eq!(challenge.param("scope"), Some("mcp:write"));

    mcp.stop().await;
    auth.stop().await;
}

#[tokio::test]
async fn resolver_walks_the_fallback_order_against_a_live_as() {
    // Only the OIDC path-append document exists; the resolver must try and
    // reject the two insert forms first, then land on the append form.
    let mut auth = FakeAuthServer::start(AuthServerConfig {
        issuer_path: "/tenant".to_string(),
        serve_rfc8414: false,
        serve_oidc_insert: false,
        ..AuthServerConfig::default()
    })
    .await
    .unwrap();

    let client = ObservingClient::new();
    let ctx = RunContext::default();
    let driver = AuthFlowDriver::new(&client, &ctx);
    let issuer = Url::parse(&auth.issuer()).unwrap();
    let resolved = driver.resolve_as_metadata(&issuer).await.unwrap();
    assert!(resolved
        .attempt
        .url
        .ends_with("/tenant/.well-known/openid-configuration"));

    let probed: Vec<String> = auth
        .inbound()
        .iter()
        .filter(|r| r.path.contains("/.well-known/"))
        .map(|r| r.path.clone())
        .collect();
    assert_eq!(
        probed,
        [
            "/.well-known/oauth-authorization-server/tenant",
            "/.well-known/openid-configuration/tenant",
            "/tenant/.well-known/openid-configuration",
        ]
    );

    auth.stop().await;
}

#[tokio::test]
async fn observed_value_of_json_bodies_survives_buffering() {
    let (mut auth, mut mcp) = harness_pair(AuthServerConfig::default()).await;
    let client = ObservingClient::new();

    // One response read, two consumers: the returned body and the log entry.
    let response = client
        .get(&format!(
            "{}/.well-known/oauth-protected-resource",
            mcp.base_url()
        ))
        .await
        .unwrap();
    let direct: Value = response.json().unwrap();
    assert_eq!(direct["resource"].as_str().unwrap(), mcp.mcp_url());

    let observed = client.observed();
    let logged = observed.last().unwrap();
    assert_eq!(logged.response_status, 200);
    match &logged.response_body {
        mcp_conformance_core::BodySnapshot::Json(value) => {
            assert_eq!(value["resource"], direct["resource"]);
        }
        other => panic!("expected a JSON snapshot, got {other:?}"),
    }

    mcp.stop().await;
    auth.stop().await;
}

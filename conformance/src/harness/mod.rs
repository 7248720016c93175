//! Ephemeral harness servers.
//!
//! Client-side scenarios provision a fake authorization server and a fake
//! protected MCP server on loopback ports, point the client IUT at them, and
//! judge the IUT by the traffic the fakes receive. Everything binds
//! `127.0.0.1:0` and shuts down through a oneshot so `stop()` is
//! deterministic and idempotent.

mod auth_server;
mod mcp_server;

pub use auth_server::{AuthServerConfig, FakeAuthServer, TokenGrant, TokenStore};
pub use mcp_server::{FakeMcpServer, McpServerConfig};

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::scenario::SetupError;

/// One request a harness server received from the implementation under
/// test. This is the evidence stream client-side assertions read.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    /// Decoded form fields when the body was `x-www-form-urlencoded`.
    pub form: BTreeMap<String, String>,
    /// Parsed body when it was JSON.
    pub body_json: Option<serde_json::Value>,
    /// Status the harness answered with.
    pub response_status: u16,
}

impl InboundRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .get(key)
            .or_else(|| self.form.get(key))
            .map(String::as_str)
    }
}

/// Shared log of everything a harness server received, including requests
/// that matched no route. Fallback probing order is itself under test, so
/// 404s are evidence too.
pub type InboundLog = Arc<Mutex<Vec<InboundRequest>>>;

pub fn new_inbound_log() -> InboundLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Recording layer applied to every harness router: buffers the body once,
/// records the request, then hands a rebuilt request to the real handler.
pub(crate) async fn record_inbound(
    State(log): State<InboundLog>,
    req: Request,
    next: Next,
) -> Response {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, 1 << 20)
        .await
        .unwrap_or_default();

    let mut headers = BTreeMap::new();
    for (name, value) in &parts.headers {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }

    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(&bytes).into_owned().collect()
    } else {
        BTreeMap::new()
    };
    let body_json = if content_type.starts_with("application/json") {
        serde_json::from_slice(&bytes).ok()
    } else {
        None
    };

    let index = {
        let mut log = log.lock();
        log.push(InboundRequest {
            timestamp: Utc::now(),
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            query,
            headers,
            form,
            body_json,
            response_status: 0,
        });
        log.len() - 1
    };

    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;
    log.lock()[index].response_status = response.status().as_u16();
    response
}

/// A running harness server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Bind a loopback listener and serve the router until `stop()`.
    pub async fn spawn(router: Router) -> Result<Self, SetupError> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(SetupError::Bind)?;
        let addr = listener.local_addr().map_err(SetupError::Bind)?;
        Ok(Self::spawn_on(listener, addr, router))
    }

    /// Serve a router on an already bound listener. Useful when the bound
    /// address must be baked into the router's own state.
    pub fn spawn_on(
        listener: tokio::net::TcpListener,
        addr: SocketAddr,
        router: Router,
    ) -> Self {
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(err) = server.await {
                tracing::warn!(error = %err, "harness server exited with error");
            }
        });
        Self {
            addr,
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Idempotent teardown: trigger graceful shutdown and await the serve
    /// task so the port is actually released before the next scenario.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub(crate) fn bind_for_state() -> impl std::future::Future<
    Output = Result<(tokio::net::TcpListener, SocketAddr), SetupError>,
> {
    async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(SetupError::Bind)?;
        let addr = listener.local_addr().map_err(SetupError::Bind)?;
        Ok((listener, addr))
    }
}

/// Random opaque token material for codes, tokens and client ids.
pub(crate) fn fresh_token(prefix: &str) -> String {
    format!("{prefix}-{:032x}", rand::random::<u128>())
}

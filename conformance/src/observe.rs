//! Outbound HTTP observation.
//!
//! Every call the conformance-side client makes goes through
//! [`ObservingClient`], which buffers the response body bytes once and hands
//! independent views to the observer and the real caller. Assertion logic
//! never touches reqwest types; it reads the structured
//! [`ObservedRequest`] stream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mcp_conformance_core::{classify_request, AuthChallenge, BodySnapshot, ObservedRequest};
use parking_lot::Mutex;

/// Shared, append-only log of observed request/response pairs. One log per
/// scenario invocation; discarded after checks are derived.
pub type ObservationLog = Arc<Mutex<Vec<ObservedRequest>>>;

/// A buffered response. The body was read exactly once off the wire; both
/// the observer and the caller work from this snapshot.
#[derive(Debug, Clone)]
pub struct ObservedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub challenge: Option<AuthChallenge>,
}

impl ObservedResponse {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

}

/// HTTP client wrapper recording every round trip.
#[derive(Clone)]
pub struct ObservingClient {
    inner: reqwest::Client,
    log: ObservationLog,
}

impl ObservingClient {
    pub fn new() -> Self {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_log(log: ObservationLog) -> Self {
        let inner = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { inner, log }
    }

    pub fn log(&self) -> ObservationLog {
        self.log.clone()
    }

    /// Snapshot of everything observed so far.
    pub fn observed(&self) -> Vec<ObservedRequest> {
        self.log.lock().clone()
    }

    pub async fn get(&self, url: &str) -> Result<ObservedResponse, reqwest::Error> {
        self.send(self.inner.get(url), "GET", url).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<ObservedResponse, reqwest::Error> {
        let mut req = self.inner.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        self.send(req, "POST", url).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        basic: Option<(&str, &str)>,
    ) -> Result<ObservedResponse, reqwest::Error> {
        let mut req = self.inner.post(url).form(form);
        if let Some((user, pass)) = basic {
            req = req.basic_auth(user, Some(pass));
        }
        self.send(req, "POST", url).await
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        method: &str,
        url: &str,
    ) -> Result<ObservedResponse, reqwest::Error> {
        let built = req.build()?;
        let request_headers = sanitize_headers(built.headers());

        let response = self.inner.execute(built).await?;
        let status = response.status().as_u16();
        let mut response_headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                response_headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        // Buffer once; every later reader gets an independent view.
        let body = response.bytes().await?.to_vec();

        let challenge = response_headers
            .get("www-authenticate")
            .and_then(|h| AuthChallenge::parse(h));

        let kind = classify_request(method, url);
        tracing::debug!(%method, %url, status, ?kind, "observed request");

        self.log.lock().push(ObservedRequest {
            timestamp: Utc::now(),
            method: method.to_string(),
            url: url.to_string(),
            request_headers,
            response_status: status,
            response_headers: response_headers.clone(),
            response_body: BodySnapshot::from_bytes(&body),
            challenge: challenge.clone(),
            kind,
        });

        Ok(ObservedResponse {
            status,
            headers: response_headers,
            body,
            challenge,
        })
    }
}

impl Default for ObservingClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot request headers with credentials redacted: the log is evidence
/// for check details and may end up in persisted reports.
fn sanitize_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str().to_ascii_lowercase();
        let value = if name == "authorization" || name == "proxy-authorization" {
            match value.to_str().ok().and_then(|v| v.split_whitespace().next()) {
                Some(scheme) => format!("{scheme} [redacted]"),
                None => "[redacted]".to_string(),
            }
        } else {
            value.to_str().unwrap_or("[non-ascii]").to_string()
        };
        out.insert(name, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

    #[test]
    fn authorization_header_is_redacted_but_scheme_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret-token"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized["authorization"], "Bearer [redacted]");
        assert_eq!(sanitized["content-type"], "application/json");
    }
}

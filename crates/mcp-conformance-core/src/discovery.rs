//! Authorization-server metadata discovery.
//!
//! Two discovery conventions compete in the wild: RFC 8414 always inserts
//! the well-known suffix between the origin and the issuer path, while OIDC
//! discovery historically appended it after the path. Interoperating with
//! both means probing a fixed, ordered list of candidate URLs and taking the
//! first that answers 200 with a JSON object. The order and the exact URL
//! strings are normative; correctness here is string equality, not "close
//! enough".

use serde_json::Value;
use std::future::Future;
use url::Url;

/// Which discovery convention produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFamily {
    /// RFC 8414 `oauth-authorization-server`.
    OauthAuthorizationServer,
    /// OIDC `openid-configuration`.
    OpenidConfiguration,
}

impl DiscoveryFamily {
    fn suffix(self) -> &'static str {
        match self {
            Self::OauthAuthorizationServer => "oauth-authorization-server",
            Self::OpenidConfiguration => "openid-configuration",
        }
    }
}

/// How the issuer path was combined with the well-known suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryVariant {
    /// Issuer has no path component.
    Root,
    /// Suffix inserted before the issuer path.
    PathInsert,
    /// Suffix appended after the issuer path.
    PathAppend,
}

/// One candidate metadata URL, tried in sequence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAttempt {
    pub url: String,
    pub family: DiscoveryFamily,
    pub variant: DiscoveryVariant,
}

/// Build the ordered candidate list for an issuer URL.
///
/// Root-path issuers get exactly two attempts (RFC 8414 then OIDC, both at
/// the root). Issuers with a path `P` get exactly three: RFC 8414
/// path-insert (P verbatim, trailing slash preserved), OIDC path-insert,
/// then OIDC path-append (trailing slash stripped so no double slash is
/// produced).
pub fn discovery_attempts(issuer: &Url) -> Vec<DiscoveryAttempt> {
    let origin = issuer.origin().ascii_serialization();
    let path = issuer.path();

    if path.is_empty() || path == "/" {
        return vec![
            DiscoveryAttempt {
                url: format!(
                    "{origin}/.well-known/{}",
                    DiscoveryFamily::OauthAuthorizationServer.suffix()
                ),
                family: DiscoveryFamily::OauthAuthorizationServer,
                variant: DiscoveryVariant::Root,
            },
            DiscoveryAttempt {
                url: format!(
                    "{origin}/.well-known/{}",
                    DiscoveryFamily::OpenidConfiguration.suffix()
                ),
                family: DiscoveryFamily::OpenidConfiguration,
                variant: DiscoveryVariant::Root,
            },
        ];
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    vec![
        DiscoveryAttempt {
            url: format!(
                "{origin}/.well-known/{}{path}",
                DiscoveryFamily::OauthAuthorizationServer.suffix()
            ),
            family: DiscoveryFamily::OauthAuthorizationServer,
            variant: DiscoveryVariant::PathInsert,
        },
        DiscoveryAttempt {
            url: format!(
                "{origin}/.well-known/{}{path}",
                DiscoveryFamily::OpenidConfiguration.suffix()
            ),
            family: DiscoveryFamily::OpenidConfiguration,
            variant: DiscoveryVariant::PathInsert,
        },
        DiscoveryAttempt {
            url: format!(
                "{origin}{trimmed}/.well-known/{}",
                DiscoveryFamily::OpenidConfiguration.suffix()
            ),
            family: DiscoveryFamily::OpenidConfiguration,
            variant: DiscoveryVariant::PathAppend,
        },
    ]
}

/// What a fetch of one candidate URL produced.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: Value,
}

/// A successfully resolved metadata document.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    pub attempt: DiscoveryAttempt,
    pub document: Value,
}

/// All candidate URLs were exhausted without a usable document.
///
/// Individual attempt defects (network error, non-200 status, unparsable or
/// non-object body) are swallowed during resolution; only full exhaustion is
/// reported, with the complete attempted list attached for diagnosis.
#[derive(Debug, Clone, thiserror::Error)]
#[error("authorization server metadata discovery exhausted {} candidate(s): {}", attempted.len(), attempted.join(", "))]
pub struct DiscoveryExhausted {
    pub attempted: Vec<String>,
}

/// Walk the candidate list in order with an injected fetch, returning the
/// first attempt that yields HTTP 200 with a JSON-object body.
pub async fn resolve_metadata<F, Fut, E>(
    issuer: &Url,
    mut fetch: F,
) -> Result<ResolvedMetadata, DiscoveryExhausted>
where
    F: FnMut(DiscoveryAttempt) -> Fut,
    Fut: Future<Output = Result<FetchOutcome, E>>,
{
    let attempts = discovery_attempts(issuer);
    let attempted: Vec<String> = attempts.iter().map(|a| a.url.clone()).collect();

    for attempt in attempts {
        let outcome = match fetch(attempt.clone()).await {
            Ok(outcome) => outcome,
            Err(_) => continue,
        };
        if outcome.status != 200 || !outcome.body.is_object() {
            continue;
        }
        return Ok(ResolvedMetadata {
            attempt,
            document: outcome.body,
        });
    }

    Err(DiscoveryExhausted { attempted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn urls(issuer: &str) -> Vec<String> {
        discovery_attempts(&Url::parse(issuer).unwrap())
            .into_iter()
            .map(|a| a.url)
            .collect()
    }

    #[test]
    fn root_issuer_gets_two_attempts_in_fixed_order() {
        assert_eq!(
            urls("https://as.example"),
            vec![
                "https://as.example/.well-known/oauth-authorization-server",
                "https://as.example/.well-known/openid-configuration",
            ]
        );
        // A bare trailing slash is still the root.
        assert_eq!(urls("https://as.example/"), urls("https://as.example"));
    }

    #[test]
    fn path_issuer_gets_three_attempts_in_fixed_order() {
        assert_eq!(
            urls("https://as.example/tenant"),
            vec![
                "https://as.example/.well-known/oauth-authorization-server/tenant",
                "https://as.example/.well-known/openid-configuration/tenant",
                "https://as.example/tenant/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn trailing_slash_preserved_on_insert_stripped_on_append() {
        assert_eq!(
            urls("https://as.example/tenant/"),
            vec![
                "https://as.example/.well-known/oauth-authorization-server/tenant/",
                "https://as.example/.well-known/openid-configuration/tenant/",
                "https://as.example/tenant/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn nested_paths_and_ports_survive() {
        assert_eq!(
            urls("http://127.0.0.1:9229/a/b"),
            vec![
                "http://127.0.0.1:9229/.well-known/oauth-authorization-server/a/b",
                "http://127.0.0.1:9229/.well-known/openid-configuration/a/b",
                "http://127.0.0.1:9229/a/b/.well-known/openid-configuration",
            ]
        );
    }

    #[test]
    fn families_and_variants_are_tagged() {
        let attempts = discovery_attempts(&Url::parse("https://as.example/t").unwrap());
        assert_eq!(attempts[0].family, DiscoveryFamily::OauthAuthorizationServer);
        assert_eq!(attempts[0].variant, DiscoveryVariant::PathInsert);
        assert_eq!(attempts[1].family, DiscoveryFamily::OpenidConfiguration);
        assert_eq!(attempts[1].variant, DiscoveryVariant::PathInsert);
        assert_eq!(attempts[2].variant, DiscoveryVariant::PathAppend);
    }

    #[tokio::test]
    async fn resolver_skips_defective_attempts() {
        let issuer = Url::parse("https://as.example/tenant").unwrap();
        let resolved = resolve_metadata(&issuer, |attempt| async move {
            match attempt.variant {
                // Network error on the first, non-object on the second.
                DiscoveryVariant::PathInsert
                    if attempt.family == DiscoveryFamily::OauthAuthorizationServer =>
                {
                    Err::<FetchOutcome, std::io::Error>(std::io::Error::other("refused"))
                }
                DiscoveryVariant::PathInsert => Ok(FetchOutcome {
                    status: 200,
                    body: json!([1, 2, 3]),
                }),
                _ => Ok(FetchOutcome {
                    status: 200,
                    body: json!({"issuer": "https://as.example/tenant"}),
                }),
            }
        })
        .await
        .unwrap();

        assert_eq!(resolved.attempt.variant, DiscoveryVariant::PathAppend);
        assert_eq!(resolved.document["issuer"], "https://as.example/tenant");
    }

    #[tokio::test]
    async fn resolver_reports_full_attempt_list_on_exhaustion() {
        let issuer = Url::parse("https://as.example/tenant").unwrap();
        let err = resolve_metadata(&issuer, |_| async {
            Ok::<_, std::io::Error>(FetchOutcome {
                status: 404,
                body: serde_json::Value::Null,
            })
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempted.len(), 3);
        assert!(err.to_string().contains("/.well-known/openid-configuration"));
    }

    #[tokio::test]
    async fn non_200_json_object_is_not_accepted() {
        let issuer = Url::parse("https://as.example").unwrap();
        let err = resolve_metadata(&issuer, |_| async {
            Ok::<_, std::io::Error>(FetchOutcome {
                status: 401,
                body: json!({"error": "unauthorized"}),
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempted.len(), 2);
    }
}

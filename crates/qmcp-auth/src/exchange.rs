// SPDX-License-Identifier: MIT OR Apache-2.0
//! The ordered credential probe chain.
//!
//! Probes run in a fixed order; each either yields a result, skips, or
//! fails.  The first hit wins.  A probe failure aborts the chain only in
//! strict mode — otherwise the chain falls through to the next probe.
//! Deliberately a pipeline, not nested try/catch: wrapping the whole chain
//! in one handler is how the ambient fallback silently disappears.

use crate::cache::{CacheKey, CredentialCache};
use crate::token_hash;
use qmcp_core::{AwsCredentialBundle, JwtClaims};
use qmcp_error::{ErrorKind, QmcpError};
use std::time::Duration;
use tracing::debug;

/// How the data plane should obtain AWS credentials for this request.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// Explicit short-lived keys from the JWT or the catalog exchange.
    Bundle(AwsCredentialBundle),
    /// The ambient chain: environment, container role, instance profile.
    Ambient,
}

// ---------------------------------------------------------------------------
// Catalog exchange client
// ---------------------------------------------------------------------------

/// Client for the catalog's `/api/auth/get_credentials` endpoint.
#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    catalog_url: String,
}

impl ExchangeClient {
    /// Build an exchange client over a shared HTTP pool.
    pub fn new(http: reqwest::Client, catalog_url: impl Into<String>) -> Self {
        Self {
            http,
            catalog_url: catalog_url.into(),
        }
    }

    /// The catalog this client exchanges against.
    pub fn catalog_url(&self) -> &str {
        &self.catalog_url
    }

    /// Exchange a bearer token for a short-lived AWS credential bundle.
    pub async fn get_credentials(
        &self,
        bearer: &str,
    ) -> Result<AwsCredentialBundle, QmcpError> {
        let url = format!(
            "{}/api/auth/get_credentials",
            self.catalog_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::UpstreamUnavailable
                };
                QmcpError::new(kind, "catalog credential exchange is unreachable").with_source(e)
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(
                QmcpError::auth_invalid("catalog refused the bearer token")
                    .with_context("status", status.as_u16()),
            );
        }
        if !status.is_success() {
            return Err(QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                format!("credential exchange returned {status}"),
            )
            .with_context("status", status.as_u16()));
        }

        response.json::<AwsCredentialBundle>().await.map_err(|e| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                "credential exchange returned an unparseable bundle",
            )
            .with_source(e)
        })
    }
}

// ---------------------------------------------------------------------------
// The chain
// ---------------------------------------------------------------------------

/// Resolve AWS credentials for one request.
///
/// Probe order:
/// 1. a bundle embedded in the JWT claims (if still fresh);
/// 2. the catalog exchange, cached per `(catalog, subject, token-hash)`
///    with single-flight refresh;
/// 3. the ambient chain — only when `require_jwt` is false;
/// 4. otherwise `AUTH_NO_CREDENTIALS`.
pub async fn resolve_credentials(
    claims: Option<&JwtClaims>,
    bearer: Option<&str>,
    exchange: Option<&ExchangeClient>,
    cache: &CredentialCache,
    require_jwt: bool,
) -> Result<CredentialSource, QmcpError> {
    // Probe 1: embedded bundle.
    if let Some(claims) = claims
        && let Some(bundle) = &claims.aws_credentials
    {
        if !bundle.is_expired_within(Duration::from_secs(300)) {
            debug!(subject = %claims.sub, "using credentials embedded in claims");
            return Ok(CredentialSource::Bundle(bundle.clone()));
        }
        debug!(subject = %claims.sub, "embedded credentials are stale; falling through");
    }

    // Probe 2: catalog exchange.
    if let (Some(claims), Some(bearer), Some(exchange)) = (claims, bearer, exchange) {
        let key = CacheKey {
            catalog: exchange.catalog_url().to_string(),
            subject: claims.sub.clone(),
            token_hash: token_hash(bearer),
        };
        let outcome = cache
            .get_or_fetch(key, claims.expires_at(), || {
                exchange.get_credentials(bearer)
            })
            .await;
        match outcome {
            Ok(bundle) => return Ok(CredentialSource::Bundle(bundle)),
            // In strict mode an exchange failure is terminal; otherwise the
            // ambient probe below still gets its turn.
            Err(err) if require_jwt => return Err(err),
            Err(err) => {
                debug!(error = %err, "credential exchange failed; trying ambient chain");
            }
        }
    }

    // Probe 3: ambient chain, unless strict mode forbids it.
    if !require_jwt {
        return Ok(CredentialSource::Ambient);
    }

    // Probe 4: out of options.
    Err(QmcpError::new(
        ErrorKind::AuthNoCredentials,
        "strict mode is enabled and no usable credentials were found",
    )
    .with_fix_hint("send a valid bearer token, or disable --require-jwt"))
}

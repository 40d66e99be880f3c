// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable domain contract for the Quilt MCP broker.
//!
//! Request contexts, JWT claims, credential bundles, the package/manifest
//! model, and the search types shared by every backend.

/// Cooperative cancellation primitives.
pub mod cancel;
/// Success/failure envelopes returned by every tool action.
pub mod envelope;
/// Package references, manifests, and top-hash computation.
pub mod package;
/// Search queries, hits, and bucket-filter normalization.
pub mod search;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use qmcp_config::{BackendKind, DeploymentMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use cancel::CancelToken;

/// MCP protocol revision this server implements.
///
/// Clients must send it in the `mcp-protocol-version` header (HTTP) or the
/// `initialize` params (stdio).
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Server version string embedded in health responses and `initialize`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// JWT claims
// ---------------------------------------------------------------------------

/// Decoded JWT claims attached to a request after validation.
///
/// Catalog-specific scopes (`roles`, `buckets`, `permissions`) default to
/// empty so tokens minted by older catalogs still decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JwtClaims {
    /// Subject — the catalog user id.
    pub sub: String,
    /// Issuer, when the catalog sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience, when the catalog sets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Expiry as a Unix timestamp.  Required; tokens without it are
    /// rejected upstream.
    pub exp: i64,
    /// Role names granted to the subject.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Buckets the subject may see.
    #[serde(default)]
    pub buckets: Vec<String>,
    /// Fine-grained permission strings.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Short-lived AWS credentials embedded by some catalog deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_credentials: Option<AwsCredentialBundle>,
}

impl JwtClaims {
    /// Expiry as a UTC timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

// ---------------------------------------------------------------------------
// AWS credential bundle
// ---------------------------------------------------------------------------

/// Short-lived AWS credentials, in the shape the catalog's
/// `/api/auth/get_credentials` endpoint returns.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct AwsCredentialBundle {
    /// Access key id.
    #[serde(rename = "AccessKeyId")]
    pub access_key_id: String,
    /// Secret access key.
    #[serde(rename = "SecretAccessKey")]
    pub secret_access_key: String,
    /// Session token.
    #[serde(rename = "SessionToken")]
    pub session_token: String,
    /// When the bundle stops working.
    #[serde(rename = "Expiration")]
    pub expiration: DateTime<Utc>,
}

impl AwsCredentialBundle {
    /// Returns `true` once `now + buffer` passes the expiration.
    pub fn is_expired_within(&self, buffer: Duration) -> bool {
        let buffer = ChronoDuration::from_std(buffer).unwrap_or_else(|_| ChronoDuration::zero());
        Utc::now() + buffer >= self.expiration
    }
}

// The secret key and session token stay out of Debug output; contexts get
// logged, credentials never do.
impl std::fmt::Debug for AwsCredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentialBundle")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Per-request context.  Immutable after construction; a context never
/// outlives its request.
///
/// Created by the transport loop, consumed by the auth plane, the backend
/// factory, and tool dispatch, destroyed on response emission.  Credentials
/// and the cancellation token travel here rather than in any ambient state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    deployment: DeploymentMode,
    backend: BackendKind,
    claims: Option<JwtClaims>,
    bearer_token: Option<String>,
    credentials: Option<AwsCredentialBundle>,
    catalog_url: Option<String>,
    registry_url: Option<String>,
    service_timeout: Duration,
    cancel: CancelToken,
}

impl RequestContext {
    /// Start building a context for one request.
    pub fn builder(deployment: DeploymentMode, backend: BackendKind) -> RequestContextBuilder {
        RequestContextBuilder {
            ctx: RequestContext {
                request_id: Uuid::new_v4(),
                deployment,
                backend,
                claims: None,
                bearer_token: None,
                credentials: None,
                catalog_url: None,
                registry_url: None,
                service_timeout: Duration::from_secs(60),
                cancel: CancelToken::new(),
            },
        }
    }

    /// Unique id of the request this context belongs to.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Deployment mode the server resolved at startup.
    pub fn deployment(&self) -> DeploymentMode {
        self.deployment
    }

    /// Backend kind serving this request.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Validated claims, when a bearer token was presented.
    pub fn claims(&self) -> Option<&JwtClaims> {
        self.claims.as_ref()
    }

    /// The raw bearer token, for pass-through calls to the catalog.
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    /// AWS credentials resolved for this request, if any.
    pub fn credentials(&self) -> Option<&AwsCredentialBundle> {
        self.credentials.as_ref()
    }

    /// Catalog GraphQL base URL.
    pub fn catalog_url(&self) -> Option<&str> {
        self.catalog_url.as_deref()
    }

    /// Registry host URL.
    pub fn registry_url(&self) -> Option<&str> {
        self.registry_url.as_deref()
    }

    /// Deadline budget for a single outbound call.
    pub fn service_timeout(&self) -> Duration {
        self.service_timeout
    }

    /// Cancellation token propagated into every data-plane call.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// Builder for [`RequestContext`].  Consumed by `build`; the result is
/// immutable.
pub struct RequestContextBuilder {
    ctx: RequestContext,
}

impl RequestContextBuilder {
    /// Attach validated claims and the raw bearer they came from.
    pub fn claims(mut self, claims: JwtClaims, bearer: impl Into<String>) -> Self {
        self.ctx.claims = Some(claims);
        self.ctx.bearer_token = Some(bearer.into());
        self
    }

    /// Attach resolved AWS credentials.
    pub fn credentials(mut self, bundle: AwsCredentialBundle) -> Self {
        self.ctx.credentials = Some(bundle);
        self
    }

    /// Set the catalog URL.
    pub fn catalog_url(mut self, url: impl Into<String>) -> Self {
        self.ctx.catalog_url = Some(url.into());
        self
    }

    /// Set the registry URL.
    pub fn registry_url(mut self, url: impl Into<String>) -> Self {
        self.ctx.registry_url = Some(url.into());
        self
    }

    /// Set the outbound-call timeout.
    pub fn service_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.service_timeout = timeout;
        self
    }

    /// Share an externally owned cancellation token (e.g. wired to client
    /// disconnect).
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// Finish building.
    pub fn build(self) -> RequestContext {
        self.ctx
    }
}

// ---------------------------------------------------------------------------
// Diagnostics helpers
// ---------------------------------------------------------------------------

/// Redact a JWT for diagnostics: only the first and last four characters
/// survive.  Never log a token any other way.
pub fn redact_token(token: &str) -> String {
    if token.len() <= 8 {
        return "****".to_string();
    }
    format!("{}…{}", &token[..4], &token[token.len() - 4..])
}

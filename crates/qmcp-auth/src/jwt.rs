// SPDX-License-Identifier: MIT OR Apache-2.0
//! HS256 JWT validation with `kid` pinning.
//!
//! Tokens are rejected when malformed, expired, signed with a different key
//! id than the server declares, or failing the configured issuer/audience
//! checks.  Failure diagnostics never contain the full token.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use qmcp_core::{JwtClaims, redact_token};
use qmcp_error::QmcpError;
use tracing::debug;

/// Validates bearer tokens against one shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    expected_kid: Option<String>,
    expected_iss: Option<String>,
    expected_aud: Option<String>,
}

impl JwtVerifier {
    /// Build a verifier over a shared HS256 secret.
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            expected_kid: None,
            expected_iss: None,
            expected_aud: None,
        }
    }

    /// Refuse tokens whose `kid` header differs from `kid`.
    pub fn with_key_id(mut self, kid: impl Into<String>) -> Self {
        self.expected_kid = Some(kid.into());
        self
    }

    /// Require a specific issuer claim.
    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.expected_iss = Some(iss.into());
        self
    }

    /// Require a specific audience claim.
    pub fn with_audience(mut self, aud: impl Into<String>) -> Self {
        self.expected_aud = Some(aud.into());
        self
    }

    /// Validate `token` and return its decoded claims.
    ///
    /// Every rejection maps to `AUTH_INVALID` with a machine-readable
    /// reason in the context.
    pub fn verify(&self, token: &str) -> Result<JwtClaims, QmcpError> {
        let header = decode_header(token).map_err(|e| {
            QmcpError::auth_invalid("bearer token is not a well-formed JWS")
                .with_context("reason", "malformed")
                .with_context("token", redact_token(token))
                .with_source(e)
        })?;

        if let Some(expected) = &self.expected_kid {
            let got = header.kid.as_deref().unwrap_or("");
            if got != expected {
                debug!(kid = %got, "token signed with unexpected key id");
                return Err(QmcpError::auth_invalid(
                    "bearer token was signed with an unexpected key id",
                )
                .with_context("reason", "kid_mismatch")
                .with_context("kid", got));
            }
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        if let Some(iss) = &self.expected_iss {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = &self.expected_aud {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }

        let data = decode::<JwtClaims>(token, &self.key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind as JwtKind;
            let reason = match e.kind() {
                JwtKind::ExpiredSignature => "expired",
                JwtKind::InvalidSignature => "bad_signature",
                JwtKind::InvalidIssuer => "bad_issuer",
                JwtKind::InvalidAudience => "bad_audience",
                _ => "invalid",
            };
            QmcpError::auth_invalid(format!("bearer token rejected: {reason}"))
                .with_context("reason", reason)
                .with_context("token", redact_token(token))
                .with_source(e)
        })?;

        Ok(data.claims)
    }
}

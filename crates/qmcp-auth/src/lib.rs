// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-auth
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The authentication and credential plane: bearer validation, secret
//! sources, exchange of JWT claims for short-lived AWS credentials, and the
//! process-wide single-flight credential cache.

/// Single-flight credential cache keyed by `(catalog, subject, token-hash)`.
pub mod cache;
/// The ordered credential probe chain.
pub mod exchange;
/// HS256 JWT validation with `kid` pinning.
pub mod jwt;
/// Shared-secret resolution from the environment or the parameter store.
pub mod secret;

pub use cache::{CacheKey, CredentialCache};
pub use exchange::{CredentialSource, ExchangeClient, resolve_credentials};
pub use jwt::JwtVerifier;
pub use secret::resolve_secret;

use sha2::{Digest, Sha256};

/// Hex SHA-256 of a bearer token, used as the cache-key component so raw
/// tokens never sit in process-wide state.
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-ops
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The polymorphic [`QuiltOps`] contract and the per-request backend
//! factory.  Every tool module routes through this trait; implementations
//! are flat structs (no inheritance trees) selected at request time from
//! the resolved deployment mode.

/// Admin-protocol operation and result shapes.
pub mod admin;

use async_trait::async_trait;
use qmcp_config::BackendKind;
use qmcp_core::RequestContext;
use qmcp_core::package::{CopyMode, EntryRequest, Manifest, PackageRef, RevisionInfo};
use qmcp_core::search::{SearchHit, SearchQuery};
use qmcp_error::{ErrorKind, QmcpError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use admin::{AdminOp, AdminOutcome};

// ---------------------------------------------------------------------------
// Result records
// ---------------------------------------------------------------------------

/// Result of `auth_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether a validated identity is attached to the request.
    pub logged_in: bool,
    /// Subject of the validated identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Catalog URL in effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// Registry URL in effect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
}

/// Permission level the backend edge reports for a bucket.
///
/// Whatever the active backend reports is the single source of truth; the
/// tool layer never second-guesses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketPermission {
    /// Read-only access.
    Read,
    /// Read and write access.
    ReadWrite,
}

/// A bucket the caller may see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Bucket name.
    pub name: String,
    /// Display title, when the catalog defines one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description, when the catalog defines one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Access level reported by the backend edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<BucketPermission>,
}

/// Pagination input for listing operations.  The continuation token is the
/// restart state of the lazy sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paging {
    /// Opaque continuation token from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    /// Maximum items per page; backends may clamp.
    #[serde(default = "Paging::default_max")]
    pub max: usize,
}

impl Paging {
    fn default_max() -> usize {
        100
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            continuation: None,
            max: Self::default_max(),
        }
    }
}

/// One page of package references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagePage {
    /// The packages on this page.
    pub packages: Vec<PackageRef>,
    /// Continuation token for the next page, when more exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Result of `package_browse`: the resolved revision plus its manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseResult {
    /// The revision hash the reference resolved to.
    pub top_hash: String,
    /// The manifest at that revision.
    pub manifest: Manifest,
}

/// A revision write: the one protocol behind both create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionWrite {
    /// Registry bucket URL.
    pub registry: String,
    /// Package name.
    pub name: String,
    /// Requested entries.
    pub entries: Vec<EntryRequest>,
    /// User metadata blob.
    #[serde(default)]
    pub metadata: Value,
    /// Copy-mode governing physical object placement.
    #[serde(default)]
    pub copy_mode: CopyMode,
    /// Commit message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Prior revision to update from; `None` for a fresh create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_top_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// QuiltOps
// ---------------------------------------------------------------------------

/// The capability set both backends implement.
///
/// Result discipline: every operation returns a structured success value or
/// a [`QmcpError`]; nothing panics across this interface.  Programming
/// errors are caught at the dispatch boundary and converted to `INTERNAL`.
#[async_trait]
pub trait QuiltOps: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> BackendKind;

    /// Report the caller's authentication posture.
    async fn auth_status(&self, ctx: &RequestContext) -> Result<AuthStatus, QmcpError>;

    /// Buckets the caller may see.
    async fn bucket_list(&self, ctx: &RequestContext) -> Result<Vec<Bucket>, QmcpError>;

    /// One page of packages in a registry.  An empty registry yields an
    /// empty page, not an error.
    async fn package_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        filter: Option<&str>,
        paging: Paging,
    ) -> Result<PackagePage, QmcpError>;

    /// Resolve a package reference (tag or latest) and return its manifest.
    async fn package_browse(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<BrowseResult, QmcpError>;

    /// Revisions of a package, newest first.
    async fn package_versions_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        limit: usize,
        with_tags: bool,
    ) -> Result<Vec<RevisionInfo>, QmcpError>;

    /// The manifest at a specific revision (or latest).
    async fn package_manifest(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<Manifest, QmcpError>;

    /// Write a fresh revision.  Returns the top-hash.  Idempotent: the
    /// same entries, metadata, and copy mode produce the same hash, and
    /// recommitting an existing hash is a no-op.
    async fn package_create_revision(
        &self,
        ctx: &RequestContext,
        write: RevisionWrite,
    ) -> Result<String, QmcpError>;

    /// Write a revision on top of a prior one (update-replace semantics:
    /// entries supplied for an existing logical path shadow the old
    /// physical reference; history stays reachable by content address).
    async fn package_update_revision(
        &self,
        ctx: &RequestContext,
        write: RevisionWrite,
    ) -> Result<String, QmcpError>;

    /// Delete a specific revision, or — when `top_hash` is omitted — the
    /// package's tag-map entry (its "latest" pointer).  Revisions stay
    /// reachable by hash in the latter case.
    async fn package_delete(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<(), QmcpError>;

    /// The tag → top-hash map for a package.
    async fn tag_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, QmcpError>;

    /// Point a tag at a revision.
    async fn tag_add(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        tag: &str,
        top_hash: &str,
    ) -> Result<(), QmcpError>;

    /// Remove a tag.
    async fn tag_delete(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        tag: &str,
    ) -> Result<(), QmcpError>;

    /// Backend-native package search, consumed by the unified search layer.
    async fn search_packages(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError>;

    /// Admin protocol (users/roles/policies/SSO).  Only the graphql
    /// backend supports it; the direct backend answers
    /// `UPSTREAM_UNAVAILABLE`.
    async fn admin(
        &self,
        ctx: &RequestContext,
        op: AdminOp,
    ) -> Result<AdminOutcome, QmcpError>;
}

/// The standard refusal for capabilities a backend does not carry.
pub fn unsupported(kind: BackendKind, capability: &str) -> QmcpError {
    QmcpError::new(
        ErrorKind::UpstreamUnavailable,
        format!("the {kind} backend does not support {capability}"),
    )
    .with_fix_hint("switch to the graphql backend (--backend graphql)")
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds the per-request backend for a resolved [`BackendKind`].
type BackendBuilder = Arc<dyn Fn(&RequestContext) -> Arc<dyn QuiltOps> + Send + Sync>;

/// Per-request backend factory.  Populated once at startup, immutable
/// afterwards.
#[derive(Clone, Default)]
pub struct BackendFactory {
    builders: BTreeMap<&'static str, BackendBuilder>,
}

impl BackendFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the builder for a backend kind.  Last registration wins.
    pub fn register<F>(&mut self, kind: BackendKind, builder: F)
    where
        F: Fn(&RequestContext) -> Arc<dyn QuiltOps> + Send + Sync + 'static,
    {
        self.builders.insert(kind_key(kind), Arc::new(builder));
    }

    /// Build the backend serving `ctx`, per its resolved backend kind.
    pub fn build(&self, ctx: &RequestContext) -> Result<Arc<dyn QuiltOps>, QmcpError> {
        let key = kind_key(ctx.backend());
        let builder = self.builders.get(key).ok_or_else(|| {
            QmcpError::new(
                ErrorKind::ConfigInvalid,
                format!("no backend registered for kind '{key}'"),
            )
            .with_context("field", "backend")
        })?;
        Ok(builder(ctx))
    }

    /// Registered backend kinds, for diagnostics.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.builders.keys().copied().collect()
    }
}

fn kind_key(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Direct => "direct",
        BackendKind::Graphql => "graphql",
    }
}

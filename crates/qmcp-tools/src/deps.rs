// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared dependencies handed to every tool handler.
//!
//! Process-wide singletons stop here: the HTTP pool, the credential cache,
//! the backend factory, and the search orchestrator.  Everything else is
//! request-scoped and travels in the [`RequestContext`].

use crate::workflow::WorkflowStore;
use qmcp_auth::{CredentialCache, CredentialSource};
use qmcp_config::ServerConfig;
use qmcp_core::RequestContext;
use qmcp_dataplane::{AthenaClientFactory, AthenaRunner, BucketOps, S3ClientFactory};
use qmcp_error::QmcpError;
use qmcp_ops::{BackendFactory, QuiltOps};
use qmcp_search::UnifiedSearch;
use std::sync::Arc;

/// Everything a tool handler may need.
pub struct ToolDeps {
    /// Resolved server configuration.
    pub config: ServerConfig,
    /// Per-request backend factory.
    pub factory: BackendFactory,
    /// The unified search orchestrator.
    pub search: UnifiedSearch,
    /// Request-scoped S3 client construction.
    pub s3: S3ClientFactory,
    /// Request-scoped Athena client construction.
    pub athena: AthenaClientFactory,
    /// Shared outbound HTTP pool.
    pub http: reqwest::Client,
    /// Process-wide credential cache (logout evicts here).
    pub credential_cache: Arc<CredentialCache>,
    /// Legacy-mode workflow records.
    pub workflows: WorkflowStore,
}

impl ToolDeps {
    /// Bare dependencies for unit tests: default factories, no backends
    /// registered.
    pub fn for_tests(config: ServerConfig) -> Self {
        Self {
            config,
            factory: BackendFactory::new(),
            search: UnifiedSearch::new(),
            s3: S3ClientFactory::default(),
            athena: AthenaClientFactory::default(),
            http: reqwest::Client::new(),
            credential_cache: Arc::new(CredentialCache::new()),
            workflows: WorkflowStore::new(),
        }
    }

    /// The backend serving this request.
    pub fn backend(&self, ctx: &RequestContext) -> Result<Arc<dyn QuiltOps>, QmcpError> {
        self.factory.build(ctx)
    }

    /// Request-scoped bucket operations.
    pub async fn bucket_ops(&self, ctx: &RequestContext) -> BucketOps {
        let source = match ctx.credentials() {
            Some(bundle) => CredentialSource::Bundle(bundle.clone()),
            None => CredentialSource::Ambient,
        };
        let client = self.s3.client_for(&source).await;
        BucketOps::new(client, ctx.service_timeout())
    }

    /// Request-scoped Athena runner.
    pub async fn athena_runner(&self, ctx: &RequestContext) -> AthenaRunner {
        let source = match ctx.credentials() {
            Some(bundle) => CredentialSource::Bundle(bundle.clone()),
            None => CredentialSource::Ambient,
        };
        let client = self.athena.client_for(&source).await;
        AthenaRunner::new(client, None)
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concrete search sources the orchestrator fans out to.

use crate::classify::file_type_of;
use crate::es::EsClient;
use crate::merge::collapse_into_packages;
use crate::SearchSource;
use async_trait::async_trait;
use qmcp_auth::CredentialSource;
use qmcp_core::RequestContext;
use qmcp_core::search::{
    ObjectHit, PackageHit, ResultType, SearchBackend, SearchHit, SearchQuery, SearchScope,
};
use qmcp_dataplane::{BucketOps, S3ClientFactory};
use qmcp_error::QmcpError;
use qmcp_ops::QuiltOps;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Elasticsearch
// ---------------------------------------------------------------------------

/// The Elasticsearch source, with the package-scope collapse applied when
/// the query asks for it.
pub struct EsSource {
    client: EsClient,
}

impl EsSource {
    /// Wrap an [`EsClient`].
    pub fn new(client: EsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchSource for EsSource {
    fn backend(&self) -> SearchBackend {
        SearchBackend::Elasticsearch
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError> {
        ctx.cancel_token().checkpoint()?;
        let hits = self.client.search(query, ctx.bearer_token()).await?;

        if query.scope == SearchScope::Package && query.result_type == ResultType::Both {
            // One search covered manifests and entries; fold entries into
            // their parent packages.
            let mut manifest_hits = Vec::new();
            let mut entry_hits = Vec::new();
            for hit in hits {
                if hit.is_manifest {
                    if let Some((bucket, name)) = hit.parent {
                        manifest_hits.push(SearchHit::Package {
                            hit: PackageHit {
                                bucket,
                                name,
                                top_hash: None,
                                matched_entries: vec![],
                            },
                            score: hit.score,
                            backend: SearchBackend::Elasticsearch,
                        });
                    }
                } else {
                    entry_hits.push((hit.parent, hit.object, hit.score));
                }
            }
            return Ok(collapse_into_packages(manifest_hits, entry_hits));
        }

        Ok(crate::es::to_search_hits(hits))
    }
}

// ---------------------------------------------------------------------------
// GraphQL
// ---------------------------------------------------------------------------

/// Adapter: the active `QuiltOps` backend's native package search.
pub struct GraphqlSource {
    ops: Arc<dyn QuiltOps>,
}

impl GraphqlSource {
    /// Wrap a backend.
    pub fn new(ops: Arc<dyn QuiltOps>) -> Self {
        Self { ops }
    }
}

#[async_trait]
impl SearchSource for GraphqlSource {
    fn backend(&self) -> SearchBackend {
        SearchBackend::Graphql
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError> {
        self.ops.search_packages(ctx, query).await
    }
}

// ---------------------------------------------------------------------------
// S3 listing
// ---------------------------------------------------------------------------

/// Last-resort source: plain S3 listing with prefix/suffix filtering.
///
/// With empty text and bucket scope this degenerates to "the first `limit`
/// objects by modified-time, descending" — the listing contract.
pub struct S3Source {
    factory: S3ClientFactory,
}

impl S3Source {
    /// Wrap an S3 client factory.
    pub fn new(factory: S3ClientFactory) -> Self {
        Self { factory }
    }

    fn buckets_for<'q>(ctx: &'q RequestContext, query: &'q SearchQuery) -> Vec<String> {
        if !query.buckets.is_empty() {
            return query.buckets.clone();
        }
        ctx.registry_url()
            .map(|r| {
                vec![
                    r.trim_start_matches("s3://")
                        .trim_end_matches('/')
                        .to_string(),
                ]
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchSource for S3Source {
    fn backend(&self) -> SearchBackend {
        SearchBackend::S3
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError> {
        let buckets = Self::buckets_for(ctx, query);
        if buckets.is_empty() {
            return Ok(vec![]);
        }

        let source = match ctx.credentials() {
            Some(bundle) => CredentialSource::Bundle(bundle.clone()),
            None => CredentialSource::Ambient,
        };
        let client = self.factory.client_for(&source).await;
        let ops = BucketOps::new(client, ctx.service_timeout());

        let text = query.text.trim();
        let match_all = text.is_empty() || text == "*";
        let suffix = file_type_of(text);
        // A plain word restricts by key prefix; operators do not apply here.
        let prefix = (!match_all && suffix.is_none()).then_some(text);

        let mut objects: Vec<ObjectHit> = Vec::new();
        for bucket in &buckets {
            ctx.cancel_token().checkpoint()?;
            let listing = ops
                .list(bucket, prefix, None, query.limit.max(100))
                .await?;
            for object in listing.objects {
                if let Some(ext) = &suffix
                    && !object.key.ends_with(ext.as_str())
                {
                    continue;
                }
                objects.push(ObjectHit {
                    bucket: bucket.clone(),
                    key: object.key,
                    version_id: None,
                    size: Some(object.size),
                    modified: object.modified,
                });
            }
        }

        // Recency ordering; the listing contract for empty queries.
        objects.sort_by(|a, b| b.modified.cmp(&a.modified));
        objects.truncate(query.limit);

        Ok(objects
            .into_iter()
            .map(|hit| SearchHit::Object {
                hit,
                score: 1.0,
                backend: SearchBackend::S3,
            })
            .collect())
    }
}

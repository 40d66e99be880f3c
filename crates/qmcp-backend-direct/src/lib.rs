// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-backend-direct
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! [`QuiltOps`](qmcp_ops::QuiltOps) over the S3 registry directly: pointer
//! objects for the tag map, immutable revision records keyed by top-hash,
//! and content-addressed staging for copies.  No catalog round-trips.

/// Registry key layout and pure write-planning helpers.
pub mod layout;

use async_trait::async_trait;
use layout::{
    StoredRevision, content_hash, data_key, needs_copy, parse_pointer_key, pointer_key,
    pointer_prefix, revision_key,
};
use qmcp_auth::CredentialSource;
use qmcp_config::BackendKind;
use qmcp_core::RequestContext;
use qmcp_core::package::{
    CopyMode, EntryRequest, EntrySource, Manifest, ManifestEntry, PackageRef, RevisionInfo,
    parse_s3_uri,
};
use qmcp_core::search::{PackageHit, SearchBackend, SearchHit, SearchQuery};
use qmcp_dataplane::{BucketOps, S3ClientFactory};
use qmcp_error::{ErrorKind, QmcpError};
use qmcp_ops::{
    AdminOp, AdminOutcome, AuthStatus, BrowseResult, Bucket, BucketPermission, PackagePage,
    Paging, QuiltOps, RevisionWrite, unsupported,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Merge prior entries with the update's entries: a supplied logical path
/// shadows the old physical reference, everything else carries forward.
pub fn merge_update_entries(
    prior: &Manifest,
    replacements: Vec<ManifestEntry>,
) -> Vec<ManifestEntry> {
    let mut merged: BTreeMap<String, ManifestEntry> = prior
        .entries()
        .iter()
        .map(|e| (e.logical_path.clone(), e.clone()))
        .collect();
    for entry in replacements {
        merged.insert(entry.logical_path.clone(), entry);
    }
    merged.into_values().collect()
}

/// `QuiltOps` over the registry bucket.
#[derive(Clone)]
pub struct DirectBackend {
    factory: S3ClientFactory,
}

impl DirectBackend {
    /// Build a backend over an S3 client factory.
    pub fn new(factory: S3ClientFactory) -> Self {
        Self { factory }
    }

    async fn ops(&self, ctx: &RequestContext) -> BucketOps {
        let source = match ctx.credentials() {
            Some(bundle) => CredentialSource::Bundle(bundle.clone()),
            None => CredentialSource::Ambient,
        };
        let client = self.factory.client_for(&source).await;
        BucketOps::new(client, ctx.service_timeout())
    }

    fn registry_bucket<'a>(
        &self,
        ctx: &'a RequestContext,
        registry: &'a str,
    ) -> Result<&'a str, QmcpError> {
        let raw = if registry.is_empty() {
            ctx.registry_url().unwrap_or("")
        } else {
            registry
        };
        let bucket = raw.trim_start_matches("s3://").trim_end_matches('/');
        if bucket.is_empty() {
            return Err(QmcpError::validation(
                "no registry given and no registry-url configured",
            )
            .with_context("field", "registry"));
        }
        Ok(bucket)
    }

    /// Resolve a tag or explicit hash to a revision hash.
    async fn resolve_hash(
        &self,
        ops: &BucketOps,
        bucket: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<String, QmcpError> {
        match top_hash {
            Some(hash) => Ok(hash.to_string()),
            None => {
                let pointer = ops
                    .get_text(bucket, &pointer_key(name, "latest"), None, None)
                    .await
                    .map_err(|e| match e.kind {
                        ErrorKind::NotFound => QmcpError::not_found(format!(
                            "package '{name}' has no latest pointer in s3://{bucket}"
                        )),
                        _ => e,
                    })?;
                Ok(pointer.trim().to_string())
            }
        }
    }

    async fn load_revision(
        &self,
        ops: &BucketOps,
        bucket: &str,
        hash: &str,
    ) -> Result<StoredRevision, QmcpError> {
        let body = ops
            .get_bytes(bucket, &revision_key(hash), None, None)
            .await
            .map_err(|e| match e.kind {
                ErrorKind::NotFound => {
                    QmcpError::not_found(format!("revision '{hash}' not in s3://{bucket}"))
                }
                _ => e,
            })?;
        StoredRevision::from_bytes(&body)
    }

    /// Resolve one requested entry into a manifest entry, staging or
    /// copying physical objects as the copy mode demands.
    async fn resolve_entry(
        &self,
        ops: &BucketOps,
        registry_bucket: &str,
        request: &EntryRequest,
        mode: CopyMode,
    ) -> Result<ManifestEntry, QmcpError> {
        match &request.source {
            EntrySource::Text { text } => {
                let hash = content_hash(text.as_bytes());
                let key = data_key(&hash);
                // Content addressing makes restaging idempotent.
                if ops.head(registry_bucket, &key).await.is_err() {
                    ops.put_text(registry_bucket, &key, text).await?;
                }
                Ok(ManifestEntry {
                    logical_path: request.logical_path.clone(),
                    physical_uri: format!("s3://{registry_bucket}/{key}"),
                    size: text.len() as u64,
                    hash,
                })
            }
            EntrySource::S3 { uri } => {
                let (bucket, key) = parse_s3_uri(uri)?;
                let meta = ops.head(&bucket, &key).await.map_err(|e| match e.kind {
                    ErrorKind::NotFound => {
                        QmcpError::not_found(format!("source object {uri} does not exist"))
                    }
                    _ => e,
                })?;
                let hash = meta
                    .etag
                    .as_deref()
                    .map(|t| t.trim_matches('"').to_string())
                    .unwrap_or_else(|| content_hash(uri.as_bytes()));
                if needs_copy(mode, uri, registry_bucket) {
                    let dest = data_key(&hash);
                    ops.copy_from(registry_bucket, &dest, uri).await?;
                    Ok(ManifestEntry {
                        logical_path: request.logical_path.clone(),
                        physical_uri: format!("s3://{registry_bucket}/{dest}"),
                        size: meta.size,
                        hash,
                    })
                } else {
                    Ok(ManifestEntry {
                        logical_path: request.logical_path.clone(),
                        physical_uri: uri.clone(),
                        size: meta.size,
                        hash,
                    })
                }
            }
        }
    }

    /// The shared write protocol behind create and update.
    async fn commit(
        &self,
        ctx: &RequestContext,
        write: RevisionWrite,
    ) -> Result<String, QmcpError> {
        if write.entries.is_empty() {
            return Err(QmcpError::validation("a revision needs at least one entry"));
        }
        let bucket = self.registry_bucket(ctx, &write.registry)?.to_string();
        let ops = self.ops(ctx).await;

        let mut entries = Vec::with_capacity(write.entries.len());
        for request in &write.entries {
            ctx.cancel_token().checkpoint()?;
            entries.push(
                self.resolve_entry(&ops, &bucket, request, write.copy_mode)
                    .await?,
            );
        }
        if let Some(prior) = &write.prior_top_hash {
            let prior_revision = self.load_revision(&ops, &bucket, prior).await?;
            entries = merge_update_entries(&prior_revision.manifest, entries);
        }

        let manifest = Manifest::new(entries, write.metadata.clone())?;
        let top_hash = manifest.top_hash();

        // Recommitting an existing revision is a no-op.
        if ops.head(&bucket, &revision_key(&top_hash)).await.is_ok() {
            debug!(top_hash = %top_hash, "revision already committed");
        } else {
            let stored = StoredRevision {
                manifest,
                message: write.message.clone(),
                timestamp: chrono::Utc::now(),
            };
            let body = String::from_utf8(stored.to_bytes()?)
                .map_err(|e| QmcpError::internal("revision body is not UTF-8").with_source(e))?;
            ops.put_text(&bucket, &revision_key(&top_hash), &body).await?;
        }

        // Advance the tag map: a timestamp pointer for history plus the
        // mutable latest head.
        let stamp = chrono::Utc::now().timestamp().to_string();
        ops.put_text(&bucket, &pointer_key(&write.name, &stamp), &top_hash)
            .await?;
        ops.put_text(&bucket, &pointer_key(&write.name, "latest"), &top_hash)
            .await?;
        Ok(top_hash)
    }
}

#[async_trait]
impl QuiltOps for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn auth_status(&self, ctx: &RequestContext) -> Result<AuthStatus, QmcpError> {
        Ok(AuthStatus {
            logged_in: ctx.claims().is_some() || ctx.credentials().is_some(),
            subject: ctx.claims().map(|c| c.sub.clone()),
            catalog: ctx.catalog_url().map(str::to_string),
            registry: ctx.registry_url().map(str::to_string),
        })
    }

    async fn bucket_list(&self, ctx: &RequestContext) -> Result<Vec<Bucket>, QmcpError> {
        let ops = self.ops(ctx).await;
        match ops.client().list_buckets().send().await {
            Ok(out) => Ok(out
                .buckets
                .unwrap_or_default()
                .into_iter()
                .filter_map(|b| {
                    Some(Bucket {
                        name: b.name?,
                        title: None,
                        description: None,
                        permission: None,
                    })
                })
                .collect()),
            // Scoped credentials often may not enumerate buckets; fall
            // back to what the claims grant.
            Err(_) => {
                let mut buckets: Vec<Bucket> = ctx
                    .claims()
                    .map(|c| c.buckets.clone())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|name| Bucket {
                        name,
                        title: None,
                        description: None,
                        permission: Some(BucketPermission::Read),
                    })
                    .collect();
                if let Ok(registry) = self.registry_bucket(ctx, "") {
                    if !buckets.iter().any(|b| b.name == registry) {
                        buckets.push(Bucket {
                            name: registry.to_string(),
                            title: None,
                            description: None,
                            permission: Some(BucketPermission::ReadWrite),
                        });
                    }
                }
                Ok(buckets)
            }
        }
    }

    async fn package_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        filter: Option<&str>,
        paging: Paging,
    ) -> Result<PackagePage, QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        let listing = ops
            .list(
                bucket,
                Some(".quilt/named_packages/"),
                paging.continuation.as_deref(),
                paging.max.max(1) * 4,
            )
            .await?;

        let mut seen = std::collections::BTreeSet::new();
        for object in &listing.objects {
            if let Some((name, _tag)) = parse_pointer_key(&object.key) {
                if let Some(f) = filter
                    && !name.contains(f)
                {
                    continue;
                }
                seen.insert(name);
            }
        }
        let packages = seen
            .into_iter()
            .take(paging.max)
            .map(|name| PackageRef {
                registry: format!("s3://{bucket}"),
                name,
            })
            .collect();
        Ok(PackagePage {
            packages,
            next: listing.next,
        })
    }

    async fn package_browse(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<BrowseResult, QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        let hash = self.resolve_hash(&ops, bucket, name, top_hash).await?;
        let stored = self.load_revision(&ops, bucket, &hash).await?;
        Ok(BrowseResult {
            top_hash: hash,
            manifest: stored.manifest,
        })
    }

    async fn package_versions_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        limit: usize,
        with_tags: bool,
    ) -> Result<Vec<RevisionInfo>, QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        let listing = ops
            .list(bucket, Some(&pointer_prefix(name)), None, 1000)
            .await?;

        // One pass over pointers: numeric tags are commits, the rest are
        // human tags hanging off whatever hash they point at.
        let mut commits: Vec<(i64, String)> = Vec::new();
        let mut tags_by_hash: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for object in &listing.objects {
            let Some((_, tag)) = parse_pointer_key(&object.key) else {
                continue;
            };
            let hash = ops
                .get_text(bucket, &object.key, None, None)
                .await?
                .trim()
                .to_string();
            match tag.parse::<i64>() {
                Ok(stamp) => commits.push((stamp, hash)),
                Err(_) => {
                    if tag != "latest" {
                        tags_by_hash.entry(hash).or_default().push(tag);
                    }
                }
            }
        }
        commits.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(commits
            .into_iter()
            .take(limit)
            .map(|(stamp, hash)| {
                let tags = with_tags.then(|| {
                    tags_by_hash.get(&hash).cloned().unwrap_or_default()
                });
                RevisionInfo {
                    timestamp: chrono::DateTime::from_timestamp(stamp, 0)
                        .unwrap_or_else(chrono::Utc::now),
                    message: None,
                    tags,
                    top_hash: hash,
                }
            })
            .collect())
    }

    async fn package_manifest(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<Manifest, QmcpError> {
        Ok(self
            .package_browse(ctx, registry, name, top_hash)
            .await?
            .manifest)
    }

    async fn package_create_revision(
        &self,
        ctx: &RequestContext,
        write: RevisionWrite,
    ) -> Result<String, QmcpError> {
        if write.prior_top_hash.is_some() {
            return Err(QmcpError::validation(
                "create does not take a prior top_hash; use update",
            ));
        }
        self.commit(ctx, write).await
    }

    async fn package_update_revision(
        &self,
        ctx: &RequestContext,
        write: RevisionWrite,
    ) -> Result<String, QmcpError> {
        if write.prior_top_hash.is_none() {
            return Err(QmcpError::validation(
                "update needs the prior revision's top_hash",
            ));
        }
        self.commit(ctx, write).await
    }

    async fn package_delete(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<(), QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        match top_hash {
            Some(hash) => {
                // Remove the revision record and any pointers aimed at it.
                ops.head(bucket, &revision_key(hash)).await.map_err(|e| {
                    match e.kind {
                        ErrorKind::NotFound => {
                            QmcpError::not_found(format!("revision '{hash}' does not exist"))
                        }
                        _ => e,
                    }
                })?;
                ops.delete(bucket, &revision_key(hash)).await?;
                let listing = ops
                    .list(bucket, Some(&pointer_prefix(name)), None, 1000)
                    .await?;
                for object in &listing.objects {
                    let body = ops.get_text(bucket, &object.key, None, None).await?;
                    if body.trim() == hash {
                        ops.delete(bucket, &object.key).await?;
                    }
                }
                Ok(())
            }
            // No hash: drop only the latest pointer; revisions stay
            // reachable by hash.
            None => {
                let key = pointer_key(name, "latest");
                ops.head(bucket, &key).await.map_err(|e| match e.kind {
                    ErrorKind::NotFound => {
                        QmcpError::not_found(format!("package '{name}' has no latest pointer"))
                    }
                    _ => e,
                })?;
                ops.delete(bucket, &key).await
            }
        }
    }

    async fn tag_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        let listing = ops
            .list(bucket, Some(&pointer_prefix(name)), None, 1000)
            .await?;
        let mut map = BTreeMap::new();
        for object in &listing.objects {
            let Some((_, tag)) = parse_pointer_key(&object.key) else {
                continue;
            };
            // Numeric pointers are commit history, not tags.
            if tag.parse::<i64>().is_ok() {
                continue;
            }
            let hash = ops.get_text(bucket, &object.key, None, None).await?;
            map.insert(tag, hash.trim().to_string());
        }
        Ok(map)
    }

    async fn tag_add(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        tag: &str,
        top_hash: &str,
    ) -> Result<(), QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        // The tag must point at a committed revision.
        ops.head(bucket, &revision_key(top_hash))
            .await
            .map_err(|e| match e.kind {
                ErrorKind::NotFound => {
                    QmcpError::not_found(format!("revision '{top_hash}' does not exist"))
                }
                _ => e,
            })?;
        ops.put_text(bucket, &pointer_key(name, tag), top_hash).await
    }

    async fn tag_delete(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        tag: &str,
    ) -> Result<(), QmcpError> {
        let bucket = self.registry_bucket(ctx, registry)?;
        let ops = self.ops(ctx).await;
        let key = pointer_key(name, tag);
        ops.head(bucket, &key).await.map_err(|e| match e.kind {
            ErrorKind::NotFound => QmcpError::not_found(format!("tag '{tag}' does not exist")),
            _ => e,
        })?;
        ops.delete(bucket, &key).await
    }

    async fn search_packages(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError> {
        let buckets = if query.buckets.is_empty() {
            vec![self.registry_bucket(ctx, "")?.to_string()]
        } else {
            query.buckets.clone()
        };
        let ops = self.ops(ctx).await;
        let needle = query.text.trim();
        let match_all = needle.is_empty() || needle == "*";

        let mut hits = Vec::new();
        'outer: for bucket in &buckets {
            let listing = ops
                .list(bucket, Some(".quilt/named_packages/"), None, 1000)
                .await?;
            let mut seen = std::collections::BTreeSet::new();
            for object in &listing.objects {
                if let Some((name, _)) = parse_pointer_key(&object.key)
                    && (match_all || name.contains(needle))
                    && seen.insert(name.clone())
                {
                    hits.push(SearchHit::Package {
                        hit: PackageHit {
                            bucket: bucket.clone(),
                            name,
                            top_hash: None,
                            matched_entries: vec![],
                        },
                        score: 1.0,
                        backend: SearchBackend::S3,
                    });
                    if hits.len() >= query.limit {
                        break 'outer;
                    }
                }
            }
        }
        Ok(hits)
    }

    async fn admin(
        &self,
        _ctx: &RequestContext,
        _op: AdminOp,
    ) -> Result<AdminOutcome, QmcpError> {
        Err(unsupported(BackendKind::Direct, "admin operations"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmcp_config::DeploymentMode;
    use serde_json::json;

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        Manifest::new(
            entries
                .iter()
                .map(|(path, uri)| ManifestEntry {
                    logical_path: path.to_string(),
                    physical_uri: uri.to_string(),
                    size: 1,
                    hash: "h".into(),
                })
                .collect(),
            json!({}),
        )
        .unwrap()
    }

    #[test]
    fn update_replaces_supplied_paths_and_keeps_the_rest() {
        let prior = manifest(&[("a", "s3://b/a-old"), ("b", "s3://b/b")]);
        let merged = merge_update_entries(
            &prior,
            vec![ManifestEntry {
                logical_path: "a".into(),
                physical_uri: "s3://b/a-new".into(),
                size: 2,
                hash: "h2".into(),
            }],
        );
        assert_eq!(merged.len(), 2);
        let a = merged.iter().find(|e| e.logical_path == "a").unwrap();
        assert_eq!(a.physical_uri, "s3://b/a-new");
        let b = merged.iter().find(|e| e.logical_path == "b").unwrap();
        assert_eq!(b.physical_uri, "s3://b/b");
    }

    #[test]
    fn update_can_add_new_paths() {
        let prior = manifest(&[("a", "s3://b/a")]);
        let merged = merge_update_entries(
            &prior,
            vec![ManifestEntry {
                logical_path: "c".into(),
                physical_uri: "s3://b/c".into(),
                size: 1,
                hash: "h".into(),
            }],
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn registry_bucket_falls_back_to_context() {
        let backend = DirectBackend::new(S3ClientFactory::default());
        let ctx = RequestContext::builder(DeploymentMode::Legacy, BackendKind::Direct)
            .registry_url("s3://fallback-reg")
            .build();
        assert_eq!(backend.registry_bucket(&ctx, "").unwrap(), "fallback-reg");
        assert_eq!(
            backend.registry_bucket(&ctx, "s3://explicit/").unwrap(),
            "explicit"
        );
    }

    #[test]
    fn missing_registry_is_a_validation_error() {
        let backend = DirectBackend::new(S3ClientFactory::default());
        let ctx = RequestContext::builder(DeploymentMode::Legacy, BackendKind::Direct).build();
        let err = backend.registry_bucket(&ctx, "").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn create_rejects_prior_hash() {
        let backend = DirectBackend::new(S3ClientFactory::default());
        let ctx = RequestContext::builder(DeploymentMode::Legacy, BackendKind::Direct)
            .registry_url("s3://reg")
            .build();
        let err = backend
            .package_create_revision(
                &ctx,
                RevisionWrite {
                    registry: "s3://reg".into(),
                    name: "ns/p".into(),
                    entries: vec![EntryRequest {
                        logical_path: "a".into(),
                        source: EntrySource::Text { text: "x".into() },
                    }],
                    metadata: json!({}),
                    copy_mode: CopyMode::None,
                    message: None,
                    prior_top_hash: Some("abc".into()),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn empty_write_rejected_before_any_io() {
        let backend = DirectBackend::new(S3ClientFactory::default());
        let ctx = RequestContext::builder(DeploymentMode::Legacy, BackendKind::Direct)
            .registry_url("s3://reg")
            .build();
        let err = backend
            .package_create_revision(
                &ctx,
                RevisionWrite {
                    registry: "s3://reg".into(),
                    name: "ns/p".into(),
                    entries: vec![],
                    metadata: json!({}),
                    copy_mode: CopyMode::None,
                    message: None,
                    prior_top_hash: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn admin_is_refused_with_an_alternative() {
        let backend = DirectBackend::new(S3ClientFactory::default());
        let ctx = RequestContext::builder(DeploymentMode::Legacy, BackendKind::Direct).build();
        let err = backend.admin(&ctx, AdminOp::UserList).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert!(err.fix_hint.as_deref().unwrap().contains("graphql"));
    }
}

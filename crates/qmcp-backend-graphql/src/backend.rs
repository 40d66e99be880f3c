// SPDX-License-Identifier: MIT OR Apache-2.0
//! The QuiltOps implementation over catalog GraphQL.

use crate::client::{GraphqlClient, require_path};
use async_trait::async_trait;
use qmcp_config::BackendKind;
use qmcp_core::RequestContext;
use qmcp_core::package::{Manifest, ManifestEntry, PackageRef, RevisionInfo};
use qmcp_core::search::{PackageHit, SearchBackend, SearchHit, SearchQuery};
use qmcp_error::{ErrorKind, QmcpError};
use qmcp_ops::{
    AdminOp, AdminOutcome, AuthStatus, BrowseResult, Bucket, BucketPermission, PackagePage,
    Paging, QuiltOps, RevisionWrite,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// GraphQL documents
// ---------------------------------------------------------------------------

const BUCKET_CONFIGS: &str = "query { bucketConfigs { name title description readOnly } }";

const PACKAGE_LIST: &str = "query ($bucket: String!, $filter: String, $page: Int!, $perPage: Int!) {\
 packages(bucket: $bucket, filter: $filter) {\
 page(number: $page, perPage: $perPage) { bucket name } total } }";

const PACKAGE_REVISION: &str = "query ($bucket: String!, $name: String!, $hashOrTag: String!) {\
 package(bucket: $bucket, name: $name) {\
 revision(hashOrTag: $hashOrTag) {\
 hash modified message userMeta\
 entries { logicalKey physicalKey size hash } } } }";

const PACKAGE_REVISIONS: &str = "query ($bucket: String!, $name: String!, $perPage: Int!) {\
 package(bucket: $bucket, name: $name) {\
 revisions { page(number: 1, perPage: $perPage) { hash modified message tags } } } }";

const PACKAGE_CONSTRUCT: &str = "mutation ($params: PackagePushParams!, $src: PackageConstructSource!) {\
 packageConstruct(params: $params, src: $src) { __typename\
 ... on PackagePushSuccess { revision { hash } }\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } }";

const PACKAGE_REVISION_DELETE: &str = "mutation ($bucket: String!, $name: String!, $hash: String!) {\
 packageRevisionDelete(bucket: $bucket, name: $name, hash: $hash) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } }";

const PACKAGE_POINTER_DELETE: &str = "mutation ($bucket: String!, $name: String!) {\
 packagePointerDelete(bucket: $bucket, name: $name) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } }";

const TAG_ADD: &str = "mutation ($bucket: String!, $name: String!, $tag: String!, $hash: String!) {\
 packageRevisionTagAdd(bucket: $bucket, name: $name, tag: $tag, hash: $hash) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } }";

const TAG_DELETE: &str = "mutation ($bucket: String!, $name: String!, $tag: String!) {\
 packageRevisionTagDelete(bucket: $bucket, name: $name, tag: $tag) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } }";

const SEARCH_PACKAGES: &str = "query ($searchString: String!, $buckets: [String!], $perPage: Int!) {\
 searchPackages(searchString: $searchString, buckets: $buckets) {\
 page(number: 1, perPage: $perPage) { bucket name hash score } } }";

// ---------------------------------------------------------------------------
// Union handling
// ---------------------------------------------------------------------------

/// Map a `{Success | InvalidInput | OperationError}` union payload onto
/// `Result`.  `OperationError.name` carries the refusal class; `InUse` and
/// `Conflict` keep their taxonomy identities.
pub(crate) fn parse_union<'v>(value: &'v Value, what: &str) -> Result<&'v Value, QmcpError> {
    let typename = value
        .get("__typename")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match typename {
        "InvalidInput" => {
            let message = value
                .get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("input rejected by the catalog");
            Err(QmcpError::new(
                ErrorKind::ValidationFailed,
                format!("{what}: {message}"),
            ))
        }
        "OperationError" => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("operation failed");
            let name = value.get("name").and_then(Value::as_str).unwrap_or("");
            let kind = match name {
                "InUse" => ErrorKind::InUse,
                "Conflict" => ErrorKind::Conflict,
                "NotFound" => ErrorKind::NotFound,
                _ => ErrorKind::UpstreamUnavailable,
            };
            Err(QmcpError::new(kind, format!("{what}: {message}")).with_context("name", name))
        }
        _ => Ok(value),
    }
}

/// Strip `s3://` so registries can be passed either as URLs or bare bucket
/// names.
fn bucket_of_registry(registry: &str) -> &str {
    registry
        .trim_start_matches("s3://")
        .trim_end_matches('/')
}

fn revision_entries(revision: &Value) -> Result<Vec<ManifestEntry>, QmcpError> {
    revision
        .get("entries")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|e| ManifestEntry {
                    logical_path: e
                        .get("logicalKey")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    physical_uri: e
                        .get("physicalKey")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    size: e.get("size").and_then(Value::as_u64).unwrap_or(0),
                    hash: e
                        .get("hash")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .ok_or_else(|| QmcpError::not_found("revision carries no entries"))
}

fn revision_info(node: &Value) -> Option<RevisionInfo> {
    Some(RevisionInfo {
        top_hash: node.get("hash")?.as_str()?.to_string(),
        timestamp: node
            .get("modified")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(chrono::Utc::now),
        message: node
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        tags: node.get("tags").and_then(Value::as_array).map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        }),
    })
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// `QuiltOps` over the catalog GraphQL endpoint.
#[derive(Clone)]
pub struct GraphqlBackend {
    client: GraphqlClient,
}

impl GraphqlBackend {
    /// Wrap a catalog client.
    pub fn new(client: GraphqlClient) -> Self {
        Self { client }
    }

    pub(crate) async fn run(
        &self,
        ctx: &RequestContext,
        query: &str,
        variables: Value,
    ) -> Result<Value, QmcpError> {
        ctx.cancel_token().checkpoint()?;
        self.client
            .execute(query, variables, ctx.bearer_token())
            .await
    }
}

#[async_trait]
impl QuiltOps for GraphqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Graphql
    }

    async fn auth_status(&self, ctx: &RequestContext) -> Result<AuthStatus, QmcpError> {
        Ok(AuthStatus {
            logged_in: ctx.claims().is_some(),
            subject: ctx.claims().map(|c| c.sub.clone()),
            catalog: ctx.catalog_url().map(str::to_string),
            registry: ctx.registry_url().map(str::to_string),
        })
    }

    async fn bucket_list(&self, ctx: &RequestContext) -> Result<Vec<Bucket>, QmcpError> {
        let data = self.run(ctx, BUCKET_CONFIGS, Value::Null).await?;
        let configs = require_path(&data, "bucketConfigs")?
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(configs
            .iter()
            .filter_map(|b| {
                Some(Bucket {
                    name: b.get("name")?.as_str()?.to_string(),
                    title: b.get("title").and_then(Value::as_str).map(str::to_string),
                    description: b
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    permission: match b.get("readOnly").and_then(Value::as_bool) {
                        Some(true) => Some(BucketPermission::Read),
                        Some(false) => Some(BucketPermission::ReadWrite),
                        None => None,
                    },
                })
            })
            .collect())
    }

    async fn package_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        filter: Option<&str>,
        paging: Paging,
    ) -> Result<PackagePage, QmcpError> {
        let page: usize = paging
            .continuation
            .as_deref()
            .map(|c| {
                c.parse().map_err(|_| {
                    QmcpError::validation(format!("bad continuation token '{c}'"))
                })
            })
            .transpose()?
            .unwrap_or(1);
        let data = self
            .run(
                ctx,
                PACKAGE_LIST,
                json!({
                    "bucket": bucket_of_registry(registry),
                    "filter": filter,
                    "page": page,
                    "perPage": paging.max,
                }),
            )
            .await?;
        // An empty registry answers with an empty page, not an error.
        let nodes = match require_path(&data, "packages.page") {
            Ok(v) => v.as_array().cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let packages: Vec<PackageRef> = nodes
            .iter()
            .filter_map(|n| {
                Some(PackageRef {
                    registry: registry.to_string(),
                    name: n.get("name")?.as_str()?.to_string(),
                })
            })
            .collect();
        let next = (!packages.is_empty() && packages.len() == paging.max)
            .then(|| (page + 1).to_string());
        Ok(PackagePage { packages, next })
    }

    async fn package_browse(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<BrowseResult, QmcpError> {
        let data = self
            .run(
                ctx,
                PACKAGE_REVISION,
                json!({
                    "bucket": bucket_of_registry(registry),
                    "name": name,
                    "hashOrTag": top_hash.unwrap_or("latest"),
                }),
            )
            .await?;
        let revision = require_path(&data, "package.revision")?;
        let hash = revision
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| QmcpError::not_found("revision carries no hash"))?
            .to_string();
        let entries = revision_entries(revision)?;
        let metadata = revision.get("userMeta").cloned().unwrap_or(Value::Null);
        Ok(BrowseResult {
            top_hash: hash,
            manifest: Manifest::new(entries, metadata)?,
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
        let data = self
            .run(
                ctx,
                PACKAGE_REVISIONS,
                json!({
                    "bucket": bucket_of_registry(registry),
                    "name": name,
                    "perPage": limit,
                }),
            )
            .await?;
        let nodes = require_path(&data, "package.revisions.page")?
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(nodes
            .iter()
            .filter_map(revision_info)
            .map(|mut info| {
                if !with_tags {
                    info.tags = None;
                }
                info
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
        construct(self, ctx, write).await
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
        construct(self, ctx, write).await
    }

    async fn package_delete(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        top_hash: Option<&str>,
    ) -> Result<(), QmcpError> {
        let bucket = bucket_of_registry(registry);
        let data = match top_hash {
            Some(hash) => {
                self.run(
                    ctx,
                    PACKAGE_REVISION_DELETE,
                    json!({"bucket": bucket, "name": name, "hash": hash}),
                )
                .await?
            }
            // No hash: drop the tag-map entry (the "latest" pointer);
            // revisions stay reachable by hash.
            None => {
                self.run(
                    ctx,
                    PACKAGE_POINTER_DELETE,
                    json!({"bucket": bucket, "name": name}),
                )
                .await?
            }
        };
        let union = data
            .get("packageRevisionDelete")
            .or_else(|| data.get("packagePointerDelete"))
            .ok_or_else(|| QmcpError::internal("delete mutation returned no payload"))?;
        parse_union(union, "package delete")?;
        Ok(())
    }

    async fn tag_list(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, QmcpError> {
        let revisions = self
            .package_versions_list(ctx, registry, name, 100, true)
            .await?;
        let mut map = BTreeMap::new();
        for revision in revisions {
            for tag in revision.tags.unwrap_or_default() {
                map.insert(tag, revision.top_hash.clone());
            }
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
        let data = self
            .run(
                ctx,
                TAG_ADD,
                json!({
                    "bucket": bucket_of_registry(registry),
                    "name": name,
                    "tag": tag,
                    "hash": top_hash,
                }),
            )
            .await?;
        parse_union(require_path(&data, "packageRevisionTagAdd")?, "tag add")?;
        Ok(())
    }

    async fn tag_delete(
        &self,
        ctx: &RequestContext,
        registry: &str,
        name: &str,
        tag: &str,
    ) -> Result<(), QmcpError> {
        let data = self
            .run(
                ctx,
                TAG_DELETE,
                json!({
                    "bucket": bucket_of_registry(registry),
                    "name": name,
                    "tag": tag,
                }),
            )
            .await?;
        parse_union(require_path(&data, "packageRevisionTagDelete")?, "tag delete")?;
        Ok(())
    }

    async fn search_packages(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError> {
        let buckets = if query.buckets.is_empty() {
            Value::Null
        } else {
            json!(query.buckets)
        };
        let data = self
            .run(
                ctx,
                SEARCH_PACKAGES,
                json!({
                    "searchString": query.text,
                    "buckets": buckets,
                    "perPage": query.limit,
                }),
            )
            .await?;
        let nodes = match require_path(&data, "searchPackages.page") {
            Ok(v) => v.as_array().cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        Ok(nodes
            .iter()
            .filter_map(|n| {
                Some(SearchHit::Package {
                    hit: PackageHit {
                        bucket: n.get("bucket")?.as_str()?.to_string(),
                        name: n.get("name")?.as_str()?.to_string(),
                        top_hash: n.get("hash").and_then(Value::as_str).map(str::to_string),
                        matched_entries: vec![],
                    },
                    score: n.get("score").and_then(Value::as_f64).unwrap_or(1.0),
                    backend: SearchBackend::Graphql,
                })
            })
            .collect())
    }

    async fn admin(
        &self,
        ctx: &RequestContext,
        op: AdminOp,
    ) -> Result<AdminOutcome, QmcpError> {
        crate::admin::run(self, ctx, op).await
    }
}

async fn construct(
    backend: &GraphqlBackend,
    ctx: &RequestContext,
    write: RevisionWrite,
) -> Result<String, QmcpError> {
    if write.entries.is_empty() {
        return Err(QmcpError::validation("a revision needs at least one entry"));
    }
    let entries: Vec<Value> = write
        .entries
        .iter()
        .map(|e| match &e.source {
            qmcp_core::package::EntrySource::S3 { uri } => json!({
                "logicalKey": e.logical_path,
                "physicalKey": uri,
            }),
            qmcp_core::package::EntrySource::Text { text } => json!({
                "logicalKey": e.logical_path,
                "contents": text,
            }),
        })
        .collect();
    let data = backend
        .run(
            ctx,
            PACKAGE_CONSTRUCT,
            json!({
                "params": {
                    "bucket": bucket_of_registry(&write.registry),
                    "name": write.name,
                    "message": write.message,
                    "userMeta": write.metadata,
                    "copyMode": write.copy_mode.to_string(),
                    "base": write.prior_top_hash,
                },
                "src": {"entries": entries},
            }),
        )
        .await?;
    let union = require_path(&data, "packageConstruct")?;
    let payload = parse_union(union, "package construct")?;
    payload
        .get("revision")
        .and_then(|r| r.get("hash"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                "catalog accepted the revision but returned no hash",
            )
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

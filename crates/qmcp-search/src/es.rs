// SPDX-License-Identifier: MIT OR Apache-2.0
//! Elasticsearch over the catalog-fronted `_search` endpoint.
//!
//! The catalog proxies `_search` with bearer auth on a catalog-relative
//! path, so this speaks plain HTTP rather than a cluster transport.

use crate::classify::file_type_of;
use qmcp_core::search::{ObjectHit, SearchBackend, SearchHit, SearchQuery};
use qmcp_error::{ErrorKind, QmcpError};
use serde_json::{Value, json};
use std::time::Duration;

/// Build the `_search` request body for a query.
///
/// A non-empty bucket filter always becomes a `terms` clause — singular
/// and list forms arrive already normalized into one list.
pub fn build_query_body(query: &SearchQuery) -> Value {
    let mut must: Vec<Value> = Vec::new();
    let text = query.text.trim();
    if !text.is_empty() && text != "*" {
        must.push(json!({
            "query_string": {"query": text, "default_operator": "AND"}
        }));
    }
    if let Some(ext) = file_type_of(text) {
        must.push(json!({"wildcard": {"key": format!("*{ext}")}}));
    }

    let mut filter: Vec<Value> = Vec::new();
    if !query.buckets.is_empty() {
        filter.push(json!({"terms": {"bucket": query.buckets}}));
    }

    let query_clause = if must.is_empty() && filter.is_empty() {
        json!({"match_all": {}})
    } else {
        json!({"bool": {"must": must, "filter": filter}})
    };

    json!({
        "query": query_clause,
        "size": query.limit,
        "sort": if text.is_empty() || text == "*" {
            json!([{"last_modified": {"order": "desc"}}])
        } else {
            json!(["_score"])
        },
    })
}

/// One parsed hit with the package it belongs to, when indexed.
pub struct EsHit {
    /// The object payload.
    pub object: ObjectHit,
    /// `(bucket, package_name)` when the document is a package entry.
    pub parent: Option<(String, String)>,
    /// Native relevance score.
    pub score: f64,
    /// Whether the document is a manifest (package-level) document.
    pub is_manifest: bool,
}

/// Parse the `hits.hits` array of a `_search` response.
pub fn parse_hits(body: &Value) -> Vec<EsHit> {
    let Some(hits) = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    hits.iter()
        .filter_map(|h| {
            let source = h.get("_source")?;
            let bucket = source.get("bucket").and_then(Value::as_str)?.to_string();
            let key = source
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let package = source
                .get("package_name")
                .and_then(Value::as_str)
                .map(|name| (bucket.clone(), name.to_string()));
            Some(EsHit {
                object: ObjectHit {
                    bucket,
                    key,
                    version_id: source
                        .get("version_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    size: source.get("size").and_then(Value::as_u64),
                    modified: source
                        .get("last_modified")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok()),
                },
                parent: package,
                score: h.get("_score").and_then(Value::as_f64).unwrap_or(0.0),
                is_manifest: source
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t == "manifest"),
            })
        })
        .collect()
}

/// The catalog-fronted `_search` client.
#[derive(Clone)]
pub struct EsClient {
    http: reqwest::Client,
    endpoint: String,
    deadline: Duration,
}

impl EsClient {
    /// Build a client for a catalog's search proxy.
    pub fn new(http: reqwest::Client, catalog_url: &str, deadline: Duration) -> Self {
        Self {
            http,
            endpoint: format!("{}/api/search/_search", catalog_url.trim_end_matches('/')),
            deadline,
        }
    }

    /// Run a search, returning parsed hits.
    pub async fn search(
        &self,
        query: &SearchQuery,
        bearer: Option<&str>,
    ) -> Result<Vec<EsHit>, QmcpError> {
        let body = build_query_body(query);
        let mut req = self
            .http
            .post(&self.endpoint)
            .timeout(self.deadline)
            .json(&body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let response = req.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::UpstreamUnavailable
            };
            QmcpError::new(kind, "search index is unreachable").with_source(e)
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                format!("search index returned {status}"),
            ));
        }
        let payload: Value = response.json().await.map_err(|e| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                "search index returned unparseable JSON",
            )
            .with_source(e)
        })?;
        Ok(parse_hits(&payload))
    }
}

/// Convert ES hits to ranked [`SearchHit`]s (object form).
pub fn to_search_hits(hits: Vec<EsHit>) -> Vec<SearchHit> {
    hits.into_iter()
        .map(|h| SearchHit::Object {
            hit: h.object,
            score: h.score,
            backend: SearchBackend::Elasticsearch,
        })
        .collect()
}

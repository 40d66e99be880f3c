// SPDX-License-Identifier: MIT OR Apache-2.0
//! The catalog GraphQL client: a thin request/response envelope over a
//! shared HTTP pool.  Bearer pass-through, per-call deadline, and a single
//! place where transport failures map into the taxonomy.

use qmcp_error::{ErrorKind, QmcpError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// A GraphQL request body: query text plus variables.
#[derive(Debug, Clone, Serialize)]
pub struct GraphqlRequest<'a> {
    /// Query or mutation document.
    pub query: &'a str,
    /// Variables object.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub variables: Value,
}

/// A GraphQL response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlResponse {
    /// Payload, when the operation produced one.
    #[serde(default)]
    pub data: Option<Value>,
    /// Errors, when any part of the operation failed.
    #[serde(default)]
    pub errors: Option<Vec<GraphqlErrorItem>>,
}

/// One error in a GraphQL response.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphqlErrorItem {
    /// Error message.
    pub message: String,
    /// Path of the failing field, when reported.
    #[serde(default)]
    pub path: Option<Vec<Value>>,
}

/// Client for one catalog's `/graphql` endpoint.
#[derive(Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    endpoint: String,
    deadline: Duration,
}

impl GraphqlClient {
    /// Build a client over a shared HTTP pool.
    pub fn new(http: reqwest::Client, catalog_url: &str, deadline: Duration) -> Self {
        Self {
            http,
            endpoint: format!("{}/graphql", catalog_url.trim_end_matches('/')),
            deadline,
        }
    }

    /// Execute a query or mutation and return the `data` payload.
    ///
    /// GraphQL-level errors become `UPSTREAM_UNAVAILABLE` unless the
    /// message marks absence (`not found`), which becomes `NOT_FOUND`.
    pub async fn execute(
        &self,
        query: &str,
        variables: Value,
        bearer: Option<&str>,
    ) -> Result<Value, QmcpError> {
        let body = GraphqlRequest { query, variables };
        let mut req = self.http.post(&self.endpoint).timeout(self.deadline).json(&body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let response = req.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::UpstreamUnavailable
            };
            QmcpError::new(kind, "catalog GraphQL endpoint is unreachable").with_source(e)
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(QmcpError::new(
                ErrorKind::PermissionDenied,
                "catalog refused the GraphQL request",
            )
            .with_context("status", status.as_u16()));
        }
        if !status.is_success() {
            return Err(QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                format!("catalog GraphQL returned {status}"),
            )
            .with_context("status", status.as_u16()));
        }

        let envelope: GraphqlResponse = response.json().await.map_err(|e| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                "catalog GraphQL response is not valid JSON",
            )
            .with_source(e)
        })?;

        if let Some(errors) = envelope.errors
            && let Some(first) = errors.first()
        {
            debug!(message = %first.message, "GraphQL operation reported errors");
            let kind = if first.message.to_ascii_lowercase().contains("not found") {
                ErrorKind::NotFound
            } else {
                ErrorKind::UpstreamUnavailable
            };
            return Err(QmcpError::new(kind, first.message.clone())
                .with_context("errors", errors.len()));
        }

        envelope.data.ok_or_else(|| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                "catalog GraphQL returned neither data nor errors",
            )
        })
    }
}

/// Walk `path` (dot-separated) into a value, failing with `NOT_FOUND` when
/// any step is missing or null.
pub fn require_path<'v>(data: &'v Value, path: &str) -> Result<&'v Value, QmcpError> {
    let mut current = data;
    for step in path.split('.') {
        current = match current.get(step) {
            Some(Value::Null) | None => {
                return Err(QmcpError::not_found(format!(
                    "catalog has no value at '{path}'"
                )));
            }
            Some(next) => next,
        };
    }
    Ok(current)
}

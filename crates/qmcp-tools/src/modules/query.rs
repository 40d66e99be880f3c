// SPDX-License-Identifier: MIT OR Apache-2.0
//! Search, Athena, and tabulator tools.

use super::parse_args;
use crate::descriptor::{ToolDescriptor, ToolEffect};
use crate::registry::ToolRegistry;
use qmcp_core::search::{ResultType, SearchQuery, SearchScope, normalize_bucket_filter};
use qmcp_dataplane::athena::QueryStatus;
use qmcp_dataplane::{AthenaQuerySpec, tabulator_database};
use qmcp_error::{ErrorKind, QmcpError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    scope: Option<SearchScope>,
    bucket: Option<String>,
    buckets: Option<Vec<String>>,
    #[serde(rename = "type")]
    result_type: Option<ResultType>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct AthenaExecuteArgs {
    query: String,
    workgroup: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
    max_results: Option<usize>,
}

/// Register search, Athena, and tabulator tools.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            module: "search".into(),
            action: "".into(),
            description: "Unified search across Elasticsearch, the catalog, and S3".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Free-text query; * lists by recency"},
                    "scope": {"type": "string", "enum": ["bucket", "package", "global"]},
                    "bucket": {"type": "string", "description": "Single bucket restriction"},
                    "buckets": {"type": "array", "items": {"type": "string"}},
                    "type": {"type": "string", "enum": ["packages", "objects", "both"]},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 1000},
                },
                "required": ["query"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                let args: SearchArgs = parse_args(args)?;
                let query = SearchQuery {
                    text: args.query,
                    scope: args.scope.unwrap_or_default(),
                    buckets: normalize_bucket_filter(
                        args.bucket.as_deref(),
                        args.buckets.as_deref(),
                    ),
                    result_type: args.result_type.unwrap_or_default(),
                    limit: args.limit.unwrap_or(50),
                };
                let outcome = deps.search.search(&ctx, &query).await?;
                Ok(serde_json::to_value(outcome).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "athena".into(),
            action: "query_execute".into(),
            description: "Run a SQL query through Athena and return the first result page"
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "SQL, submitted verbatim"},
                    "workgroup": {"type": "string"},
                    "catalog": {"type": "string", "description": "Data catalog, e.g. AwsDataCatalog"},
                    "schema": {"type": "string", "description": "Database; hyphenated names are fine"},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 1000},
                },
                "required": ["query"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                let args: AthenaExecuteArgs = parse_args(args)?;
                let runner = deps.athena_runner(&ctx).await;
                let spec = AthenaQuerySpec {
                    sql: args.query,
                    workgroup: args.workgroup,
                    catalog: args.catalog,
                    database: args.schema,
                };
                let execution_id = runner.start(&spec).await?;
                match runner.wait(&execution_id, ctx.cancel_token()).await? {
                    QueryStatus::Succeeded => {
                        let output = runner
                            .results(&execution_id, None, args.max_results.unwrap_or(100))
                            .await?;
                        Ok(serde_json::to_value(output).unwrap_or_default())
                    }
                    QueryStatus::Failed { reason } => Err(QmcpError::new(
                        ErrorKind::UpstreamUnavailable,
                        format!("query failed: {reason}"),
                    )
                    .with_context("execution_id", execution_id)),
                    QueryStatus::Cancelled => Err(QmcpError::new(
                        ErrorKind::Timeout,
                        "query was cancelled upstream",
                    )
                    .with_context("execution_id", execution_id)),
                    other => Err(QmcpError::internal(format!(
                        "wait returned a non-terminal state: {other:?}"
                    ))),
                }
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "athena".into(),
            action: "query_status".into(),
            description: "Check the state of an Athena execution".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "execution_id": {"type": "string"},
                },
                "required": ["execution_id"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    execution_id: String,
                }
                let args: Args = parse_args(args)?;
                let runner = deps.athena_runner(&ctx).await;
                let status = runner.status(&args.execution_id).await?;
                Ok(serde_json::to_value(status).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "athena".into(),
            action: "query_results".into(),
            description: "Page through results of a finished execution".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "execution_id": {"type": "string"},
                    "next": {"type": "string"},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 1000},
                },
                "required": ["execution_id"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    execution_id: String,
                    next: Option<String>,
                    max_results: Option<usize>,
                }
                let args: Args = parse_args(args)?;
                let runner = deps.athena_runner(&ctx).await;
                let output = runner
                    .results(
                        &args.execution_id,
                        args.next.as_deref(),
                        args.max_results.unwrap_or(100),
                    )
                    .await?;
                Ok(serde_json::to_value(output).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "athena".into(),
            action: "workgroups_list".into(),
            description: "List Athena workgroups visible to the caller".into(),
            schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, _args| {
            Box::pin(async move {
                let runner = deps.athena_runner(&ctx).await;
                let workgroups = runner.discover_workgroups().await?;
                let rows: Vec<_> = workgroups
                    .into_iter()
                    .map(|(name, enabled)| json!({"name": name, "enabled": enabled}))
                    .collect();
                Ok(json!({"workgroups": rows}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "tabulator".into(),
            action: "query_execute".into(),
            description: "Run SQL against the catalog's tabulator database (Athena-backed)"
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "workgroup": {"type": "string"},
                    "max_results": {"type": "integer", "minimum": 1, "maximum": 1000},
                },
                "required": ["query"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    query: String,
                    workgroup: Option<String>,
                    max_results: Option<usize>,
                }
                let args: Args = parse_args(args)?;
                let catalog_url = ctx.catalog_url().ok_or_else(|| {
                    QmcpError::new(
                        ErrorKind::ConfigInvalid,
                        "tabulator needs a catalog to discover its database",
                    )
                    .with_fix_hint("set QUILT_CATALOG_URL")
                })?;
                let database = tabulator_database(&deps.http, catalog_url).await?;
                let runner = deps.athena_runner(&ctx).await;
                let spec = AthenaQuerySpec {
                    sql: args.query,
                    workgroup: args.workgroup,
                    catalog: None,
                    database: Some(database.clone()),
                };
                let execution_id = runner.start(&spec).await?;
                match runner.wait(&execution_id, ctx.cancel_token()).await? {
                    QueryStatus::Succeeded => {
                        let output = runner
                            .results(&execution_id, None, args.max_results.unwrap_or(100))
                            .await?;
                        Ok(json!({"database": database, "output": output}))
                    }
                    QueryStatus::Failed { reason } => Err(QmcpError::new(
                        ErrorKind::UpstreamUnavailable,
                        format!("tabulator query failed: {reason}"),
                    )),
                    _ => Err(QmcpError::new(
                        ErrorKind::Timeout,
                        "tabulator query did not complete",
                    )),
                }
            })
        }),
    );
}

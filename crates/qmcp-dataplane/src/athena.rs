// SPDX-License-Identifier: MIT OR Apache-2.0
//! Athena query lifecycle: workgroup resolution, catalog-routed submission,
//! backoff polling, and typed result pagination.
//!
//! Hyphenated database names must travel in the `QueryExecutionContext` —
//! never as a `USE "schema"` statement prefix, because some engines do not
//! quote-parse hyphens.

use crate::backoff::Backoff;
use aws_sdk_athena::Client;
use aws_sdk_athena::error::ProvideErrorMetadata;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, WorkGroupState};
use qmcp_core::CancelToken;
use qmcp_error::{ErrorKind, QmcpError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ---------------------------------------------------------------------------
// Spec and routing
// ---------------------------------------------------------------------------

/// One Athena query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthenaQuerySpec {
    /// The SQL statement, submitted verbatim.
    pub sql: String,
    /// Explicit workgroup; wins over the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workgroup: Option<String>,
    /// Data catalog (e.g. `AwsDataCatalog`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// Database / schema name.  Hyphenated names are fine — they route
    /// through the execution context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

/// The statement and execution-context routing for a spec.
///
/// The statement passes through untouched; the catalog and database ride
/// the context.  Kept as a pure function so the no-`USE`-prefix invariant
/// is directly testable.
pub fn routing_for(spec: &AthenaQuerySpec) -> (String, Option<String>, Option<String>) {
    (
        spec.sql.trim().to_string(),
        spec.catalog.clone(),
        spec.database.clone(),
    )
}

/// Pick the workgroup: explicit → configured default → first `ENABLED`
/// discovered workgroup (sorted by name for determinism).
pub fn pick_workgroup(
    explicit: Option<&str>,
    configured: Option<&str>,
    discovered: &[(String, bool)],
) -> Result<String, QmcpError> {
    if let Some(wg) = explicit {
        return Ok(wg.to_string());
    }
    if let Some(wg) = configured {
        return Ok(wg.to_string());
    }
    let mut enabled: Vec<&String> = discovered
        .iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| name)
        .collect();
    enabled.sort();
    enabled.first().map(|s| s.to_string()).ok_or_else(|| {
        QmcpError::new(
            ErrorKind::NotFound,
            "no enabled Athena workgroup is visible to the caller",
        )
        .with_fix_hint("pass an explicit workgroup argument")
    })
}

// ---------------------------------------------------------------------------
// Status and polling
// ---------------------------------------------------------------------------

/// Observed execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryStatus {
    /// Waiting in the workgroup queue.
    Queued,
    /// Executing.
    Running,
    /// Finished successfully; results may be read.
    Succeeded,
    /// Finished with an engine error.
    Failed {
        /// Engine-reported reason.
        reason: String,
    },
    /// Cancelled upstream.
    Cancelled,
}

impl QueryStatus {
    /// Terminal states are the only ones results may be read after.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Cancelled)
    }
}

/// Poll `poll` until a terminal state, sleeping on the Athena backoff
/// schedule (200 ms doubling to a 5 s cap) between checks.
///
/// Cancellation is honored between polls: the wait aborts within one
/// backoff interval of the token firing, leaving the upstream execution in
/// whatever state it reaches on its own.
pub async fn wait_until_terminal<F, Fut>(
    mut poll: F,
    cancel: &CancelToken,
) -> Result<QueryStatus, QmcpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<QueryStatus, QmcpError>>,
{
    let mut backoff = Backoff::athena();
    loop {
        cancel.checkpoint()?;
        let status = poll().await?;
        if status.is_terminal() {
            return Ok(status);
        }
        tokio::select! {
            _ = tokio::time::sleep(backoff.next_delay()) => {}
            _ = cancel.cancelled() => {
                return Err(QmcpError::new(
                    ErrorKind::Timeout,
                    "query wait cancelled by the client",
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A result column, typed by what the engine reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column label.
    pub name: String,
    /// Engine type name (e.g. `varchar`, `bigint`).
    pub type_name: String,
}

/// One page of query results with typed rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    /// Execution id the page belongs to.
    pub execution_id: String,
    /// Column schema.
    pub columns: Vec<ColumnInfo>,
    /// Rows; each cell converted per the column type.
    pub rows: Vec<Vec<Value>>,
    /// Continuation token for the next page, when more exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// Convert one Athena datum to JSON per the engine-reported type.
pub fn datum_to_value(type_name: &str, raw: Option<&str>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    match type_name.to_ascii_lowercase().as_str() {
        "bigint" | "integer" | "int" | "smallint" | "tinyint" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw)),
        "double" | "float" | "real" | "decimal" => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw)),
        "boolean" => match raw {
            "true" => Value::from(true),
            "false" => Value::from(false),
            other => Value::from(other),
        },
        _ => Value::from(raw),
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Builds request-scoped Athena clients along the same credential chain as
/// the S3 factory.
#[derive(Debug, Clone, Default)]
pub struct AthenaClientFactory {
    /// AWS profile for the ambient chain.
    pub aws_profile: Option<String>,
}

impl AthenaClientFactory {
    /// Build a client for the given credential source.
    pub async fn client_for(&self, source: &qmcp_auth::CredentialSource) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = &self.aws_profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_athena::config::Builder::from(&sdk_config);
        if let qmcp_auth::CredentialSource::Bundle(bundle) = source {
            builder = builder.credentials_provider(aws_sdk_athena::config::Credentials::new(
                bundle.access_key_id.clone(),
                bundle.secret_access_key.clone(),
                Some(bundle.session_token.clone()),
                Some(bundle.expiration.into()),
                "quilt-jwt-exchange",
            ));
        }
        Client::from_conf(builder.build())
    }
}

/// Drives the Athena lifecycle against the real service.
pub struct AthenaRunner {
    client: Client,
    default_workgroup: Option<String>,
}

impl AthenaRunner {
    /// Wrap a client, with an optional configured default workgroup.
    pub fn new(client: Client, default_workgroup: Option<String>) -> Self {
        Self {
            client,
            default_workgroup,
        }
    }

    /// Discover workgroups visible to the caller as `(name, enabled)`.
    pub async fn discover_workgroups(&self) -> Result<Vec<(String, bool)>, QmcpError> {
        let out = self
            .client
            .list_work_groups()
            .send()
            .await
            .map_err(|e| map_athena_err(e, "list workgroups"))?;
        Ok(out
            .work_groups
            .unwrap_or_default()
            .into_iter()
            .filter_map(|wg| {
                let name = wg.name?;
                let enabled = matches!(wg.state, Some(WorkGroupState::Enabled));
                Some((name, enabled))
            })
            .collect())
    }

    /// Submit a query and return its execution id.
    pub async fn start(&self, spec: &AthenaQuerySpec) -> Result<String, QmcpError> {
        if spec.sql.trim().is_empty() {
            return Err(QmcpError::validation("query must not be empty"));
        }
        let workgroup = match &spec.workgroup {
            Some(wg) => wg.clone(),
            None => {
                let discovered = match self.default_workgroup {
                    Some(_) => Vec::new(),
                    None => self.discover_workgroups().await?,
                };
                pick_workgroup(None, self.default_workgroup.as_deref(), &discovered)?
            }
        };

        let (statement, catalog, database) = routing_for(spec);
        let mut context = QueryExecutionContext::builder();
        if let Some(catalog) = catalog {
            context = context.catalog(catalog);
        }
        if let Some(database) = database {
            context = context.database(database);
        }

        debug!(workgroup = %workgroup, "starting Athena query");
        let out = self
            .client
            .start_query_execution()
            .query_string(statement)
            .work_group(workgroup)
            .query_execution_context(context.build())
            .send()
            .await
            .map_err(|e| map_athena_err(e, "start query"))?;

        out.query_execution_id.ok_or_else(|| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                "Athena accepted the query but returned no execution id",
            )
        })
    }

    /// Fetch the current status of an execution.
    pub async fn status(&self, execution_id: &str) -> Result<QueryStatus, QmcpError> {
        let out = self
            .client
            .get_query_execution()
            .query_execution_id(execution_id)
            .send()
            .await
            .map_err(|e| map_athena_err(e, "get query execution"))?;
        let status = out
            .query_execution
            .and_then(|q| q.status)
            .ok_or_else(|| {
                QmcpError::new(ErrorKind::UpstreamUnavailable, "execution has no status")
            })?;
        let reason = status
            .state_change_reason
            .unwrap_or_else(|| "no reason reported".to_string());
        Ok(match status.state {
            Some(QueryExecutionState::Queued) => QueryStatus::Queued,
            Some(QueryExecutionState::Running) => QueryStatus::Running,
            Some(QueryExecutionState::Succeeded) => QueryStatus::Succeeded,
            Some(QueryExecutionState::Failed) => QueryStatus::Failed { reason },
            Some(QueryExecutionState::Cancelled) => QueryStatus::Cancelled,
            _ => QueryStatus::Running,
        })
    }

    /// Block until the execution reaches a terminal state, honoring the
    /// request's cancellation token.
    pub async fn wait(
        &self,
        execution_id: &str,
        cancel: &CancelToken,
    ) -> Result<QueryStatus, QmcpError> {
        wait_until_terminal(|| self.status(execution_id), cancel).await
    }

    /// Read one page of results.  Only valid after a `Succeeded` status.
    pub async fn results(
        &self,
        execution_id: &str,
        next: Option<&str>,
        max_results: usize,
    ) -> Result<QueryOutput, QmcpError> {
        let mut req = self
            .client
            .get_query_results()
            .query_execution_id(execution_id)
            .max_results(max_results.clamp(1, 1000) as i32);
        let first_page = next.is_none();
        if let Some(token) = next {
            req = req.next_token(token);
        }
        let out = req
            .send()
            .await
            .map_err(|e| map_athena_err(e, "get query results"))?;

        let result_set = out.result_set.ok_or_else(|| {
            QmcpError::new(ErrorKind::UpstreamUnavailable, "result set was empty")
        })?;
        let columns: Vec<ColumnInfo> = result_set
            .result_set_metadata()
            .map(|m| m.column_info())
            .unwrap_or_default()
            .iter()
            .map(|c| ColumnInfo {
                name: c.name().to_string(),
                type_name: c.r#type().to_string(),
            })
            .collect();

        let mut rows: Vec<Vec<Value>> = Vec::new();
        for (i, row) in result_set.rows().iter().enumerate() {
            let cells: Vec<Option<String>> = row
                .data()
                .iter()
                .map(|d| d.var_char_value().map(str::to_string))
                .collect();
            // The engine repeats the header as the first row of the first
            // page for CSV-backed results.
            if first_page && i == 0 && is_header_row(&cells, &columns) {
                continue;
            }
            rows.push(
                cells
                    .iter()
                    .enumerate()
                    .map(|(col, cell)| {
                        let type_name = columns
                            .get(col)
                            .map(|c| c.type_name.as_str())
                            .unwrap_or("varchar");
                        datum_to_value(type_name, cell.as_deref())
                    })
                    .collect(),
            );
        }

        Ok(QueryOutput {
            execution_id: execution_id.to_string(),
            columns,
            rows,
            next: out.next_token,
        })
    }
}

fn is_header_row(cells: &[Option<String>], columns: &[ColumnInfo]) -> bool {
    !columns.is_empty()
        && cells.len() == columns.len()
        && cells
            .iter()
            .zip(columns)
            .all(|(cell, col)| cell.as_deref() == Some(col.name.as_str()))
}

fn map_athena_err<E, R>(err: aws_sdk_athena::error::SdkError<E, R>, what: &str) -> QmcpError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("").to_string();
    let message = err.message().unwrap_or("request failed").to_string();
    let kind = match code.as_str() {
        "InvalidRequestException" => ErrorKind::ValidationFailed,
        "ResourceNotFoundException" | "MetadataException" => ErrorKind::NotFound,
        "AccessDeniedException" => ErrorKind::PermissionDenied,
        "TooManyRequestsException" => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UpstreamUnavailable,
    };
    QmcpError::new(kind, format!("{what}: {message}")).with_context("code", code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -- Routing -----------------------------------------------------------

    #[test]
    fn hyphenated_database_routes_via_context_not_use_prefix() {
        let spec = AthenaQuerySpec {
            sql: "SELECT 1".into(),
            workgroup: None,
            catalog: Some("AwsDataCatalog".into()),
            database: Some("udp-spec".into()),
        };
        let (statement, catalog, database) = routing_for(&spec);
        assert_eq!(statement, "SELECT 1");
        assert!(!statement.to_ascii_uppercase().starts_with("USE"));
        assert_eq!(catalog.as_deref(), Some("AwsDataCatalog"));
        assert_eq!(database.as_deref(), Some("udp-spec"));
    }

    #[test]
    fn statement_passes_through_trimmed_only() {
        let spec = AthenaQuerySpec {
            sql: "  SELECT a FROM t  ".into(),
            workgroup: None,
            catalog: None,
            database: Some("plain".into()),
        };
        assert_eq!(routing_for(&spec).0, "SELECT a FROM t");
    }

    // -- Workgroup resolution ----------------------------------------------

    #[test]
    fn explicit_workgroup_wins() {
        let got = pick_workgroup(Some("primary"), Some("cfg"), &[]).unwrap();
        assert_eq!(got, "primary");
    }

    #[test]
    fn configured_default_beats_discovery() {
        let got = pick_workgroup(None, Some("cfg"), &[("x".into(), true)]).unwrap();
        assert_eq!(got, "cfg");
    }

    #[test]
    fn discovery_picks_first_enabled_sorted() {
        let discovered = vec![
            ("zeta".into(), true),
            ("alpha".into(), false),
            ("beta".into(), true),
        ];
        let got = pick_workgroup(None, None, &discovered).unwrap();
        assert_eq!(got, "beta");
    }

    #[test]
    fn no_enabled_workgroup_is_not_found() {
        let err = pick_workgroup(None, None, &[("off".into(), false)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    // -- Polling -------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn wait_reaches_terminal_state() {
        let polls = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let cancel = CancelToken::new();
        let status = wait_until_terminal(
            move || {
                let p = p.clone();
                async move {
                    let n = p.fetch_add(1, Ordering::SeqCst);
                    Ok(if n < 3 {
                        QueryStatus::Running
                    } else {
                        QueryStatus::Succeeded
                    })
                }
            },
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(status, QueryStatus::Succeeded);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_surfaces_engine_failure() {
        let cancel = CancelToken::new();
        let status = wait_until_terminal(
            || async {
                Ok(QueryStatus::Failed {
                    reason: "SYNTAX_ERROR".into(),
                })
            },
            &cancel,
        )
        .await
        .unwrap();
        assert!(matches!(status, QueryStatus::Failed { reason } if reason == "SYNTAX_ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_between_polls() {
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            wait_until_terminal(|| async { Ok(QueryStatus::Running) }, &cancel_clone).await
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits_before_polling() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let polls = Arc::new(AtomicUsize::new(0));
        let p = polls.clone();
        let result = wait_until_terminal(
            move || {
                let p = p.clone();
                async move {
                    p.fetch_add(1, Ordering::SeqCst);
                    Ok(QueryStatus::Running)
                }
            },
            &cancel,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(polls.load(Ordering::SeqCst), 0, "no backend touch after cancel");
    }

    // -- Datum conversion -----------------------------------------------------

    #[test]
    fn datum_conversion_by_type() {
        assert_eq!(datum_to_value("bigint", Some("42")), serde_json::json!(42));
        assert_eq!(
            datum_to_value("double", Some("2.5")),
            serde_json::json!(2.5)
        );
        assert_eq!(
            datum_to_value("boolean", Some("true")),
            serde_json::json!(true)
        );
        assert_eq!(
            datum_to_value("varchar", Some("x")),
            serde_json::json!("x")
        );
        assert_eq!(datum_to_value("bigint", None), Value::Null);
    }

    #[test]
    fn unparseable_numerics_degrade_to_strings() {
        assert_eq!(
            datum_to_value("bigint", Some("not-a-number")),
            serde_json::json!("not-a-number")
        );
    }

    // -- Header skipping -------------------------------------------------------

    #[test]
    fn header_row_detected() {
        let columns = vec![
            ColumnInfo {
                name: "a".into(),
                type_name: "varchar".into(),
            },
            ColumnInfo {
                name: "b".into(),
                type_name: "bigint".into(),
            },
        ];
        assert!(is_header_row(
            &[Some("a".into()), Some("b".into())],
            &columns
        ));
        assert!(!is_header_row(
            &[Some("1".into()), Some("2".into())],
            &columns
        ));
    }

    #[test]
    fn status_terminality() {
        assert!(QueryStatus::Succeeded.is_terminal());
        assert!(QueryStatus::Cancelled.is_terminal());
        assert!(
            QueryStatus::Failed {
                reason: "x".into()
            }
            .is_terminal()
        );
        assert!(!QueryStatus::Queued.is_terminal());
        assert!(!QueryStatus::Running.is_terminal());
    }
}

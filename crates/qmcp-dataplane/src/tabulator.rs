// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tabulator database discovery.
//!
//! Tabulator queries run through the normal Athena lifecycle but target a
//! catalog-derived database named `quilt-<stack-prefix>-tabulator`.  The
//! stack prefix comes from the catalog's public `config.json`, which needs
//! no authentication.

use qmcp_error::{ErrorKind, QmcpError};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CatalogConfig {
    #[serde(alias = "stackPrefix", alias = "stack_prefix")]
    stack_prefix: Option<String>,
}

/// Derive the tabulator database name from a stack prefix.
pub fn database_for_prefix(stack_prefix: &str) -> String {
    format!("quilt-{stack_prefix}-tabulator")
}

/// Fetch the catalog's public `config.json` and derive the tabulator
/// database name.
pub async fn tabulator_database(
    http: &reqwest::Client,
    catalog_url: &str,
) -> Result<String, QmcpError> {
    let url = format!("{}/config.json", catalog_url.trim_end_matches('/'));
    let response = http.get(&url).send().await.map_err(|e| {
        QmcpError::new(
            ErrorKind::UpstreamUnavailable,
            "catalog config.json is unreachable",
        )
        .with_source(e)
    })?;
    if !response.status().is_success() {
        return Err(QmcpError::new(
            ErrorKind::UpstreamUnavailable,
            format!("catalog config.json returned {}", response.status()),
        ));
    }
    let config: CatalogConfig = response.json().await.map_err(|e| {
        QmcpError::new(
            ErrorKind::UpstreamUnavailable,
            "catalog config.json is not valid JSON",
        )
        .with_source(e)
    })?;
    let prefix = config.stack_prefix.ok_or_else(|| {
        QmcpError::new(
            ErrorKind::NotFound,
            "catalog config.json carries no stack prefix; tabulator is not deployed",
        )
        .with_fix_hint("query Athena directly with athena_query_execute")
    })?;
    Ok(database_for_prefix(&prefix))
}

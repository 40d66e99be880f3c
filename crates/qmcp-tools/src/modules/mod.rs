// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool implementations, grouped by module.

/// Catalog administration tools (graphql backend only).
pub mod admin;
/// Authentication posture and logout.
pub mod auth;
/// Bucket and object tools.
pub mod buckets;
/// Package lifecycle tools.
pub mod packaging;
/// Search, Athena, and tabulator tools.
pub mod query;
/// Legacy workflow bookkeeping tools.
pub mod workflow;

use qmcp_error::QmcpError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse schema-validated arguments into a typed struct.  A mismatch here
/// is a defect in the tool table, not caller error.
pub(crate) fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T, QmcpError> {
    serde_json::from_value(arguments)
        .map_err(|e| QmcpError::internal("validated arguments failed to parse").with_source(e))
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! A small read-only resource registry: server metadata and the tool
//! catalog, exposed as JSON resources.

use crate::app::ServerState;
use qmcp_core::{PROTOCOL_VERSION, SERVER_VERSION};
use qmcp_error::QmcpError;
use serde_json::{Value, json};
use std::sync::Arc;

const SERVER_INFO_URI: &str = "qmcp://server/info";
const TOOL_CATALOG_URI: &str = "qmcp://tools/catalog";

/// The `resources/list` payload.
pub fn list(_state: &Arc<ServerState>) -> Value {
    json!({
        "resources": [
            {
                "uri": SERVER_INFO_URI,
                "name": "server-info",
                "description": "Deployment mode, backend, and version of this broker",
                "mimeType": "application/json",
            },
            {
                "uri": TOOL_CATALOG_URI,
                "name": "tool-catalog",
                "description": "Every registered tool with its parameter schema",
                "mimeType": "application/json",
            },
        ],
    })
}

/// The `resources/read` payload for one URI.
pub fn read(state: &Arc<ServerState>, uri: &str) -> Result<Value, QmcpError> {
    let text = match uri {
        SERVER_INFO_URI => json!({
            "name": "quilt-mcp",
            "version": SERVER_VERSION,
            "protocol_version": PROTOCOL_VERSION,
            "deployment": state.config.deployment,
            "backend": state.config.backend,
            "transport": state.config.transport,
            "catalog": state.config.catalog_url,
            "tool_count": state.registry.len(),
        })
        .to_string(),
        TOOL_CATALOG_URI => {
            let tools: Vec<Value> = state
                .registry
                .list(false)
                .into_iter()
                .map(|d| {
                    json!({
                        "name": d.name(),
                        "description": d.description,
                        "effect": d.effect,
                        "schema": d.schema,
                    })
                })
                .collect();
            json!({"tools": tools}).to_string()
        }
        other => {
            return Err(QmcpError::not_found(format!("no resource at '{other}'"))
                .with_fix_hint("call resources/list for the available set"));
        }
    };
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": "application/json",
            "text": text,
        }],
    }))
}

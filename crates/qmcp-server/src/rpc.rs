// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-RPC 2.0 framing and MCP method handling.
//!
//! Both transports funnel into [`handle_request`]; the only differences
//! between stdio and HTTP are framing and concurrency.

use crate::app::ServerState;
use qmcp_core::envelope::ToolResult;
use qmcp_core::{PROTOCOL_VERSION, RequestContext, SERVER_VERSION};
use qmcp_error::{ErrorKind, FailureEnvelope, QmcpError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    #[serde(default)]
    pub jsonrpc: String,
    /// Request id, echoed back; `null` for notifications.
    #[serde(default)]
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Mirrors the request id.
    pub id: Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A JSON-RPC error object.  `data` carries the broker's stable failure
/// envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// One-sentence message.
    pub message: String,
    /// The structured failure envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FailureEnvelope>,
}

/// JSON-RPC code for a broker error kind.
pub fn rpc_code(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::MethodNotFound => -32601,
        ErrorKind::ValidationFailed => -32602,
        ErrorKind::ProtocolMismatch => -32600,
        ErrorKind::Internal => -32603,
        // Application-level kinds share the implementation-defined band.
        _ => -32000,
    }
}

impl RpcResponse {
    /// A success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A failure response from a broker error.
    pub fn failure(id: Value, err: QmcpError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code: rpc_code(err.kind),
                message: err.message.clone(),
                data: Some((&err).into()),
            }),
        }
    }

    /// A parse-error response (no id known).
    pub fn parse_error(detail: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Value::Null,
            result: None,
            error: Some(RpcError {
                code: -32700,
                message: format!("request is not valid JSON-RPC: {detail}"),
                data: None,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Method dispatch
// ---------------------------------------------------------------------------

/// Handle one request against the server state.
///
/// `ctx` carries the caller's validated identity and cancellation token;
/// the transport built it before calling in.
pub async fn handle_request(
    state: &Arc<ServerState>,
    ctx: RequestContext,
    request: RpcRequest,
) -> RpcResponse {
    let id = request.id.clone();
    debug!(method = %request.method, request_id = %ctx.request_id(), "rpc request");

    match request.method.as_str() {
        "initialize" => RpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "quilt-mcp", "version": SERVER_VERSION},
                "capabilities": {
                    "tools": {"listChanged": false},
                    "resources": {"listChanged": false},
                },
            }),
        ),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => {
            let show_advanced = request
                .params
                .get("show_advanced")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let tools: Vec<Value> = state
                .registry
                .list(show_advanced)
                .into_iter()
                .map(|d| {
                    json!({
                        "name": d.name(),
                        "description": d.description,
                        "inputSchema": d.schema,
                    })
                })
                .collect();
            RpcResponse::success(id, json!({"tools": tools}))
        }
        "tools/call" => {
            let name = match request.params.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => {
                    return RpcResponse::failure(
                        id,
                        QmcpError::validation("tools/call needs a 'name' parameter"),
                    );
                }
            };
            let arguments = request
                .params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let result = qmcp_tools::dispatch(
                &state.registry,
                state.deps.clone(),
                ctx,
                &name,
                arguments,
            )
            .await;
            RpcResponse::success(id, tool_result_to_mcp(result))
        }
        "resources/list" => RpcResponse::success(id, crate::resources::list(state)),
        "resources/read" => {
            let uri = request
                .params
                .get("uri")
                .and_then(Value::as_str)
                .unwrap_or_default();
            match crate::resources::read(state, uri) {
                Ok(contents) => RpcResponse::success(id, contents),
                Err(err) => RpcResponse::failure(id, err),
            }
        }
        other => RpcResponse::failure(
            id,
            QmcpError::new(
                ErrorKind::MethodNotFound,
                format!("unknown method '{other}'"),
            ),
        ),
    }
}

/// Frame a tool result as MCP `tools/call` content.
pub fn tool_result_to_mcp(result: ToolResult) -> Value {
    match result {
        ToolResult::Success { result } => json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string(&result).unwrap_or_default(),
            }],
            "isError": false,
        }),
        ToolResult::Error { error } => json!({
            "content": [{
                "type": "text",
                "text": serde_json::to_string(&error).unwrap_or_default(),
            }],
            "isError": true,
        }),
    }
}

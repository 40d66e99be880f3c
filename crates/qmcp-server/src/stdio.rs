// SPDX-License-Identifier: MIT OR Apache-2.0
//! The stdio transport: newline-delimited JSON-RPC over stdin/stdout,
//! strictly serial — one request at a time, responses in arrival order.

use crate::app::ServerState;
use crate::rpc::{RpcRequest, RpcResponse, handle_request};
use qmcp_core::CancelToken;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Decode one line into a request.
pub fn decode_line(line: &str) -> Result<RpcRequest, String> {
    serde_json::from_str(line).map_err(|e| e.to_string())
}

/// Encode a response as a newline-terminated JSON string.
pub fn encode_response(response: &RpcResponse) -> String {
    let mut out = serde_json::to_string(response).unwrap_or_else(|_| {
        // Serialization of our own types does not fail; keep the frame
        // well-formed regardless.
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"encode failed"}}"#
            .to_string()
    });
    out.push('\n');
    out
}

/// Run the serial loop until stdin closes.
pub async fn run(state: Arc<ServerState>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("stdio transport ready");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_line(&line) {
            Ok(request) => serve_one(&state, request).await,
            Err(detail) => {
                debug!(error = %detail, "unparseable frame");
                RpcResponse::parse_error(&detail)
            }
        };
        stdout.write_all(encode_response(&response).as_bytes()).await?;
        stdout.flush().await?;
    }
    info!("stdin closed; shutting down");
    Ok(())
}

async fn serve_one(state: &Arc<ServerState>, request: RpcRequest) -> RpcResponse {
    // Bearer tokens ride inside params on stdio (there are no headers).
    let bearer = request
        .params
        .get("_meta")
        .and_then(|m| m.get("authorization"))
        .and_then(serde_json::Value::as_str)
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    let needs_credentials = request.method == "tools/call";
    let id = request.id.clone();
    match state
        .build_context(bearer.as_deref(), CancelToken::new(), needs_credentials)
        .await
    {
        Ok(ctx) => handle_request(state, ctx, request).await,
        Err(err) => RpcResponse::failure(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmcp_config::{DeploymentMode, Overrides, resolve};
    use serde_json::json;

    fn state() -> Arc<ServerState> {
        let config = resolve(
            Overrides {
                deployment: Some(DeploymentMode::Legacy),
                ..Default::default()
            },
            Overrides::default(),
        )
        .unwrap();
        ServerState::build(config, None)
    }

    #[test]
    fn decode_rejects_non_json() {
        assert!(decode_line("not json").is_err());
    }

    #[test]
    fn encode_terminates_with_newline() {
        let framed = encode_response(&RpcResponse::success(json!(1), json!({})));
        assert!(framed.ends_with('\n'));
        assert!(!framed.trim_end().contains('\n'), "one frame per line");
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let request = decode_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        let response = serve_one(&state(), request).await;
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["id"], 1);
        assert!(v.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let request =
            decode_line(r#"{"jsonrpc":"2.0","id":2,"method":"bogus/verb"}"#).unwrap();
        let response = serve_one(&state(), request).await;
        let v = serde_json::to_value(&response).unwrap();
        assert_eq!(v["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn tools_list_names_tools() {
        let request = decode_line(r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#).unwrap();
        let response = serve_one(&state(), request).await;
        let v = serde_json::to_value(&response).unwrap();
        let tools = v["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "packaging_create"));
        // Legacy deployment carries the workflow tools.
        assert!(tools.iter().any(|t| t["name"] == "workflow_create"));
    }

    #[tokio::test]
    async fn malformed_tool_arguments_fail_validation_without_backend_io() {
        let request = decode_line(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"packaging_browse","arguments":{"name":123}}}"#,
        )
        .unwrap();
        let response = serve_one(&state(), request).await;
        let v = serde_json::to_value(&response).unwrap();
        // Tool failures are framed as MCP error content, not RPC errors.
        assert_eq!(v["result"]["isError"], true);
        assert!(
            v["result"]["content"][0]["text"]
                .as_str()
                .unwrap()
                .contains("VALIDATION_FAILED")
        );
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-crate auth invariants: strict-mode refusals, signature checks,
//! and validation failures that never touch a backend.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use qmcp_config::{DeploymentMode, Overrides, resolve};
use qmcp_core::CancelToken;
use qmcp_server::{RpcRequest, ServerState, handle_request};
use serde_json::{Value, json};
use std::sync::Arc;

const SECRET: &str = "integration-secret";

fn state(require_jwt: bool, catalog_url: Option<String>) -> Arc<ServerState> {
    let config = resolve(
        Overrides {
            deployment: Some(DeploymentMode::Legacy),
            catalog_url,
            require_jwt: Some(require_jwt),
            jwt_secret: Some(SECRET.into()),
            ..Default::default()
        },
        Overrides::default(),
    )
    .unwrap();
    ServerState::build(config, Some(SECRET.into()))
}

fn sign(secret: &str, sub: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &json!({"sub": sub, "exp": Utc::now().timestamp() + 3600}),
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

fn rpc(method: &str, params: Value) -> RpcRequest {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    }))
    .unwrap()
}

async fn call_tool(
    state: &Arc<ServerState>,
    bearer: Option<&str>,
    name: &str,
    arguments: Value,
) -> Value {
    let outcome = state
        .build_context(bearer, CancelToken::new(), true)
        .await;
    match outcome {
        Ok(ctx) => {
            let response = handle_request(
                state,
                ctx,
                rpc("tools/call", json!({"name": name, "arguments": arguments})),
            )
            .await;
            serde_json::to_value(&response).unwrap()
        }
        Err(err) => serde_json::to_value(&qmcp_server::RpcResponse::failure(json!(1), err))
            .unwrap(),
    }
}

fn envelope_kind(response: &Value) -> String {
    // Either an RPC-level failure (context construction) or MCP error
    // content (tool dispatch).
    if let Some(kind) = response
        .pointer("/error/data/kind")
        .and_then(Value::as_str)
    {
        return kind.to_string();
    }
    let text = response
        .pointer("/result/content/0/text")
        .and_then(Value::as_str)
        .expect("tool responses carry text content");
    let inner: Value = serde_json::from_str(text).unwrap();
    inner["kind"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn strict_mode_without_token_fails_every_tool_action() {
    let state = state(true, None);
    for tool in ["auth_status", "buckets_list", "packaging_list", "search"] {
        let args = if tool == "search" {
            json!({"query": "x"})
        } else {
            json!({})
        };
        let response = call_tool(&state, None, tool, args).await;
        assert_eq!(
            envelope_kind(&response),
            "AUTH_NO_CREDENTIALS",
            "tool {tool} must refuse in strict mode"
        );
    }
}

#[tokio::test]
async fn bad_signature_fails_regardless_of_other_configuration() {
    for require_jwt in [false, true] {
        let state = state(require_jwt, None);
        let forged = sign("some-other-secret", "mallory");
        let response = call_tool(&state, Some(forged.as_str()), "auth_status", json!({})).await;
        assert_eq!(envelope_kind(&response), "AUTH_INVALID");
    }
}

#[tokio::test]
async fn malformed_arguments_fail_without_touching_any_backend() {
    // A catalog URL that cannot resolve: any backend touch would error
    // with UPSTREAM_UNAVAILABLE instead of VALIDATION_FAILED.
    let state = state(false, Some("http://127.0.0.1:1".into()));
    let cases = [
        ("packaging_browse", json!({"name": 7})),
        ("packaging_create", json!({"name": "p"})),
        ("buckets_objects_list", json!({})),
        ("search", json!({"query": "x", "limit": 0})),
        ("bucket_object_text", json!({"bucket": "b"})),
    ];
    for (tool, args) in cases {
        let response = call_tool(&state, None, tool, args).await;
        assert_eq!(
            envelope_kind(&response),
            "VALIDATION_FAILED",
            "tool {tool} must validate before dispatching"
        );
    }
}

#[tokio::test]
async fn valid_token_reaches_the_tool_layer() {
    let state = state(false, None);
    let token = sign(SECRET, "alice");
    let response = call_tool(&state, Some(token.as_str()), "auth_status", json!({})).await;
    let text = response
        .pointer("/result/content/0/text")
        .and_then(Value::as_str)
        .unwrap();
    let inner: Value = serde_json::from_str(text).unwrap();
    assert_eq!(inner["logged_in"], true);
    assert_eq!(inner["subject"], "alice");
}

#[tokio::test]
async fn unknown_tool_maps_to_method_not_found_envelope() {
    let state = state(false, None);
    let response = call_tool(&state, None, "no_such_tool", json!({})).await;
    assert_eq!(envelope_kind(&response), "METHOD_NOT_FOUND");
}

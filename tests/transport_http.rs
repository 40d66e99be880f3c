// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP transport behavior under load: health stays fast while slow tool
//! calls saturate the server.

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use qmcp_config::{DeploymentMode, Overrides, resolve};
use qmcp_core::PROTOCOL_VERSION;
use qmcp_server::{ServerState, build_app};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn state(catalog_url: String) -> Arc<ServerState> {
    let config = resolve(
        Overrides {
            deployment: Some(DeploymentMode::Remote),
            catalog_url: Some(catalog_url),
            service_timeout_secs: Some(8),
            ..Default::default()
        },
        Overrides::default(),
    )
    .unwrap();
    ServerState::build(config, None)
}

fn mcp_request(body: Value) -> Request<Body> {
    Request::post("/mcp")
        .header("content-type", "application/json")
        .header("mcp-protocol-version", PROTOCOL_VERSION)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_stays_fast_while_slow_tool_calls_are_in_flight() {
    let server = MockServer::start().await;
    // The catalog answers bucket queries slowly; tool calls pile up on it.
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!({"data": {"bucketConfigs": []}})),
        )
        .mount(&server)
        .await;

    let state = state(server.uri());
    let app = build_app(state);

    // 100 concurrent slow tool calls.
    let mut in_flight = Vec::new();
    for _ in 0..100 {
        let app = app.clone();
        in_flight.push(tokio::spawn(async move {
            app.oneshot(mcp_request(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "buckets_list", "arguments": {}},
            })))
            .await
            .unwrap()
        }));
    }
    // Give the batch a moment to reach the catalog.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let response = app
        .clone()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 200);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert!(
        elapsed < Duration::from_millis(100),
        "healthz took {elapsed:?} under load"
    );

    for handle in in_flight {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn tool_calls_carry_uniform_envelopes_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let state = state(server.uri());
    let app = build_app(state);
    let response = app
        .oneshot(mcp_request(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {"name": "buckets_list", "arguments": {}},
        })))
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["result"]["isError"], true);
    let text = body["result"]["content"][0]["text"].as_str().unwrap();
    let envelope: Value = serde_json::from_str(text).unwrap();
    assert_eq!(envelope["kind"], "UPSTREAM_UNAVAILABLE");
    assert_eq!(envelope["retriable"], true);
    assert!(envelope["message"].is_string());
}

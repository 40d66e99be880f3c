// SPDX-License-Identifier: MIT OR Apache-2.0
//! The HTTP transport: `POST /mcp` with JSON or SSE responses, health
//! routes, session-id round-trip, and request-id/logging middleware.
//!
//! Health endpoints never consult downstream backends — they prove only
//! that the process is up and listening.  `/mcp/*` stays reserved for the
//! protocol.

use crate::app::ServerState;
use crate::rpc::{RpcRequest, RpcResponse, handle_request};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use qmcp_core::{CancelToken, PROTOCOL_VERSION, SERVER_VERSION};
use qmcp_error::{ErrorKind, QmcpError};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::once;
use tracing::info;
use uuid::Uuid;

/// Header carrying the MCP protocol revision.  Required on `/mcp`.
pub const PROTOCOL_HEADER: &str = "mcp-protocol-version";
/// Header correlating requests of one logical session.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Build the router with all routes and middleware.
pub fn build_app(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_endpoint))
        .route("/health", get(|| async { health("/health") }))
        .route("/healthz", get(|| async { health("/healthz") }))
        .route("/", get(|| async { health("/") }))
        .layer(axum::middleware::from_fn(request_log_middleware))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// The uniform health body.  No backend is consulted.
fn health(route: &str) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "route": route,
        "version": SERVER_VERSION,
        "transport": "http",
    }))
}

/// Request-id + structured request logging, in one layer.
async fn request_log_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();
    let request_id = Uuid::new_v4();

    let mut resp = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );
    resp
}

/// Cancels the request token when the handler future is dropped (client
/// disconnect included).
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn mcp_endpoint(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let wants_sse = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    let response = serve_mcp(&state, &headers, body).await;
    let status = if response.error.is_some() {
        // JSON-RPC errors still ride a 200 except for protocol-layer
        // rejections.
        match response.error.as_ref().map(|e| e.code) {
            Some(-32600) => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    } else {
        StatusCode::OK
    };

    let mut http_response = if wants_sse {
        let payload = serde_json::to_string(&response).unwrap_or_default();
        let stream = once(Ok::<_, Infallible>(
            SseEvent::default().event("message").data(payload),
        ));
        Sse::new(stream).into_response()
    } else {
        (status, Json(serde_json::to_value(&response).unwrap_or_default())).into_response()
    };

    if let Ok(value) = HeaderValue::from_str(&session_id) {
        http_response.headers_mut().insert(SESSION_HEADER, value);
    }
    http_response
}

async fn serve_mcp(
    state: &Arc<ServerState>,
    headers: &HeaderMap,
    body: Value,
) -> RpcResponse {
    let id = body.get("id").cloned().unwrap_or(Value::Null);

    if headers.get(PROTOCOL_HEADER).is_none() {
        return RpcResponse::failure(
            id,
            QmcpError::new(
                ErrorKind::ProtocolMismatch,
                format!("missing required {PROTOCOL_HEADER} header"),
            )
            .with_fix_hint(format!("send {PROTOCOL_HEADER}: {PROTOCOL_VERSION}")),
        );
    }

    let request: RpcRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return RpcResponse::parse_error(&e.to_string()),
    };

    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = CancelToken::new();
    let _guard = CancelOnDrop(token.clone());
    let needs_credentials = request.method == "tools/call";
    match state
        .build_context(bearer.as_deref(), token, needs_credentials)
        .await
    {
        Ok(ctx) => handle_request(state, ctx, request).await,
        Err(err) => RpcResponse::failure(id, err),
    }
}

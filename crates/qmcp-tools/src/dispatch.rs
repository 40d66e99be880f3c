// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool dispatch with panic containment.
//!
//! The dispatcher is the boundary where programming errors stop: a panic
//! inside a tool implementation becomes an `INTERNAL` failure envelope, and
//! no error of any shape escapes as anything but a [`ToolResult`].

use crate::deps::ToolDeps;
use crate::registry::ToolRegistry;
use futures::FutureExt;
use qmcp_core::RequestContext;
use qmcp_core::envelope::ToolResult;
use qmcp_error::QmcpError;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info};

/// A boxed tool future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, QmcpError>> + Send>>;

/// A tool implementation: dependencies + request context + validated
/// arguments → result payload.
pub type ToolHandler =
    Arc<dyn Fn(Arc<ToolDeps>, RequestContext, Value) -> HandlerFuture + Send + Sync>;

/// Dispatch one `tools/call`.
///
/// Order of checks: strict-mode auth posture, then schema validation
/// (before any backend is touched), then the handler under panic
/// containment.
pub async fn dispatch(
    registry: &ToolRegistry,
    deps: Arc<ToolDeps>,
    ctx: RequestContext,
    name: &str,
    arguments: Value,
) -> ToolResult {
    if deps.config.require_jwt && ctx.claims().is_none() {
        return ToolResult::failure(QmcpError::new(
            qmcp_error::ErrorKind::AuthNoCredentials,
            "strict mode is enabled and the request carries no validated token",
        ));
    }

    let (descriptor, handler) = match registry.prepare(name, &arguments) {
        Ok(prepared) => prepared,
        Err(err) => return ToolResult::failure(err),
    };

    info!(
        tool = %name,
        request_id = %ctx.request_id(),
        effect = ?descriptor.effect,
        "dispatching tool call"
    );

    let outcome = AssertUnwindSafe(handler(deps, ctx, arguments))
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(result)) => ToolResult::success(result),
        Ok(Err(err)) => ToolResult::failure(err),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "opaque panic payload".to_string());
            let mut truncated = detail;
            truncated.truncate(200);
            error!(tool = %name, detail = %truncated, "tool implementation panicked");
            ToolResult::failure(
                QmcpError::internal(format!("tool '{name}' crashed"))
                    .with_context("panic", truncated),
            )
        }
    }
}

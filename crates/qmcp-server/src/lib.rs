// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-server
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The MCP transports (stdio and HTTP) and the server wiring: per-request
//! context construction, JSON-RPC method handling, health endpoints, and
//! the read-only resource registry.

/// Server state and per-request context construction.
pub mod app;
/// The HTTP transport.
pub mod http;
/// The read-only resource registry.
pub mod resources;
/// JSON-RPC framing and MCP method handling.
pub mod rpc;
/// The stdio transport.
pub mod stdio;

pub use app::ServerState;
pub use http::build_app;
pub use rpc::{RpcRequest, RpcResponse, handle_request};

// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-backend-graphql
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! [`QuiltOps`](qmcp_ops::QuiltOps) over the catalog's GraphQL endpoint:
//! bucket configs, package queries, the `packageConstruct` mutation, and the
//! admin protocol with its `{Success | InvalidInput | OperationError}`
//! result unions.

/// Admin mutations (users, roles, policies, SSO).
mod admin;
/// The QuiltOps implementation.
mod backend;
/// The GraphQL request/response envelope.
pub mod client;

pub use backend::GraphqlBackend;
pub use client::{GraphqlClient, require_path};

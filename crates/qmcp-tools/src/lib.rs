// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-tools
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The tool-module surface: descriptors, the immutable registry with
//! JSON-Schema argument validation, panic-contained dispatch, and the tool
//! implementations themselves.

/// Shared handler dependencies.
pub mod deps;
/// Tool descriptors and discovery filtering.
pub mod descriptor;
/// Dispatch with panic containment.
pub mod dispatch;
/// The tool implementations, grouped by module.
pub mod modules;
/// The immutable tool registry.
pub mod registry;
/// In-memory workflow records (legacy mode).
pub mod workflow;

pub use deps::ToolDeps;
pub use descriptor::{ToolDescriptor, ToolEffect};
pub use dispatch::{ToolHandler, dispatch};
pub use registry::{EXCLUDED_TOOLS, ToolRegistry};
pub use workflow::{WorkflowRecord, WorkflowStatus, WorkflowStore};

use qmcp_config::ServerConfig;

/// Build the full registry for a resolved configuration.
///
/// Legacy-only tools (workflow records) are registered solely in legacy
/// mode; everything else is always present.  The registry is immutable
/// afterwards.
pub fn build_registry(config: &ServerConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    modules::auth::register(&mut registry);
    modules::buckets::register(&mut registry);
    modules::packaging::register(&mut registry);
    modules::query::register(&mut registry);
    modules::admin::register(&mut registry);
    if config.deployment == qmcp_config::DeploymentMode::Legacy {
        modules::workflow::register(&mut registry);
    }
    registry
}

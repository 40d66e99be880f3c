// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool registry: populated once at startup, immutable afterwards.
//!
//! Argument validation happens here, against each tool's full schema (the
//! one that still carries `[ADVANCED]`/`[INTERNAL]` fields), before any
//! backend is touched.

use crate::descriptor::ToolDescriptor;
use crate::dispatch::ToolHandler;
use jsonschema::Validator;
use qmcp_error::{ErrorKind, QmcpError};
use serde_json::Value;
use std::collections::BTreeMap;

/// Tool names disabled regardless of registration.
///
/// `tabulator_query_rest` is the legacy REST-ish tabulator path; some
/// deployments answer it with 405, so only the Athena-backed variant is
/// exposed.
pub const EXCLUDED_TOOLS: &[&str] = &["tabulator_query_rest", "workflow_orchestrate"];

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: Validator,
    handler: ToolHandler,
}

/// The immutable tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Silently skipped when the name sits on the
    /// exclusion list.  Panics on a malformed schema — that is a defect in
    /// the tool table, not a runtime condition.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: ToolHandler) {
        let name = descriptor.name();
        if EXCLUDED_TOOLS.contains(&name.as_str()) {
            return;
        }
        let validator = jsonschema::validator_for(&descriptor.schema)
            .unwrap_or_else(|e| panic!("tool '{name}' has an invalid schema: {e}"));
        self.tools.insert(
            name,
            RegisteredTool {
                descriptor,
                validator,
                handler,
            },
        );
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors for `tools/list`.  The default listing strips tagged
    /// fields; `show_advanced` exposes the full schemas.
    pub fn list(&self, show_advanced: bool) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| {
                let mut descriptor = tool.descriptor.clone();
                if !show_advanced {
                    descriptor.schema = tool.descriptor.public_schema();
                }
                descriptor
            })
            .collect()
    }

    /// Look up a tool, validate `arguments` against its schema, and return
    /// the handler.  Validation failures never reach a backend.
    pub fn prepare(
        &self,
        name: &str,
        arguments: &Value,
    ) -> Result<(&ToolDescriptor, ToolHandler), QmcpError> {
        let tool = self.tools.get(name).ok_or_else(|| {
            QmcpError::new(
                ErrorKind::MethodNotFound,
                format!("no tool named '{name}'"),
            )
            .with_fix_hint("call tools/list for the available set")
        })?;

        if let Err(error) = tool.validator.validate(arguments) {
            return Err(QmcpError::new(
                ErrorKind::ValidationFailed,
                format!("arguments rejected: {error}"),
            )
            .with_context("tool", name));
        }
        Ok((&tool.descriptor, tool.handler.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ToolEffect;
    use serde_json::json;
    use std::sync::Arc;

    fn noop_handler() -> ToolHandler {
        Arc::new(|_deps, _ctx, _args| Box::pin(async { Ok(json!({"ok": true})) }))
    }

    fn descriptor(module: &str, action: &str) -> ToolDescriptor {
        ToolDescriptor {
            module: module.into(),
            action: action.into(),
            description: "test tool".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "minimum": 1},
                    "debug": {"type": "boolean", "description": "[INTERNAL] debugging"},
                },
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        }
    }

    #[test]
    fn listing_is_sorted_and_filtered() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("buckets", "list"), noop_handler());
        registry.register(descriptor("auth", "status"), noop_handler());
        let listed = registry.list(false);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name(), "auth_status");
        assert!(listed[0].schema["properties"].get("debug").is_none());
    }

    #[test]
    fn advanced_listing_keeps_tagged_fields() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("buckets", "list"), noop_handler());
        let listed = registry.list(true);
        assert!(listed[0].schema["properties"].get("debug").is_some());
    }

    #[test]
    fn unknown_tool_is_method_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.prepare("missing_tool", &json!({})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MethodNotFound);
    }

    #[test]
    fn malformed_arguments_fail_validation() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("buckets", "list"), noop_handler());
        let err = registry
            .prepare("buckets_list", &json!({"limit": 0}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("buckets", "list"), noop_handler());
        let err = registry
            .prepare("buckets_list", &json!({"surprise": 1}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn hidden_fields_are_still_accepted_on_calls() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("buckets", "list"), noop_handler());
        registry
            .prepare("buckets_list", &json!({"debug": true}))
            .expect("tagged fields validate against the full schema");
    }

    #[test]
    fn excluded_names_never_register() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("tabulator", "query_rest"), noop_handler());
        assert!(registry.is_empty());
    }
}

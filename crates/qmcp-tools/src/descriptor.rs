// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool descriptors and discovery filtering.
//!
//! A tool is `module_action` (e.g. `packaging_create`) plus a JSON-Schema
//! parameter contract.  Fields whose descriptions carry an `[ADVANCED]` or
//! `[INTERNAL]` tag are accepted on calls but hidden from the default
//! `tools/list`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a tool does to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    /// Reads state.
    Read,
    /// Creates new state.
    Create,
    /// Mutates existing state.
    Update,
    /// Removes state.
    Remove,
    /// Catalog administration.
    Admin,
}

/// A registered tool's public description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Module the action belongs to (e.g. `packaging`).
    pub module: String,
    /// The verb (e.g. `create`).
    pub action: String,
    /// One-sentence help text.
    pub description: String,
    /// JSON-Schema parameter contract.
    pub schema: Value,
    /// The tool's effect class.
    pub effect: ToolEffect,
    /// Deployment requirements (e.g. `legacy`, `graphql`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
}

impl ToolDescriptor {
    /// The wire name, `module_action` — or just the module for a
    /// single-action module (the `search` tool).
    pub fn name(&self) -> String {
        if self.action.is_empty() {
            self.module.clone()
        } else {
            format!("{}_{}", self.module, self.action)
        }
    }

    /// The schema with `[ADVANCED]`/`[INTERNAL]` fields removed — what the
    /// default `tools/list` advertises.
    pub fn public_schema(&self) -> Value {
        strip_tagged_fields(&self.schema)
    }
}

/// Whether a property description hides the field from default discovery.
fn is_hidden(description: &str) -> bool {
    description.contains("[ADVANCED]") || description.contains("[INTERNAL]")
}

/// Remove hidden properties from an object schema (recursively).
pub fn strip_tagged_fields(schema: &Value) -> Value {
    let mut out = schema.clone();
    if let Some(properties) = out
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        let hidden: Vec<String> = properties
            .iter()
            .filter(|(_, prop)| {
                prop.get("description")
                    .and_then(Value::as_str)
                    .is_some_and(is_hidden)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in &hidden {
            properties.remove(name);
        }
        for prop in properties.values_mut() {
            *prop = strip_tagged_fields(prop);
        }
        if let Some(required) = out.get_mut("required").and_then(Value::as_array_mut) {
            required.retain(|r| {
                r.as_str()
                    .map(|name| !hidden.iter().any(|h| h == name))
                    .unwrap_or(true)
            });
        }
    }
    out
}

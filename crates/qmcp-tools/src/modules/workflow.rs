// SPDX-License-Identifier: MIT OR Apache-2.0
//! Legacy workflow bookkeeping tools.
//!
//! Registered only in legacy mode.  Records live in process memory and are
//! lost on restart — the help text says so, persistence is a non-goal.

use super::parse_args;
use crate::descriptor::{ToolDescriptor, ToolEffect};
use crate::registry::ToolRegistry;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Register the workflow module.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            module: "workflow".into(),
            action: "create".into(),
            description: "Create an in-memory workflow record (legacy; lost on restart)".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "steps": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["name"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Create,
            requirements: vec!["legacy".into()],
        },
        Arc::new(|deps, _ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    name: String,
                    #[serde(default)]
                    steps: Vec<String>,
                }
                let args: Args = parse_args(args)?;
                let record = deps.workflows.create(&args.name, args.steps);
                Ok(serde_json::to_value(record).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "workflow".into(),
            action: "status".into(),
            description: "Fetch a workflow record, optionally checking off a step".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "format": "uuid"},
                    "complete_step": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "[ADVANCED] step index to mark done",
                    },
                },
                "required": ["id"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Update,
            requirements: vec!["legacy".into()],
        },
        Arc::new(|deps, _ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    id: Uuid,
                    complete_step: Option<usize>,
                }
                let args: Args = parse_args(args)?;
                let record = match args.complete_step {
                    Some(step) => deps.workflows.complete_step(args.id, step)?,
                    None => deps.workflows.get(args.id)?,
                };
                Ok(serde_json::to_value(record).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "workflow".into(),
            action: "list".into(),
            description: "List in-memory workflow records (legacy)".into(),
            schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec!["legacy".into()],
        },
        Arc::new(|deps, _ctx, _args| {
            Box::pin(async move {
                Ok(json!({"workflows": deps.workflows.list()}))
            })
        }),
    );
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Package lifecycle tools: list, browse, write, delete, tags.

use super::parse_args;
use crate::descriptor::{ToolDescriptor, ToolEffect};
use crate::registry::ToolRegistry;
use qmcp_core::package::{CopyMode, EntryRequest};
use qmcp_ops::{Paging, RevisionWrite};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

fn entries_schema() -> Value {
    json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "properties": {
                "logical_path": {"type": "string", "description": "Path inside the package"},
                "source": {
                    "type": "object",
                    "properties": {
                        "type": {"type": "string", "enum": ["s3", "text"]},
                        "uri": {"type": "string", "description": "s3://bucket/key for type=s3"},
                        "text": {"type": "string", "description": "Inline content for type=text"},
                    },
                    "required": ["type"],
                },
            },
            "required": ["logical_path", "source"],
        },
    })
}

#[derive(Deserialize)]
struct WriteArgs {
    registry: Option<String>,
    name: String,
    entries: Vec<EntryRequest>,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    copy_mode: CopyMode,
    message: Option<String>,
    prior_top_hash: Option<String>,
}

impl WriteArgs {
    fn into_write(self) -> RevisionWrite {
        RevisionWrite {
            registry: self.registry.unwrap_or_default(),
            name: self.name,
            entries: self.entries,
            metadata: self.metadata,
            copy_mode: self.copy_mode,
            message: self.message,
            prior_top_hash: self.prior_top_hash,
        }
    }
}

fn write_schema(require_prior: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "registry": {"type": "string", "description": "Registry bucket; defaults to the configured registry"},
            "name": {"type": "string", "description": "Package name, namespace/name"},
            "entries": entries_schema(),
            "metadata": {"type": "object", "description": "User metadata blob"},
            "copy_mode": {
                "type": "string",
                "enum": ["none", "new", "all"],
                "description": "[ADVANCED] whether physical objects are copied into the registry",
            },
            "message": {"type": "string", "description": "Commit message"},
            "prior_top_hash": {"type": "string", "description": "Revision to update from"},
        },
        "required": ["name", "entries"],
        "additionalProperties": false,
    });
    if require_prior {
        schema["required"] = json!(["name", "entries", "prior_top_hash"]);
    }
    schema
}

/// Register the packaging module.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "list".into(),
            description: "List packages in a registry".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "filter": {"type": "string", "description": "Substring filter on names"},
                    "continuation": {"type": "string"},
                    "max": {"type": "integer", "minimum": 1, "maximum": 1000},
                },
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    filter: Option<String>,
                    continuation: Option<String>,
                    max: Option<usize>,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let page = backend
                    .package_list(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        args.filter.as_deref(),
                        Paging {
                            continuation: args.continuation,
                            max: args.max.unwrap_or(100),
                        },
                    )
                    .await?;
                Ok(serde_json::to_value(page).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "browse".into(),
            description: "Resolve a package reference and return its manifest".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                    "top_hash": {"type": "string", "description": "Specific revision; latest when omitted"},
                },
                "required": ["name"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                    top_hash: Option<String>,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let browse = backend
                    .package_browse(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                        args.top_hash.as_deref(),
                    )
                    .await?;
                Ok(serde_json::to_value(browse).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "versions".into(),
            description: "List a package's revisions, newest first".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 1000},
                    "with_tags": {"type": "boolean"},
                },
                "required": ["name"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                    limit: Option<usize>,
                    with_tags: Option<bool>,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let revisions = backend
                    .package_versions_list(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                        args.limit.unwrap_or(25),
                        args.with_tags.unwrap_or(false),
                    )
                    .await?;
                Ok(json!({"revisions": revisions}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "manifest".into(),
            description: "Fetch the manifest at a revision".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                    "top_hash": {"type": "string"},
                },
                "required": ["name"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                    top_hash: Option<String>,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let manifest = backend
                    .package_manifest(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                        args.top_hash.as_deref(),
                    )
                    .await?;
                Ok(serde_json::to_value(manifest).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "create".into(),
            description: "Create a package revision from S3 objects or inline content".into(),
            schema: write_schema(false),
            effect: ToolEffect::Create,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                let args: WriteArgs = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let top_hash = backend
                    .package_create_revision(&ctx, args.into_write())
                    .await?;
                Ok(json!({"top_hash": top_hash}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "update".into(),
            description: "Write a revision on top of a prior one; supplied paths replace, the rest carry forward".into(),
            schema: write_schema(true),
            effect: ToolEffect::Update,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                let args: WriteArgs = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let top_hash = backend
                    .package_update_revision(&ctx, args.into_write())
                    .await?;
                Ok(json!({"top_hash": top_hash}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "delete".into(),
            description: "Delete a revision by top_hash; without one, only the package's \
                          latest pointer is removed and revisions stay reachable by hash"
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                    "top_hash": {"type": "string"},
                },
                "required": ["name"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Remove,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                    top_hash: Option<String>,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                backend
                    .package_delete(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                        args.top_hash.as_deref(),
                    )
                    .await?;
                Ok(json!({"deleted": args.name, "top_hash": args.top_hash}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "tag_list".into(),
            description: "The tag → top_hash map for a package".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                },
                "required": ["name"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                let tags = backend
                    .tag_list(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                    )
                    .await?;
                Ok(json!({"tags": tags}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "tag_add".into(),
            description: "Point a tag at a committed revision".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                    "tag": {"type": "string"},
                    "top_hash": {"type": "string"},
                },
                "required": ["name", "tag", "top_hash"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Update,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                    tag: String,
                    top_hash: String,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                backend
                    .tag_add(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                        &args.tag,
                        &args.top_hash,
                    )
                    .await?;
                Ok(json!({"tag": args.tag, "top_hash": args.top_hash}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "packaging".into(),
            action: "tag_delete".into(),
            description: "Remove a tag; the revision it pointed at is untouched".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "registry": {"type": "string"},
                    "name": {"type": "string"},
                    "tag": {"type": "string"},
                },
                "required": ["name", "tag"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Remove,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    registry: Option<String>,
                    name: String,
                    tag: String,
                }
                let args: Args = parse_args(args)?;
                let backend = deps.backend(&ctx)?;
                backend
                    .tag_delete(
                        &ctx,
                        args.registry.as_deref().unwrap_or_default(),
                        &args.name,
                        &args.tag,
                    )
                    .await?;
                Ok(json!({"deleted_tag": args.tag}))
            })
        }),
    );
}

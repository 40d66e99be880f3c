// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bucket and object tools over the S3 data plane.

use super::parse_args;
use crate::descriptor::{ToolDescriptor, ToolEffect};
use crate::registry::ToolRegistry;
use qmcp_dataplane::PutItem;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Register the buckets module.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            module: "buckets".into(),
            action: "list".into(),
            description: "List buckets the caller may see".into(),
            schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, _args| {
            Box::pin(async move {
                let backend = deps.backend(&ctx)?;
                let buckets = backend.bucket_list(&ctx).await?;
                Ok(json!({"buckets": buckets}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "buckets".into(),
            action: "objects_list".into(),
            description: "List objects in a bucket, paginated by continuation token".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "bucket": {"type": "string", "description": "Bucket name"},
                    "prefix": {"type": "string", "description": "Key prefix filter"},
                    "continuation": {"type": "string", "description": "Token from a previous page"},
                    "max_keys": {"type": "integer", "minimum": 1, "maximum": 1000},
                },
                "required": ["bucket"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    bucket: String,
                    prefix: Option<String>,
                    continuation: Option<String>,
                    max_keys: Option<usize>,
                }
                let args: Args = parse_args(args)?;
                let ops = deps.bucket_ops(&ctx).await;
                let listing = ops
                    .list(
                        &args.bucket,
                        args.prefix.as_deref(),
                        args.continuation.as_deref(),
                        args.max_keys.unwrap_or(100),
                    )
                    .await?;
                Ok(serde_json::to_value(listing).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "bucket".into(),
            action: "object_info".into(),
            description: "Head an object: size, type, version, timestamps".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "bucket": {"type": "string"},
                    "key": {"type": "string", "description": "Key; key?versionId=xyz is honored"},
                },
                "required": ["bucket", "key"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    bucket: String,
                    key: String,
                }
                let args: Args = parse_args(args)?;
                let ops = deps.bucket_ops(&ctx).await;
                let meta = ops.head(&args.bucket, &args.key).await?;
                Ok(serde_json::to_value(meta).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "bucket".into(),
            action: "object_text".into(),
            description: "Read an object as UTF-8 text, optionally version-pinned and ranged"
                .into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "bucket": {"type": "string"},
                    "key": {"type": "string"},
                    "version_id": {"type": "string"},
                    "start": {"type": "integer", "minimum": 0, "description": "[ADVANCED] range start byte"},
                    "end": {"type": "integer", "minimum": 0, "description": "[ADVANCED] range end byte (inclusive)"},
                },
                "required": ["bucket", "key"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    bucket: String,
                    key: String,
                    version_id: Option<String>,
                    start: Option<u64>,
                    end: Option<u64>,
                }
                let args: Args = parse_args(args)?;
                let range = args.start.map(|start| (start, args.end));
                let ops = deps.bucket_ops(&ctx).await;
                let text = ops
                    .get_text(&args.bucket, &args.key, args.version_id.as_deref(), range)
                    .await?;
                Ok(json!({"bucket": args.bucket, "key": args.key, "text": text}))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "bucket".into(),
            action: "objects_put".into(),
            description: "Write a batch of objects; items succeed or fail independently".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "bucket": {"type": "string"},
                    "items": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": {"type": "string", "enum": ["text", "copy"]},
                                "key": {"type": "string"},
                                "text": {"type": "string"},
                                "source_uri": {"type": "string"},
                            },
                            "required": ["type", "key"],
                        },
                    },
                },
                "required": ["bucket", "items"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Create,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    bucket: String,
                    items: Vec<PutItem>,
                }
                let args: Args = parse_args(args)?;
                let ops = deps.bucket_ops(&ctx).await;
                let results = ops.put_batch(&args.bucket, args.items).await?;
                let failed = results.iter().filter(|r| !r.ok).count();
                Ok(json!({
                    "bucket": args.bucket,
                    "results": results,
                    "failed": failed,
                }))
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "bucket".into(),
            action: "object_link".into(),
            description: "Presign a time-limited URL for one object".into(),
            schema: json!({
                "type": "object",
                "properties": {
                    "bucket": {"type": "string"},
                    "key": {"type": "string"},
                    "ttl_seconds": {"type": "integer", "minimum": 1, "maximum": 604800},
                    "method": {"type": "string", "enum": ["GET", "PUT"]},
                },
                "required": ["bucket", "key"],
                "additionalProperties": false,
            }),
            effect: ToolEffect::Read,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, args| {
            Box::pin(async move {
                #[derive(Deserialize)]
                struct Args {
                    bucket: String,
                    key: String,
                    ttl_seconds: Option<u64>,
                    method: Option<String>,
                }
                let args: Args = parse_args(args)?;
                let ops = deps.bucket_ops(&ctx).await;
                let url = ops
                    .presign(
                        &args.bucket,
                        &args.key,
                        Duration::from_secs(args.ttl_seconds.unwrap_or(3600)),
                        args.method.as_deref().unwrap_or("GET"),
                    )
                    .await?;
                Ok(json!({"url": url}))
            })
        }),
    );
}

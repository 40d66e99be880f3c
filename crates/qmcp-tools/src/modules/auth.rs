// SPDX-License-Identifier: MIT OR Apache-2.0
//! Authentication posture and logout.

use crate::descriptor::{ToolDescriptor, ToolEffect};
use crate::registry::ToolRegistry;
use serde_json::json;
use std::sync::Arc;

/// Register the auth module.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            module: "auth".into(),
            action: "status".into(),
            description: "Report whether the caller is logged in, and against which catalog"
                .into(),
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
                let status = backend.auth_status(&ctx).await?;
                Ok(serde_json::to_value(status).unwrap_or_default())
            })
        }),
    );

    registry.register(
        ToolDescriptor {
            module: "auth".into(),
            action: "logout".into(),
            description: "Evict the caller's cached AWS credentials".into(),
            schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
            effect: ToolEffect::Remove,
            requirements: vec![],
        },
        Arc::new(|deps, ctx, _args| {
            Box::pin(async move {
                let (Some(claims), Some(catalog)) = (ctx.claims(), ctx.catalog_url()) else {
                    return Ok(json!({"logged_out": false}));
                };
                let subject = claims.sub.clone();
                deps.credential_cache.evict_subject(catalog, &subject).await;
                Ok(json!({"logged_out": true, "subject": subject}))
            })
        }),
    );
}

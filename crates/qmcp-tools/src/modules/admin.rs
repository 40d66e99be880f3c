// SPDX-License-Identifier: MIT OR Apache-2.0
//! Catalog administration tools.  The graphql backend serves these; the
//! direct backend refuses with a pointer at `--backend graphql`.

use super::parse_args;
use crate::descriptor::{ToolDescriptor, ToolEffect};
use crate::dispatch::ToolHandler;
use crate::registry::ToolRegistry;
use qmcp_ops::admin::{AdminOp, PolicySpec, RoleSpec};
use serde_json::{Value, json};
use std::sync::Arc;

/// Build a handler that maps parsed arguments onto one [`AdminOp`].
fn admin_handler(build: fn(Value) -> Result<AdminOp, qmcp_error::QmcpError>) -> ToolHandler {
    Arc::new(move |deps, ctx, args| {
        Box::pin(async move {
            let op = build(args)?;
            let backend = deps.backend(&ctx)?;
            let outcome = backend.admin(&ctx, op).await?;
            Ok(serde_json::to_value(outcome).unwrap_or_default())
        })
    })
}

fn descriptor(action: &str, description: &str, effect: ToolEffect, schema: Value) -> ToolDescriptor {
    ToolDescriptor {
        module: "admin".into(),
        action: action.into(),
        description: description.into(),
        schema,
        effect,
        requirements: vec!["graphql".into()],
    }
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}, "additionalProperties": false})
}

fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"name": {"type": "string"}},
        "required": ["name"],
        "additionalProperties": false,
    })
}

fn policy_role_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "policy": {"type": "string"},
            "role": {"type": "string"},
        },
        "required": ["policy", "role"],
        "additionalProperties": false,
    })
}

/// Register the admin module.
pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        descriptor("users_list", "List catalog users", ToolEffect::Admin, empty_schema()),
        admin_handler(|_| Ok(AdminOp::UserList)),
    );

    registry.register(
        descriptor(
            "users_create",
            "Create a catalog user",
            ToolEffect::Admin,
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "email": {"type": "string"},
                    "role": {"type": "string"},
                },
                "required": ["name", "email", "role"],
                "additionalProperties": false,
            }),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                name: String,
                email: String,
                role: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::UserCreate {
                name: args.name,
                email: args.email,
                role: args.role,
            })
        }),
    );

    registry.register(
        descriptor("users_delete", "Delete a catalog user", ToolEffect::Admin, name_schema()),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                name: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::UserDelete { name: args.name })
        }),
    );

    registry.register(
        descriptor(
            "users_set_role",
            "Change a user's role",
            ToolEffect::Admin,
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "role": {"type": "string"},
                },
                "required": ["name", "role"],
                "additionalProperties": false,
            }),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                name: String,
                role: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::UserSetRole {
                name: args.name,
                role: args.role,
            })
        }),
    );

    registry.register(
        descriptor("roles_list", "List catalog roles", ToolEffect::Admin, empty_schema()),
        admin_handler(|_| Ok(AdminOp::RoleList)),
    );

    registry.register(
        descriptor(
            "roles_create",
            "Create a managed (policy-composed) or unmanaged (IAM ARN) role",
            ToolEffect::Admin,
            json!({
                "type": "object",
                "properties": {
                    "spec": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": ["managed", "unmanaged"]},
                            "name": {"type": "string"},
                            "policies": {"type": "array", "items": {"type": "string"}},
                            "arn": {"type": "string"},
                        },
                        "required": ["type", "name"],
                    },
                },
                "required": ["spec"],
                "additionalProperties": false,
            }),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                spec: RoleSpec,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::RoleCreate { spec: args.spec })
        }),
    );

    registry.register(
        descriptor("roles_delete", "Delete a catalog role", ToolEffect::Admin, name_schema()),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                name: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::RoleDelete { name: args.name })
        }),
    );

    registry.register(
        descriptor("policies_list", "List catalog policies", ToolEffect::Admin, empty_schema()),
        admin_handler(|_| Ok(AdminOp::PolicyList)),
    );

    registry.register(
        descriptor(
            "policies_create",
            "Create a managed (bucket-grant) or unmanaged (IAM ARN) policy",
            ToolEffect::Admin,
            json!({
                "type": "object",
                "properties": {
                    "spec": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": ["managed", "unmanaged"]},
                            "name": {"type": "string"},
                            "grants": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "bucket": {"type": "string"},
                                        "level": {"type": "string", "enum": ["read", "read_write"]},
                                    },
                                    "required": ["bucket", "level"],
                                },
                            },
                            "arn": {"type": "string"},
                        },
                        "required": ["type", "name"],
                    },
                },
                "required": ["spec"],
                "additionalProperties": false,
            }),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                spec: PolicySpec,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::PolicyCreate { spec: args.spec })
        }),
    );

    registry.register(
        descriptor(
            "policies_delete",
            "Delete a policy; refused with IN_USE while attached to any role",
            ToolEffect::Admin,
            name_schema(),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                name: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::PolicyDelete { name: args.name })
        }),
    );

    registry.register(
        descriptor(
            "policies_attach",
            "Attach a policy to a role",
            ToolEffect::Admin,
            policy_role_schema(),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                policy: String,
                role: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::PolicyAttach {
                policy: args.policy,
                role: args.role,
            })
        }),
    );

    registry.register(
        descriptor(
            "policies_detach",
            "Detach a policy from a role",
            ToolEffect::Admin,
            policy_role_schema(),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                policy: String,
                role: String,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::PolicyDetach {
                policy: args.policy,
                role: args.role,
            })
        }),
    );

    registry.register(
        descriptor("sso_get", "Read the SSO configuration", ToolEffect::Admin, empty_schema()),
        admin_handler(|_| Ok(AdminOp::SsoConfigGet)),
    );

    registry.register(
        descriptor(
            "sso_set",
            "Replace (or clear) the SSO configuration",
            ToolEffect::Admin,
            json!({
                "type": "object",
                "properties": {
                    "config": {"type": ["string", "null"]},
                },
                "additionalProperties": false,
            }),
        ),
        admin_handler(|args| {
            #[derive(serde::Deserialize)]
            struct Args {
                config: Option<String>,
            }
            let args: Args = parse_args(args)?;
            Ok(AdminOp::SsoConfigSet {
                config: args.config,
            })
        }),
    );
}

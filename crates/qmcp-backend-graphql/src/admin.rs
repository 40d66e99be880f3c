// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admin mutations: users, roles, policies, SSO.
//!
//! Every mutation returns a `{Success | InvalidInput | OperationError}`
//! union.  Deleting a policy that is attached to any role is refused with
//! `IN_USE` — the catalog reports it via `OperationError.name`.

use crate::backend::{GraphqlBackend, parse_union};
use crate::client::require_path;
use qmcp_core::RequestContext;
use qmcp_error::QmcpError;
use qmcp_ops::admin::{AdminOp, AdminOutcome, AdminUser, BucketGrant, PolicySpec, RoleSpec};
use qmcp_ops::BucketPermission;
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

const USER_LIST: &str =
    "query { admin { users { name email role active isAdmin } } }";

const USER_CREATE: &str = "mutation ($name: String!, $email: String!, $role: String!) {\
 admin { userCreate(name: $name, email: $email, role: $role) { __typename\
 ... on User { name email role active isAdmin }\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const USER_DELETE: &str = "mutation ($name: String!) {\
 admin { userDelete(name: $name) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const USER_SET_ROLE: &str = "mutation ($name: String!, $role: String!) {\
 admin { userSetRole(name: $name, role: $role) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const ROLE_LIST: &str = "query { admin { roles { __typename name\
 ... on ManagedRole { policies }\
 ... on UnmanagedRole { arn } } } }";

const ROLE_CREATE_MANAGED: &str = "mutation ($name: String!, $policies: [String!]!) {\
 admin { roleCreateManaged(name: $name, policies: $policies) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const ROLE_CREATE_UNMANAGED: &str = "mutation ($name: String!, $arn: String!) {\
 admin { roleCreateUnmanaged(name: $name, arn: $arn) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const ROLE_DELETE: &str = "mutation ($name: String!) {\
 admin { roleDelete(name: $name) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const POLICY_LIST: &str = "query { admin { policies { __typename name\
 ... on ManagedPolicy { grants { bucket level } }\
 ... on UnmanagedPolicy { arn } } } }";

const POLICY_CREATE_MANAGED: &str = "mutation ($name: String!, $grants: [BucketGrantInput!]!) {\
 admin { policyCreateManaged(name: $name, grants: $grants) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const POLICY_CREATE_UNMANAGED: &str = "mutation ($name: String!, $arn: String!) {\
 admin { policyCreateUnmanaged(name: $name, arn: $arn) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const POLICY_DELETE: &str = "mutation ($name: String!) {\
 admin { policyDelete(name: $name) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const POLICY_ATTACH: &str = "mutation ($policy: String!, $role: String!) {\
 admin { policyAttach(policy: $policy, role: $role) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const POLICY_DETACH: &str = "mutation ($policy: String!, $role: String!) {\
 admin { policyDetach(policy: $policy, role: $role) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

const SSO_GET: &str = "query { admin { ssoConfig { text } } }";

const SSO_SET: &str = "mutation ($config: String) {\
 admin { ssoConfigSet(config: $config) { __typename\
 ... on InvalidInput { errors { message } }\
 ... on OperationError { message name } } } }";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_level(raw: &str) -> Option<BucketPermission> {
    match raw {
        "READ" => Some(BucketPermission::Read),
        "READ_WRITE" => Some(BucketPermission::ReadWrite),
        _ => None,
    }
}

fn level_name(level: BucketPermission) -> &'static str {
    match level {
        BucketPermission::Read => "READ",
        BucketPermission::ReadWrite => "READ_WRITE",
    }
}

fn parse_user(node: &Value) -> Option<AdminUser> {
    Some(AdminUser {
        name: node.get("name")?.as_str()?.to_string(),
        email: node
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        role: node.get("role").and_then(Value::as_str).map(str::to_string),
        active: node.get("active").and_then(Value::as_bool).unwrap_or(false),
        is_admin: node
            .get("isAdmin")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_role(node: &Value) -> Option<RoleSpec> {
    let name = node.get("name")?.as_str()?.to_string();
    match node.get("__typename").and_then(Value::as_str)? {
        "ManagedRole" => Some(RoleSpec::Managed {
            name,
            policies: node
                .get("policies")
                .and_then(Value::as_array)
                .map(|p| {
                    p.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }),
        "UnmanagedRole" => Some(RoleSpec::Unmanaged {
            name,
            arn: node.get("arn")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

fn parse_policy(node: &Value) -> Option<PolicySpec> {
    let name = node.get("name")?.as_str()?.to_string();
    match node.get("__typename").and_then(Value::as_str)? {
        "ManagedPolicy" => Some(PolicySpec::Managed {
            name,
            grants: node
                .get("grants")
                .and_then(Value::as_array)
                .map(|grants| {
                    grants
                        .iter()
                        .filter_map(|g| {
                            Some(BucketGrant {
                                bucket: g.get("bucket")?.as_str()?.to_string(),
                                level: parse_level(g.get("level")?.as_str()?)?,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }),
        "UnmanagedPolicy" => Some(PolicySpec::Unmanaged {
            name,
            arn: node.get("arn")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn mutate(
    backend: &GraphqlBackend,
    ctx: &RequestContext,
    document: &str,
    variables: Value,
    field: &str,
    what: &str,
) -> Result<Value, QmcpError> {
    let data = backend.run(ctx, document, variables).await?;
    let union = require_path(&data, &format!("admin.{field}"))?;
    Ok(parse_union(union, what)?.clone())
}

/// Execute one admin operation.
pub(crate) async fn run(
    backend: &GraphqlBackend,
    ctx: &RequestContext,
    op: AdminOp,
) -> Result<AdminOutcome, QmcpError> {
    match op {
        AdminOp::UserList => {
            let data = backend.run(ctx, USER_LIST, Value::Null).await?;
            let users = require_path(&data, "admin.users")?
                .as_array()
                .cloned()
                .unwrap_or_default();
            Ok(AdminOutcome::Users {
                users: users.iter().filter_map(parse_user).collect(),
            })
        }
        AdminOp::UserCreate { name, email, role } => {
            let payload = mutate(
                backend,
                ctx,
                USER_CREATE,
                json!({"name": name, "email": email, "role": role}),
                "userCreate",
                "user create",
            )
            .await?;
            let user = parse_user(&payload)
                .ok_or_else(|| QmcpError::internal("user create returned no user"))?;
            Ok(AdminOutcome::User { user })
        }
        AdminOp::UserDelete { name } => {
            mutate(
                backend,
                ctx,
                USER_DELETE,
                json!({"name": name}),
                "userDelete",
                "user delete",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
        AdminOp::UserSetRole { name, role } => {
            mutate(
                backend,
                ctx,
                USER_SET_ROLE,
                json!({"name": name, "role": role}),
                "userSetRole",
                "user set-role",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
        AdminOp::RoleList => {
            let data = backend.run(ctx, ROLE_LIST, Value::Null).await?;
            let roles = require_path(&data, "admin.roles")?
                .as_array()
                .cloned()
                .unwrap_or_default();
            Ok(AdminOutcome::Roles {
                roles: roles.iter().filter_map(parse_role).collect(),
            })
        }
        AdminOp::RoleCreate { spec } => {
            match spec {
                RoleSpec::Managed { name, policies } => {
                    mutate(
                        backend,
                        ctx,
                        ROLE_CREATE_MANAGED,
                        json!({"name": name, "policies": policies}),
                        "roleCreateManaged",
                        "role create",
                    )
                    .await?;
                }
                RoleSpec::Unmanaged { name, arn } => {
                    mutate(
                        backend,
                        ctx,
                        ROLE_CREATE_UNMANAGED,
                        json!({"name": name, "arn": arn}),
                        "roleCreateUnmanaged",
                        "role create",
                    )
                    .await?;
                }
            }
            Ok(AdminOutcome::Done)
        }
        AdminOp::RoleDelete { name } => {
            mutate(
                backend,
                ctx,
                ROLE_DELETE,
                json!({"name": name}),
                "roleDelete",
                "role delete",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
        AdminOp::PolicyList => {
            let data = backend.run(ctx, POLICY_LIST, Value::Null).await?;
            let policies = require_path(&data, "admin.policies")?
                .as_array()
                .cloned()
                .unwrap_or_default();
            Ok(AdminOutcome::Policies {
                policies: policies.iter().filter_map(parse_policy).collect(),
            })
        }
        AdminOp::PolicyCreate { spec } => {
            match spec {
                PolicySpec::Managed { name, grants } => {
                    let grants: Vec<Value> = grants
                        .iter()
                        .map(|g| json!({"bucket": g.bucket, "level": level_name(g.level)}))
                        .collect();
                    mutate(
                        backend,
                        ctx,
                        POLICY_CREATE_MANAGED,
                        json!({"name": name, "grants": grants}),
                        "policyCreateManaged",
                        "policy create",
                    )
                    .await?;
                }
                PolicySpec::Unmanaged { name, arn } => {
                    mutate(
                        backend,
                        ctx,
                        POLICY_CREATE_UNMANAGED,
                        json!({"name": name, "arn": arn}),
                        "policyCreateUnmanaged",
                        "policy create",
                    )
                    .await?;
                }
            }
            Ok(AdminOutcome::Done)
        }
        AdminOp::PolicyDelete { name } => {
            mutate(
                backend,
                ctx,
                POLICY_DELETE,
                json!({"name": name}),
                "policyDelete",
                "policy delete",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
        AdminOp::PolicyAttach { policy, role } => {
            mutate(
                backend,
                ctx,
                POLICY_ATTACH,
                json!({"policy": policy, "role": role}),
                "policyAttach",
                "policy attach",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
        AdminOp::PolicyDetach { policy, role } => {
            mutate(
                backend,
                ctx,
                POLICY_DETACH,
                json!({"policy": policy, "role": role}),
                "policyDetach",
                "policy detach",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
        AdminOp::SsoConfigGet => {
            let data = backend.run(ctx, SSO_GET, Value::Null).await?;
            let config = match require_path(&data, "admin.ssoConfig") {
                Ok(node) => node
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Err(_) => None,
            };
            Ok(AdminOutcome::SsoConfig { config })
        }
        AdminOp::SsoConfigSet { config } => {
            mutate(
                backend,
                ctx,
                SSO_SET,
                json!({"config": config}),
                "ssoConfigSet",
                "sso config set",
            )
            .await?;
            Ok(AdminOutcome::Done)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GraphqlClient;
    use qmcp_config::{BackendKind, DeploymentMode};
    use qmcp_error::ErrorKind;
    use qmcp_ops::QuiltOps;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> RequestContext {
        RequestContext::builder(DeploymentMode::Remote, BackendKind::Graphql).build()
    }

    fn backend(uri: &str) -> GraphqlBackend {
        GraphqlBackend::new(GraphqlClient::new(
            reqwest::Client::new(),
            uri,
            Duration::from_secs(5),
        ))
    }

    async fn mount_data(server: &MockServer, body_match: Value, data: Value) {
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(body_match))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": data})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn user_list_parses_users() {
        let server = MockServer::start().await;
        mount_data(
            &server,
            json!({}),
            json!({"admin": {"users": [
                {"name": "alice", "email": "a@x", "role": "admin", "active": true, "isAdmin": true},
            ]}}),
        )
        .await;
        let out = backend(&server.uri())
            .admin(&ctx(), AdminOp::UserList)
            .await
            .unwrap();
        match out {
            AdminOutcome::Users { users } => {
                assert_eq!(users.len(), 1);
                assert!(users[0].is_admin);
            }
            other => panic!("expected users, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn policy_delete_attached_reports_in_use() {
        let server = MockServer::start().await;
        mount_data(
            &server,
            json!({"variables": {"name": "P"}}),
            json!({"admin": {"policyDelete": {
                "__typename": "OperationError",
                "message": "policy is attached to role R",
                "name": "InUse",
            }}}),
        )
        .await;
        let err = backend(&server.uri())
            .admin(&ctx(), AdminOp::PolicyDelete { name: "P".into() })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InUse);
    }

    #[tokio::test]
    async fn managed_policy_grants_use_catalog_level_names() {
        let server = MockServer::start().await;
        mount_data(
            &server,
            json!({"variables": {"grants": [{"bucket": "b1", "level": "READ"}]}}),
            json!({"admin": {"policyCreateManaged": {"__typename": "Ok"}}}),
        )
        .await;
        let out = backend(&server.uri())
            .admin(
                &ctx(),
                AdminOp::PolicyCreate {
                    spec: PolicySpec::Managed {
                        name: "P".into(),
                        grants: vec![BucketGrant {
                            bucket: "b1".into(),
                            level: BucketPermission::Read,
                        }],
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(out, AdminOutcome::Done);
    }

    #[tokio::test]
    async fn policy_list_discriminates_shapes() {
        let server = MockServer::start().await;
        mount_data(
            &server,
            json!({}),
            json!({"admin": {"policies": [
                {"__typename": "ManagedPolicy", "name": "m",
                 "grants": [{"bucket": "b", "level": "READ_WRITE"}]},
                {"__typename": "UnmanagedPolicy", "name": "u", "arn": "arn:aws:iam::1:policy/u"},
            ]}}),
        )
        .await;
        let out = backend(&server.uri())
            .admin(&ctx(), AdminOp::PolicyList)
            .await
            .unwrap();
        match out {
            AdminOutcome::Policies { policies } => {
                assert_eq!(policies.len(), 2);
                assert!(matches!(
                    &policies[0],
                    PolicySpec::Managed { grants, .. }
                        if grants[0].level == BucketPermission::ReadWrite
                ));
                assert!(matches!(&policies[1], PolicySpec::Unmanaged { .. }));
            }
            other => panic!("expected policies, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_input_union_maps_to_validation() {
        let server = MockServer::start().await;
        mount_data(
            &server,
            json!({}),
            json!({"admin": {"userCreate": {
                "__typename": "InvalidInput",
                "errors": [{"message": "email malformed"}],
            }}}),
        )
        .await;
        let err = backend(&server.uri())
            .admin(
                &ctx(),
                AdminOp::UserCreate {
                    name: "x".into(),
                    email: "bad".into(),
                    role: "user".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert!(err.message.contains("email malformed"));
    }

    #[tokio::test]
    async fn sso_get_absent_config_is_none() {
        let server = MockServer::start().await;
        mount_data(&server, json!({}), json!({"admin": {"ssoConfig": null}})).await;
        let out = backend(&server.uri())
            .admin(&ctx(), AdminOp::SsoConfigGet)
            .await
            .unwrap();
        assert_eq!(out, AdminOutcome::SsoConfig { config: None });
    }
}

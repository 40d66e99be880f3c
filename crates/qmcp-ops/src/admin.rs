// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admin-protocol operation and result shapes.
//!
//! Users, roles, policies, and SSO configs are manipulated through catalog
//! GraphQL mutations returning a `{Success | InvalidInput | OperationError}`
//! union; the graphql backend maps that union onto `Result` at its edge.

use serde::{Deserialize, Serialize};

use crate::BucketPermission;

/// A bucket-level grant inside a managed policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketGrant {
    /// Bucket name.
    pub bucket: String,
    /// Access level.
    pub level: BucketPermission,
}

/// A policy definition — managed (bucket grants) or unmanaged (IAM ARN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicySpec {
    /// Catalog-managed policy composed of bucket grants.
    Managed {
        /// Policy name.
        name: String,
        /// Bucket grants.
        grants: Vec<BucketGrant>,
    },
    /// Pass-through to an existing IAM policy.
    Unmanaged {
        /// Policy name.
        name: String,
        /// IAM policy ARN.
        arn: String,
    },
}

impl PolicySpec {
    /// The policy's name, either shape.
    pub fn name(&self) -> &str {
        match self {
            Self::Managed { name, .. } | Self::Unmanaged { name, .. } => name,
        }
    }
}

/// A role definition — managed (composed of policies) or unmanaged (IAM
/// role ARN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoleSpec {
    /// Catalog-managed role composed of policies.
    Managed {
        /// Role name.
        name: String,
        /// Names of attached policies.
        policies: Vec<String>,
    },
    /// Pass-through to an existing IAM role.
    Unmanaged {
        /// Role name.
        name: String,
        /// IAM role ARN.
        arn: String,
    },
}

/// A catalog user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminUser {
    /// Login name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Assigned role name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Whether the account is active.
    #[serde(default)]
    pub active: bool,
    /// Whether the account has admin rights.
    #[serde(default)]
    pub is_admin: bool,
}

/// Every admin operation the tool surface can request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminOp {
    /// List users.
    UserList,
    /// Create a user.
    UserCreate {
        /// Login name.
        name: String,
        /// Email address.
        email: String,
        /// Initial role.
        role: String,
    },
    /// Delete a user.
    UserDelete {
        /// Login name.
        name: String,
    },
    /// Change a user's role.
    UserSetRole {
        /// Login name.
        name: String,
        /// New role name.
        role: String,
    },
    /// List roles.
    RoleList,
    /// Create a role.
    RoleCreate {
        /// The role definition.
        spec: RoleSpec,
    },
    /// Delete a role.
    RoleDelete {
        /// Role name.
        name: String,
    },
    /// List policies.
    PolicyList,
    /// Create a policy.
    PolicyCreate {
        /// The policy definition.
        spec: PolicySpec,
    },
    /// Delete a policy.  Refused with `IN_USE` while attached to any role.
    PolicyDelete {
        /// Policy name.
        name: String,
    },
    /// Attach a policy to a role.
    PolicyAttach {
        /// Policy name.
        policy: String,
        /// Role name.
        role: String,
    },
    /// Detach a policy from a role.
    PolicyDetach {
        /// Policy name.
        policy: String,
        /// Role name.
        role: String,
    },
    /// Read the SSO configuration.
    SsoConfigGet,
    /// Replace the SSO configuration.
    SsoConfigSet {
        /// New configuration document; `None` removes it.
        config: Option<String>,
    },
}

/// The typed result of an admin operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AdminOutcome {
    /// A list of users.
    Users {
        /// The users.
        users: Vec<AdminUser>,
    },
    /// A single user.
    User {
        /// The user.
        user: AdminUser,
    },
    /// A list of roles.
    Roles {
        /// The roles.
        roles: Vec<RoleSpec>,
    },
    /// A list of policies.
    Policies {
        /// The policies.
        policies: Vec<PolicySpec>,
    },
    /// The SSO configuration, when one is set.
    SsoConfig {
        /// Configuration document.
        config: Option<String>,
    },
    /// The operation completed with nothing to return.
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_spec_serde_discriminates_shapes() {
        let managed = PolicySpec::Managed {
            name: "readers".into(),
            grants: vec![BucketGrant {
                bucket: "b1".into(),
                level: BucketPermission::Read,
            }],
        };
        let v = serde_json::to_value(&managed).unwrap();
        assert_eq!(v["type"], "managed");
        assert_eq!(v["grants"][0]["level"], "read");

        let unmanaged = PolicySpec::Unmanaged {
            name: "raw".into(),
            arn: "arn:aws:iam::1:policy/raw".into(),
        };
        let v = serde_json::to_value(&unmanaged).unwrap();
        assert_eq!(v["type"], "unmanaged");
    }

    #[test]
    fn policy_name_accessor_covers_both_shapes() {
        let m = PolicySpec::Managed {
            name: "m".into(),
            grants: vec![],
        };
        let u = PolicySpec::Unmanaged {
            name: "u".into(),
            arn: "arn".into(),
        };
        assert_eq!(m.name(), "m");
        assert_eq!(u.name(), "u");
    }

    #[test]
    fn admin_op_roundtrip() {
        let op = AdminOp::PolicyAttach {
            policy: "readers".into(),
            role: "analyst".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: AdminOp = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }

    #[test]
    fn outcome_tags_are_snake_case() {
        let out = AdminOutcome::SsoConfig { config: None };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["result"], "sso_config");
    }
}

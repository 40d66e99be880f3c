// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration resolution for the Quilt MCP broker.
//!
//! Deployment presets expand into a `(backend, transport)` pair; explicit
//! overrides from the command line or the environment are merged on top.
//! Resolution precedence (highest first): CLI flags → environment variables
//! → deployment preset → built-in defaults.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use qmcp_error::{ErrorKind, QmcpError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while resolving the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field carried a value outside its recognised set.
    #[error("invalid value '{value}' for {field}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Two resolved settings contradict each other.
    #[error("invalid combination: {reason} (field: {field})")]
    InvalidCombination {
        /// The field a caller should change.
        field: &'static str,
        /// Why the combination is rejected.
        reason: String,
    },

    /// A setting required by the resolved mode is missing.
    #[error("missing required setting {field}: {reason}")]
    MissingRequired {
        /// The absent field.
        field: &'static str,
        /// Why it is required.
        reason: String,
    },
}

impl From<ConfigError> for QmcpError {
    fn from(err: ConfigError) -> Self {
        let field = match &err {
            ConfigError::InvalidValue { field, .. }
            | ConfigError::InvalidCombination { field, .. }
            | ConfigError::MissingRequired { field, .. } => *field,
        };
        QmcpError::new(ErrorKind::ConfigInvalid, err.to_string()).with_context("field", field)
    }
}

// ---------------------------------------------------------------------------
// Mode enums
// ---------------------------------------------------------------------------

/// Deployment preset selecting a default `(backend, transport)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Stateless multi-tenant deployment: graphql backend over HTTP.
    Remote,
    /// Workstation deployment: graphql backend over stdio.
    Local,
    /// Pre-catalog deployment: direct backend over stdio.
    Legacy,
}

impl DeploymentMode {
    /// The `(backend, transport)` pair this preset expands to.
    pub fn expand(&self) -> (BackendKind, TransportKind) {
        match self {
            Self::Remote => (BackendKind::Graphql, TransportKind::Http),
            Self::Local => (BackendKind::Graphql, TransportKind::Stdio),
            Self::Legacy => (BackendKind::Direct, TransportKind::Stdio),
        }
    }
}

impl Default for DeploymentMode {
    fn default() -> Self {
        Self::Local
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Legacy => "legacy",
        };
        f.write_str(s)
    }
}

impl FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            "legacy" => Ok(Self::Legacy),
            other => Err(ConfigError::InvalidValue {
                field: "deployment",
                value: other.to_string(),
            }),
        }
    }
}

/// Which `QuiltOps` implementation serves tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process registry access over the AWS SDK.
    Direct,
    /// The catalog's GraphQL endpoint.
    Graphql,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Graphql => "graphql",
        })
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "graphql" => Ok(Self::Graphql),
            other => Err(ConfigError::InvalidValue {
                field: "backend",
                value: other.to_string(),
            }),
        }
    }
}

/// How framed JSON-RPC requests reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over stdin/stdout, strictly serial.
    Stdio,
    /// Long-running HTTP endpoint at `/mcp` with SSE streaming.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        })
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::InvalidValue {
                field: "transport",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Explicit settings from one precedence layer (CLI flags or environment).
///
/// `None` means "not set at this layer"; the next layer down supplies the
/// value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// Deployment preset.
    pub deployment: Option<DeploymentMode>,
    /// Backend kind override.
    pub backend: Option<BackendKind>,
    /// Transport override.
    pub transport: Option<TransportKind>,
    /// Catalog GraphQL base URL.
    pub catalog_url: Option<String>,
    /// Registry host URL.
    pub registry_url: Option<String>,
    /// S3 proxy endpoint override.
    pub s3_proxy_url: Option<String>,
    /// Strict mode: every tool call demands a validated JWT.
    pub require_jwt: Option<bool>,
    /// Shared JWT secret, inline.
    pub jwt_secret: Option<String>,
    /// Parameter-store name holding the shared JWT secret.
    pub jwt_secret_param: Option<String>,
    /// Expected JWT `kid` header value.
    pub jwt_key_id: Option<String>,
    /// Outbound HTTP timeout in seconds.
    pub service_timeout_secs: Option<u64>,
    /// AWS profile for ambient credentials.
    pub aws_profile: Option<String>,
}

impl Overrides {
    /// Merge two override layers; values in `self` win over `lower`.
    pub fn or(self, lower: Overrides) -> Overrides {
        Overrides {
            deployment: self.deployment.or(lower.deployment),
            backend: self.backend.or(lower.backend),
            transport: self.transport.or(lower.transport),
            catalog_url: self.catalog_url.or(lower.catalog_url),
            registry_url: self.registry_url.or(lower.registry_url),
            s3_proxy_url: self.s3_proxy_url.or(lower.s3_proxy_url),
            require_jwt: self.require_jwt.or(lower.require_jwt),
            jwt_secret: self.jwt_secret.or(lower.jwt_secret),
            jwt_secret_param: self.jwt_secret_param.or(lower.jwt_secret_param),
            jwt_key_id: self.jwt_key_id.or(lower.jwt_key_id),
            service_timeout_secs: self.service_timeout_secs.or(lower.service_timeout_secs),
            aws_profile: self.aws_profile.or(lower.aws_profile),
        }
    }
}

/// Environment variables recognised by [`env_overrides`].
pub const ENV_VARS: &[&str] = &[
    "QUILT_CATALOG_URL",
    "QUILT_REGISTRY_URL",
    "QUILT_DEPLOYMENT",
    "QUILT_S3_PROXY_URL",
    "MCP_REQUIRE_JWT",
    "MCP_JWT_SECRET",
    "MCP_JWT_SECRET_PARAMETER",
    "MCP_JWT_KEY_ID",
    "AWS_PROFILE",
    "SERVICE_TIMEOUT",
];

/// Build an override layer from an environment lookup function.
///
/// Injectable for tests; production callers pass a closure over
/// [`std::env::var`].
pub fn env_overrides_from(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Overrides, ConfigError> {
    let mut ov = Overrides::default();
    if let Some(v) = lookup("QUILT_DEPLOYMENT") {
        ov.deployment = Some(v.parse()?);
    }
    ov.catalog_url = lookup("QUILT_CATALOG_URL");
    ov.registry_url = lookup("QUILT_REGISTRY_URL");
    ov.s3_proxy_url = lookup("QUILT_S3_PROXY_URL");
    if let Some(v) = lookup("MCP_REQUIRE_JWT") {
        ov.require_jwt = Some(parse_bool("MCP_REQUIRE_JWT", &v)?);
    }
    ov.jwt_secret = lookup("MCP_JWT_SECRET");
    ov.jwt_secret_param = lookup("MCP_JWT_SECRET_PARAMETER");
    ov.jwt_key_id = lookup("MCP_JWT_KEY_ID");
    ov.aws_profile = lookup("AWS_PROFILE");
    if let Some(v) = lookup("SERVICE_TIMEOUT") {
        let secs = v.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            field: "service-timeout",
            value: v.clone(),
        })?;
        ov.service_timeout_secs = Some(secs);
    }
    Ok(ov)
}

/// Build an override layer from the process environment.
pub fn env_overrides() -> Result<Overrides, ConfigError> {
    env_overrides_from(|name| std::env::var(name).ok())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Default outbound HTTP timeout in seconds.
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 60;

/// Fully resolved, validated server configuration.  Immutable after
/// [`resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The preset the configuration was resolved from.
    pub deployment: DeploymentMode,
    /// Which `QuiltOps` implementation serves tool calls.
    pub backend: BackendKind,
    /// How requests reach the server.
    pub transport: TransportKind,
    /// Catalog GraphQL base URL (required for the graphql backend).
    pub catalog_url: Option<String>,
    /// Registry host URL.
    pub registry_url: Option<String>,
    /// S3 proxy endpoint override.
    pub s3_proxy_url: Option<String>,
    /// Strict mode: ambient credential fallback is disallowed.
    pub require_jwt: bool,
    /// Shared JWT secret, inline.  Param-store wins when both are set.
    pub jwt_secret: Option<String>,
    /// Parameter-store name holding the shared secret.
    pub jwt_secret_param: Option<String>,
    /// Expected JWT `kid` header value, when pinned.
    pub jwt_key_id: Option<String>,
    /// Outbound HTTP timeout in seconds.
    pub service_timeout_secs: u64,
    /// AWS profile for ambient credentials.
    pub aws_profile: Option<String>,
}

/// Resolve the final configuration from two override layers.
///
/// `cli` wins over `env`; both win over the preset; the preset wins over
/// built-in defaults.  Invalid combinations are rejected here, at startup,
/// with a diagnostic naming the offending field.
pub fn resolve(cli: Overrides, env: Overrides) -> Result<ServerConfig, ConfigError> {
    let merged = cli.or(env);
    let deployment = merged.deployment.unwrap_or_default();
    let (preset_backend, preset_transport) = deployment.expand();
    let backend = merged.backend.unwrap_or(preset_backend);
    let transport = merged.transport.unwrap_or(preset_transport);

    let config = ServerConfig {
        deployment,
        backend,
        transport,
        catalog_url: merged.catalog_url,
        registry_url: merged.registry_url,
        s3_proxy_url: merged.s3_proxy_url,
        require_jwt: merged.require_jwt.unwrap_or(false),
        jwt_secret: merged.jwt_secret,
        jwt_secret_param: merged.jwt_secret_param,
        jwt_key_id: merged.jwt_key_id,
        service_timeout_secs: merged
            .service_timeout_secs
            .unwrap_or(DEFAULT_SERVICE_TIMEOUT_SECS),
        aws_profile: merged.aws_profile,
    };
    validate(&config)?;
    Ok(config)
}

/// Validate a resolved configuration.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.deployment == DeploymentMode::Remote && config.transport == TransportKind::Stdio {
        return Err(ConfigError::InvalidCombination {
            field: "transport",
            reason: "remote deployment cannot serve over stdio".into(),
        });
    }
    if config.backend == BackendKind::Graphql && config.catalog_url.is_none() {
        return Err(ConfigError::MissingRequired {
            field: "catalog-url",
            reason: "the graphql backend needs a catalog endpoint; set QUILT_CATALOG_URL".into(),
        });
    }
    if config.service_timeout_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "service-timeout",
            value: "0".into(),
        });
    }
    if config.require_jwt && config.jwt_secret.is_none() && config.jwt_secret_param.is_none() {
        return Err(ConfigError::MissingRequired {
            field: "jwt-secret",
            reason: "strict mode needs MCP_JWT_SECRET or MCP_JWT_SECRET_PARAMETER".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // -- Preset expansion ------------------------------------------------

    #[test]
    fn default_preset_is_local_graphql_stdio() {
        let cfg = resolve(
            Overrides {
                catalog_url: Some("https://demo.quiltdata.com".into()),
                ..Default::default()
            },
            Overrides::default(),
        )
        .unwrap();
        assert_eq!(cfg.deployment, DeploymentMode::Local);
        assert_eq!(cfg.backend, BackendKind::Graphql);
        assert_eq!(cfg.transport, TransportKind::Stdio);
    }

    #[test]
    fn remote_preset_expands_to_graphql_http() {
        assert_eq!(
            DeploymentMode::Remote.expand(),
            (BackendKind::Graphql, TransportKind::Http)
        );
    }

    #[test]
    fn legacy_preset_expands_to_direct_stdio() {
        assert_eq!(
            DeploymentMode::Legacy.expand(),
            (BackendKind::Direct, TransportKind::Stdio)
        );
    }

    // -- Precedence ------------------------------------------------------

    #[test]
    fn cli_wins_over_env() {
        let cli = Overrides {
            backend: Some(BackendKind::Direct),
            ..Default::default()
        };
        let env_layer = Overrides {
            backend: Some(BackendKind::Graphql),
            catalog_url: Some("https://x".into()),
            ..Default::default()
        };
        let cfg = resolve(cli, env_layer).unwrap();
        assert_eq!(cfg.backend, BackendKind::Direct);
    }

    #[test]
    fn explicit_override_wins_over_preset() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            backend: Some(BackendKind::Graphql),
            catalog_url: Some("https://x".into()),
            ..Default::default()
        };
        let cfg = resolve(cli, Overrides::default()).unwrap();
        // Preset says direct; explicit backend override wins.
        assert_eq!(cfg.backend, BackendKind::Graphql);
        assert_eq!(cfg.transport, TransportKind::Stdio);
    }

    #[test]
    fn env_layer_fills_gaps_left_by_cli() {
        let cli = Overrides::default();
        let env_layer = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            registry_url: Some("s3://registry".into()),
            ..Default::default()
        };
        let cfg = resolve(cli, env_layer).unwrap();
        assert_eq!(cfg.deployment, DeploymentMode::Legacy);
        assert_eq!(cfg.registry_url.as_deref(), Some("s3://registry"));
    }

    // -- Env parsing -----------------------------------------------------

    #[test]
    fn env_overrides_read_recognised_names() {
        let ov = env_overrides_from(env(&[
            ("QUILT_DEPLOYMENT", "remote"),
            ("QUILT_CATALOG_URL", "https://cat"),
            ("MCP_REQUIRE_JWT", "true"),
            ("SERVICE_TIMEOUT", "30"),
        ]))
        .unwrap();
        assert_eq!(ov.deployment, Some(DeploymentMode::Remote));
        assert_eq!(ov.catalog_url.as_deref(), Some("https://cat"));
        assert_eq!(ov.require_jwt, Some(true));
        assert_eq!(ov.service_timeout_secs, Some(30));
    }

    #[test]
    fn env_overrides_reject_bad_bool() {
        let err = env_overrides_from(env(&[("MCP_REQUIRE_JWT", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "MCP_REQUIRE_JWT"));
    }

    #[test]
    fn env_overrides_reject_bad_timeout() {
        let err = env_overrides_from(env(&[("SERVICE_TIMEOUT", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "service-timeout"));
    }

    #[test]
    fn bool_forms_accepted() {
        for v in ["1", "true", "YES", "on"] {
            assert!(parse_bool("f", v).unwrap());
        }
        for v in ["0", "false", "No", "off"] {
            assert!(!parse_bool("f", v).unwrap());
        }
    }

    // -- Validation ------------------------------------------------------

    #[test]
    fn remote_with_stdio_is_rejected() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Remote),
            transport: Some(TransportKind::Stdio),
            catalog_url: Some("https://x".into()),
            ..Default::default()
        };
        let err = resolve(cli, Overrides::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidCombination { field: "transport", .. }
        ));
    }

    #[test]
    fn graphql_backend_requires_catalog_url() {
        let err = resolve(Overrides::default(), Overrides::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired { field: "catalog-url", .. }
        ));
    }

    #[test]
    fn direct_backend_needs_no_catalog_url() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            ..Default::default()
        };
        resolve(cli, Overrides::default()).expect("legacy preset should resolve");
    }

    #[test]
    fn zero_timeout_rejected() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            service_timeout_secs: Some(0),
            ..Default::default()
        };
        let err = resolve(cli, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "service-timeout"));
    }

    #[test]
    fn strict_mode_requires_a_secret_source() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            require_jwt: Some(true),
            ..Default::default()
        };
        let err = resolve(cli, Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { field, .. } if field == "jwt-secret"));
    }

    #[test]
    fn strict_mode_with_param_store_secret_resolves() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            require_jwt: Some(true),
            jwt_secret_param: Some("/mcp/jwt".into()),
            ..Default::default()
        };
        let cfg = resolve(cli, Overrides::default()).unwrap();
        assert!(cfg.require_jwt);
    }

    #[test]
    fn config_error_maps_to_config_invalid_kind() {
        let err: QmcpError = ConfigError::InvalidValue {
            field: "backend",
            value: "sql".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::ConfigInvalid);
        assert_eq!(err.context["field"], serde_json::json!("backend"));
    }

    #[test]
    fn default_timeout_applied() {
        let cli = Overrides {
            deployment: Some(DeploymentMode::Legacy),
            ..Default::default()
        };
        let cfg = resolve(cli, Overrides::default()).unwrap();
        assert_eq!(cfg.service_timeout_secs, DEFAULT_SERVICE_TIMEOUT_SECS);
    }

    // -- FromStr ---------------------------------------------------------

    #[test]
    fn mode_parsing_is_case_insensitive() {
        assert_eq!(
            "REMOTE".parse::<DeploymentMode>().unwrap(),
            DeploymentMode::Remote
        );
        assert_eq!("GraphQL".parse::<BackendKind>().unwrap(), BackendKind::Graphql);
        assert_eq!("HTTP".parse::<TransportKind>().unwrap(), TransportKind::Http);
    }

    #[test]
    fn unknown_mode_names_rejected() {
        assert!("cloud".parse::<DeploymentMode>().is_err());
        assert!("rest".parse::<BackendKind>().is_err());
        assert!("grpc".parse::<TransportKind>().is_err());
    }
}

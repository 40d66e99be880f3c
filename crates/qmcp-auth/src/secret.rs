// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared-secret resolution.
//!
//! The JWT secret comes from the inline configuration value or from an SSM
//! parameter; when both are set, the parameter store wins.

use qmcp_config::ServerConfig;
use qmcp_error::{ErrorKind, QmcpError};
use tracing::info;

/// Resolve the shared JWT secret, or `None` when neither source is
/// configured (JWT validation is then disabled outside strict mode).
pub async fn resolve_secret(config: &ServerConfig) -> Result<Option<String>, QmcpError> {
    if let Some(param) = &config.jwt_secret_param {
        let value = fetch_parameter(param, config.aws_profile.as_deref()).await?;
        info!(parameter = %param, "JWT secret loaded from parameter store");
        return Ok(Some(value));
    }
    Ok(config.jwt_secret.clone())
}

/// Fetch a decrypted SSM parameter value.
async fn fetch_parameter(name: &str, profile: Option<&str>) -> Result<String, QmcpError> {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    let sdk_config = loader.load().await;
    let client = aws_sdk_ssm::Client::new(&sdk_config);

    let output = client
        .get_parameter()
        .name(name)
        .with_decryption(true)
        .send()
        .await
        .map_err(|e| {
            QmcpError::new(
                ErrorKind::UpstreamUnavailable,
                format!("parameter store rejected read of '{name}'"),
            )
            .with_source(e)
        })?;

    output
        .parameter()
        .and_then(|p| p.value())
        .map(str::to_string)
        .ok_or_else(|| {
            QmcpError::new(
                ErrorKind::ConfigInvalid,
                format!("parameter '{name}' exists but carries no value"),
            )
            .with_context("field", "jwt-secret-param")
        })
}

// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The `quilt-mcp` binary: flag parsing, config resolution, transport
//! selection, and shutdown/exit-code discipline.

use anyhow::Context;
use clap::Parser;
use qmcp_config::{BackendKind, DeploymentMode, Overrides, TransportKind, resolve};
use qmcp_server::{ServerState, build_app};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit code for unrecoverable runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit code for rejected configuration.
const EXIT_CONFIG_ERROR: i32 = 2;
/// Exit code after an external interrupt.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "quilt-mcp", version, about = "MCP broker for Quilt data catalogs")]
struct Cli {
    /// Deployment preset: remote | local | legacy.
    #[arg(long)]
    deployment: Option<String>,

    /// Backend kind override: direct | graphql.
    #[arg(long)]
    backend: Option<String>,

    /// Transport override: stdio | http.
    #[arg(long)]
    transport: Option<String>,

    /// Catalog GraphQL base URL.
    #[arg(long)]
    catalog_url: Option<String>,

    /// Registry host URL.
    #[arg(long)]
    registry_url: Option<String>,

    /// Strict mode: every tool call demands a validated JWT.
    #[arg(long)]
    require_jwt: bool,

    /// Outbound HTTP timeout in seconds.
    #[arg(long)]
    service_timeout: Option<u64>,

    /// Bind address for the HTTP transport.
    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,

    /// Suppress the startup banner.
    #[arg(long)]
    skip_banner: bool,
}

impl Cli {
    fn overrides(&self) -> Result<Overrides, qmcp_config::ConfigError> {
        Ok(Overrides {
            deployment: self.deployment.as_deref().map(str::parse).transpose()?,
            backend: self.backend.as_deref().map(str::parse).transpose()?,
            transport: self.transport.as_deref().map(str::parse).transpose()?,
            catalog_url: self.catalog_url.clone(),
            registry_url: self.registry_url.clone(),
            require_jwt: self.require_jwt.then_some(true),
            service_timeout_secs: self.service_timeout,
            ..Default::default()
        })
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qmcp=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match cli
        .overrides()
        .and_then(|cli_layer| Ok((cli_layer, qmcp_config::env_overrides()?)))
        .and_then(|(cli_layer, env_layer)| resolve(cli_layer, env_layer))
    {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            eprintln!("quilt-mcp: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "runtime construction failed");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    };

    let exit = runtime.block_on(async move {
        let secret = match qmcp_auth::resolve_secret(&config).await {
            Ok(secret) => secret,
            Err(e) => {
                error!(error = %e, "JWT secret resolution failed");
                return EXIT_CONFIG_ERROR;
            }
        };
        let state = ServerState::build(config.clone(), secret);

        if !cli.skip_banner {
            banner(&config, state.registry.len());
        }

        let serve = async {
            match config.transport {
                TransportKind::Stdio => qmcp_server::stdio::run(state).await,
                TransportKind::Http => serve_http(state, &cli.bind).await,
            }
        };

        tokio::select! {
            outcome = serve => match outcome {
                Ok(()) => 0,
                Err(e) => {
                    error!(error = %e, "transport failed");
                    EXIT_RUNTIME_ERROR
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                EXIT_INTERRUPTED
            }
        }
    });

    std::process::exit(exit);
}

async fn serve_http(state: std::sync::Arc<ServerState>, bind: &str) -> anyhow::Result<()> {
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(bind = %bind, "http transport listening");
    axum::serve(listener, app).await.context("serve")
}

/// Startup banner on stderr.  Names, modes, and counts — never secrets.
fn banner(config: &qmcp_config::ServerConfig, tool_count: usize) {
    eprintln!(
        "quilt-mcp {} — {} deployment, {} backend, {} transport, {} tools{}",
        qmcp_core::SERVER_VERSION,
        config.deployment,
        config.backend,
        config.transport,
        tool_count,
        match (&config.catalog_url, config.backend) {
            (Some(url), BackendKind::Graphql) => format!(", catalog {url}"),
            _ => String::new(),
        },
    );
    if config.deployment == DeploymentMode::Legacy {
        eprintln!("quilt-mcp: legacy mode — workflow records are in-memory only");
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Server state and per-request context construction.
//!
//! Startup wires the process-wide singletons (HTTP pool, credential cache,
//! backend factory, tool registry, search orchestrator); everything else
//! is built per request here.

use qmcp_auth::{CredentialCache, CredentialSource, ExchangeClient, JwtVerifier, resolve_credentials};
use qmcp_backend_direct::DirectBackend;
use qmcp_backend_graphql::{GraphqlBackend, GraphqlClient};
use qmcp_config::{BackendKind, ServerConfig};
use qmcp_core::{CancelToken, RequestContext};
use qmcp_dataplane::{AthenaClientFactory, S3ClientFactory};
use qmcp_error::QmcpError;
use qmcp_ops::BackendFactory;
use qmcp_search::{EsClient, EsSource, GraphqlSource, S3Source, UnifiedSearch};
use qmcp_tools::{ToolDeps, ToolRegistry, WorkflowStore, build_registry};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Process-wide server state, immutable after [`ServerState::build`].
pub struct ServerState {
    /// Resolved configuration.
    pub config: ServerConfig,
    /// The immutable tool registry.
    pub registry: ToolRegistry,
    /// Shared tool dependencies.
    pub deps: Arc<ToolDeps>,
    /// JWT verifier, when a secret is configured.
    pub verifier: Option<JwtVerifier>,
    /// Catalog credential exchange, when a catalog is configured.
    pub exchange: Option<ExchangeClient>,
    /// The process-wide credential cache.
    pub credential_cache: Arc<CredentialCache>,
}

impl ServerState {
    /// Wire everything up from a resolved configuration and secret.
    ///
    /// `secret` comes from [`qmcp_auth::resolve_secret`] — already fetched
    /// from the parameter store when one is configured.
    pub fn build(config: ServerConfig, secret: Option<String>) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.service_timeout_secs))
            .build()
            .unwrap_or_default();
        let credential_cache = Arc::new(CredentialCache::new());

        let s3_factory = S3ClientFactory {
            proxy_url: config.s3_proxy_url.clone(),
            aws_profile: config.aws_profile.clone(),
        };
        let athena_factory = AthenaClientFactory {
            aws_profile: config.aws_profile.clone(),
        };

        // Backend factory: both kinds register whenever their inputs
        // exist; the per-request context decides which one serves.
        let mut factory = BackendFactory::new();
        {
            let s3 = s3_factory.clone();
            factory.register(BackendKind::Direct, move |_ctx| {
                Arc::new(DirectBackend::new(s3.clone())) as Arc<dyn qmcp_ops::QuiltOps>
            });
        }
        let graphql_backend: Option<GraphqlBackend> = config.catalog_url.as_ref().map(|url| {
            GraphqlBackend::new(GraphqlClient::new(
                http.clone(),
                url,
                Duration::from_secs(config.service_timeout_secs),
            ))
        });
        if let Some(backend) = &graphql_backend {
            let backend = backend.clone();
            factory.register(BackendKind::Graphql, move |_ctx| {
                Arc::new(backend.clone()) as Arc<dyn qmcp_ops::QuiltOps>
            });
        }

        // Search fan-out: ES and GraphQL need the catalog; S3 always works.
        let mut search = UnifiedSearch::new()
            .with_timeout(Duration::from_secs(config.service_timeout_secs.min(10)));
        if let Some(url) = &config.catalog_url {
            search = search.with_es(Arc::new(EsSource::new(EsClient::new(
                http.clone(),
                url,
                Duration::from_secs(config.service_timeout_secs),
            ))));
        }
        if let Some(backend) = &graphql_backend {
            search = search.with_graphql(Arc::new(GraphqlSource::new(Arc::new(backend.clone()))));
        }
        search = search.with_s3(Arc::new(S3Source::new(s3_factory.clone())));

        let registry = build_registry(&config);
        info!(
            tools = registry.len(),
            backend = %config.backend,
            transport = %config.transport,
            "server state built"
        );

        let deps = Arc::new(ToolDeps {
            config: config.clone(),
            factory,
            search,
            s3: s3_factory,
            athena: athena_factory,
            http: http.clone(),
            credential_cache: credential_cache.clone(),
            workflows: WorkflowStore::new(),
        });

        let verifier = secret.map(|s| {
            let mut verifier = JwtVerifier::new(&s);
            if let Some(kid) = &config.jwt_key_id {
                verifier = verifier.with_key_id(kid);
            }
            verifier
        });
        let exchange = config
            .catalog_url
            .as_ref()
            .map(|url| ExchangeClient::new(http, url.as_str()));

        Arc::new(Self {
            config,
            registry,
            deps,
            verifier,
            exchange,
            credential_cache,
        })
    }

    /// Build the per-request context: bearer validation, credential
    /// resolution, cancellation wiring.
    ///
    /// `needs_credentials` is true only for `tools/call` — discovery
    /// methods never trigger the exchange chain.  Auth failures return the
    /// error to the transport so it can emit a uniform envelope before any
    /// tool work happens.
    pub async fn build_context(
        &self,
        bearer: Option<&str>,
        cancel: CancelToken,
        needs_credentials: bool,
    ) -> Result<RequestContext, QmcpError> {
        let mut builder =
            RequestContext::builder(self.config.deployment, self.config.backend)
                .service_timeout(Duration::from_secs(self.config.service_timeout_secs))
                .cancel_token(cancel);
        if let Some(url) = &self.config.catalog_url {
            builder = builder.catalog_url(url);
        }
        if let Some(url) = &self.config.registry_url {
            builder = builder.registry_url(url);
        }

        // A present token is always validated; absence is an error only
        // under strict mode, and that check lives in dispatch.
        let claims = match (bearer, &self.verifier) {
            (Some(token), Some(verifier)) => {
                let claims = verifier.verify(token)?;
                builder = builder.claims(claims.clone(), token);
                Some(claims)
            }
            (Some(_), None) if self.config.require_jwt => {
                return Err(QmcpError::new(
                    qmcp_error::ErrorKind::ConfigInvalid,
                    "strict mode is on but no JWT secret is configured",
                )
                .with_context("field", "jwt-secret"));
            }
            _ => None,
        };

        if needs_credentials {
            let source = resolve_credentials(
                claims.as_ref(),
                bearer,
                self.exchange.as_ref(),
                &self.credential_cache,
                self.config.require_jwt,
            )
            .await?;
            if let CredentialSource::Bundle(bundle) = source {
                builder = builder.credentials(bundle);
            }
        }

        Ok(builder.build())
    }
}

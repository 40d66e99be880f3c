// SPDX-License-Identifier: MIT OR Apache-2.0
//! qmcp-search
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The unified search layer: deterministic query classification, parallel
//! primary/fallback fan-out with per-backend timeouts, and a ranked,
//! de-duplicated merge.

/// Rule-based query classification.
pub mod classify;
/// Elasticsearch over the catalog-fronted `_search` endpoint.
pub mod es;
/// Score normalization, de-duplication, and the package-scope collapse.
pub mod merge;
/// Concrete search sources (S3 listing, GraphQL adapter).
pub mod sources;

pub use classify::{QueryClass, classify};
pub use es::EsClient;
pub use sources::{EsSource, GraphqlSource, S3Source};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use qmcp_core::RequestContext;
use qmcp_core::search::{SearchBackend, SearchHit, SearchQuery};
use qmcp_error::{ErrorKind, QmcpError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// SearchSource
// ---------------------------------------------------------------------------

/// One backend the unified layer can fan out to.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Which backend this is, for weighting and diagnostics.
    fn backend(&self) -> SearchBackend;

    /// Run the (already normalized) query.
    async fn search(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchHit>, QmcpError>;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The unified layer's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Ranked, de-duplicated hits.
    pub hits: Vec<SearchHit>,
    /// How the query was classified.
    pub class: QueryClass,
    /// The backend whose results were used, when any answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_used: Option<SearchBackend>,
    /// Whether a fallback (not the primary) produced the result.
    pub fallback_used: bool,
}

// ---------------------------------------------------------------------------
// UnifiedSearch
// ---------------------------------------------------------------------------

/// The fan-out orchestrator.  Built once at startup; sources are shared.
#[derive(Clone, Default)]
pub struct UnifiedSearch {
    es: Option<Arc<dyn SearchSource>>,
    graphql: Option<Arc<dyn SearchSource>>,
    s3: Option<Arc<dyn SearchSource>>,
    per_backend_timeout: Duration,
}

impl UnifiedSearch {
    /// Create an orchestrator with no sources and a 10 s per-backend
    /// timeout.
    pub fn new() -> Self {
        Self {
            es: None,
            graphql: None,
            s3: None,
            per_backend_timeout: Duration::from_secs(10),
        }
    }

    /// Attach the Elasticsearch source.
    pub fn with_es(mut self, source: Arc<dyn SearchSource>) -> Self {
        self.es = Some(source);
        self
    }

    /// Attach the GraphQL source.
    pub fn with_graphql(mut self, source: Arc<dyn SearchSource>) -> Self {
        self.graphql = Some(source);
        self
    }

    /// Attach the S3 listing source.
    pub fn with_s3(mut self, source: Arc<dyn SearchSource>) -> Self {
        self.s3 = Some(source);
        self
    }

    /// Override the per-backend timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_backend_timeout = timeout;
        self
    }

    /// The primary → fallback chain for a classified query.
    fn chain(&self, class: QueryClass) -> Vec<Arc<dyn SearchSource>> {
        let ordered: Vec<&Option<Arc<dyn SearchSource>>> = match class {
            QueryClass::TextSearch => vec![&self.es, &self.graphql, &self.s3],
            QueryClass::FileTypeFilter => vec![&self.es, &self.s3],
            QueryClass::MetadataPredicate => vec![&self.graphql, &self.es],
            QueryClass::Analytical => vec![],
        };
        ordered.into_iter().flatten().cloned().collect()
    }

    /// Classify, fan out, and merge.  The query's bucket filter must
    /// already be normalized (see
    /// [`normalize_bucket_filter`](qmcp_core::search::normalize_bucket_filter)).
    pub async fn search(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> Result<SearchOutcome, QmcpError> {
        let class = classify(&query.text);
        if class == QueryClass::Analytical {
            return Err(QmcpError::new(
                ErrorKind::ValidationFailed,
                "analytical queries run through Athena, not the search index",
            )
            .with_alternative("athena_query_execute")
            .with_fix_hint("rewrite the request as SQL and call athena_query_execute"));
        }

        let chain = self.chain(class);
        if chain.is_empty() {
            return Err(QmcpError::new(
                ErrorKind::ConfigInvalid,
                "no search backend is configured for this deployment",
            ));
        }

        // Primary and fallbacks run concurrently, each under its own
        // timeout.  Chain order decides whose answer wins: the first
        // non-empty success in priority order satisfies the request, and a
        // primary success never waits on a slower fallback.
        let mut pending: FuturesUnordered<_> = chain
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let source = source.clone();
                async move {
                    let backend = source.backend();
                    let outcome =
                        tokio::time::timeout(self.per_backend_timeout, source.search(ctx, query))
                            .await
                            .unwrap_or_else(|_| {
                                Err(QmcpError::new(
                                    ErrorKind::Timeout,
                                    format!("{backend} search timed out"),
                                ))
                            });
                    (index, backend, outcome)
                }
            })
            .collect();

        let mut outcomes: Vec<Option<(SearchBackend, Result<Vec<SearchHit>, QmcpError>)>> =
            (0..chain.len()).map(|_| None).collect();
        while let Some((index, backend, outcome)) = pending.next().await {
            if let Err(err) = &outcome {
                debug!(backend = %backend, error = %err, "search backend failed");
            }
            outcomes[index] = Some((backend, outcome));

            // Walk the priority prefix: the first decided non-empty success
            // wins; an undecided slot above it means we keep waiting.
            let mut winning_slot = None;
            for slot in 0..outcomes.len() {
                match &outcomes[slot] {
                    None => break,
                    Some((_, Ok(hits))) if !hits.is_empty() => {
                        winning_slot = Some(slot);
                        break;
                    }
                    Some(_) => {}
                }
            }
            if let Some(slot) = winning_slot {
                let (winner, outcome) = outcomes[slot].take().expect("slot decided");
                let mut hits = outcome.expect("winning slot is a success");
                merge::normalize_and_weight(&mut hits, winner);
                let hits = merge::dedup_and_rank(hits, query.limit);
                return Ok(SearchOutcome {
                    hits,
                    class,
                    backend_used: Some(winner),
                    fallback_used: slot > 0,
                });
            }
        }

        // Everything completed with no winner.  An empty answer from any
        // backend is a real answer; a chain where everything failed is not.
        let mut first_error = None;
        let mut any_success = false;
        for slot in outcomes.into_iter().flatten() {
            match slot.1 {
                Ok(_) => any_success = true,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) if !any_success => Err(err),
            _ => Ok(SearchOutcome {
                hits: vec![],
                class,
                backend_used: None,
                fallback_used: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qmcp_config::{BackendKind, DeploymentMode};
    use qmcp_core::search::{ObjectHit, ResultType, SearchScope};
    use std::sync::Mutex;

    fn ctx() -> RequestContext {
        RequestContext::builder(DeploymentMode::Local, BackendKind::Graphql).build()
    }

    fn query(text: &str) -> SearchQuery {
        SearchQuery {
            text: text.into(),
            scope: SearchScope::Global,
            buckets: vec![],
            result_type: ResultType::Both,
            limit: 10,
        }
    }

    fn object_hit(key: &str, score: f64, backend: SearchBackend) -> SearchHit {
        SearchHit::Object {
            hit: ObjectHit {
                bucket: "b".into(),
                key: key.into(),
                version_id: None,
                size: None,
                modified: None,
            },
            score,
            backend,
        }
    }

    struct StubSource {
        backend: SearchBackend,
        hits: Vec<SearchHit>,
        delay: Duration,
        fail: bool,
        seen_buckets: Mutex<Vec<Vec<String>>>,
    }

    impl StubSource {
        fn new(backend: SearchBackend, hits: Vec<SearchHit>) -> Arc<Self> {
            Arc::new(Self {
                backend,
                hits,
                delay: Duration::ZERO,
                fail: false,
                seen_buckets: Mutex::new(vec![]),
            })
        }

        fn slow(backend: SearchBackend, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                backend,
                hits: vec![object_hit("slow", 1.0, backend)],
                delay,
                fail: false,
                seen_buckets: Mutex::new(vec![]),
            })
        }

        fn failing(backend: SearchBackend) -> Arc<Self> {
            Arc::new(Self {
                backend,
                hits: vec![],
                delay: Duration::ZERO,
                fail: true,
                seen_buckets: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl SearchSource for StubSource {
        fn backend(&self) -> SearchBackend {
            self.backend
        }
        async fn search(
            &self,
            _ctx: &RequestContext,
            query: &SearchQuery,
        ) -> Result<Vec<SearchHit>, QmcpError> {
            self.seen_buckets
                .lock()
                .unwrap()
                .push(query.buckets.clone());
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(QmcpError::new(
                    ErrorKind::UpstreamUnavailable,
                    "stub down",
                ));
            }
            Ok(self.hits.clone())
        }
    }

    #[tokio::test]
    async fn primary_result_wins_without_fallback_flag() {
        let search = UnifiedSearch::new()
            .with_es(StubSource::new(
                SearchBackend::Elasticsearch,
                vec![object_hit("from-es", 2.0, SearchBackend::Elasticsearch)],
            ))
            .with_graphql(StubSource::new(SearchBackend::Graphql, vec![]));
        let outcome = search.search(&ctx(), &query("reads")).await.unwrap();
        assert_eq!(outcome.backend_used, Some(SearchBackend::Elasticsearch));
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.hits.len(), 1);
    }

    #[tokio::test]
    async fn empty_primary_falls_through_with_flag() {
        let search = UnifiedSearch::new()
            .with_es(StubSource::new(SearchBackend::Elasticsearch, vec![]))
            .with_graphql(StubSource::new(
                SearchBackend::Graphql,
                vec![object_hit("from-gql", 1.0, SearchBackend::Graphql)],
            ));
        let outcome = search.search(&ctx(), &query("reads")).await.unwrap();
        assert_eq!(outcome.backend_used, Some(SearchBackend::Graphql));
        assert!(outcome.fallback_used);
    }

    #[tokio::test]
    async fn failing_primary_falls_through_with_flag() {
        let search = UnifiedSearch::new()
            .with_es(StubSource::failing(SearchBackend::Elasticsearch))
            .with_graphql(StubSource::new(
                SearchBackend::Graphql,
                vec![object_hit("x", 1.0, SearchBackend::Graphql)],
            ));
        let outcome = search.search(&ctx(), &query("reads")).await.unwrap();
        assert!(outcome.fallback_used);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_primary_yields_to_fallback() {
        let search = UnifiedSearch::new()
            .with_timeout(Duration::from_millis(50))
            .with_es(StubSource::slow(
                SearchBackend::Elasticsearch,
                Duration::from_secs(60),
            ))
            .with_graphql(StubSource::new(
                SearchBackend::Graphql,
                vec![object_hit("fast", 1.0, SearchBackend::Graphql)],
            ));
        let outcome = search.search(&ctx(), &query("reads")).await.unwrap();
        assert_eq!(outcome.backend_used, Some(SearchBackend::Graphql));
        assert!(outcome.fallback_used);
    }

    #[tokio::test]
    async fn analytical_queries_are_redirected_to_athena() {
        let search = UnifiedSearch::new()
            .with_es(StubSource::new(SearchBackend::Elasticsearch, vec![]));
        let err = search
            .search(&ctx(), &query("SELECT count(*) FROM t"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
        assert_eq!(err.alternatives, vec!["athena_query_execute".to_string()]);
    }

    #[tokio::test]
    async fn metadata_predicates_prefer_graphql() {
        let search = UnifiedSearch::new()
            .with_es(StubSource::new(
                SearchBackend::Elasticsearch,
                vec![object_hit("es", 1.0, SearchBackend::Elasticsearch)],
            ))
            .with_graphql(StubSource::new(
                SearchBackend::Graphql,
                vec![object_hit("gql", 1.0, SearchBackend::Graphql)],
            ));
        let outcome = search.search(&ctx(), &query("size>100")).await.unwrap();
        assert_eq!(outcome.backend_used, Some(SearchBackend::Graphql));
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn all_empty_is_an_empty_success() {
        let search = UnifiedSearch::new()
            .with_es(StubSource::new(SearchBackend::Elasticsearch, vec![]))
            .with_graphql(StubSource::new(SearchBackend::Graphql, vec![]))
            .with_s3(StubSource::new(SearchBackend::S3, vec![]));
        let outcome = search.search(&ctx(), &query("nothing")).await.unwrap();
        assert!(outcome.hits.is_empty());
        assert!(outcome.backend_used.is_none());
    }

    #[tokio::test]
    async fn sole_failing_backend_surfaces_its_error() {
        let search =
            UnifiedSearch::new().with_graphql(StubSource::failing(SearchBackend::Graphql));
        let err = search.search(&ctx(), &query("size>1")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn bucket_filter_reaches_every_source_identically() {
        let es = StubSource::new(SearchBackend::Elasticsearch, vec![]);
        let gql = StubSource::new(SearchBackend::Graphql, vec![]);
        let search = UnifiedSearch::new()
            .with_es(es.clone())
            .with_graphql(gql.clone());
        let mut q = query("reads");
        q.buckets = vec!["nextflowtower".into()];
        search.search(&ctx(), &q).await.unwrap();
        assert_eq!(
            es.seen_buckets.lock().unwrap()[0],
            vec!["nextflowtower".to_string()]
        );
        assert_eq!(
            gql.seen_buckets.lock().unwrap()[0],
            vec!["nextflowtower".to_string()]
        );
    }

    #[tokio::test]
    async fn no_sources_is_a_config_error() {
        let err = UnifiedSearch::new()
            .search(&ctx(), &query("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigInvalid);
    }
}

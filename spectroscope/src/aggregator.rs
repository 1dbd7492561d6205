//! The top-level pipeline context and the one aggregation routine every entry
//! point shares.
//!
//! All shared handles live here (HTTP-backed scraper, search configuration,
//! optional insight provider, database pool) instead of module globals. Each
//! request gets its own scoped search client, built from the configured
//! credential or a per-request override.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

use common::{Config, QueryConfig, SearchConfig};

use crate::balance::{absorb, select_balanced, under_quota, Buckets};
use crate::enrich;
use crate::llm::{self, LlmProvider};
use crate::models::{Leaning, QueryResult, Statistics, TimelinePositioning};
use crate::scraping::PageScraper;
use crate::search::{self, SearchProvider, SonarClient, DEFAULT_API_KEY_ENV};
use crate::storage;

const DEFAULT_LIMIT: usize = 9;

/// How an aggregate query run can fail as a whole. Partial failures (single
/// leanings, single scrapes, single inserts) never reach this level.
#[derive(Debug)]
pub enum QueryError {
    /// No search API key: neither configured in the environment nor supplied
    /// with the request.
    MissingCredentials,
    /// All three initial leaning queries failed upstream.
    SearchUnavailable,
    Internal(anyhow::Error),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::MissingCredentials => write!(f, "no search API key available"),
            QueryError::SearchUnavailable => write!(f, "all leaning queries failed"),
            QueryError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<anyhow::Error> for QueryError {
    fn from(e: anyhow::Error) -> Self {
        QueryError::Internal(e)
    }
}

/// Owns every shared resource of the pipeline; constructed once at startup
/// and handed to each entry point.
pub struct Aggregator {
    search_cfg: SearchConfig,
    query_cfg: QueryConfig,
    scraper: Arc<PageScraper>,
    insight: Option<Arc<dyn LlmProvider>>,
    db: SqlitePool,
}

impl Aggregator {
    pub fn new(config: &Config, db: SqlitePool) -> Result<Self> {
        let search_cfg = config.search.clone().unwrap_or_default();
        let scraping_cfg = config.scraping.clone().unwrap_or_default();
        let query_cfg = config.query.clone().unwrap_or_default();
        let insight = config.llm.as_ref().and_then(llm::provider_from_config);

        let scraper = Arc::new(PageScraper::new(&scraping_cfg, insight.clone())?);

        Ok(Aggregator { search_cfg, query_cfg, scraper, insight, db })
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// The optional metadata/answering collaborator, shared with the
    /// follow-up endpoint.
    pub fn insight_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.insight.clone()
    }

    pub fn default_limit(&self) -> usize {
        self.query_cfg.default_limit.unwrap_or(DEFAULT_LIMIT)
    }

    /// The API key for this request: an explicit override wins, otherwise the
    /// configured environment variable is consulted.
    fn resolve_api_key(&self, override_key: Option<&str>) -> Option<String> {
        if let Some(key) = override_key.filter(|k| !k.is_empty()) {
            return Some(key.to_string());
        }
        let env = self
            .search_cfg
            .api_key_env
            .clone()
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
        std::env::var(env).ok().filter(|k| !k.is_empty())
    }

    /// Run the whole pipeline for one topic: three concurrent leaning
    /// queries, dedupe and balance, one-shot requery for thin buckets,
    /// bounded-concurrency enrichment with replacement, persistence, and the
    /// final statistics.
    pub async fn run_query(
        &self,
        topic: &str,
        limit: usize,
        api_key: Option<&str>,
    ) -> Result<QueryResult, QueryError> {
        let Some(key) = self.resolve_api_key(api_key) else {
            return Err(QueryError::MissingCredentials);
        };
        let provider: Arc<dyn SearchProvider> =
            Arc::new(SonarClient::from_config(&self.search_cfg, key));

        info!(topic, limit, "starting balanced query run");

        let (left, center, right) = tokio::join!(
            search::fetch_for_leaning(provider.as_ref(), topic, Leaning::Left),
            search::fetch_for_leaning(provider.as_ref(), topic, Leaning::Center),
            search::fetch_for_leaning(provider.as_ref(), topic, Leaning::Right),
        );

        let results = [
            (Leaning::Left, left),
            (Leaning::Center, center),
            (Leaning::Right, right),
        ];
        if results.iter().all(|(_, r)| r.is_err()) {
            for (leaning, result) in &results {
                if let Err(e) = result {
                    warn!(%leaning, error = %e, "leaning query failed");
                }
            }
            return Err(QueryError::SearchUnavailable);
        }

        let mut buckets = Buckets::default();
        let mut seen: HashSet<String> = HashSet::new();
        for (leaning, result) in results {
            match result {
                Ok(parsed) => absorb(&mut buckets, &mut seen, leaning, parsed),
                Err(e) => {
                    warn!(%leaning, error = %e, "leaning query failed, bucket stays empty");
                }
            }
        }

        self.requery_thin_buckets(&provider, topic, limit, &mut buckets, &mut seen).await;

        info!(
            left = buckets.left.len(),
            center = buckets.center.len(),
            right = buckets.right.len(),
            "candidate buckets assembled"
        );

        let set = select_balanced(buckets, limit);
        let sources = enrich::enrich(Arc::clone(&self.scraper), &self.db, set).await;

        let statistics = Statistics::from_sources(&sources);
        let timeline_positioning = TimelinePositioning::from_sources(&sources);
        info!(
            total = statistics.total,
            left = statistics.left_count,
            center = statistics.center_count,
            right = statistics.right_count,
            "query run complete"
        );

        if let Err(e) =
            storage::record_search(&self.db, topic, &statistics, &timeline_positioning).await
        {
            warn!(error = %e, "failed to record search run");
        }

        Ok(QueryResult {
            query: topic.to_string(),
            sources,
            statistics,
            timeline_positioning,
        })
    }

    /// One-shot requery for any bucket below the minimum, with a narrower
    /// topic wording. Flagged leanings run concurrently; results merge in
    /// leaning order against the same global seen-URL set.
    async fn requery_thin_buckets(
        &self,
        provider: &Arc<dyn SearchProvider>,
        topic: &str,
        limit: usize,
        buckets: &mut Buckets,
        seen: &mut HashSet<String>,
    ) {
        let flagged = under_quota(buckets, limit);
        if flagged.is_empty() {
            return;
        }
        warn!(?flagged, "buckets under quota, requerying");

        let handles: Vec<_> = flagged
            .into_iter()
            .map(|leaning| {
                let provider = Arc::clone(provider);
                let narrowed = search::requery_topic(topic, leaning);
                (
                    leaning,
                    tokio::spawn(async move {
                        search::fetch_for_leaning(provider.as_ref(), &narrowed, leaning).await
                    }),
                )
            })
            .collect();

        for (leaning, handle) in handles {
            match handle.await {
                Ok(Ok(parsed)) => {
                    info!(%leaning, count = parsed.len(), "requery returned candidates");
                    absorb(buckets, seen, leaning, parsed);
                }
                Ok(Err(e)) => warn!(%leaning, error = %e, "requery failed, keeping thin bucket"),
                Err(e) => warn!(%leaning, error = %e, "requery task failed to complete"),
            }
        }
    }
}

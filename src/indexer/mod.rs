//! Indexer (Torznab) orchestrator
//!
//! One plugin per request: check the result cache, run the plugin behind
//! its circuit breaker inside the request's pool budget, dedupe, validate
//! every candidate URL in one batch, promote alternatives where the
//! primary is dead, package survivors as CrawlJobs and paginate.
//!
//! Determinism: dedup keeps plugin result order; alternative promotion
//! picks the first valid alternative in original order; the cache stores
//! the full pre-pagination item list so HITs and MISSes paginate alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::{Admission, BreakerRegistry};
use crate::config::{IndexerConfig, KvConfig};
use crate::errors::{AppError, AppResult, PluginError};
use crate::fetch::SharedFetcher;
use crate::kv::{KvStore, KvStoreExt};
use crate::models::{Category, CrawlJob, SearchResult};
use crate::plugins::{BrowserEngine, PluginRegistry, SearchContext, SearchQuery};
use crate::pool::ConcurrencyPool;

pub mod validate;

pub use validate::validate_urls;

#[derive(Debug, Clone)]
pub struct IndexerRequest {
    pub plugin: String,
    pub query: String,
    pub category: Option<Category>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub offset: usize,
    pub limit: usize,
}

/// One row of the feed, pre-rendered except for the wire framing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub job_id: Uuid,
    pub size: Option<u64>,
    pub seeders: Option<u32>,
    pub peers: Option<u32>,
    pub published: Option<DateTime<Utc>>,
    pub category: u32,
    pub source_url: Option<String>,
    /// URLs that answered < 400 during validation, promotion order
    pub validated_links: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerResponse {
    pub items: Vec<FeedItem>,
    /// Total before pagination, for the feed's total attribute
    pub total: usize,
    #[serde(skip)]
    pub cache_hit: bool,
}

pub struct IndexerOrchestrator {
    config: IndexerConfig,
    kv_config: KvConfig,
    kv: Arc<dyn KvStore>,
    fetcher: SharedFetcher,
    pool: Arc<ConcurrencyPool>,
    breakers: Arc<BreakerRegistry>,
    registry: Arc<PluginRegistry>,
    browser: Arc<dyn BrowserEngine>,
    plugin_timeout: Duration,
    validate_concurrency: usize,
}

impl IndexerOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IndexerConfig,
        kv_config: KvConfig,
        kv: Arc<dyn KvStore>,
        fetcher: SharedFetcher,
        pool: Arc<ConcurrencyPool>,
        breakers: Arc<BreakerRegistry>,
        registry: Arc<PluginRegistry>,
        browser: Arc<dyn BrowserEngine>,
        plugin_timeout: Duration,
    ) -> Self {
        let validate_concurrency = if config.validate_concurrency == 0 {
            pool.slots(crate::pool::SlotKind::FastHttp)
        } else {
            config.validate_concurrency
        };
        Self {
            config,
            kv_config,
            kv,
            fetcher,
            pool,
            breakers,
            registry,
            browser,
            plugin_timeout,
            validate_concurrency,
        }
    }

    /// Deterministic result-cache key
    fn cache_key(request: &IndexerRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.plugin.as_bytes());
        hasher.update([0]);
        hasher.update(request.query.to_lowercase().as_bytes());
        hasher.update([0]);
        if let Some(category) = request.category {
            hasher.update(category.id().to_le_bytes());
        }
        if let Some(season) = request.season {
            hasher.update(b"s");
            hasher.update(season.to_le_bytes());
        }
        if let Some(episode) = request.episode {
            hasher.update(b"e");
            hasher.update(episode.to_le_bytes());
        }
        format!("idxcache:{:x}", hasher.finalize())
    }

    fn paginate(&self, items: Vec<FeedItem>, offset: usize, limit: usize) -> IndexerResponse {
        let total = items.len();
        let limit = limit.clamp(1, self.config.max_limit);
        let items = items.into_iter().skip(offset).take(limit).collect();
        IndexerResponse {
            items,
            total,
            cache_hit: false,
        }
    }

    pub async fn search(&self, request: &IndexerRequest) -> AppResult<IndexerResponse> {
        if !self.registry.contains(&request.plugin) {
            return Err(AppError::not_found("plugin", &request.plugin));
        }

        let cache_key = Self::cache_key(request);
        if let Ok(cached) = self.kv.get_json::<Vec<FeedItem>>(&cache_key).await {
            debug!("indexer cache hit for '{}'", request.plugin);
            let mut response = self.paginate(cached, request.offset, request.limit);
            response.cache_hit = true;
            return Ok(response);
        }

        // Register with the pool; the budget guards the plugin call.
        let budget = self.pool.register();

        let raw = self.invoke_plugin(&budget, request).await;
        let raw = match raw {
            Ok(results) => results,
            Err(PluginError::CircuitOpen { plugin }) => {
                info!("circuit open for '{}', returning empty feed", plugin);
                return Ok(IndexerResponse {
                    items: vec![],
                    total: 0,
                    cache_hit: false,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let deduped = dedupe_results(raw);

        // One validation batch over the union of every candidate URL.
        let all_urls: Vec<String> = {
            let mut seen = HashSet::new();
            deduped
                .iter()
                .flat_map(|r| r.all_urls())
                .filter(|url| seen.insert(url.to_string()))
                .map(|url| url.to_string())
                .collect()
        };
        let validity = validate_urls(
            &self.fetcher,
            &all_urls,
            self.config.validate_timeout,
            self.validate_concurrency,
        )
        .await;
        let is_valid = |url: &str| validity.get(url).copied().unwrap_or(false);

        // Promotion: keep a valid primary, else the first valid
        // alternative, else drop the row. Result order is preserved.
        let mut items = Vec::new();
        for result in deduped {
            let validated_links: Vec<String> = result
                .all_urls()
                .into_iter()
                .filter(|url| is_valid(url))
                .map(|url| url.to_string())
                .collect();
            if validated_links.is_empty() {
                continue;
            }

            let job = CrawlJob::new(
                result.title.clone(),
                validated_links.clone(),
                self.kv_config.job_ttl,
            )
            .with_source(result.source_url.clone());
            self.kv
                .put_best_effort(
                    &CrawlJob::kv_key(&job.id),
                    job.serialize().as_bytes(),
                    self.kv_config.job_ttl,
                )
                .await;

            items.push(FeedItem {
                title: result.title,
                job_id: job.id,
                size: result.size,
                seeders: result.seeders,
                peers: result.peers,
                published: result.published,
                category: result.category,
                source_url: result.source_url,
                validated_links,
            });
        }

        self.kv
            .put_json_best_effort(&cache_key, &items, self.config.cache_ttl)
            .await;

        Ok(self.paginate(items, request.offset, request.limit))
    }

    async fn invoke_plugin(
        &self,
        budget: &crate::pool::RequestBudget,
        request: &IndexerRequest,
    ) -> Result<Vec<SearchResult>, PluginError> {
        let descriptor = self
            .registry
            .descriptor(&request.plugin)
            .ok_or_else(|| PluginError::Unknown(request.plugin.clone()))?;
        let slot_kind = descriptor.mode.slot_kind();
        let timeout = descriptor.timeout.unwrap_or(self.plugin_timeout);
        let breaker = self.breakers.for_plugin(&request.plugin);

        if breaker.admit(Instant::now()) == Admission::Rejected {
            return Err(PluginError::CircuitOpen {
                plugin: request.plugin.clone(),
            });
        }

        let _permit = budget.acquire(slot_kind).await;
        let _gate_permit = match self.registry.gate(&request.plugin) {
            Some(gate) => Some(gate.acquire_owned().await.map_err(|_| {
                PluginError::Failed {
                    plugin: request.plugin.clone(),
                    message: "concurrency gate closed".to_string(),
                }
            })?),
            None => None,
        };
        let plugin = self.registry.get(&request.plugin).await?;

        let ctx = SearchContext {
            fetcher: self.fetcher.clone(),
            browser: self.browser.clone(),
            deadline: Instant::now() + timeout,
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let query = SearchQuery {
            text: request.query.clone(),
            category: request.category,
            season: request.season,
            episode: request.episode,
            limit: self.config.max_limit,
        };

        let outcome = tokio::time::timeout(timeout, plugin.search(&ctx, &query)).await;
        let now = Instant::now();
        match outcome {
            Ok(Ok(results)) => {
                breaker.record_success();
                Ok(results.into_iter().filter_map(|r| r.validated()).collect())
            }
            Ok(Err(e)) => {
                breaker.record_failure(now);
                warn!("plugin '{}' failed: {}", request.plugin, e);
                Err(e)
            }
            Err(_) => {
                breaker.record_failure(now);
                Err(PluginError::Timeout {
                    plugin: request.plugin.clone(),
                    timeout,
                })
            }
        }
    }

    /// Fetch a stored CrawlJob by id.
    pub async fn load_job(&self, id: &Uuid) -> AppResult<CrawlJob> {
        let bytes = self
            .kv
            .get(&CrawlJob::kv_key(id))
            .await
            .map_err(|_| AppError::not_found("job", id.to_string()))?;
        let body = String::from_utf8(bytes)
            .map_err(|e| AppError::internal(format!("stored job is not UTF-8: {e}")))?;
        CrawlJob::parse(&body, self.kv_config.job_ttl)
    }

    pub fn default_limit(&self) -> usize {
        self.config.default_limit
    }

    pub fn max_limit(&self) -> usize {
        self.config.max_limit
    }
}

/// Dedup by (normalized title, primary url), first occurrence wins so
/// plugin result order is preserved. Running it twice is a no-op.
pub fn dedupe_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert((result.normalized_title(), result.url.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn result(title: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            alternatives: vec![],
            size: None,
            seeders: None,
            peers: None,
            published: None,
            release_name: None,
            category: 2000,
            source_url: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn dedupe_preserves_first_occurrence_order() {
        let input = vec![
            result("A", "http://x/1"),
            result("B", "http://x/2"),
            result("a", "http://x/1"),
            result("A", "http://x/3"),
        ];
        let deduped = dedupe_results(input);
        let titles: Vec<&str> = deduped.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "A"]);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let input = vec![
            result("A", "http://x/1"),
            result("B", "http://x/2"),
            result("A", "http://x/1"),
        ];
        let once = dedupe_results(input);
        let twice = dedupe_results(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn cache_key_is_stable_and_sensitive() {
        let request = IndexerRequest {
            plugin: "alpha".to_string(),
            query: "The Matrix".to_string(),
            category: Some(Category::Movies),
            season: None,
            episode: None,
            offset: 0,
            limit: 100,
        };
        let a = IndexerOrchestrator::cache_key(&request);
        let b = IndexerOrchestrator::cache_key(&request);
        assert_eq!(a, b);

        // Query case does not split the cache.
        let mut lowered = request.clone();
        lowered.query = "the matrix".to_string();
        assert_eq!(a, IndexerOrchestrator::cache_key(&lowered));

        // Category does.
        let mut tv = request.clone();
        tv.category = Some(Category::Tv);
        assert_ne!(a, IndexerOrchestrator::cache_key(&tv));

        // Pagination does not.
        let mut paged = request;
        paged.offset = 50;
        assert_eq!(a, IndexerOrchestrator::cache_key(&paged));
    }
}

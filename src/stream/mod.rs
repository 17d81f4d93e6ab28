//! Stream orchestrator
//!
//! The full pipeline behind one Stremio stream request: resolve the
//! canonical title, pick plugins by score, fan out language-grouped
//! queries inside the request's pool budget, merge and title-match the
//! results, rank and collapse per hoster, then pre-resolve the top
//! candidates through the hoster registry — stopping early once enough
//! direct URLs are in hand.
//!
//! Every plugin call is breaker-wrapped and emits a live score sample;
//! cancellation (client gone, shutdown) propagates through the request's
//! token and drops permits within the release budget.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{Admission, BreakerRegistry};
use crate::config::{ScoringConfig, StreamConfig};
use crate::errors::{AppResult, PluginError};
use crate::fetch::SharedFetcher;
use crate::models::{AgeBucket, RankedStream, ResolvedStream, SearchResult};
use crate::plugins::{BrowserEngine, PluginRegistry, Provides, SearchContext, SearchQuery};
use crate::pool::ConcurrencyPool;
use crate::probers::{SampleSender, ScoreSample};
use crate::resolve::ResolverRegistry;
use crate::scoring::{ScoreKey, ScoreStore, SearchProbe};

pub mod rank;
pub mod select;
pub mod title_match;
pub mod titles;

pub use rank::{PluginResults, build_candidates, rank_and_dedupe};
pub use title_match::TitleMatcher;
pub use titles::{ContentId, MediaKind, ResolvedTitle, TitleResolver};

/// Outcome per candidate URL after the resolve stage
enum ResolveOutcome {
    Resolved(ResolvedStream),
    /// Confirmed offline / captcha-blocked
    Dead,
}

pub struct StreamOrchestrator {
    config: StreamConfig,
    scoring: ScoringConfig,
    registry: Arc<PluginRegistry>,
    breakers: Arc<BreakerRegistry>,
    pool: Arc<ConcurrencyPool>,
    fetcher: SharedFetcher,
    browser: Arc<dyn BrowserEngine>,
    resolvers: Arc<ResolverRegistry>,
    titles: Arc<dyn TitleResolver>,
    score_store: Arc<ScoreStore>,
    samples: SampleSender,
}

impl StreamOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StreamConfig,
        scoring: ScoringConfig,
        registry: Arc<PluginRegistry>,
        breakers: Arc<BreakerRegistry>,
        pool: Arc<ConcurrencyPool>,
        fetcher: SharedFetcher,
        browser: Arc<dyn BrowserEngine>,
        resolvers: Arc<ResolverRegistry>,
        titles: Arc<dyn TitleResolver>,
        score_store: Arc<ScoreStore>,
        samples: SampleSender,
    ) -> Self {
        Self {
            config,
            scoring,
            registry,
            breakers,
            pool,
            fetcher,
            browser,
            resolvers,
            titles,
            score_store,
            samples,
        }
    }

    pub fn resolvers(&self) -> &Arc<ResolverRegistry> {
        &self.resolvers
    }

    /// Full pipeline for one stream request.
    pub async fn streams(
        &self,
        id: &ContentId,
        kind: MediaKind,
        cancel: CancellationToken,
    ) -> AppResult<Vec<RankedStream>> {
        let deadline = Instant::now() + self.config.request_deadline;

        let title = self.titles.resolve(id, kind).await?;
        info!(
            "stream request {} resolved to '{}' ({:?})",
            id, title.title, title.year
        );

        // Candidate set: stream-capable plugins, registration order.
        let candidates: Vec<(String, usize)> = self
            .registry
            .descriptors()
            .iter()
            .filter(|d| d.provides == Provides::Stream)
            .map(|d| (d.name.clone(), self.registry.registration_index(&d.name)))
            .collect();
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let now_year = chrono::Utc::now().format("%Y").to_string().parse().unwrap_or(2000);
        let key = ScoreKey {
            category: kind.category(),
            bucket: AgeBucket::from_year(title.year, now_year),
        };
        let seed = select::request_seed(&[&id.to_string(), &format!("{kind:?}")]);
        let selected =
            select::select_plugins(&self.score_store, &self.scoring, &candidates, key, seed).await;
        debug!("fan-out over {} plugins", selected.len());

        // The request registers once; all plugin calls share the budget.
        let budget = Arc::new(self.pool.register());

        let mut tasks = FuturesUnordered::new();
        for name in selected {
            let budget = budget.clone();
            let cancel = cancel.clone();
            let title = &title;
            tasks.push(async move {
                self.invoke_plugin(&name, title, id, kind, deadline, budget, cancel)
                    .await
            });
        }

        // Earlier-returning plugins merge first; the final stable sort by
        // score makes overall order deterministic anyway.
        let mut batches: Vec<PluginResults> = Vec::new();
        while let Some(batch) = tasks.next().await {
            if let Some(batch) = batch {
                batches.push(batch);
            }
        }
        drop(tasks);

        let all_titles = title.all_titles();
        let matcher = TitleMatcher::new(
            &title.title,
            &all_titles[1..],
            title.year,
            kind == MediaKind::Series,
        );
        let mut candidates = build_candidates(batches, &matcher, &self.config, &self.resolvers);

        // Episode requests must not surface other episodes.
        if let (Some(season), Some(episode)) = (id.season, id.episode) {
            candidates.retain(|stream| episode_matches(&stream.title, season, episode));
        }

        let ranked = rank_and_dedupe(candidates);

        let resolved = self
            .resolve_top(&ranked, deadline, &cancel)
            .await;

        // Attach resolutions; keep unresolved streams only when a known
        // hoster could still late-resolve them on demand.
        let mut out = Vec::new();
        for mut stream in ranked {
            match resolved.get(&stream.url) {
                Some(ResolveOutcome::Resolved(direct)) => {
                    if let Some(quality) = direct.quality
                        && stream.quality == crate::models::Quality::Unknown
                    {
                        stream.quality = quality;
                    }
                    stream.resolved = Some(direct.clone());
                    out.push(stream);
                }
                Some(ResolveOutcome::Dead) => {}
                None => {
                    if self.resolvers.supports_url(&stream.url) {
                        out.push(stream);
                    }
                }
            }
        }
        info!(
            "stream request {} produced {} playable candidates",
            id,
            out.len()
        );
        Ok(out)
    }

    /// One breaker-wrapped plugin invocation covering the language
    /// group's query set. Returns `None` when the plugin was skipped or
    /// contributed nothing.
    #[allow(clippy::too_many_arguments)]
    async fn invoke_plugin(
        &self,
        name: &str,
        title: &ResolvedTitle,
        id: &ContentId,
        kind: MediaKind,
        deadline: Instant,
        budget: Arc<crate::pool::RequestBudget>,
        cancel: CancellationToken,
    ) -> Option<PluginResults> {
        let descriptor = self.registry.descriptor(name)?;
        let slot_kind = descriptor.mode.slot_kind();
        let timeout = descriptor
            .timeout
            .unwrap_or(self.config.plugin_timeout)
            .min(deadline.saturating_duration_since(Instant::now()));
        let language = descriptor
            .languages
            .first()
            .map(|s| s.as_str())
            .unwrap_or("en");

        let breaker = self.breakers.for_plugin(name);
        if breaker.admit(Instant::now()) == Admission::Rejected {
            debug!("skipping '{}': circuit open", name);
            return None;
        }

        let permit = tokio::select! {
            permit = budget.acquire(slot_kind) => permit,
            _ = cancel.cancelled() => return None,
        };
        let _gate_permit = match self.registry.gate(name) {
            Some(gate) => {
                tokio::select! {
                    permit = gate.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => return None,
                }
            }
            None => None,
        };

        let plugin = match self.registry.get(name).await {
            Ok(plugin) => plugin,
            Err(e) => {
                warn!("cannot load plugin '{}': {}", name, e);
                breaker.record_failure(Instant::now());
                return None;
            }
        };

        let ctx = SearchContext {
            fetcher: self.fetcher.clone(),
            browser: self.browser.clone(),
            deadline: Instant::now() + timeout,
            cancel: cancel.clone(),
        };

        let started = Instant::now();
        let queries = query_set(title, language);
        let mut merged: Vec<SearchResult> = Vec::new();
        let mut seen_urls = std::collections::HashSet::new();
        let mut failure: Option<PluginError> = None;

        for text in queries {
            if cancel.is_cancelled() || Instant::now() >= ctx.deadline {
                break;
            }
            let query = SearchQuery {
                text,
                category: Some(kind.category()),
                season: id.season,
                episode: id.episode,
                limit: descriptor.max_results.unwrap_or(100),
            };
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(timeout, plugin.search(&ctx, &query)) => outcome,
                _ = cancel.cancelled() => break,
            };
            match outcome {
                Ok(Ok(results)) => {
                    for result in results.into_iter().filter_map(|r| r.validated()) {
                        if seen_urls.insert(result.url.clone()) {
                            merged.push(result);
                        }
                    }
                }
                Ok(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                Err(_) => {
                    failure = Some(PluginError::Timeout {
                        plugin: name.to_string(),
                        timeout,
                    });
                    break;
                }
            }
        }
        drop(permit);

        let duration_ms = started.elapsed().as_millis() as u64;
        let now_year: i32 = chrono::Utc::now()
            .format("%Y")
            .to_string()
            .parse()
            .unwrap_or(2000);
        let sample_key = ScoreKey {
            category: kind.category(),
            bucket: AgeBucket::from_year(title.year, now_year),
        };

        match failure {
            Some(e) => {
                breaker.record_failure(Instant::now());
                warn!("plugin '{}' failed during stream fan-out: {}", name, e);
                let _ = self.samples.send(ScoreSample::Search {
                    plugin: name.to_string(),
                    key: sample_key,
                    probe: SearchProbe {
                        ok: false,
                        duration_ms,
                        items_ratio: 0.0,
                        hoster_reachable_ratio: 0.0,
                        hoster_supported_ratio: 0.0,
                    },
                });
                None
            }
            None => {
                breaker.record_success();
                // Live sample: reachability approximated by hoster
                // support, no extra HEAD traffic on the hot path.
                let all: Vec<&str> = merged.iter().flat_map(|r| r.all_urls()).collect();
                let supported = if all.is_empty() {
                    0.0
                } else {
                    all.iter()
                        .filter(|url| self.resolvers.supports_url(url))
                        .count() as f64
                        / all.len() as f64
                };
                let _ = self.samples.send(ScoreSample::Search {
                    plugin: name.to_string(),
                    key: sample_key,
                    probe: SearchProbe {
                        ok: true,
                        duration_ms,
                        items_ratio: (merged.len() as f64 / 20.0).min(1.0),
                        hoster_reachable_ratio: supported,
                        hoster_supported_ratio: supported,
                    },
                });
                Some(PluginResults {
                    plugin: name.to_string(),
                    registration_index: self.registry.registration_index(name),
                    results: merged,
                })
            }
        }
    }

    /// Early-stop resolve: run the top candidates through the hoster
    /// registry concurrently, stop as soon as the target count resolved,
    /// abort the stragglers (permits release on drop).
    async fn resolve_top(
        &self,
        ranked: &[RankedStream],
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> HashMap<String, ResolveOutcome> {
        let candidates: Vec<String> = ranked
            .iter()
            .take(self.config.max_probe_count)
            .map(|s| s.url.clone())
            .collect();
        if candidates.is_empty() {
            return HashMap::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.resolve_concurrency.max(1)));
        let child_cancel = cancel.child_token();
        let mut join_set = tokio::task::JoinSet::new();

        for url in candidates {
            let resolvers = self.resolvers.clone();
            let semaphore = semaphore.clone();
            let token = child_cancel.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (url, None);
                };
                if token.is_cancelled() {
                    return (url, None);
                }
                let outcome = tokio::select! {
                    outcome = resolvers.resolve_url(&url, deadline) => outcome,
                    _ = token.cancelled() => return (url, None),
                };
                (url, Some(outcome))
            });
        }

        let mut outcomes = HashMap::new();
        let mut resolved_count = 0usize;
        while let Some(joined) = join_set.join_next().await {
            let Ok((url, outcome)) = joined else { continue };
            match outcome {
                Some(Ok(Some(direct))) => {
                    outcomes.insert(url, ResolveOutcome::Resolved(direct));
                    resolved_count += 1;
                    if resolved_count >= self.config.resolve_target_count {
                        debug!(
                            "early-stop: {} resolved, cancelling remaining probes",
                            resolved_count
                        );
                        child_cancel.cancel();
                        join_set.abort_all();
                    }
                }
                Some(Ok(None)) => {
                    outcomes.insert(url, ResolveOutcome::Dead);
                }
                Some(Err(e)) => {
                    debug!("resolve failed for {}: {}", url, e);
                }
                None => {}
            }
        }
        outcomes
    }
}

/// Query set for one language: localized title plus punctuation-stripped
/// and subtitle-free variants where they differ.
fn query_set(title: &ResolvedTitle, language: &str) -> Vec<String> {
    let base = title.title_for_language(language);
    let mut queries = vec![base.to_string()];

    let stripped = title_match::normalize(base);
    if !stripped.is_empty() && stripped != base.to_lowercase() {
        queries.push(stripped);
    }

    // "Title: Subtitle" → "Title"
    if let Some(main) = base.split(':').next()
        && main.len() < base.len()
    {
        let main = main.trim().to_string();
        if !main.is_empty() && !queries.iter().any(|q| q.eq_ignore_ascii_case(&main)) {
            queries.push(main);
        }
    }
    queries
}

/// Accept a release for an episode request unless it explicitly names a
/// different episode.
fn episode_matches(release: &str, season: u32, episode: u32) -> bool {
    static EPISODE_RE: std::sync::LazyLock<regex::Regex> =
        std::sync::LazyLock::new(|| regex::Regex::new(r"S(\d{1,2})E(\d{1,2})").expect("static"));
    let upper = release.to_uppercase();
    match EPISODE_RE.captures(&upper) {
        Some(captures) => {
            let s: u32 = captures[1].parse().unwrap_or(0);
            let e: u32 = captures[2].parse().unwrap_or(0);
            s == season && e == episode
        }
        None => true,
    }
}

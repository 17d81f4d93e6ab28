//! Background probers
//!
//! One scheduler loop ticks every few minutes, collects everything whose
//! probe is due (health: daily per plugin; mini-search: a few runs per
//! week per plugin/category/bucket), and dispatches probes as isolated
//! tasks bounded by per-type semaphores. Probe outcomes — and live
//! samples from the stream orchestrator — travel over one mpsc channel
//! into the score updater, which owns all writes to the score store.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::BreakerRegistry;
use crate::config::ProberConfig;
use crate::fetch::SharedFetcher;
use crate::models::{AgeBucket, Category};
use crate::plugins::{BrowserEngine, PluginRegistry, SearchContext};
use crate::resolve::ResolverRegistry;
use crate::scoring::{HealthProbe, ProbeKind, ScoreKey, ScoreStore, SearchProbe};

pub mod health;
pub mod minisearch;
pub mod queries;

pub use health::{HealthReport, probe_health, probe_with_mirrors};
pub use queries::QueryPool;

/// One observation on its way to the score store
#[derive(Debug)]
pub enum ScoreSample {
    Health {
        plugin: String,
        probe: HealthProbe,
    },
    Search {
        plugin: String,
        key: ScoreKey,
        probe: SearchProbe,
    },
}

pub type SampleSender = mpsc::UnboundedSender<ScoreSample>;

pub fn sample_channel() -> (SampleSender, mpsc::UnboundedReceiver<ScoreSample>) {
    mpsc::unbounded_channel()
}

/// Consumes samples and persists score updates. Sole writer to the score
/// store, so snapshot read-modify-write needs no cross-task locking.
pub async fn run_score_updater(
    store: Arc<ScoreStore>,
    mut rx: mpsc::UnboundedReceiver<ScoreSample>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            sample = rx.recv() => {
                let Some(sample) = sample else { break };
                let now = chrono::Utc::now().timestamp();
                match sample {
                    ScoreSample::Health { plugin, probe } => {
                        store.apply_health(&plugin, &probe, now).await;
                    }
                    ScoreSample::Search { plugin, key, probe } => {
                        store.apply_search(&plugin, key, &probe, now).await;
                    }
                }
            }
            _ = cancel.cancelled() => {
                // Drain whatever is already queued, then stop.
                while let Ok(sample) = rx.try_recv() {
                    let now = chrono::Utc::now().timestamp();
                    match sample {
                        ScoreSample::Health { plugin, probe } => {
                            store.apply_health(&plugin, &probe, now).await;
                        }
                        ScoreSample::Search { plugin, key, probe } => {
                            store.apply_search(&plugin, key, &probe, now).await;
                        }
                    }
                }
                break;
            }
        }
    }
    debug!("score updater stopped");
}

pub struct ProberScheduler {
    config: ProberConfig,
    registry: Arc<PluginRegistry>,
    resolvers: Arc<ResolverRegistry>,
    fetcher: SharedFetcher,
    browser: Arc<dyn BrowserEngine>,
    store: Arc<ScoreStore>,
    breakers: Arc<BreakerRegistry>,
    queries: QueryPool,
    samples: SampleSender,
}

impl ProberScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProberConfig,
        registry: Arc<PluginRegistry>,
        resolvers: Arc<ResolverRegistry>,
        fetcher: SharedFetcher,
        browser: Arc<dyn BrowserEngine>,
        store: Arc<ScoreStore>,
        breakers: Arc<BreakerRegistry>,
        queries: QueryPool,
        samples: SampleSender,
    ) -> Self {
        Self {
            config,
            registry,
            resolvers,
            fetcher,
            browser,
            store,
            breakers,
            queries,
            samples,
        }
    }

    /// Scheduler loop. One tick collects all due probes and dispatches
    /// them; a crashing probe task never takes the loop down.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("probers disabled by configuration");
            return;
        }
        info!(
            "prober scheduler started (tick {:?}, health every {:?}, {} search runs/week)",
            self.config.tick_interval, self.config.health_interval, self.config.search_runs_per_week
        );

        let health_sem = Arc::new(Semaphore::new(self.config.health_concurrency));
        let search_sem = Arc::new(Semaphore::new(self.config.search_concurrency));

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.dispatch_due(&health_sem, &search_sem, &cancel).await;
                }
                _ = cancel.cancelled() => {
                    info!("prober scheduler stopped");
                    break;
                }
            }
        }
    }

    async fn dispatch_due(
        &self,
        health_sem: &Arc<Semaphore>,
        search_sem: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) {
        let now = chrono::Utc::now().timestamp();
        let search_period = (7 * 24 * 3600 / self.config.search_runs_per_week.max(1)) as i64;

        for name in self.registry.list_names() {
            // Health probe: once per plugin per interval.
            let due = match self.store.last_run(ProbeKind::Health, &name, None).await {
                Some(last) => now - last >= self.config.health_interval.as_secs() as i64,
                None => true,
            };
            if due {
                self.store
                    .record_run(ProbeKind::Health, &name, None, now)
                    .await;
                self.spawn_health_probe(name.clone(), health_sem.clone(), cancel.clone());
            }

            // Mini-search probes per (category, bucket) the plugin covers.
            let Some(descriptor) = self.registry.descriptor(&name) else {
                continue;
            };
            let covered: Vec<(Category, AgeBucket)> = Category::all()
                .into_iter()
                .flat_map(|c| AgeBucket::all().into_iter().map(move |b| (c, b)))
                .filter(|(_, bucket)| descriptor.covers_bucket(*bucket))
                .collect();
            for (slot, (category, bucket)) in covered.into_iter().enumerate() {
                let key = ScoreKey { category, bucket };
                let due = match self
                    .store
                    .last_run(ProbeKind::Search, &name, Some(key))
                    .await
                {
                    Some(last) => now - last >= search_period,
                    None => true,
                };
                if due {
                    self.store
                        .record_run(ProbeKind::Search, &name, Some(key), now)
                        .await;
                    self.spawn_search_probe(
                        name.clone(),
                        key,
                        slot,
                        search_sem.clone(),
                        cancel.clone(),
                    );
                }
            }
        }
    }

    fn spawn_health_probe(
        &self,
        plugin: String,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) {
        let Some(descriptor) = self.registry.descriptor(&plugin) else {
            return;
        };
        let base_url = descriptor.base_url.clone();
        let fetcher = self.fetcher.clone();
        let samples = self.samples.clone();
        let timeout = self.config.health_probe_timeout;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            let report = probe_health(&fetcher, &base_url, Instant::now() + timeout).await;
            debug!(
                "health probe '{}': reachable={} captcha={} ({}ms)",
                plugin, report.reachable, report.captcha, report.duration_ms
            );
            let _ = samples.send(ScoreSample::Health {
                plugin,
                probe: report.as_probe(),
            });
        });
    }

    fn spawn_search_probe(
        &self,
        plugin: String,
        key: ScoreKey,
        slot: usize,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) {
        let registry = self.registry.clone();
        let resolvers = self.resolvers.clone();
        let fetcher = self.fetcher.clone();
        let browser = self.browser.clone();
        let samples = self.samples.clone();
        let breakers = self.breakers.clone();
        let queries = self.queries.clone();
        let timeout = self.config.search_probe_timeout;

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            let query = queries.query_for(&plugin, slot).await;
            if query.is_empty() {
                return;
            }
            let target = match registry.get(&plugin).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("search probe cannot load '{}': {}", plugin, e);
                    return;
                }
            };
            let ctx = SearchContext {
                fetcher,
                browser,
                deadline: Instant::now() + timeout,
                cancel,
            };
            let probe = minisearch::probe_search(target.as_ref(), &ctx, &query, &resolvers).await;
            debug!(
                "search probe '{}' [{}/{}]: ok={} items={:.2} supported={:.2}",
                plugin, key.category, key.bucket, probe.ok, probe.items_ratio,
                probe.hoster_supported_ratio
            );
            // A probe that errored or came back empty for a query that
            // should match counts as a breaker failure.
            let breaker = breakers.for_plugin(&plugin);
            if probe.ok && probe.items_ratio > 0.0 {
                breaker.record_success();
            } else {
                breaker.record_failure(Instant::now());
            }
            let _ = samples.send(ScoreSample::Search { plugin, key, probe });
        });
    }
}

//! Composition root and graceful lifecycle
//!
//! [`App::build`] constructs the object graph in dependency order:
//! KV → HTTP client → pool → plugin registry → scoring + probers →
//! resolver registry → orchestrators. No module-level globals; everything
//! is passed by reference from here.
//!
//! Shutdown is the reverse: readiness flips off, the cancellation token
//! stops background services, a drain window waits for in-flight
//! requests, then resources are torn down.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::autotune;
use crate::breaker::BreakerRegistry;
use crate::config::{Config, KvBackendKind};
use crate::fetch::{RateLimitedClient, SharedFetcher};
use crate::indexer::IndexerOrchestrator;
use crate::kv::{KvStore, SqliteKvStore};
use crate::plugins::{BrowserEngine, DisabledBrowser, PluginRegistry};
use crate::pool::ConcurrencyPool;
use crate::probers::{ProberScheduler, QueryPool, run_score_updater, sample_channel};
use crate::resolve::ResolverRegistry;
use crate::scoring::ScoreStore;
use crate::stream::titles::{
    CachedTitleResolver, ChainTitleResolver, ImdbSuggestResolver, TitleResolver, TmdbTitleResolver,
};
use crate::stream::StreamOrchestrator;

/// In-flight tracking and readiness, shared with the web layer
pub struct Lifecycle {
    ready: AtomicBool,
    in_flight: AtomicU64,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            lifecycle: self.clone(),
        }
    }

    /// Wait until in-flight hits zero or the window closes.
    pub async fn drain(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

pub struct InFlightGuard {
    lifecycle: Arc<Lifecycle>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct App {
    pub config: Config,
    pub kv: Arc<dyn KvStore>,
    pub fetcher: SharedFetcher,
    pub pool: Arc<ConcurrencyPool>,
    pub breakers: Arc<BreakerRegistry>,
    pub registry: Arc<PluginRegistry>,
    pub browser: Arc<dyn BrowserEngine>,
    pub resolvers: Arc<ResolverRegistry>,
    pub score_store: Arc<ScoreStore>,
    pub queries: QueryPool,
    pub indexer: Arc<IndexerOrchestrator>,
    pub stream: Arc<StreamOrchestrator>,
    pub lifecycle: Arc<Lifecycle>,
    pub shutdown: CancellationToken,
    /// Held for background sweeping when the local backend is active
    sqlite: Option<Arc<SqliteKvStore>>,
    prober_scheduler: Arc<ProberScheduler>,
    score_updater_rx:
        std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<crate::probers::ScoreSample>>>,
}

impl App {
    pub async fn build(config: Config) -> Result<Arc<Self>> {
        let shutdown = CancellationToken::new();

        // Storage first: everything above it persists through the KV.
        let (kv, sqlite): (Arc<dyn KvStore>, Option<Arc<SqliteKvStore>>) =
            match config.kv.backend {
                KvBackendKind::Local => {
                    let store = Arc::new(
                        SqliteKvStore::open(&config.kv.path)
                            .await
                            .context("opening local kv store")?,
                    );
                    (store.clone(), Some(store))
                }
                _ => (crate::kv::open(&config.kv).await?, None),
            };

        let fetcher: SharedFetcher = Arc::new(
            RateLimitedClient::new(config.fetch.clone()).context("building http client")?,
        );

        let resources = autotune::detect();
        let tuned = autotune::tune(resources, &config.pool);
        let pool = ConcurrencyPool::new(tuned.fast_slots, tuned.headless_slots);

        let registry = Arc::new(
            PluginRegistry::discover(&config.plugins).context("discovering plugins")?,
        );

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let browser: Arc<dyn BrowserEngine> = Arc::new(DisabledBrowser);

        let score_store = Arc::new(ScoreStore::new(
            kv.clone(),
            config.scoring.clone(),
            config.kv.score_ttl,
        ));

        let resolvers = Arc::new(ResolverRegistry::from_config(
            config.resolve.clone(),
            fetcher.clone(),
        ));

        let queries = QueryPool::new(kv.clone(), fetcher.clone(), config.probers.clone());
        let (samples_tx, samples_rx) = sample_channel();

        let prober_scheduler = Arc::new(ProberScheduler::new(
            config.probers.clone(),
            registry.clone(),
            resolvers.clone(),
            fetcher.clone(),
            browser.clone(),
            score_store.clone(),
            breakers.clone(),
            queries.clone(),
            samples_tx.clone(),
        ));

        // Title resolution: TMDB when a key is configured, IMDb
        // suggestions as keyless fallback, both behind the KV cache.
        let plugin_languages: Vec<String> = {
            let mut languages: Vec<String> = registry
                .descriptors()
                .iter()
                .flat_map(|d| d.languages.iter().cloned())
                .collect();
            languages.sort();
            languages.dedup();
            languages
        };
        let mut title_backends: Vec<Arc<dyn TitleResolver>> = Vec::new();
        if let Some(api_key) = &config.stream.tmdb_api_key {
            title_backends.push(Arc::new(TmdbTitleResolver::new(
                fetcher.clone(),
                api_key.clone(),
                plugin_languages,
            )));
        }
        title_backends.push(Arc::new(ImdbSuggestResolver::new(fetcher.clone())));
        let titles: Arc<dyn TitleResolver> = Arc::new(CachedTitleResolver::new(
            Arc::new(ChainTitleResolver::new(title_backends)),
            kv.clone(),
            config.stream.title_cache_ttl,
        ));

        let indexer = Arc::new(IndexerOrchestrator::new(
            config.indexer.clone(),
            config.kv.clone(),
            kv.clone(),
            fetcher.clone(),
            pool.clone(),
            breakers.clone(),
            registry.clone(),
            browser.clone(),
            config.stream.plugin_timeout,
        ));

        let stream = Arc::new(StreamOrchestrator::new(
            config.stream.clone(),
            config.scoring.clone(),
            registry.clone(),
            breakers.clone(),
            pool.clone(),
            fetcher.clone(),
            browser.clone(),
            resolvers.clone(),
            titles,
            score_store.clone(),
            samples_tx,
        ));

        info!("application graph constructed");
        Ok(Arc::new(Self {
            config,
            kv,
            fetcher,
            pool,
            breakers,
            registry,
            browser,
            resolvers,
            score_store,
            queries,
            indexer,
            stream,
            lifecycle: Arc::new(Lifecycle::new()),
            shutdown,
            sqlite,
            prober_scheduler,
            score_updater_rx: std::sync::Mutex::new(Some(samples_rx)),
        }))
    }

    /// Start background services. Called once after the server binds.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let rx = self
            .score_updater_rx
            .lock()
            .expect("score updater receiver mutex")
            .take()
            .expect("spawn_background called twice");
        handles.push(tokio::spawn(run_score_updater(
            self.score_store.clone(),
            rx,
            self.shutdown.clone(),
        )));

        handles.push(tokio::spawn(
            self.prober_scheduler.clone().run(self.shutdown.clone()),
        ));

        handles.push(tokio::spawn(crate::fetch::run_bucket_sweeper(
            self.fetcher.clone(),
            self.shutdown.clone(),
        )));

        handles.push(tokio::spawn(crate::resolve::run_cache_sweeper(
            self.resolvers.clone(),
            self.config.resolve.sweep_interval,
            self.shutdown.clone(),
        )));

        if let Some(sqlite) = &self.sqlite {
            let sqlite = sqlite.clone();
            let cancel = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(10 * 60));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(e) = sqlite.sweep_expired().await {
                                warn!("kv sweep failed: {}", e);
                            }
                        }
                        _ = cancel.cancelled() => break,
                    }
                }
            }));
        }

        self.lifecycle.set_ready(true);
        info!("background services started, application ready");
        handles
    }

    /// Graceful shutdown: refuse new work, drain, tear down.
    pub async fn shutdown(&self) {
        info!("shutdown initiated");
        self.lifecycle.set_ready(false);
        self.shutdown.cancel();

        let drained = self
            .lifecycle
            .drain(self.config.server.drain_timeout)
            .await;
        if drained {
            info!("drained cleanly, {} requests in flight", self.lifecycle.in_flight());
        } else {
            warn!(
                "drain window elapsed with {} requests still in flight",
                self.lifecycle.in_flight()
            );
        }

        if let Some(sqlite) = &self.sqlite {
            sqlite.close().await;
        }
        info!("shutdown complete");
    }
}

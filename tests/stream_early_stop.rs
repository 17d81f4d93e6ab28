//! Stream pipeline end to end with a scripted hoster registry: the
//! early-stop resolver must return as soon as the target count of direct
//! URLs is reached and cancel the slow stragglers instead of waiting for
//! them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use trawlarr::breaker::BreakerRegistry;
use trawlarr::config::{
    BreakerConfig, FetchConfig, PluginsConfig, ResolveConfig, ScoringConfig, StreamConfig,
};
use trawlarr::errors::{FetchError, PluginError, ResolveError};
use trawlarr::fetch::RateLimitedClient;
use trawlarr::kv::MemoryKvStore;
use trawlarr::models::{ResolvedStream, SearchResult};
use trawlarr::plugins::{
    DisabledBrowser, PluginDescriptor, PluginMode, PluginRegistry, Provides, ScrapePlugin,
    SearchContext, SearchQuery,
};
use trawlarr::pool::ConcurrencyPool;
use trawlarr::probers::sample_channel;
use trawlarr::resolve::{HosterResolver, ResolverRegistry};
use trawlarr::scoring::ScoreStore;
use trawlarr::stream::titles::{ContentId, MediaKind, ResolvedTitle, TitleResolver};
use trawlarr::stream::StreamOrchestrator;

const FAST_HOSTERS: usize = 15;
const TOTAL_HOSTERS: usize = 30;

struct FixedTitle;

#[async_trait]
impl TitleResolver for FixedTitle {
    async fn resolve(&self, _id: &ContentId, _kind: MediaKind) -> Result<ResolvedTitle, FetchError> {
        Ok(ResolvedTitle {
            title: "Dark Waters".to_string(),
            year: None,
            localized: Default::default(),
        })
    }
}

/// Thirty results on thirty distinct hosters; the first fifteen carry a
/// better quality tag so they rank on top.
struct ManyHostersPlugin {
    descriptor: PluginDescriptor,
}

impl ManyHostersPlugin {
    fn new() -> Self {
        Self {
            descriptor: PluginDescriptor {
                name: "many-hosters".to_string(),
                mode: PluginMode::FastHttp,
                provides: Provides::Stream,
                languages: vec!["de".to_string()],
                age_affinity: Default::default(),
                base_url: "https://many-hosters.example".to_string(),
                mirrors: vec![],
                timeout: None,
                max_concurrent: None,
                max_results: None,
            },
        }
    }
}

#[async_trait]
impl ScrapePlugin for ManyHostersPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        _ctx: &SearchContext,
        _query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, PluginError> {
        let results = (0..TOTAL_HOSTERS)
            .map(|i| {
                let quality = if i < FAST_HOSTERS { "1080p" } else { "CAM" };
                SearchResult {
                    title: format!("Dark.Waters.German.DL.{quality}.h{i:02}"),
                    url: format!("https://h{i:02}.example/e/file{i}"),
                    alternatives: vec![],
                    size: None,
                    seeders: None,
                    peers: None,
                    published: None,
                    release_name: Some(format!("Dark.Waters.German.DL.{quality}")),
                    category: 2000,
                    source_url: None,
                    metadata: HashMap::new(),
                }
            })
            .collect();
        Ok(results)
    }
}

/// Fast hosters answer instantly, slow hosters hang for five seconds.
struct ScriptedResolver {
    domains: Vec<String>,
    slow_started: Arc<AtomicUsize>,
}

#[async_trait]
impl HosterResolver for ScriptedResolver {
    fn name(&self) -> &str {
        "scripted"
    }

    fn domains(&self) -> &[String] {
        &self.domains
    }

    async fn resolve(
        &self,
        _fetcher: &RateLimitedClient,
        url: &str,
        _deadline: Instant,
    ) -> Result<Option<ResolvedStream>, ResolveError> {
        let index: usize = url
            .split("file")
            .last()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        if index >= FAST_HOSTERS {
            self.slow_started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(Some(ResolvedStream {
            video_url: format!("{url}/direct.mp4"),
            quality: None,
            headers: HashMap::new(),
        }))
    }
}

#[tokio::test]
async fn early_stop_cancels_slow_resolves() {
    let mut registry = PluginRegistry::discover(&PluginsConfig {
        definitions_dir: std::path::PathBuf::from("/nonexistent"),
        overrides: Default::default(),
    })
    .unwrap();
    registry
        .register_builtin(Arc::new(ManyHostersPlugin::new()))
        .unwrap();
    let registry = Arc::new(registry);

    let fetcher = Arc::new(RateLimitedClient::new(FetchConfig::default()).unwrap());
    let slow_started = Arc::new(AtomicUsize::new(0));

    let mut resolvers = ResolverRegistry::from_config(ResolveConfig::default(), fetcher.clone());
    resolvers.register(Arc::new(ScriptedResolver {
        domains: (0..TOTAL_HOSTERS).map(|i| format!("h{i:02}.example")).collect(),
        slow_started: slow_started.clone(),
    }));
    let resolvers = Arc::new(resolvers);

    let kv = Arc::new(MemoryKvStore::new());
    let score_store = Arc::new(ScoreStore::new(
        kv,
        ScoringConfig::default(),
        Duration::from_secs(3600),
    ));
    let (samples_tx, _samples_rx) = sample_channel();

    let config = StreamConfig {
        max_probe_count: TOTAL_HOSTERS,
        resolve_target_count: FAST_HOSTERS,
        resolve_concurrency: TOTAL_HOSTERS,
        ..Default::default()
    };

    let orchestrator = StreamOrchestrator::new(
        config,
        ScoringConfig::default(),
        registry,
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        ConcurrencyPool::new(10, 2),
        fetcher,
        Arc::new(DisabledBrowser),
        resolvers,
        Arc::new(FixedTitle),
        score_store,
        samples_tx,
    );

    let id: ContentId = "tt0000001".parse().unwrap();
    let started = Instant::now();
    let streams = orchestrator
        .streams(&id, MediaKind::Movie, CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // The fifteen fast hosters satisfied the target; nothing waited for
    // the five-second sleepers.
    assert!(
        elapsed < Duration::from_secs(2),
        "early stop took {elapsed:?}"
    );

    let resolved: Vec<_> = streams.iter().filter(|s| s.resolved.is_some()).collect();
    assert_eq!(resolved.len(), FAST_HOSTERS);
    for stream in &resolved {
        assert!(stream.resolved.as_ref().unwrap().video_url.ends_with("/direct.mp4"));
    }

    // Slow hosters stay in the list as late-resolve candidates, one per
    // hoster (dedup invariant).
    assert_eq!(streams.len(), TOTAL_HOSTERS);
    let mut hosters: Vec<&str> = streams.iter().map(|s| s.hoster.as_str()).collect();
    hosters.sort_unstable();
    hosters.dedup();
    assert_eq!(hosters.len(), TOTAL_HOSTERS);

    // Ranked output puts resolved (1080p) streams first and is sorted by
    // descending score.
    assert!(streams[0].resolved.is_some());
    for pair in streams.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

//! Circuit breaker behavior at the orchestrator level: repeated plugin
//! failures trip the breaker, after which the plugin is shed from the
//! fan-out and the feed degrades to empty instead of erroring.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use trawlarr::breaker::BreakerRegistry;
use trawlarr::config::{BreakerConfig, IndexerConfig, KvConfig, PluginsConfig};
use trawlarr::errors::PluginError;
use trawlarr::indexer::{IndexerOrchestrator, IndexerRequest};
use trawlarr::kv::MemoryKvStore;
use trawlarr::models::SearchResult;
use trawlarr::plugins::{
    DisabledBrowser, PluginDescriptor, PluginMode, PluginRegistry, Provides, ScrapePlugin,
    SearchContext, SearchQuery,
};
use trawlarr::pool::ConcurrencyPool;

struct AlwaysFailing {
    descriptor: PluginDescriptor,
}

impl AlwaysFailing {
    fn new() -> Self {
        Self {
            descriptor: PluginDescriptor {
                name: "flaky-site".to_string(),
                mode: PluginMode::FastHttp,
                provides: Provides::Download,
                languages: vec!["en".to_string()],
                age_affinity: Default::default(),
                base_url: "https://flaky.example".to_string(),
                mirrors: vec![],
                timeout: None,
                max_concurrent: None,
                max_results: None,
            },
        }
    }
}

#[async_trait]
impl ScrapePlugin for AlwaysFailing {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        _ctx: &SearchContext,
        _query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, PluginError> {
        Err(PluginError::Failed {
            plugin: "flaky-site".to_string(),
            message: "scrape layout changed".to_string(),
        })
    }
}

fn orchestrator() -> IndexerOrchestrator {
    let mut registry = PluginRegistry::discover(&PluginsConfig {
        definitions_dir: std::path::PathBuf::from("/nonexistent"),
        overrides: Default::default(),
    })
    .unwrap();
    registry
        .register_builtin(Arc::new(AlwaysFailing::new()))
        .unwrap();

    let fetcher = Arc::new(
        trawlarr::fetch::RateLimitedClient::new(trawlarr::config::FetchConfig::default()).unwrap(),
    );
    IndexerOrchestrator::new(
        IndexerConfig::default(),
        KvConfig::default(),
        Arc::new(MemoryKvStore::new()),
        fetcher,
        ConcurrencyPool::new(4, 1),
        Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        })),
        Arc::new(registry),
        Arc::new(DisabledBrowser),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn five_failures_trip_then_shed() {
    let orchestrator = orchestrator();
    let request = IndexerRequest {
        plugin: "flaky-site".to_string(),
        query: "anything".to_string(),
        category: None,
        season: None,
        episode: None,
        offset: 0,
        limit: 10,
    };

    // Five consecutive failures surface as errors while the breaker
    // counts them.
    for _ in 0..5 {
        assert!(orchestrator.search(&request).await.is_err());
    }

    // The circuit is now open: the plugin is shed and the feed is empty
    // but successful.
    let shed = orchestrator.search(&request).await.unwrap();
    assert!(shed.items.is_empty());
    assert_eq!(shed.total, 0);

    // Still open on the next call; no half-open probe before cooldown.
    let still_shed = orchestrator.search(&request).await.unwrap();
    assert!(still_shed.items.is_empty());
}

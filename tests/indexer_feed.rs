//! Indexer orchestrator end to end against a local site: plugin search,
//! URL validation, alternative promotion, CrawlJob packaging and the
//! result cache.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use trawlarr::breaker::BreakerRegistry;
use trawlarr::config::{BreakerConfig, IndexerConfig, KvConfig, PluginsConfig};
use trawlarr::indexer::{IndexerOrchestrator, IndexerRequest};
use trawlarr::kv::MemoryKvStore;
use trawlarr::models::CrawlJob;
use trawlarr::plugins::{DisabledBrowser, PluginRegistry};
use trawlarr::pool::ConcurrencyPool;

/// Tiny site playing both roles: the plugin's search API and the file
/// hosters being validated. The API emits absolute URLs back to itself
/// since the ephemeral port is only known after binding.
async fn spawn_site() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");
    let api_base = base.clone();
    let router = Router::new()
        .route(
            "/api",
            get(move || {
                let base = api_base.clone();
                async move {
                    axum::Json(serde_json::json!({
                        "items": [
                            {
                                "title": "Movie.2024.German.1080p",
                                "url": format!("{base}/files/dead"),
                                "mirrors": [
                                    format!("{base}/files/ok1"),
                                    format!("{base}/files/ok2")
                                ]
                            },
                            {
                                "title": "Movie.2024.German.720p",
                                "url": format!("{base}/files/ok3"),
                                "mirrors": []
                            },
                            {
                                "title": "Movie.2024.All.Dead",
                                "url": format!("{base}/files/dead"),
                                "mirrors": [format!("{base}/files/dead2")]
                            }
                        ]
                    }))
                }
            }),
        )
        .route("/files/ok1", get(|| async { "data" }))
        .route("/files/ok2", get(|| async { "data" }))
        .route("/files/ok3", get(|| async { "data" }))
        .route("/files/dead", get(|| async { StatusCode::NOT_FOUND }))
        .route("/files/dead2", get(|| async { StatusCode::GONE }));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base
}

fn write_plugin(dir: &Path, base_url: &str) {
    let body = format!(
        r#"
name: local-site
provides: download
languages: [de]
base_url: {base_url}
search:
  path: "/api?q={{query}}"
  results_path: "items"
  fields:
    title: "title"
    url: "url"
    alternatives: "mirrors"
"#
    );
    let mut f = std::fs::File::create(dir.join("local-site.yml")).unwrap();
    f.write_all(body.as_bytes()).unwrap();
}

fn orchestrator(definitions_dir: &Path, kv: Arc<MemoryKvStore>) -> IndexerOrchestrator {
    let plugins_config = PluginsConfig {
        definitions_dir: definitions_dir.to_path_buf(),
        overrides: Default::default(),
    };
    let registry = Arc::new(PluginRegistry::discover(&plugins_config).unwrap());
    let fetcher = Arc::new(
        trawlarr::fetch::RateLimitedClient::new(trawlarr::config::FetchConfig::default()).unwrap(),
    );
    IndexerOrchestrator::new(
        IndexerConfig::default(),
        KvConfig::default(),
        kv,
        fetcher,
        ConcurrencyPool::new(10, 2),
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        registry,
        Arc::new(DisabledBrowser),
        Duration::from_secs(15),
    )
}

#[tokio::test]
async fn alternative_promotion_and_job_packaging() {
    let base = spawn_site().await;

    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), &base);
    let kv = Arc::new(MemoryKvStore::new());
    let orchestrator = orchestrator(dir.path(), kv.clone());

    let request = IndexerRequest {
        plugin: "local-site".to_string(),
        query: "movie".to_string(),
        category: None,
        season: None,
        episode: None,
        offset: 0,
        limit: 100,
    };
    let response = orchestrator.search(&request).await.unwrap();
    assert!(!response.cache_hit);

    // The all-dead row is dropped, the other two survive in order.
    assert_eq!(response.items.len(), 2);
    assert_eq!(response.items[0].title, "Movie.2024.German.1080p");
    assert_eq!(response.items[1].title, "Movie.2024.German.720p");

    // Dead primary: the first valid alternative was promoted and every
    // validated link answered below 400 during the batch.
    let promoted = &response.items[0];
    assert_eq!(promoted.validated_links.len(), 2);
    assert!(promoted.validated_links[0].ends_with("/files/ok1"));
    assert!(promoted.validated_links[1].ends_with("/files/ok2"));

    // The packaged job round-trips through the KV store.
    let job = orchestrator.load_job(&promoted.job_id).await.unwrap();
    assert_eq!(job.id, promoted.job_id);
    assert_eq!(job.urls, promoted.validated_links);
    let reparsed = CrawlJob::parse(&job.serialize(), Duration::from_secs(3600)).unwrap();
    assert_eq!(reparsed.urls, job.urls);

    // Second identical search hits the result cache.
    let cached = orchestrator.search(&request).await.unwrap();
    assert!(cached.cache_hit);
    assert_eq!(cached.items.len(), 2);
    assert_eq!(cached.items[0].job_id, promoted.job_id);
}

#[tokio::test]
async fn pagination_applies_after_caching() {
    let base = spawn_site().await;
    let dir = tempfile::tempdir().unwrap();
    write_plugin(dir.path(), &base);
    let orchestrator = orchestrator(dir.path(), Arc::new(MemoryKvStore::new()));

    let mut request = IndexerRequest {
        plugin: "local-site".to_string(),
        query: "movie".to_string(),
        category: None,
        season: None,
        episode: None,
        offset: 1,
        limit: 1,
    };
    let response = orchestrator.search(&request).await.unwrap();
    assert_eq!(response.total, 2);
    assert_eq!(response.items.len(), 1);
    assert_eq!(response.items[0].title, "Movie.2024.German.720p");

    // Same page from the cache.
    request.offset = 0;
    let first_page = orchestrator.search(&request).await.unwrap();
    assert!(first_page.cache_hit);
    assert_eq!(first_page.items[0].title, "Movie.2024.German.1080p");
}

#[tokio::test]
async fn unknown_plugin_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(dir.path(), Arc::new(MemoryKvStore::new()));
    let request = IndexerRequest {
        plugin: "ghost".to_string(),
        query: "movie".to_string(),
        category: None,
        season: None,
        episode: None,
        offset: 0,
        limit: 10,
    };
    assert!(orchestrator.search(&request).await.is_err());
}

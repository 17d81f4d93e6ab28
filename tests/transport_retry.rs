//! Rate-limited transport behavior against a live local server:
//! throttle retries with AIMD feedback, timeout handling, and bucket
//! bookkeeping.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use trawlarr::config::FetchConfig;
use trawlarr::errors::FetchError;
use trawlarr::fetch::RateLimitedClient;

#[derive(Default)]
struct ServerState {
    hits: AtomicUsize,
}

async fn throttle_twice(State(state): State<Arc<ServerState>>) -> (StatusCode, HeaderMap, String) {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    let mut headers = HeaderMap::new();
    if hit < 2 {
        headers.insert("retry-after", "0".parse().unwrap());
        (StatusCode::TOO_MANY_REQUESTS, headers, String::new())
    } else {
        (StatusCode::OK, headers, "ok".to_string())
    }
}

async fn always_throttle(State(state): State<Arc<ServerState>>) -> (StatusCode, HeaderMap, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let mut headers = HeaderMap::new();
    headers.insert("retry-after", "0".parse().unwrap());
    (StatusCode::TOO_MANY_REQUESTS, headers, String::new())
}

async fn slow(State(state): State<Arc<ServerState>>) -> String {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late".to_string()
}

async fn spawn_server() -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let router = Router::new()
        .route("/throttle-twice", get(throttle_twice))
        .route("/always-throttle", get(always_throttle))
        .route("/slow", get(slow))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn client() -> RateLimitedClient {
    RateLimitedClient::new(FetchConfig {
        initial_rps: 10.0,
        min_rps: 0.5,
        max_rps: 50.0,
        retry_max_attempts: 2,
        retry_base_backoff: Duration::from_millis(10),
        retry_max_backoff: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn throttle_responses_are_retried_and_halve_the_rate() {
    let (base, state) = spawn_server().await;
    let client = client();

    let response = client
        .get(
            &format!("{base}/throttle-twice"),
            Instant::now() + Duration::from_secs(10),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);

    // Two throttles then one success: 10 → 5 → 2.5 → 2.75.
    let bucket = client.bucket_for_domain("127.0.0.1");
    let rate = bucket.current_rate();
    assert!((rate - 2.75).abs() < 1e-9, "rate = {rate}");
}

#[tokio::test]
async fn retries_exhausted_surfaces_throttled_error() {
    let (base, state) = spawn_server().await;
    let client = client();

    let error = client
        .get(
            &format!("{base}/always-throttle"),
            Instant::now() + Duration::from_secs(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, FetchError::Throttled { status: 429, .. }));
    // Initial attempt plus two retries.
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn timeouts_fail_fast_without_retry() {
    let (base, state) = spawn_server().await;
    let client = client();

    let started = Instant::now();
    let error = client
        .get(
            &format!("{base}/slow"),
            Instant::now() + Duration::from_millis(300),
        )
        .await
        .unwrap_err();
    assert!(error.is_timeout(), "got {error:?}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);

    // Timeout feedback trims the rate to 75%.
    let bucket = client.bucket_for_domain("127.0.0.1");
    assert!((bucket.current_rate() - 7.5).abs() < 1e-9);
}

#[tokio::test]
async fn idle_buckets_are_evicted() {
    let client = RateLimitedClient::new(FetchConfig {
        idle_bucket_ttl: Duration::from_millis(20),
        ..Default::default()
    })
    .unwrap();
    let _ = client.bucket_for_domain("stale.example");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.evict_idle(), 1);
    assert!(client.snapshot().is_empty());
}

//! Operational endpoints
//!
//! Liveness, readiness, and the JSON stats surface: circuit states, pool
//! utilization, per-domain rate-limit buckets, and plugin score
//! snapshots.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::app::App;

/// `GET /healthz`
pub async fn healthz() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// `GET /readyz` — 200 once startup finished, 503 during shutdown drain
pub async fn readyz(State(app): State<Arc<App>>) -> Response {
    if app.lifecycle.is_ready() {
        Json(json!({ "status": "ready" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not-ready" })),
        )
            .into_response()
    }
}

/// `GET /stats/metrics`
pub async fn metrics(State(app): State<Arc<App>>) -> Response {
    let pool = app.pool.snapshot();
    let breakers = app.breakers.snapshot();
    let buckets = app.fetcher.snapshot();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "in_flight_requests": app.lifecycle.in_flight(),
        "pool": pool,
        "circuit_breakers": breakers,
        "rate_limits": buckets,
        "resolver_cache_entries": app.resolvers.cache_len(),
        "plugins": app.registry.list_names(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ScoreQuery {
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    bucket: Option<String>,
}

/// `GET /stats/plugin-scores?plugin=&category=&bucket=`
pub async fn plugin_scores(
    State(app): State<Arc<App>>,
    Query(filter): Query<ScoreQuery>,
) -> Response {
    let snapshots = app.score_store.all_snapshots().await;
    let filtered: Vec<_> = snapshots
        .into_iter()
        .filter(|s| {
            filter.plugin.as_deref().is_none_or(|p| s.plugin == p)
                && filter
                    .category
                    .as_deref()
                    .is_none_or(|c| s.category.to_string() == c)
                && filter
                    .bucket
                    .as_deref()
                    .is_none_or(|b| s.bucket.to_string() == b)
        })
        .collect();
    Json(json!({ "scores": filtered })).into_response()
}

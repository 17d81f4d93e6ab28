//! HTTP server
//!
//! Thin handlers over the orchestrators, one router, and a pair of
//! middlewares: in-flight tracking (feeds the drain on shutdown, and
//! refuses new work once readiness flips off) and optional request
//! logging. Served with graceful shutdown tied to the app's cancellation
//! token.

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::app::App;

pub mod ops;
pub mod responses;
pub mod stremio;
pub mod torznab;

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        // Indexer (RSS) surface
        .route("/indexers", get(torznab::list_indexers))
        .route("/torznab/{plugin}", get(torznab::torznab))
        .route("/torznab/{plugin}/health", get(torznab::plugin_health))
        .route("/download/{job_id}", get(torznab::download_job))
        .route("/download/{job_id}/info", get(torznab::job_info))
        // Stremio surface
        .route("/stremio/manifest.json", get(stremio::manifest))
        .route("/stremio/catalog/{type}/{id}", get(stremio::catalog))
        .route(
            "/stremio/catalog/{type}/{id}/{extra}",
            get(stremio::catalog_search),
        )
        .route("/stremio/stream/{type}/{id}", get(stremio::streams))
        .route("/stremio/play/{stream_id}", get(stremio::play))
        // Operational surface
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/stats/metrics", get(ops::metrics))
        .route("/stats/plugin-scores", get(ops::plugin_scores))
        .layer(middleware::from_fn_with_state(
            app.clone(),
            track_requests,
        ))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

/// Always-available paths during shutdown drain
fn is_operational(path: &str) -> bool {
    matches!(path, "/healthz" | "/readyz")
}

async fn track_requests(
    State(app): State<Arc<App>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    if !app.lifecycle.is_ready() && !is_operational(&path) {
        return Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body("shutting down".into())
            .expect("static response");
    }

    let _guard = app.lifecycle.track();
    let started = Instant::now();
    let response = next.run(request).await;

    if app.config.server.enable_request_logging {
        debug!(
            "{} {} -> {} in {:?}",
            method,
            path,
            response.status(),
            started.elapsed()
        );
    }
    response
}

/// Bind the configured listen address. Separate from [`serve_on`] so the
/// composition root can flip readiness only after the bind succeeded.
pub async fn bind(app: &App) -> Result<tokio::net::TcpListener> {
    let addr: SocketAddr = format!("{}:{}", app.config.server.host, app.config.server.port)
        .parse()
        .context("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", addr);
    Ok(listener)
}

/// Serve until the shutdown token fires.
pub async fn serve_on(listener: tokio::net::TcpListener, app: Arc<App>) -> Result<()> {
    let shutdown = app.shutdown.clone();
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("serving")?;
    Ok(())
}

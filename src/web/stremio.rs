//! Stremio addon endpoints
//!
//! JSON surface for the media player: manifest, thin catalogs backed by
//! the probe query pool, the stream list (the C10 pipeline), and the
//! late-resolve play redirect. Stream ids for `/play` are stable hashes
//! of the hoster URL, with the mapping parked in the KV store.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::app::App;
use crate::errors::AppError;
use crate::kv::KvStoreExt;
use crate::models::{LanguageKind, RankedStream};
use crate::stream::{ContentId, MediaKind};

use super::responses::{ApiError, EmptyPayload, feed_error};

/// `GET /stremio/manifest.json`
pub async fn manifest() -> Response {
    Json(json!({
        "id": "org.trawlarr.addon",
        "version": env!("CARGO_PKG_VERSION"),
        "name": env!("CARGO_PKG_NAME"),
        "description": "Meta-search over scrape-based media indexers",
        "types": ["movie", "series"],
        "idPrefixes": ["tt"],
        "resources": ["catalog", "stream"],
        "catalogs": [
            {
                "type": "movie",
                "id": "trawlarr-popular",
                "name": "trawlarr searches",
                "extra": [{ "name": "search", "isRequired": false }]
            },
            {
                "type": "series",
                "id": "trawlarr-popular",
                "name": "trawlarr searches",
                "extra": [{ "name": "search", "isRequired": false }]
            }
        ]
    }))
    .into_response()
}

fn strip_json_suffix(raw: &str) -> &str {
    raw.strip_suffix(".json").unwrap_or(raw)
}

fn meta_for_query(content_type: &str, query: &str) -> serde_json::Value {
    json!({
        "id": format!("trawlarr:search:{}", urlencoding::encode(query)),
        "type": content_type,
        "name": query,
    })
}

/// `GET /stremio/catalog/{type}/{id}.json`
pub async fn catalog(
    State(app): State<Arc<App>>,
    Path((content_type, _id)): Path<(String, String)>,
) -> Response {
    let queries = app.queries.pool().await;
    let metas: Vec<_> = queries
        .iter()
        .take(40)
        .map(|q| meta_for_query(&content_type, q))
        .collect();
    Json(json!({ "metas": metas })).into_response()
}

/// `GET /stremio/catalog/{type}/{id}/{extra}.json` (`search=...`)
pub async fn catalog_search(
    State(app): State<Arc<App>>,
    Path((content_type, _id, extra)): Path<(String, String, String)>,
) -> Response {
    let extra = strip_json_suffix(&extra);
    let needle = extra
        .strip_prefix("search=")
        .map(|s| urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_default())
        .unwrap_or_default()
        .to_lowercase();
    if needle.is_empty() {
        return feed_error(
            app.config.server.environment,
            AppError::bad_input("empty search"),
            EmptyPayload::Metas,
        );
    }
    let queries = app.queries.pool().await;
    let metas: Vec<_> = queries
        .iter()
        .filter(|q| q.to_lowercase().contains(&needle))
        .take(20)
        .map(|q| meta_for_query(&content_type, q))
        .collect();
    Json(json!({ "metas": metas })).into_response()
}

fn stream_id_for(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .flat_map(|b| [b >> 4, b & 0xf])
        .take(len)
        .map(|nibble| char::from_digit(nibble as u32, 16).expect("nibble < 16"))
        .collect()
}

fn describe(stream: &RankedStream) -> String {
    let language = match stream.language.kind {
        LanguageKind::Dub => format!("{} dub", stream.language.langs.join("+")),
        LanguageKind::Sub => format!("{} sub", stream.language.langs.join("+")),
        LanguageKind::Unknown => "?".to_string(),
    };
    format!(
        "{} · {} · {} · {}",
        stream.hoster,
        stream.quality.label(),
        language,
        stream.plugin
    )
}

/// `GET /stremio/stream/{type}/{id}.json`
pub async fn streams(
    State(app): State<Arc<App>>,
    Path((content_type, id)): Path<(String, String)>,
) -> Response {
    let mode = app.config.server.environment;
    let result = async {
        let kind = MediaKind::from_content_type(&content_type)
            .ok_or_else(|| AppError::bad_input(format!("unknown type '{content_type}'")))?;
        let content_id: ContentId = strip_json_suffix(&id).parse()?;

        let cancel = app.shutdown.child_token();
        let ranked = app.stream.streams(&content_id, kind, cancel).await?;

        let base_url = app.config.server.base_url.trim_end_matches('/');
        let mut streams = Vec::with_capacity(ranked.len());
        for stream in &ranked {
            let entry = match &stream.resolved {
                Some(direct) => {
                    let mut hints = json!({});
                    if !direct.headers.is_empty() {
                        hints = json!({
                            "notWebReady": true,
                            "proxyHeaders": { "request": direct.headers }
                        });
                    }
                    json!({
                        "name": format!("{} {}", env!("CARGO_PKG_NAME"), stream.quality.label()),
                        "description": describe(stream),
                        "url": direct.video_url,
                        "behaviorHints": hints,
                    })
                }
                None => {
                    // Late-resolve on demand through the play redirect.
                    let stream_id = stream_id_for(&stream.url);
                    app.kv
                        .put_best_effort(
                            &format!("play:{stream_id}"),
                            stream.url.as_bytes(),
                            app.config.kv.job_ttl,
                        )
                        .await;
                    json!({
                        "name": format!("{} {}", env!("CARGO_PKG_NAME"), stream.quality.label()),
                        "description": describe(stream),
                        "url": format!("{base_url}/stremio/play/{stream_id}"),
                        "behaviorHints": { "notWebReady": true },
                    })
                }
            };
            streams.push(entry);
        }
        info!(
            "stream response for {} with {} entries",
            content_id,
            streams.len()
        );
        Ok::<_, AppError>(Json(json!({ "streams": streams })).into_response())
    }
    .await;

    match result {
        Ok(response) => response,
        Err(e) => feed_error(mode, e, EmptyPayload::Streams),
    }
}

/// `GET /stremio/play/{stream_id}` — 302 to the direct video URL, 502
/// when the hoster cannot be resolved. Never redirects to an embed page.
pub async fn play(
    State(app): State<Arc<App>>,
    Path(stream_id): Path<String>,
) -> Result<Response, ApiError> {
    let url_bytes = app
        .kv
        .get(&format!("play:{stream_id}"))
        .await
        .map_err(|_| AppError::not_found("stream", &stream_id))?;
    let url = String::from_utf8(url_bytes)
        .map_err(|e| AppError::internal(format!("stored play url is not UTF-8: {e}")))?;

    let deadline = Instant::now() + app.config.stream.plugin_timeout;
    match app.resolvers.resolve_url(&url, deadline).await {
        Ok(Some(direct)) => Ok(Redirect::temporary(&direct.video_url).into_response()),
        Ok(None) => Ok((
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "stream is offline or blocked" })),
        )
            .into_response()),
        Err(e) => Ok((
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": format!("resolve failed: {e}") })),
        )
            .into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParsedLanguage, Quality};

    #[test]
    fn stream_ids_are_stable_hex() {
        let a = stream_id_for("https://voe.example/e/abc");
        let b = stream_id_for("https://voe.example/e/abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, stream_id_for("https://voe.example/e/def"));
    }

    #[test]
    fn json_suffix_stripping() {
        assert_eq!(strip_json_suffix("tt123.json"), "tt123");
        assert_eq!(strip_json_suffix("tt123"), "tt123");
    }

    #[test]
    fn description_lists_the_essentials() {
        let stream = RankedStream {
            url: "https://voe.example/e/1".to_string(),
            hoster: "voe".to_string(),
            title: "Movie".to_string(),
            quality: Quality::FullHd,
            language: ParsedLanguage::parse("Movie.German.DL.1080p"),
            plugin: "scene-hub".to_string(),
            score: 1055,
            resolved: None,
        };
        let description = describe(&stream);
        assert!(description.contains("voe"));
        assert!(description.contains("1080p"));
        assert!(description.contains("de"));
        assert!(description.contains("scene-hub"));
    }
}

//! Torznab / Newznab endpoints
//!
//! The RSS surface automation clients poll: capabilities, search (with
//! tv/movie variants), per-plugin health, and CrawlJob downloads. XML is
//! written with `quick-xml`; every search response carries an `X-Cache`
//! header.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::app::App;
use crate::errors::AppError;
use crate::indexer::{FeedItem, IndexerRequest, IndexerResponse};
use crate::models::Category;
use crate::probers::probe_with_mirrors;

use super::responses::{ApiError, EmptyPayload, feed_error};

#[derive(Debug, Deserialize)]
pub struct TorznabParams {
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    cat: Option<String>,
    #[serde(default)]
    season: Option<u32>,
    #[serde(default)]
    ep: Option<u32>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    extended: Option<u8>,
}

/// `GET /indexers`
pub async fn list_indexers(State(app): State<Arc<App>>) -> Response {
    let indexers: Vec<_> = app
        .registry
        .descriptors()
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "provides": d.provides.as_str(),
                "languages": d.languages,
                "mode": d.mode.as_str(),
            })
        })
        .collect();
    Json(json!({ "indexers": indexers })).into_response()
}

/// `GET /torznab/{plugin}?t=...`
pub async fn torznab(
    State(app): State<Arc<App>>,
    Path(plugin): Path<String>,
    Query(params): Query<TorznabParams>,
) -> Response {
    let mode = app.config.server.environment;
    let action = params.t.as_deref().unwrap_or("search");
    match action {
        "caps" => caps_response(&app),
        "search" | "tvsearch" | "movie" => {
            match search(&app, &plugin, action, &params).await {
                Ok(response) => response,
                Err(e) => feed_error(mode, e, EmptyPayload::Rss),
            }
        }
        other => feed_error(
            mode,
            AppError::bad_input(format!("unsupported action t={other}")),
            EmptyPayload::Rss,
        ),
    }
}

fn parse_category(action: &str, raw: Option<&str>) -> Option<Category> {
    if let Some(raw) = raw {
        for part in raw.split(',') {
            if let Ok(id) = part.trim().parse::<u32>()
                && let Some(category) = Category::from_id(id)
            {
                return Some(category);
            }
        }
    }
    // tv/movie search variants imply their category.
    match action {
        "tvsearch" => Some(Category::Tv),
        "movie" => Some(Category::Movies),
        _ => None,
    }
}

async fn search(
    app: &Arc<App>,
    plugin: &str,
    action: &str,
    params: &TorznabParams,
) -> Result<Response, AppError> {
    let query = params.q.clone().unwrap_or_default();

    // extended=1 without a query: lightweight reachability probe only.
    if params.extended == Some(1) && query.is_empty() {
        return reachability_feed(app, plugin).await;
    }

    if query.trim().is_empty() {
        return Err(AppError::bad_input("missing query parameter 'q'"));
    }

    let request = IndexerRequest {
        plugin: plugin.to_string(),
        query,
        category: parse_category(action, params.cat.as_deref()),
        season: params.season,
        episode: params.ep,
        offset: params.offset.unwrap_or(0),
        limit: params.limit.unwrap_or(app.indexer.default_limit()),
    };
    let response = app.indexer.search(&request).await?;

    let cache_state = if response.cache_hit { "HIT" } else { "MISS" };
    let xml = render_feed(app, plugin, &response)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/rss+xml; charset=utf-8"),
            (header::HeaderName::from_static("x-cache"), cache_state),
        ],
        xml,
    )
        .into_response())
}

async fn reachability_feed(app: &Arc<App>, plugin: &str) -> Result<Response, AppError> {
    let descriptor = app
        .registry
        .descriptor(plugin)
        .ok_or_else(|| AppError::not_found("plugin", plugin))?;
    let deadline = Instant::now() + app.config.probers.health_probe_timeout;
    let (report, _) = probe_with_mirrors(&app.fetcher, &descriptor.base_url, &[], deadline).await;

    let response = if report.reachable {
        // One synthetic item signals "this indexer is alive".
        IndexerResponse {
            items: vec![FeedItem {
                title: format!("{plugin} reachability probe"),
                job_id: Uuid::nil(),
                size: Some(0),
                seeders: None,
                peers: None,
                published: Some(chrono::Utc::now()),
                category: Category::Movies.id(),
                source_url: Some(descriptor.base_url.clone()),
                validated_links: vec![],
            }],
            total: 1,
            cache_hit: false,
        }
    } else {
        IndexerResponse {
            items: vec![],
            total: 0,
            cache_hit: false,
        }
    };
    let xml = render_feed(app, plugin, &response)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/rss+xml; charset=utf-8"),
            (header::HeaderName::from_static("x-cache"), "MISS"),
        ],
        xml,
    )
        .into_response())
}

/// `GET /torznab/{plugin}/health`
pub async fn plugin_health(
    State(app): State<Arc<App>>,
    Path(plugin): Path<String>,
) -> Result<Response, ApiError> {
    let descriptor = app
        .registry
        .descriptor(&plugin)
        .ok_or_else(|| AppError::not_found("plugin", &plugin))?;
    let deadline = Instant::now() + app.config.probers.health_probe_timeout;
    let (report, mirrors) =
        probe_with_mirrors(&app.fetcher, &descriptor.base_url, &descriptor.mirrors, deadline).await;

    Ok(Json(json!({
        "plugin": plugin,
        "base_url": descriptor.base_url,
        "checked_url": report.url,
        "reachable": report.reachable || mirrors.iter().any(|m| m.reachable),
        "status_code": report.status_code,
        "error": report.error,
        "mirrors": mirrors,
    }))
    .into_response())
}

/// `GET /download/{job_id}`
pub async fn download_job(
    State(app): State<Arc<App>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&job_id)
        .map_err(|_| AppError::bad_input(format!("invalid job id '{job_id}'")))?;
    let job = app.indexer.load_job(&id).await?;
    let body = job.serialize();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        "application/x-crawljob; charset=utf-8".parse().expect("static"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}.crawljob\"", sanitize_filename(&job.package_name))
            .parse()
            .unwrap_or_else(|_| "attachment".parse().expect("static")),
    );
    headers.insert(
        header::HeaderName::from_static("x-crawljob-id"),
        job.id.to_string().parse().expect("uuid is ascii"),
    );
    headers.insert(
        header::HeaderName::from_static("x-crawljob-links"),
        job.urls.len().to_string().parse().expect("number is ascii"),
    );
    Ok((headers, body).into_response())
}

/// `GET /download/{job_id}/info`
pub async fn job_info(
    State(app): State<Arc<App>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = Uuid::parse_str(&job_id)
        .map_err(|_| AppError::bad_input(format!("invalid job id '{job_id}'")))?;
    let job = app.indexer.load_job(&id).await?;
    Ok(Json(json!({
        "id": job.id,
        "package_name": job.package_name,
        "created_at": job.created_at,
        "expires_at": job.expires_at,
        "links": job.urls,
        "source_url": job.source_url,
        "priority": job.priority,
        "auto_start": job.auto_start,
    }))
    .into_response())
}

fn sanitize_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// --- XML rendering -------------------------------------------------------
//
// Feeds are assembled as strings with quick_xml escaping on every value;
// the shapes are small and fixed, a full writer brings nothing here.

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

fn esc(raw: &str) -> String {
    quick_xml::escape::escape(raw).into_owned()
}

fn caps_response(app: &Arc<App>) -> Response {
    let mut xml = String::from(XML_DECL);
    xml.push_str("<caps>\n");
    let _ = writeln!(
        xml,
        "  <server title=\"{}\" version=\"{}\"/>",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(
        xml,
        "  <limits max=\"{}\" default=\"{}\"/>",
        app.indexer.max_limit(),
        app.indexer.default_limit()
    );
    xml.push_str("  <searching>\n");
    xml.push_str("    <search available=\"yes\" supportedParams=\"q\"/>\n");
    xml.push_str("    <tv-search available=\"yes\" supportedParams=\"q,season,ep\"/>\n");
    xml.push_str("    <movie-search available=\"yes\" supportedParams=\"q\"/>\n");
    xml.push_str("  </searching>\n");
    xml.push_str("  <categories>\n");
    for category in Category::all() {
        let _ = writeln!(
            xml,
            "    <category id=\"{}\" name=\"{}\"/>",
            category.id(),
            category
        );
    }
    xml.push_str("  </categories>\n</caps>\n");

    (
        [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    )
        .into_response()
}

fn render_feed(
    app: &Arc<App>,
    plugin: &str,
    response: &IndexerResponse,
) -> Result<String, AppError> {
    let base_url = app.config.server.base_url.trim_end_matches('/');
    let mut xml = String::from(XML_DECL);
    xml.push_str(
        "<rss version=\"2.0\" xmlns:torznab=\"http://torznab.com/schemas/2015/feed\">\n",
    );
    xml.push_str("  <channel>\n");
    let _ = writeln!(
        xml,
        "    <title>{} [{}]</title>",
        env!("CARGO_PKG_NAME"),
        esc(plugin)
    );
    xml.push_str("    <description>meta-search aggregator feed</description>\n");
    for item in &response.items {
        write_item(&mut xml, base_url, item);
    }
    xml.push_str("  </channel>\n</rss>\n");
    Ok(xml)
}

fn write_item(xml: &mut String, base_url: &str, item: &FeedItem) {
    let link = format!("{}/download/{}", base_url, item.job_id);
    xml.push_str("    <item>\n");
    let _ = writeln!(xml, "      <title>{}</title>", esc(&item.title));
    let _ = writeln!(
        xml,
        "      <guid isPermaLink=\"false\">{}</guid>",
        item.job_id
    );
    let _ = writeln!(xml, "      <link>{}</link>", esc(&link));
    if let Some(published) = item.published {
        let _ = writeln!(xml, "      <pubDate>{}</pubDate>", published.to_rfc2822());
    }
    if let Some(source) = &item.source_url {
        let _ = writeln!(xml, "      <comments>{}</comments>", esc(source));
    }
    let _ = writeln!(xml, "      <category>{}</category>", item.category);
    let _ = writeln!(
        xml,
        "      <enclosure url=\"{}\" type=\"application/x-crawljob\" length=\"{}\"/>",
        esc(&link),
        item.size.unwrap_or(0)
    );

    let mut attr = |name: &str, value: String| {
        let _ = writeln!(
            xml,
            "      <torznab:attr name=\"{}\" value=\"{}\"/>",
            name,
            esc(&value)
        );
    };
    attr("category", item.category.to_string());
    if let Some(size) = item.size {
        attr("size", size.to_string());
    }
    if let Some(seeders) = item.seeders {
        attr("seeders", seeders.to_string());
    }
    if let Some(peers) = item.peers {
        attr("peers", peers.to_string());
    }
    attr("links", item.validated_links.len().to_string());
    xml.push_str("    </item>\n");
}

/// Empty RSS document for prod-mode degraded responses
pub fn empty_feed_response() -> Response {
    let mut xml = String::from(XML_DECL);
    xml.push_str(
        "<rss version=\"2.0\" xmlns:torznab=\"http://torznab.com/schemas/2015/feed\">\n",
    );
    let _ = writeln!(xml, "  <channel>\n    <title>{}</title>\n  </channel>", env!("CARGO_PKG_NAME"));
    xml.push_str("</rss>\n");
    (
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        xml,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing_prefers_explicit_cat() {
        assert_eq!(parse_category("search", Some("2000")), Some(Category::Movies));
        assert_eq!(
            parse_category("search", Some("8000,5030")),
            Some(Category::Tv)
        );
        assert_eq!(parse_category("tvsearch", None), Some(Category::Tv));
        assert_eq!(parse_category("movie", None), Some(Category::Movies));
        assert_eq!(parse_category("search", None), None);
    }

    #[test]
    fn filename_sanitization() {
        assert_eq!(
            sanitize_filename("Movie 2024/Ultra: Edition"),
            "Movie_2024_Ultra__Edition"
        );
    }

    #[test]
    fn items_escape_xml_special_characters() {
        let item = FeedItem {
            title: "Movie & <Friends>".to_string(),
            job_id: Uuid::nil(),
            size: Some(42),
            seeders: Some(3),
            peers: None,
            published: None,
            category: 2000,
            source_url: Some("https://site.example/?a=1&b=2".to_string()),
            validated_links: vec!["https://h/1".to_string()],
        };
        let mut xml = String::new();
        write_item(&mut xml, "http://localhost:9117", &item);
        assert!(xml.contains("Movie &amp; &lt;Friends&gt;"));
        assert!(xml.contains("?a=1&amp;b=2"));
        assert!(xml.contains("torznab:attr name=\"size\" value=\"42\""));
        assert!(xml.contains("torznab:attr name=\"seeders\" value=\"3\""));
        assert!(!xml.contains("peers"));
    }
}

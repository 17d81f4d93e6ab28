//! Generic search engine over plugin definitions
//!
//! One engine interprets every definition: substitute the query into the
//! recipe's path template, fetch the document (rate-limited HTTP, or a
//! browser page for headless plugins), extract result rows (JSON path
//! walk or regex over HTML) and map them into [`SearchResult`]s.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

use crate::errors::{FetchError, PluginError};
use crate::models::{AlternativeUrl, SearchResult, parse_size};

use super::definition::{ExtractKind, FieldMap, PluginDefinition};
use super::{PluginDescriptor, PluginMode, ScrapePlugin, SearchContext, SearchQuery};

/// Body markers that indicate an anti-bot interstitial rather than results
const CAPTCHA_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "g-recaptcha",
    "h-captcha",
];

pub struct DefinedPlugin {
    descriptor: PluginDescriptor,
    definition: PluginDefinition,
    html_pattern: Option<Regex>,
}

impl DefinedPlugin {
    /// Build an engine-backed plugin. The descriptor carries any
    /// configuration overrides already resolved by the registry.
    pub fn new(
        definition: PluginDefinition,
        descriptor: PluginDescriptor,
    ) -> Result<Self, PluginError> {
        let html_pattern = match &definition.search.html_pattern {
            Some(raw) => Some(
                Regex::new(raw).map_err(|e| PluginError::InvalidDefinition {
                    name: definition.name.clone(),
                    message: format!("html_pattern: {e}"),
                })?,
            ),
            None => None,
        };
        Ok(Self {
            descriptor,
            definition,
            html_pattern,
        })
    }

    fn search_url(&self, query: &SearchQuery) -> String {
        let category_id = query
            .category
            .map(|c| c.id())
            .unwrap_or(self.definition.default_category);
        let path = self
            .definition
            .search
            .path
            .replace("{query}", &urlencoding::encode(&query.text))
            .replace(
                "{season}",
                &query.season.map(|s| s.to_string()).unwrap_or_default(),
            )
            .replace(
                "{episode}",
                &query.episode.map(|e| e.to_string()).unwrap_or_default(),
            )
            .replace("{category_id}", &category_id.to_string())
            .replace("{limit}", &query.limit.to_string());
        format!(
            "{}{}",
            self.definition.base_url.trim_end_matches('/'),
            path
        )
    }

    async fn fetch_document(
        &self,
        ctx: &SearchContext,
        url: &str,
    ) -> Result<String, PluginError> {
        match self.descriptor.mode {
            PluginMode::FastHttp => {
                let headers: Vec<(&str, &str)> = self
                    .definition
                    .headers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let response = ctx
                    .fetcher
                    .get_with_headers(url, &headers, ctx.deadline)
                    .await
                    .map_err(|e| self.map_fetch_error(e))?;
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| self.map_fetch_error(FetchError::Transport(e)))?;
                if (status.as_u16() == 403 || status.as_u16() == 503)
                    && body_looks_like_captcha(&body)
                {
                    return Err(PluginError::Captcha {
                        plugin: self.descriptor.name.clone(),
                    });
                }
                if !status.is_success() {
                    return Err(PluginError::Failed {
                        plugin: self.descriptor.name.clone(),
                        message: format!("search returned HTTP {status}"),
                    });
                }
                Ok(body)
            }
            PluginMode::HeadlessBrowser => {
                let mut page = ctx.browser.acquire_page().await?;
                let outcome = async {
                    page.navigate(url).await?;
                    page.content().await
                }
                .await;
                page.close().await;
                let body = outcome?;
                if body_looks_like_captcha(&body) {
                    return Err(PluginError::Captcha {
                        plugin: self.descriptor.name.clone(),
                    });
                }
                Ok(body)
            }
        }
    }

    fn map_fetch_error(&self, e: FetchError) -> PluginError {
        if e.is_timeout() {
            PluginError::Timeout {
                plugin: self.descriptor.name.clone(),
                timeout: std::time::Duration::ZERO,
            }
        } else {
            PluginError::Fetch(e)
        }
    }

    fn extract_json(
        &self,
        body: &str,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, PluginError> {
        let document: Value =
            serde_json::from_str(body).map_err(|e| PluginError::Failed {
                plugin: self.descriptor.name.clone(),
                message: format!("response is not JSON: {e}"),
            })?;
        let rows = match &self.definition.search.results_path {
            Some(path) => lookup_path(&document, path),
            None => Some(&document),
        };
        let Some(Value::Array(rows)) = rows else {
            // An object where the array should be usually means
            // "no results" — treat as empty rather than failing.
            trace!("results path missing or not an array, returning empty");
            return Ok(vec![]);
        };

        let fields = self
            .definition
            .search
            .fields
            .as_ref()
            .expect("validated: json extraction has fields");
        let category = query
            .category
            .map(|c| c.id())
            .unwrap_or(self.definition.default_category);

        Ok(rows
            .iter()
            .filter_map(|row| self.map_row(row, fields, category))
            .collect())
    }

    fn map_row(&self, row: &Value, fields: &FieldMap, category: u32) -> Option<SearchResult> {
        let title = string_at(row, &fields.title)?;
        let url = string_at(row, &fields.url)?;
        let alternatives = fields
            .alternatives
            .as_ref()
            .and_then(|path| lookup_path(row, path))
            .map(extract_alternatives)
            .unwrap_or_default();

        SearchResult {
            title,
            url,
            alternatives,
            size: fields.size.as_ref().and_then(|p| size_at(row, p)),
            seeders: fields.seeders.as_ref().and_then(|p| u32_at(row, p)),
            peers: fields.peers.as_ref().and_then(|p| u32_at(row, p)),
            published: None,
            release_name: fields.release_name.as_ref().and_then(|p| string_at(row, p)),
            category,
            source_url: fields.source_url.as_ref().and_then(|p| string_at(row, p)),
            metadata: HashMap::new(),
        }
        .validated()
    }

    fn extract_html(&self, body: &str, category: u32) -> Vec<SearchResult> {
        let pattern = self
            .html_pattern
            .as_ref()
            .expect("validated: html extraction has pattern");
        pattern
            .captures_iter(body)
            .filter_map(|captures| {
                let get = |name: &str| {
                    captures
                        .name(name)
                        .map(|m| html_unescape(m.as_str().trim()))
                };
                SearchResult {
                    title: get("title")?,
                    url: get("url")?,
                    alternatives: vec![],
                    size: get("size").as_deref().and_then(parse_size),
                    seeders: None,
                    peers: None,
                    published: None,
                    release_name: get("release_name"),
                    category,
                    source_url: None,
                    metadata: HashMap::new(),
                }
                .validated()
            })
            .collect()
    }
}

#[async_trait]
impl ScrapePlugin for DefinedPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        ctx: &SearchContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, PluginError> {
        if ctx.cancel.is_cancelled() {
            return Ok(vec![]);
        }
        let url = self.search_url(query);
        let started = Instant::now();
        let body = self.fetch_document(ctx, &url).await?;

        let category = query
            .category
            .map(|c| c.id())
            .unwrap_or(self.definition.default_category);
        let mut results = match self.definition.search.extract {
            ExtractKind::Json => self.extract_json(&body, query)?,
            ExtractKind::Html => self.extract_html(&body, category),
        };

        let cap = self
            .descriptor
            .max_results
            .unwrap_or(usize::MAX)
            .min(query.limit);
        results.truncate(cap);

        debug!(
            "plugin '{}' returned {} results in {:?}",
            self.descriptor.name,
            results.len(),
            started.elapsed()
        );
        Ok(results)
    }
}

fn body_looks_like_captcha(body: &str) -> bool {
    CAPTCHA_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Walk a dotted path through a JSON document
fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn string_at(row: &Value, path: &str) -> Option<String> {
    match lookup_path(row, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn u32_at(row: &Value, path: &str) -> Option<u32> {
    match lookup_path(row, path)? {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn size_at(row: &Value, path: &str) -> Option<u64> {
    match lookup_path(row, path)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_size(s),
        _ => None,
    }
}

fn extract_alternatives(value: &Value) -> Vec<AlternativeUrl> {
    let Value::Array(entries) = value else {
        return vec![];
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(url) if !url.is_empty() => Some(AlternativeUrl {
                url: url.clone(),
                hoster: None,
            }),
            Value::Object(_) => {
                let url = string_at(entry, "url")?;
                Some(AlternativeUrl {
                    url,
                    hoster: string_at(entry, "hoster"),
                })
            }
            _ => None,
        })
        .collect()
}

/// Minimal entity unescape for regex-extracted HTML fragments
fn html_unescape(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

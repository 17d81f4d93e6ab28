//! Mini-search probe
//!
//! Runs a short real search against one plugin (≤ 20 items, tight
//! deadline) and grades the outcome along three axes: how many items came
//! back, what fraction of links sit on hosters the resolver registry
//! recognizes, and whether a small sample of those links actually answers
//! a HEAD request.

use std::sync::Arc;
use std::time::Instant;

use crate::errors::PluginError;
use crate::plugins::{ScrapePlugin, SearchContext, SearchQuery};
use crate::resolve::ResolverRegistry;
use crate::scoring::SearchProbe;

/// Expected item count a healthy plugin should reach for a popular query
const EXPECTED_ITEMS: usize = 20;
/// How many supported links get a reachability HEAD check
const REACHABILITY_SAMPLE: usize = 3;

pub async fn probe_search(
    plugin: &dyn ScrapePlugin,
    ctx: &SearchContext,
    query_text: &str,
    resolvers: &Arc<ResolverRegistry>,
) -> SearchProbe {
    let started = Instant::now();
    let query = SearchQuery {
        text: query_text.to_string(),
        category: None,
        season: None,
        episode: None,
        limit: EXPECTED_ITEMS,
    };

    let results = match plugin.search(ctx, &query).await {
        Ok(results) => results,
        Err(PluginError::Captcha { .. }) => {
            // A captcha wall is a hard zero, like the health probe.
            return SearchProbe {
                ok: false,
                duration_ms: started.elapsed().as_millis() as u64,
                items_ratio: 0.0,
                hoster_reachable_ratio: 0.0,
                hoster_supported_ratio: 0.0,
            };
        }
        Err(_) => {
            return SearchProbe {
                ok: false,
                duration_ms: started.elapsed().as_millis() as u64,
                items_ratio: 0.0,
                hoster_reachable_ratio: 0.0,
                hoster_supported_ratio: 0.0,
            };
        }
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    let all_links: Vec<&str> = results
        .iter()
        .flat_map(|result| result.all_urls())
        .collect();
    let supported_links: Vec<&str> = all_links
        .iter()
        .copied()
        .filter(|url| resolvers.supports_url(url))
        .collect();

    let hoster_supported_ratio = if all_links.is_empty() {
        0.0
    } else {
        supported_links.len() as f64 / all_links.len() as f64
    };

    let hoster_reachable_ratio = if supported_links.is_empty() {
        0.0
    } else {
        let sample: Vec<&str> = supported_links
            .iter()
            .copied()
            .take(REACHABILITY_SAMPLE)
            .collect();
        let mut reachable = 0usize;
        for url in &sample {
            if let Ok(response) = ctx.fetcher.head(url, ctx.deadline).await
                && response.status().as_u16() < 400
            {
                reachable += 1;
            }
        }
        reachable as f64 / sample.len() as f64
    };

    SearchProbe {
        ok: true,
        duration_ms,
        items_ratio: (results.len() as f64 / EXPECTED_ITEMS as f64).min(1.0),
        hoster_reachable_ratio,
        hoster_supported_ratio,
    }
}

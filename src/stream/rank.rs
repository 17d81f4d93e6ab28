//! Stream candidate ranking and per-hoster dedup
//!
//! Every (result, link) pair becomes one candidate stream. Candidates are
//! filtered by title match, scored
//! `language + quality·multiplier + hoster_bonus`, sorted best-first, and
//! collapsed to one stream per hoster. Sorting is stable and candidates
//! arrive in plugin registration order, so equal scores keep registration
//! order and the whole pipeline is deterministic for identical inputs.

use std::sync::Arc;

use crate::config::StreamConfig;
use crate::models::{ParsedLanguage, Quality, RankedStream, SearchResult};
use crate::resolve::ResolverRegistry;

use super::title_match::TitleMatcher;

/// One plugin's results with its registration index, in arrival order
pub struct PluginResults {
    pub plugin: String,
    pub registration_index: usize,
    pub results: Vec<SearchResult>,
}

/// Expand, filter and score candidates; returns ranked streams before
/// per-hoster dedup.
pub fn build_candidates(
    mut batches: Vec<PluginResults>,
    matcher: &TitleMatcher,
    config: &StreamConfig,
    resolvers: &Arc<ResolverRegistry>,
) -> Vec<RankedStream> {
    // Registration order first, so stable sort ties resolve to it.
    batches.sort_by_key(|b| b.registration_index);

    let mut streams = Vec::new();
    for batch in &batches {
        for result in &batch.results {
            // Release name carries the richest signal; fall back to title.
            let match_target = result.release_name.as_deref().unwrap_or(&result.title);
            let title_score = matcher.score(match_target);
            if title_score < config.min_title_score {
                continue;
            }

            let quality = Quality::parse(match_target);
            let language = ParsedLanguage::parse(match_target);

            for url in result.all_urls() {
                let hoster = resolvers.hoster_name(url);
                let score = language.score(&config.language_scores)
                    + (quality.value() as f64 * config.quality_multiplier) as i64
                    + resolvers.hoster_bonus(url);
                streams.push(RankedStream {
                    url: url.to_string(),
                    hoster,
                    title: result.title.clone(),
                    quality,
                    language: language.clone(),
                    plugin: batch.plugin.clone(),
                    score,
                    resolved: None,
                });
            }
        }
    }
    streams
}

/// Sort best-first (stable) and keep the best stream per hoster name.
pub fn rank_and_dedupe(mut streams: Vec<RankedStream>) -> Vec<RankedStream> {
    streams.sort_by(|a, b| b.score.cmp(&a.score));
    let mut seen = std::collections::HashSet::new();
    streams.retain(|stream| seen.insert(stream.hoster.clone()));
    streams
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, ResolveConfig, XfsHosterConfig};
    use crate::fetch::RateLimitedClient;
    use std::collections::HashMap;

    fn resolvers() -> Arc<ResolverRegistry> {
        let fetcher = Arc::new(RateLimitedClient::new(FetchConfig::default()).unwrap());
        let config = ResolveConfig {
            hosters: vec![
                XfsHosterConfig {
                    name: "voe".to_string(),
                    domains: vec!["voe.example".to_string()],
                    file_id_patterns: vec![],
                    embed_url: None,
                    offline_markers: vec![],
                    captcha_markers: vec![],
                    is_video: true,
                    bonus: 5,
                },
                XfsHosterConfig {
                    name: "streamtape".to_string(),
                    domains: vec!["stape.example".to_string()],
                    file_id_patterns: vec![],
                    embed_url: None,
                    offline_markers: vec![],
                    captcha_markers: vec![],
                    is_video: true,
                    bonus: 1,
                },
            ],
            ..Default::default()
        };
        Arc::new(ResolverRegistry::from_config(config, fetcher))
    }

    fn result(title: &str, release: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            alternatives: vec![],
            size: None,
            seeders: None,
            peers: None,
            published: None,
            release_name: Some(release.to_string()),
            category: 2000,
            source_url: None,
            metadata: HashMap::new(),
        }
    }

    fn batches(results: Vec<(&str, usize, Vec<SearchResult>)>) -> Vec<PluginResults> {
        results
            .into_iter()
            .map(|(plugin, registration_index, results)| PluginResults {
                plugin: plugin.to_string(),
                registration_index,
                results,
            })
            .collect()
    }

    #[test]
    fn candidates_filtered_by_title_match() {
        let matcher = TitleMatcher::new("Dark Waters", &[], Some(2019), false);
        let config = StreamConfig::default();
        let streams = build_candidates(
            batches(vec![(
                "alpha",
                0,
                vec![
                    result(
                        "Dark Waters",
                        "Dark.Waters.2019.German.DL.1080p.WEB",
                        "https://voe.example/e/good",
                    ),
                    result(
                        "Totally Different Film",
                        "Totally.Different.Film.2020.1080p",
                        "https://voe.example/e/bad",
                    ),
                ],
            )]),
            &matcher,
            &config,
            &resolvers(),
        );
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].url, "https://voe.example/e/good");
        assert_eq!(streams[0].quality, Quality::FullHd);
    }

    #[test]
    fn scoring_prefers_german_dub_and_quality() {
        let matcher = TitleMatcher::new("Dark Waters", &[], None, false);
        let config = StreamConfig::default();
        let streams = build_candidates(
            batches(vec![(
                "alpha",
                0,
                vec![
                    result(
                        "Dark Waters",
                        "Dark.Waters.German.DL.720p.WEB",
                        "https://voe.example/e/de720",
                    ),
                    result(
                        "Dark Waters",
                        "Dark.Waters.English.Subbed.1080p.WEB",
                        "https://stape.example/v/en1080",
                    ),
                ],
            )]),
            &matcher,
            &config,
            &resolvers(),
        );
        let ranked = rank_and_dedupe(streams);
        // German dub (1000 + 40 + 5) beats English sub (200 + 50 + 1).
        assert_eq!(ranked[0].hoster, "voe");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn per_hoster_dedup_keeps_best() {
        let matcher = TitleMatcher::new("Dark Waters", &[], None, false);
        let config = StreamConfig::default();
        let streams = build_candidates(
            batches(vec![(
                "alpha",
                0,
                vec![
                    result(
                        "Dark Waters",
                        "Dark.Waters.German.DL.1080p",
                        "https://voe.example/e/hd",
                    ),
                    result(
                        "Dark Waters",
                        "Dark.Waters.German.DL.720p",
                        "https://voe.example/e/sd",
                    ),
                ],
            )]),
            &matcher,
            &config,
            &resolvers(),
        );
        let ranked = rank_and_dedupe(streams);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].url, "https://voe.example/e/hd");
    }

    #[test]
    fn equal_scores_keep_registration_order() {
        let matcher = TitleMatcher::new("Dark Waters", &[], None, false);
        let config = StreamConfig::default();
        let same = "Dark.Waters.German.DL.1080p";
        // Two hosters unknown to the registry: identical scores.
        let streams = build_candidates(
            batches(vec![
                (
                    "later",
                    1,
                    vec![result("Dark Waters", same, "https://second.example/v/1")],
                ),
                (
                    "earlier",
                    0,
                    vec![result("Dark Waters", same, "https://first.example/e/1")],
                ),
            ]),
            &matcher,
            &config,
            &resolvers(),
        );
        let ranked = rank_and_dedupe(streams);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].plugin, "earlier");
        assert_eq!(ranked[1].plugin, "later");
    }

    #[test]
    fn alternatives_expand_to_candidates() {
        let matcher = TitleMatcher::new("Dark Waters", &[], None, false);
        let config = StreamConfig::default();
        let mut r = result(
            "Dark Waters",
            "Dark.Waters.German.DL.1080p",
            "https://voe.example/e/1",
        );
        r.alternatives = vec![crate::models::AlternativeUrl {
            url: "https://stape.example/v/1".to_string(),
            hoster: None,
        }];
        let streams = build_candidates(
            batches(vec![("alpha", 0, vec![r])]),
            &matcher,
            &config,
            &resolvers(),
        );
        assert_eq!(streams.len(), 2);
        let hosters: Vec<&str> = streams.iter().map(|s| s.hoster.as_str()).collect();
        assert!(hosters.contains(&"voe"));
        assert!(hosters.contains(&"streamtape"));
    }
}

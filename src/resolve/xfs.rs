//! XFS-family hoster resolver
//!
//! Most streaming hosts run the same file-hosting script family and only
//! differ in domains, file-id shapes and offline wording. One resolver
//! implementation covers them all, parameterized by [`XfsHosterConfig`]:
//! extract the file id, fetch the embed page, bail on offline/captcha
//! markers, then pull the direct video URL out of the player setup.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Instant;

use crate::config::XfsHosterConfig;
use crate::errors::ResolveError;
use crate::fetch::RateLimitedClient;
use crate::models::{Quality, ResolvedStream};

use super::HosterResolver;

/// Player-setup shapes the family emits, tried in order
static DIRECT_URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // jwplayer-style sources array
        r#"sources\s*:\s*\[\s*\{\s*(?:src|file)\s*:\s*["']([^"']+)["']"#,
        r#"file\s*:\s*["'](https?://[^"']+?\.(?:m3u8|mp4)[^"']*)["']"#,
        // HTML5 video tag
        r#"<source[^>]+src=["']([^"']+?\.(?:m3u8|mp4)[^"']*)["']"#,
        // Obvious inline link
        r#"["'](https?://[^"']+?\.(?:m3u8|mp4)\?[^"']*)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Default file-id shape: `/e/<id>`, `/embed-<id>.html`, `/<id>.html`
static DEFAULT_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/(?:e|embed|v|d)/([A-Za-z0-9]{6,})",
        r"/embed-([A-Za-z0-9]{6,})(?:\.html)?",
        r"/([A-Za-z0-9]{8,})(?:\.html)?$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

pub struct XfsResolver {
    config: XfsHosterConfig,
    id_patterns: Vec<Regex>,
}

impl XfsResolver {
    pub fn new(config: XfsHosterConfig) -> Result<Self, ResolveError> {
        let id_patterns = config
            .file_id_patterns
            .iter()
            .map(|raw| {
                Regex::new(raw).map_err(|e| ResolveError::Extraction {
                    url: config.name.clone(),
                    message: format!("bad file_id pattern '{raw}': {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            id_patterns,
        })
    }

    fn file_id(&self, url: &str) -> Option<String> {
        let patterns: &[Regex] = if self.id_patterns.is_empty() {
            &DEFAULT_ID_PATTERNS
        } else {
            &self.id_patterns
        };
        patterns
            .iter()
            .find_map(|p| p.captures(url))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn embed_url(&self, original: &str, file_id: Option<&str>) -> String {
        match (&self.config.embed_url, file_id) {
            (Some(template), Some(id)) => template.replace("{id}", id),
            _ => original.to_string(),
        }
    }

    fn page_is_offline(&self, body: &str) -> bool {
        const DEFAULT_OFFLINE: &[&str] = &[
            "File Not Found",
            "file was deleted",
            "File is no longer available",
            "404 Not Found",
        ];
        self.config
            .offline_markers
            .iter()
            .map(|s| s.as_str())
            .chain(DEFAULT_OFFLINE.iter().copied())
            .any(|marker| body.contains(marker))
    }

    fn page_is_captcha(&self, body: &str) -> bool {
        const DEFAULT_CAPTCHA: &[&str] = &["g-recaptcha", "h-captcha", "cf-browser-verification"];
        self.config
            .captcha_markers
            .iter()
            .map(|s| s.as_str())
            .chain(DEFAULT_CAPTCHA.iter().copied())
            .any(|marker| body.contains(marker))
    }

    fn extract_video_url(&self, body: &str) -> Option<String> {
        DIRECT_URL_PATTERNS
            .iter()
            .find_map(|p| p.captures(body))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Best-effort quality hint from a direct URL (`.../1080/index.m3u8`)
fn quality_from_url(url: &str) -> Option<Quality> {
    if url.contains("2160") || url.contains("4k") {
        Some(Quality::FourK)
    } else if url.contains("1080") {
        Some(Quality::FullHd)
    } else if url.contains("720") {
        Some(Quality::Hd)
    } else if url.contains("480") || url.contains("360") {
        Some(Quality::Sd)
    } else {
        None
    }
}

#[async_trait]
impl HosterResolver for XfsResolver {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn bonus(&self) -> i64 {
        self.config.bonus
    }

    fn domains(&self) -> &[String] {
        &self.config.domains
    }

    fn is_video(&self) -> bool {
        self.config.is_video
    }

    async fn resolve(
        &self,
        fetcher: &RateLimitedClient,
        url: &str,
        deadline: Instant,
    ) -> Result<Option<ResolvedStream>, ResolveError> {
        if !self.config.is_video {
            return Ok(None);
        }

        let file_id = self.file_id(url);
        let embed_url = self.embed_url(url, file_id.as_deref());
        let body = fetcher.get_text(&embed_url, deadline).await.map_err(|e| {
            // A 404 on the embed page means gone, not broken.
            if matches!(&e, crate::errors::FetchError::Status { status: 404, .. }) {
                ResolveError::Offline {
                    url: embed_url.clone(),
                }
            } else {
                ResolveError::Fetch(e)
            }
        });
        let body = match body {
            Ok(body) => body,
            Err(ResolveError::Offline { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if self.page_is_offline(&body) || self.page_is_captcha(&body) {
            return Ok(None);
        }

        let Some(video_url) = self.extract_video_url(&body) else {
            return Err(ResolveError::Extraction {
                url: embed_url,
                message: "no player source in page".to_string(),
            });
        };

        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), embed_url.clone());
        Ok(Some(ResolvedStream {
            quality: quality_from_url(&video_url),
            video_url,
            headers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> XfsHosterConfig {
        XfsHosterConfig {
            name: "voe".to_string(),
            domains: vec!["voe.example".to_string()],
            file_id_patterns: vec![],
            embed_url: Some("https://voe.example/e/{id}".to_string()),
            offline_markers: vec!["This video does not exist".to_string()],
            captcha_markers: vec![],
            is_video: true,
            bonus: 3,
        }
    }

    #[test]
    fn file_id_default_patterns() {
        let resolver = XfsResolver::new(config()).unwrap();
        assert_eq!(
            resolver.file_id("https://voe.example/e/abc123xy"),
            Some("abc123xy".to_string())
        );
        assert_eq!(
            resolver.file_id("https://voe.example/embed-zzzz9999.html"),
            Some("zzzz9999".to_string())
        );
    }

    #[test]
    fn embed_template_substitution() {
        let resolver = XfsResolver::new(config()).unwrap();
        assert_eq!(
            resolver.embed_url("https://voe.example/d/abc123xy", Some("abc123xy")),
            "https://voe.example/e/abc123xy"
        );
    }

    #[test]
    fn extracts_jwplayer_sources() {
        let resolver = XfsResolver::new(config()).unwrap();
        let body = r#"<script>player.setup({sources: [{file: "https://cdn.voe.example/hls/1080/index.m3u8"}]});</script>"#;
        assert_eq!(
            resolver.extract_video_url(body),
            Some("https://cdn.voe.example/hls/1080/index.m3u8".to_string())
        );
    }

    #[test]
    fn extracts_video_tag_source() {
        let resolver = XfsResolver::new(config()).unwrap();
        let body = r#"<video><source src="https://cdn.voe.example/v/abc.mp4" type="video/mp4"></video>"#;
        assert_eq!(
            resolver.extract_video_url(body),
            Some("https://cdn.voe.example/v/abc.mp4".to_string())
        );
    }

    #[test]
    fn offline_and_captcha_markers() {
        let resolver = XfsResolver::new(config()).unwrap();
        assert!(resolver.page_is_offline("<h1>This video does not exist</h1>"));
        assert!(resolver.page_is_offline("<h1>File Not Found</h1>"));
        assert!(resolver.page_is_captcha("<div class=\"g-recaptcha\">"));
        assert!(!resolver.page_is_offline("<video></video>"));
    }

    #[test]
    fn quality_hints_from_url() {
        assert_eq!(
            quality_from_url("https://c/hls/1080/x.m3u8"),
            Some(Quality::FullHd)
        );
        assert_eq!(quality_from_url("https://c/v/720p.mp4"), Some(Quality::Hd));
        assert_eq!(quality_from_url("https://c/v/plain.mp4"), None);
    }
}

//! Canonical title resolution
//!
//! Stream requests arrive as IMDb-style content ids; plugins search by
//! title. The title-resolver port turns an id into `(title, year,
//! localized titles)`. TMDB is the primary backend (find-by-external-id,
//! once per language), the IMDb suggestion API the keyless fallback, and
//! a KV decorator gives every backend a short-TTL cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::{AppError, FetchError};
use crate::fetch::SharedFetcher;
use crate::kv::{KvStore, KvStoreExt};
use crate::models::Category;

/// What the stream endpoint is being asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    pub fn category(&self) -> Category {
        match self {
            MediaKind::Movie => Category::Movies,
            MediaKind::Series => Category::Tv,
        }
    }

    pub fn from_content_type(raw: &str) -> Option<Self> {
        match raw {
            "movie" => Some(MediaKind::Movie),
            "series" | "tv" => Some(MediaKind::Series),
            _ => None,
        }
    }
}

/// `tt1234567` or `tt1234567:2:5` (season/episode)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId {
    pub imdb: String,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl FromStr for ContentId {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split(':');
        let imdb = parts.next().unwrap_or_default();
        if !imdb.starts_with("tt") || imdb.len() < 3 || !imdb[2..].chars().all(|c| c.is_ascii_digit())
        {
            return Err(AppError::bad_input(format!("invalid content id '{raw}'")));
        }
        let season = parts
            .next()
            .map(|s| s.parse().map_err(|_| AppError::bad_input("bad season")))
            .transpose()?;
        let episode = parts
            .next()
            .map(|s| s.parse().map_err(|_| AppError::bad_input("bad episode")))
            .transpose()?;
        Ok(Self {
            imdb: imdb.to_string(),
            season,
            episode,
        })
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.season, self.episode) {
            (Some(s), Some(e)) => write!(f, "{}:{}:{}", self.imdb, s, e),
            _ => write!(f, "{}", self.imdb),
        }
    }
}

/// Canonical naming for one piece of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedTitle {
    pub title: String,
    pub year: Option<i32>,
    /// Language code → localized title (only where it differs)
    #[serde(default)]
    pub localized: std::collections::HashMap<String, String>,
}

impl ResolvedTitle {
    /// Title to search with for a given plugin language
    pub fn title_for_language(&self, lang: &str) -> &str {
        self.localized.get(lang).map(|s| s.as_str()).unwrap_or(&self.title)
    }

    /// All distinct titles, for the match scorer
    pub fn all_titles(&self) -> Vec<String> {
        let mut titles = vec![self.title.clone()];
        for localized in self.localized.values() {
            if !titles.contains(localized) {
                titles.push(localized.clone());
            }
        }
        titles
    }
}

#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn resolve(&self, id: &ContentId, kind: MediaKind) -> Result<ResolvedTitle, FetchError>;
}

/// TMDB find-by-external-id backend; one extra call per localized language
pub struct TmdbTitleResolver {
    fetcher: SharedFetcher,
    api_key: String,
    /// Languages to fetch localized titles for (plugin languages)
    languages: Vec<String>,
    timeout: Duration,
}

impl TmdbTitleResolver {
    pub fn new(fetcher: SharedFetcher, api_key: String, languages: Vec<String>) -> Self {
        Self {
            fetcher,
            api_key,
            languages,
            timeout: Duration::from_secs(10),
        }
    }

    fn find_url(&self, imdb: &str, language: Option<&str>) -> String {
        let mut url = format!(
            "https://api.themoviedb.org/3/find/{}?external_source=imdb_id&api_key={}",
            imdb, self.api_key
        );
        if let Some(lang) = language {
            url.push_str(&format!("&language={lang}"));
        }
        url
    }

    fn first_hit(kind: MediaKind, document: &serde_json::Value) -> Option<(String, Option<i32>)> {
        let (list, title_key, date_key) = match kind {
            MediaKind::Movie => ("movie_results", "title", "release_date"),
            MediaKind::Series => ("tv_results", "name", "first_air_date"),
        };
        let hit = document.get(list)?.as_array()?.first()?;
        let title = hit.get(title_key)?.as_str()?.to_string();
        let year = hit
            .get(date_key)
            .and_then(|v| v.as_str())
            .and_then(|date| date.get(..4))
            .and_then(|y| y.parse().ok());
        Some((title, year))
    }
}

#[async_trait]
impl TitleResolver for TmdbTitleResolver {
    async fn resolve(&self, id: &ContentId, kind: MediaKind) -> Result<ResolvedTitle, FetchError> {
        let deadline = Instant::now() + self.timeout;
        let document: serde_json::Value = self
            .fetcher
            .get_json(&self.find_url(&id.imdb, None), deadline)
            .await?;
        let (title, year) = Self::first_hit(kind, &document).ok_or(FetchError::Status {
            status: 404,
            url: format!("tmdb:{}", id.imdb),
        })?;

        let mut localized = std::collections::HashMap::new();
        for lang in &self.languages {
            if lang == "en" {
                continue;
            }
            let deadline = Instant::now() + self.timeout;
            match self
                .fetcher
                .get_json::<serde_json::Value>(&self.find_url(&id.imdb, Some(lang)), deadline)
                .await
            {
                Ok(doc) => {
                    if let Some((local_title, _)) = Self::first_hit(kind, &doc)
                        && local_title != title
                    {
                        localized.insert(lang.clone(), local_title);
                    }
                }
                Err(e) => debug!("tmdb localized lookup ({lang}) failed: {e}"),
            }
        }

        Ok(ResolvedTitle {
            title,
            year,
            localized,
        })
    }
}

/// Keyless fallback: the IMDb suggestion API
pub struct ImdbSuggestResolver {
    fetcher: SharedFetcher,
    timeout: Duration,
}

impl ImdbSuggestResolver {
    pub fn new(fetcher: SharedFetcher) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl TitleResolver for ImdbSuggestResolver {
    async fn resolve(&self, id: &ContentId, _kind: MediaKind) -> Result<ResolvedTitle, FetchError> {
        let prefix = id.imdb.chars().nth(2).unwrap_or('0');
        let url = format!(
            "https://v2.sg.media-imdb.com/suggestion/{}/{}.json",
            prefix, id.imdb
        );
        let deadline = Instant::now() + self.timeout;
        let document: serde_json::Value = self.fetcher.get_json(&url, deadline).await?;
        let hit = document
            .get("d")
            .and_then(|d| d.as_array())
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|e| e.get("id").and_then(|i| i.as_str()) == Some(id.imdb.as_str()))
            })
            .ok_or(FetchError::Status {
                status: 404,
                url: url.clone(),
            })?;
        let title = hit
            .get("l")
            .and_then(|t| t.as_str())
            .ok_or(FetchError::Status { status: 404, url })?
            .to_string();
        let year = hit.get("y").and_then(|y| y.as_i64()).map(|y| y as i32);
        Ok(ResolvedTitle {
            title,
            year,
            localized: Default::default(),
        })
    }
}

/// Try each backend in order until one answers
pub struct ChainTitleResolver {
    backends: Vec<Arc<dyn TitleResolver>>,
}

impl ChainTitleResolver {
    pub fn new(backends: Vec<Arc<dyn TitleResolver>>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl TitleResolver for ChainTitleResolver {
    async fn resolve(&self, id: &ContentId, kind: MediaKind) -> Result<ResolvedTitle, FetchError> {
        let mut last_error = FetchError::Status {
            status: 404,
            url: id.to_string(),
        };
        for backend in &self.backends {
            match backend.resolve(id, kind).await {
                Ok(resolved) => return Ok(resolved),
                Err(e) => {
                    debug!("title backend failed for {}: {}", id.imdb, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// KV-cached decorator shared by all backends
pub struct CachedTitleResolver {
    inner: Arc<dyn TitleResolver>,
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl CachedTitleResolver {
    pub fn new(inner: Arc<dyn TitleResolver>, kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { inner, kv, ttl }
    }
}

#[async_trait]
impl TitleResolver for CachedTitleResolver {
    async fn resolve(&self, id: &ContentId, kind: MediaKind) -> Result<ResolvedTitle, FetchError> {
        let key = format!("title:{}", id.imdb);
        if let Ok(cached) = self.kv.get_json::<ResolvedTitle>(&key).await {
            return Ok(cached);
        }
        let resolved = self.inner.resolve(id, kind).await?;
        self.kv.put_json_best_effort(&key, &resolved, self.ttl).await;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_parsing() {
        let movie: ContentId = "tt0133093".parse().unwrap();
        assert_eq!(movie.imdb, "tt0133093");
        assert_eq!(movie.season, None);

        let episode: ContentId = "tt0903747:2:5".parse().unwrap();
        assert_eq!(episode.season, Some(2));
        assert_eq!(episode.episode, Some(5));
        assert_eq!(episode.to_string(), "tt0903747:2:5");

        assert!("nm0000001".parse::<ContentId>().is_err());
        assert!("tt12x4".parse::<ContentId>().is_err());
        assert!("tt0903747:two:5".parse::<ContentId>().is_err());
    }

    #[test]
    fn localized_title_lookup() {
        let mut localized = std::collections::HashMap::new();
        localized.insert("de".to_string(), "Die Verurteilten".to_string());
        let resolved = ResolvedTitle {
            title: "The Shawshank Redemption".to_string(),
            year: Some(1994),
            localized,
        };
        assert_eq!(resolved.title_for_language("de"), "Die Verurteilten");
        assert_eq!(
            resolved.title_for_language("en"),
            "The Shawshank Redemption"
        );
        assert_eq!(resolved.all_titles().len(), 2);
    }

    #[test]
    fn tmdb_payload_extraction() {
        let document = serde_json::json!({
            "movie_results": [
                {"title": "The Matrix", "release_date": "1999-03-31"}
            ],
            "tv_results": []
        });
        let (title, year) = TmdbTitleResolver::first_hit(MediaKind::Movie, &document).unwrap();
        assert_eq!(title, "The Matrix");
        assert_eq!(year, Some(1999));
        assert!(TmdbTitleResolver::first_hit(MediaKind::Series, &document).is_none());
    }

    #[tokio::test]
    async fn cached_resolver_serves_from_kv() {
        struct Failing;
        #[async_trait]
        impl TitleResolver for Failing {
            async fn resolve(
                &self,
                id: &ContentId,
                _kind: MediaKind,
            ) -> Result<ResolvedTitle, FetchError> {
                Err(FetchError::Status {
                    status: 500,
                    url: id.to_string(),
                })
            }
        }

        let kv: Arc<dyn KvStore> = Arc::new(crate::kv::MemoryKvStore::new());
        let resolved = ResolvedTitle {
            title: "Cached".to_string(),
            year: None,
            localized: Default::default(),
        };
        kv.put_json("title:tt0000001", &resolved, Duration::ZERO)
            .await
            .unwrap();

        let resolver = CachedTitleResolver::new(Arc::new(Failing), kv, Duration::from_secs(60));
        let id: ContentId = "tt0000001".parse().unwrap();
        let hit = resolver.resolve(&id, MediaKind::Movie).await.unwrap();
        assert_eq!(hit.title, "Cached");

        let miss: ContentId = "tt0000002".parse().unwrap();
        assert!(resolver.resolve(&miss, MediaKind::Movie).await.is_err());
    }
}

//! Hoster resolver registry
//!
//! A dispatch table from registrable domain to resolver. URL resolution:
//!
//! 1. exact domain match;
//! 2. otherwise follow redirects (shortener / mirror domains) and retry
//!    with the final domain, remembering the alias either way;
//! 3. otherwise, optionally, a content-type HEAD probe — a URL that
//!    already serves video needs no resolver at all.
//!
//! Results (including negatives) are cached with a TTL and swept
//! periodically.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ResolveConfig;
use crate::errors::ResolveError;
use crate::fetch::{RateLimitedClient, SharedFetcher, registrable_domain, registrable_of_host};
use crate::models::ResolvedStream;

pub mod cache;
pub mod xfs;

pub use cache::ResolveCache;
pub use xfs::XfsResolver;

/// A URL → direct-video resolver for one hoster (or hoster family member)
#[async_trait]
pub trait HosterResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Ranking bonus for this hoster (1–5)
    fn bonus(&self) -> i64 {
        1
    }

    /// Domains this resolver claims
    fn domains(&self) -> &[String];

    /// Whether the hoster serves playable video at all
    fn is_video(&self) -> bool {
        true
    }

    /// `Ok(None)` means confirmed offline / deleted / captcha-blocked.
    async fn resolve(
        &self,
        fetcher: &RateLimitedClient,
        url: &str,
        deadline: Instant,
    ) -> Result<Option<ResolvedStream>, ResolveError>;
}

pub struct ResolverRegistry {
    by_domain: HashMap<String, Arc<dyn HosterResolver>>,
    fetcher: SharedFetcher,
    config: ResolveConfig,
    cache: ResolveCache,
    /// Redirect-discovered domain → known resolver domain (None = chased
    /// and found nothing; don't chase again)
    alias_cache: DashMap<String, Option<String>>,
}

impl ResolverRegistry {
    pub fn from_config(config: ResolveConfig, fetcher: SharedFetcher) -> Self {
        let mut by_domain: HashMap<String, Arc<dyn HosterResolver>> = HashMap::new();
        for hoster in &config.hosters {
            match XfsResolver::new(hoster.clone()) {
                Ok(resolver) => {
                    let resolver: Arc<dyn HosterResolver> = Arc::new(resolver);
                    for domain in resolver.domains() {
                        by_domain.insert(registrable_of_host(domain), resolver.clone());
                    }
                }
                Err(e) => warn!("skipping hoster '{}': {}", hoster.name, e),
            }
        }
        info!(
            "resolver registry covers {} domains for {} hosters",
            by_domain.len(),
            config.hosters.len()
        );
        let cache = ResolveCache::new(config.cache_ttl);
        Self {
            by_domain,
            fetcher,
            config,
            cache,
            alias_cache: DashMap::new(),
        }
    }

    /// Register a hand-written resolver (composition root / tests).
    pub fn register(&mut self, resolver: Arc<dyn HosterResolver>) {
        for domain in resolver.domains() {
            self.by_domain
                .insert(registrable_of_host(domain), resolver.clone());
        }
    }

    pub fn supports_domain(&self, domain: &str) -> bool {
        self.by_domain.contains_key(&registrable_of_host(domain))
    }

    pub fn supports_url(&self, url: &str) -> bool {
        registrable_domain(url)
            .map(|d| self.by_domain.contains_key(&d))
            .unwrap_or(false)
    }

    /// Hoster display name for a URL: resolver name if known, otherwise
    /// the first label of the registrable domain.
    pub fn hoster_name(&self, url: &str) -> String {
        match registrable_domain(url) {
            Ok(domain) => match self.by_domain.get(&domain) {
                Some(resolver) => resolver.name().to_string(),
                None => domain
                    .split('.')
                    .next()
                    .unwrap_or(domain.as_str())
                    .to_string(),
            },
            Err(_) => "unknown".to_string(),
        }
    }

    pub fn hoster_bonus(&self, url: &str) -> i64 {
        registrable_domain(url)
            .ok()
            .and_then(|d| self.by_domain.get(&d))
            .map(|r| r.bonus())
            .unwrap_or(0)
    }

    fn resolver_for_domain(&self, domain: &str) -> Option<Arc<dyn HosterResolver>> {
        self.by_domain.get(domain).cloned()
    }

    /// Chase redirects to find the final domain for an unmatched URL,
    /// consulting and filling the alias cache.
    async fn resolver_via_redirects(
        &self,
        url: &str,
        domain: &str,
        deadline: Instant,
    ) -> Option<Arc<dyn HosterResolver>> {
        if let Some(alias) = self.alias_cache.get(domain) {
            return alias
                .value()
                .as_ref()
                .and_then(|target| self.resolver_for_domain(target));
        }

        let discovered = match self.fetcher.head(url, deadline).await {
            Ok(response) => {
                let final_domain = response
                    .url()
                    .host_str()
                    .map(registrable_of_host)
                    .unwrap_or_default();
                if final_domain != domain && self.by_domain.contains_key(&final_domain) {
                    debug!("alias {} -> {}", domain, final_domain);
                    Some(final_domain)
                } else {
                    None
                }
            }
            Err(e) => {
                debug!("redirect chase for {} failed: {}", domain, e);
                None
            }
        };

        self.alias_cache
            .insert(domain.to_string(), discovered.clone());
        discovered.and_then(|target| self.resolver_for_domain(&target))
    }

    /// Content-type probe: a URL that already serves video is its own
    /// resolution.
    async fn probe_direct_video(&self, url: &str, deadline: Instant) -> Option<ResolvedStream> {
        let response = self.fetcher.head(url, deadline).await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let is_video = content_type.starts_with("video/")
            || content_type.contains("mpegurl")
            || content_type.contains("octet-stream") && url.contains(".mp4");
        if is_video {
            Some(ResolvedStream {
                video_url: url.to_string(),
                quality: None,
                headers: HashMap::new(),
            })
        } else {
            None
        }
    }

    /// Resolve a hoster URL into a direct video URL.
    ///
    /// `Ok(None)` = confirmed unplayable (offline, captcha, unsupported
    /// non-video); errors are transient and worth a later retry.
    pub async fn resolve_url(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<Option<ResolvedStream>, ResolveError> {
        if let Some(cached) = self.cache.get(url) {
            return Ok(cached);
        }

        let domain = registrable_domain(url).map_err(ResolveError::Fetch)?;

        let resolver = match self.resolver_for_domain(&domain) {
            Some(resolver) => Some(resolver),
            None if self.config.max_redirects > 0 => {
                self.resolver_via_redirects(url, &domain, deadline).await
            }
            None => None,
        };

        let outcome = match resolver {
            Some(resolver) => resolver.resolve(&self.fetcher, url, deadline).await,
            None if self.config.content_type_probe => {
                Ok(self.probe_direct_video(url, deadline).await)
            }
            None => Err(ResolveError::Unsupported { domain }),
        };

        match outcome {
            Ok(resolved) => {
                self.cache.put(url, resolved.clone());
                Ok(resolved)
            }
            Err(e) => Err(e),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    pub fn known_hosters(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_domain
            .values()
            .map(|r| r.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Periodic cache sweep, cancelled on shutdown.
pub async fn run_cache_sweeper(
    registry: Arc<ResolverRegistry>,
    interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let evicted = registry.sweep_cache();
                if evicted > 0 {
                    debug!("resolver cache sweep evicted {} entries", evicted);
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

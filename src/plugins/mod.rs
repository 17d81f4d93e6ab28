//! Scrape-plugin abstraction
//!
//! Plugins are data-driven units: a YAML definition file describes where a
//! site lives and how to turn a search into [`SearchResult`]s; the generic
//! [`engine`] interprets the definition. No code is loaded at runtime —
//! the registry only instantiates engines over parsed definitions, plus
//! whatever built-in plugins the composition root registers directly.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::PluginError;
use crate::fetch::SharedFetcher;
use crate::models::{AgeBucket, Category, SearchResult};
use crate::pool::SlotKind;

pub mod browser;
pub mod definition;
pub mod engine;
pub mod registry;

pub use browser::{BrowserEngine, BrowserPage, DisabledBrowser};
pub use definition::PluginDefinition;
pub use registry::PluginRegistry;

/// How a plugin reaches its site
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginMode {
    FastHttp,
    HeadlessBrowser,
}

impl PluginMode {
    pub fn slot_kind(&self) -> SlotKind {
        match self {
            PluginMode::FastHttp => SlotKind::FastHttp,
            PluginMode::HeadlessBrowser => SlotKind::Headless,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginMode::FastHttp => "fast-http",
            PluginMode::HeadlessBrowser => "headless-browser",
        }
    }
}

/// What kind of links a plugin yields
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provides {
    Download,
    Stream,
}

impl Provides {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provides::Download => "download",
            Provides::Stream => "stream",
        }
    }
}

/// Immutable plugin metadata, fixed once the registry is built
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    /// Unique, lowercased kebab-case
    pub name: String,
    pub mode: PluginMode,
    pub provides: Provides,
    /// Declared languages, ordered by preference
    pub languages: Vec<String>,
    /// Age buckets this plugin is good at; empty set means all
    pub age_affinity: HashSet<AgeBucket>,
    pub base_url: String,
    pub mirrors: Vec<String>,
    /// Per-plugin overrides, resolved from configuration at build time
    pub timeout: Option<Duration>,
    pub max_concurrent: Option<usize>,
    pub max_results: Option<usize>,
}

impl PluginDescriptor {
    pub fn covers_bucket(&self, bucket: AgeBucket) -> bool {
        self.age_affinity.is_empty() || self.age_affinity.contains(&bucket)
    }
}

/// One search request handed to a plugin
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub category: Option<Category>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Upper bound on returned rows; plugins may return fewer
    pub limit: usize,
}

impl SearchQuery {
    pub fn simple(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: None,
            season: None,
            episode: None,
            limit: 100,
        }
    }
}

/// Per-invocation environment: transport, browser, deadline, cancellation
#[derive(Clone)]
pub struct SearchContext {
    pub fetcher: SharedFetcher,
    pub browser: Arc<dyn BrowserEngine>,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl SearchContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// The single operation every plugin implements
#[async_trait]
pub trait ScrapePlugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    async fn search(
        &self,
        ctx: &SearchContext,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, PluginError>;
}

/// Kebab-case name check applied to every descriptor
pub fn valid_plugin_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('-').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

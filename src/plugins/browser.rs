//! Headless-browser contract
//!
//! Headless plugins render pages through a browser engine instead of raw
//! HTTP. Only the contract lives here — acquire a page, drive it, close
//! it — the concrete embedding is provided by the composition root.
//! Page acquisition draws from the pool's headless slot class, which is
//! enforced by the orchestrators before a plugin runs.

use async_trait::async_trait;

use crate::errors::PluginError;

/// A browser context able to hand out pages
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Acquire a page (fresh or recycled from a warm pool).
    async fn acquire_page(&self) -> Result<Box<dyn BrowserPage>, PluginError>;

    /// Whether the engine can actually serve pages.
    fn available(&self) -> bool {
        true
    }
}

/// A single page / tab
#[async_trait]
pub trait BrowserPage: Send {
    /// Navigate and wait for the document to settle.
    async fn navigate(&mut self, url: &str) -> Result<(), PluginError>;

    /// Current page HTML.
    async fn content(&mut self) -> Result<String, PluginError>;

    /// Return the page to the engine (recycle or close).
    async fn close(self: Box<Self>);
}

/// Placeholder engine for builds without a browser embedding. Headless
/// plugins fail fast with a clear message instead of hanging.
pub struct DisabledBrowser;

#[async_trait]
impl BrowserEngine for DisabledBrowser {
    async fn acquire_page(&self) -> Result<Box<dyn BrowserPage>, PluginError> {
        Err(PluginError::Failed {
            plugin: "browser".to_string(),
            message: "no headless browser engine is configured".to_string(),
        })
    }

    fn available(&self) -> bool {
        false
    }
}

//! Error type definitions for trawlarr
//!
//! Hierarchical error system: a top-level [`AppError`] with focused
//! sub-enums per subsystem. The web layer maps these onto HTTP status
//! codes; in `prod` environment mode upstream failures degrade to empty
//! feeds so that automation clients keep their schedules.

use std::time::Duration;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// User-supplied input was invalid (bad query param, unsupported action)
    #[error("bad input: {message}")]
    BadInput { message: String },

    /// A referenced resource does not exist
    #[error("not found: {resource} '{id}'")]
    NotFound { resource: String, id: String },

    /// Outbound HTTP failures
    #[error("upstream error: {0}")]
    Fetch(#[from] FetchError),

    /// Plugin invocation failures
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Hoster resolution failures
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// KV storage failures
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Unexpected internal errors
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Outbound HTTP transport errors (rate-limited client)
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request (or the wait for a rate-limit token) exceeded its deadline
    #[error("request timed out after {elapsed_ms}ms: {url}")]
    Timeout { url: String, elapsed_ms: u64 },

    /// The deadline ran out while blocked on the domain token bucket
    #[error("rate-limit token unavailable for '{domain}' within deadline")]
    TokenDeadline { domain: String },

    /// 429/503 responses persisted through all retry attempts
    #[error("throttled by '{domain}' (status {status}), retries exhausted")]
    Throttled { domain: String, status: u16 },

    /// Non-success terminal status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Connection / TLS / protocol failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The target URL could not be parsed
    #[error("invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

impl FetchError {
    /// Whether the failure was a timeout (AIMD treats these separately)
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::TokenDeadline { .. } => true,
            FetchError::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Plugin loading and invocation errors
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin's circuit breaker is open; the call was not dispatched
    #[error("circuit open for plugin '{plugin}'")]
    CircuitOpen { plugin: String },

    /// The plugin call exceeded its timeout
    #[error("plugin '{plugin}' timed out after {timeout:?}")]
    Timeout { plugin: String, timeout: Duration },

    /// The upstream site answered with a captcha / anti-bot challenge
    #[error("captcha challenge from plugin '{plugin}'")]
    Captcha { plugin: String },

    /// The plugin ran but failed
    #[error("plugin '{plugin}' failed: {message}")]
    Failed { plugin: String, message: String },

    /// A plugin definition file did not validate
    #[error("invalid plugin definition '{name}': {message}")]
    InvalidDefinition { name: String, message: String },

    /// Two definitions claimed the same name
    #[error("duplicate plugin name '{name}' ({first} and {second})")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },

    /// Lookup of a name the registry does not know
    #[error("unknown plugin '{0}'")]
    Unknown(String),

    /// Underlying transport failure surfaced by the plugin engine
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PluginError {
    /// Plugin name this error concerns, when one is attached
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            PluginError::CircuitOpen { plugin }
            | PluginError::Timeout { plugin, .. }
            | PluginError::Captcha { plugin }
            | PluginError::Failed { plugin, .. } => Some(plugin),
            PluginError::Unknown(name) => Some(name),
            _ => None,
        }
    }
}

/// Hoster resolver errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The hoster reported the file gone / deleted
    #[error("file offline at {url}")]
    Offline { url: String },

    /// The hoster gated the file behind a captcha
    #[error("captcha required at {url}")]
    Captcha { url: String },

    /// No resolver claims the URL's domain
    #[error("no resolver for domain '{domain}'")]
    Unsupported { domain: String },

    /// The embed page did not contain an extractable video URL
    #[error("no video source found at {url}: {message}")]
    Extraction { url: String, message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// KV store errors
#[derive(Error, Debug)]
pub enum KvError {
    /// Key absent or expired
    #[error("key not found")]
    NotFound,

    /// Backend failure (disk, network)
    #[error("kv backend error: {message}")]
    Backend { message: String },

    /// Stored bytes failed to decode
    #[error("kv codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<sqlx::Error> for KvError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => KvError::NotFound,
            other => KvError::Backend {
                message: other.to_string(),
            },
        }
    }
}

impl AppError {
    pub fn bad_input<S: Into<String>>(message: S) -> Self {
        Self::BadInput {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is recoverable per request (upstream class):
    /// in prod mode the web layer converts it into an empty 200 feed.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::Fetch(_) | AppError::Plugin(_) | AppError::Resolve(_)
        )
    }
}

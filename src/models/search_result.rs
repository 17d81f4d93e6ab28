//! Search results as returned by scrape plugins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A download location alternative to the primary URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeUrl {
    pub url: String,
    /// Hoster name when the plugin knows it (e.g. "voe", "streamtape")
    #[serde(default)]
    pub hoster: Option<String>,
}

/// One result row from a plugin search
///
/// Title and primary URL are non-empty and the alternatives never repeat
/// the primary; [`SearchResult::validated`] enforces both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    /// Primary download / embed URL
    pub url: String,
    #[serde(default)]
    pub alternatives: Vec<AlternativeUrl>,
    /// Size in bytes, best-effort
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub seeders: Option<u32>,
    #[serde(default)]
    pub peers: Option<u32>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    /// Scene release name when available; feeds quality/language parsing
    #[serde(default)]
    pub release_name: Option<String>,
    /// Newznab category id
    pub category: u32,
    /// Page the result was scraped from
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SearchResult {
    /// Enforce the structural invariants, normalizing rather than
    /// rejecting where possible. Returns `None` for unusable rows.
    pub fn validated(mut self) -> Option<Self> {
        self.title = self.title.trim().to_string();
        self.url = self.url.trim().to_string();
        if self.title.is_empty() || self.url.is_empty() {
            return None;
        }
        let primary = self.url.clone();
        self.alternatives.retain(|alt| alt.url != primary);
        // Keep alternatives unique while preserving plugin order.
        let mut seen = std::collections::HashSet::new();
        self.alternatives.retain(|alt| seen.insert(alt.url.clone()));
        Some(self)
    }

    /// Dedup key: case-folded, whitespace-collapsed title
    pub fn normalized_title(&self) -> String {
        self.title
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Primary plus alternatives, in plugin order
    pub fn all_urls(&self) -> Vec<&str> {
        std::iter::once(self.url.as_str())
            .chain(self.alternatives.iter().map(|a| a.url.as_str()))
            .collect()
    }
}

/// Parse human sizes ("1.4 GB", "700MB", "1234567") into bytes.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(bytes) = raw.parse::<u64>() {
        return Some(bytes);
    }

    let split = raw.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.trim().replace(',', ".").parse().ok()?;
    let factor: f64 = match unit.trim().to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" | "K" | "KIB" => 1024.0,
        "MB" | "M" | "MIB" => 1024.0 * 1024.0,
        "GB" | "G" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "T" | "TIB" => 1024.0f64.powi(4),
        _ => return None,
    };
    if value < 0.0 {
        return None;
    }
    Some((value * factor) as u64)
}

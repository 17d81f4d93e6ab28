//! CrawlJob packaging for download managers
//!
//! A CrawlJob bundles the validated URLs of one result into the INI-style
//! `.crawljob` text format download managers ingest. Lines are `key=value`,
//! URLs are repeated `text=` lines, comments start with `#`. Parsing keeps
//! unknown keys in the metadata map so `serialize ∘ parse` is the identity
//! on the canonical form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::errors::AppError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobPriority {
    Highest,
    High,
    #[default]
    Default,
    Low,
    Lowest,
}

/// Immutable packaging blob of validated download URLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: Uuid,
    pub package_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Validated URLs in promotion order
    pub urls: Vec<String>,
    /// Page the result came from, written as the job comment
    pub source_url: Option<String>,
    pub priority: JobPriority,
    pub auto_start: bool,
    /// Unknown keys preserved through parse/serialize round trips
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CrawlJob {
    pub fn new(package_name: String, urls: Vec<String>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            package_name,
            created_at,
            expires_at: created_at + chrono::Duration::from_std(ttl).unwrap_or_default(),
            urls,
            source_url: None,
            priority: JobPriority::Default,
            auto_start: true,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source_url: Option<String>) -> Self {
        self.source_url = source_url;
        self
    }

    /// KV key for this job
    pub fn kv_key(id: &Uuid) -> String {
        format!("job:{id}")
    }

    /// Canonical `.crawljob` text body
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# generated by {}", env!("CARGO_PKG_NAME"));
        for url in &self.urls {
            let _ = writeln!(out, "text={url}");
        }
        let _ = writeln!(out, "packageName={}", self.package_name);
        if let Some(source) = &self.source_url {
            let _ = writeln!(out, "comment={source}");
        }
        let _ = writeln!(
            out,
            "autoStart={}",
            if self.auto_start { "TRUE" } else { "FALSE" }
        );
        let _ = writeln!(out, "priority={}", self.priority);
        let _ = writeln!(out, "enabled=TRUE");
        let _ = writeln!(out, "chunks=0");
        let _ = writeln!(out, "jobId={}", self.id);
        for (key, value) in &self.metadata {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }

    /// Parse a `.crawljob` body back into a job. Timestamps are not on the
    /// wire; the parsed job gets fresh ones.
    pub fn parse(body: &str, ttl: Duration) -> Result<Self, AppError> {
        let mut urls = Vec::new();
        let mut package_name = None;
        let mut source_url = None;
        let mut priority = JobPriority::Default;
        let mut auto_start = true;
        let mut id = None;
        let mut metadata = BTreeMap::new();

        for line in body.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(AppError::bad_input(format!(
                    "crawljob line without '=': {line}"
                )));
            };
            match key {
                "text" => urls.push(value.to_string()),
                "packageName" => package_name = Some(value.to_string()),
                "comment" => source_url = Some(value.to_string()),
                "autoStart" => auto_start = value.eq_ignore_ascii_case("true"),
                "priority" => {
                    priority = value.parse().map_err(|_| {
                        AppError::bad_input(format!("unknown crawljob priority '{value}'"))
                    })?
                }
                "jobId" => {
                    id = Some(Uuid::parse_str(value).map_err(|e| {
                        AppError::bad_input(format!("bad crawljob id '{value}': {e}"))
                    })?)
                }
                // enabled/chunks are fixed on serialize; anything else is
                // carried through verbatim.
                "enabled" | "chunks" => {}
                other => {
                    metadata.insert(other.to_string(), value.to_string());
                }
            }
        }

        if urls.is_empty() {
            return Err(AppError::bad_input("crawljob carries no URLs"));
        }
        let created_at = Utc::now();
        Ok(Self {
            id: id.unwrap_or_else(Uuid::new_v4),
            package_name: package_name
                .ok_or_else(|| AppError::bad_input("crawljob missing packageName"))?,
            created_at,
            expires_at: created_at + chrono::Duration::from_std(ttl).unwrap_or_default(),
            urls,
            source_url,
            priority,
            auto_start,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CrawlJob {
        let mut job = CrawlJob::new(
            "Movie.2024.German.1080p".to_string(),
            vec![
                "https://host.example/f/abc".to_string(),
                "https://mirror.example/f/def".to_string(),
            ],
            Duration::from_secs(3600),
        )
        .with_source(Some("https://indexer.example/release/42".to_string()));
        job.metadata
            .insert("downloadPassword".to_string(), "scene".to_string());
        job
    }

    #[test]
    fn serialize_then_parse_is_identity_on_canonical_form() {
        let original = job();
        let body = original.serialize();
        let parsed = CrawlJob::parse(&body, Duration::from_secs(3600)).unwrap();
        assert_eq!(parsed.id, original.id);
        assert_eq!(parsed.package_name, original.package_name);
        assert_eq!(parsed.urls, original.urls);
        assert_eq!(parsed.source_url, original.source_url);
        assert_eq!(parsed.priority, original.priority);
        assert_eq!(parsed.auto_start, original.auto_start);
        assert_eq!(parsed.metadata, original.metadata);
        // Second round trip is byte-identical apart from nothing at all.
        assert_eq!(parsed.serialize(), body);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let body = "# a comment\ntext=https://x/1\npackageName=P\n";
        let parsed = CrawlJob::parse(body, Duration::from_secs(60)).unwrap();
        assert_eq!(parsed.urls, vec!["https://x/1"]);
        assert_eq!(parsed.package_name, "P");
    }

    #[test]
    fn url_order_is_preserved() {
        let body = "text=https://x/2\ntext=https://x/1\ntext=https://x/3\npackageName=P\n";
        let parsed = CrawlJob::parse(body, Duration::from_secs(60)).unwrap();
        assert_eq!(parsed.urls, vec!["https://x/2", "https://x/1", "https://x/3"]);
    }

    #[test]
    fn rejects_empty_and_malformed_bodies() {
        assert!(CrawlJob::parse("packageName=P\n", Duration::from_secs(60)).is_err());
        assert!(CrawlJob::parse("text=https://x\nnot a kv line\n", Duration::from_secs(60)).is_err());
        assert!(CrawlJob::parse("text=https://x\n", Duration::from_secs(60)).is_err());
    }
}

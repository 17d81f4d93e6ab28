//! Ranked streams and release-name parsing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Video quality parsed from a release name, ordered best-first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[serde(rename = "4k")]
    FourK,
    #[serde(rename = "1080p")]
    FullHd,
    #[serde(rename = "720p")]
    Hd,
    Sd,
    Ts,
    Cam,
    Unknown,
}

impl Quality {
    /// Rank contribution before the quality multiplier
    pub fn value(&self) -> i64 {
        match self {
            Quality::FourK => 60,
            Quality::FullHd => 50,
            Quality::Hd => 40,
            Quality::Sd => 30,
            Quality::Ts => 20,
            Quality::Cam => 10,
            Quality::Unknown => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quality::FourK => "4K",
            Quality::FullHd => "1080p",
            Quality::Hd => "720p",
            Quality::Sd => "SD",
            Quality::Ts => "TS",
            Quality::Cam => "CAM",
            Quality::Unknown => "?",
        }
    }
}

static QUALITY_PATTERNS: LazyLock<Vec<(Regex, Quality)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\b(2160p|4k|uhd)\b").unwrap(),
            Quality::FourK,
        ),
        (Regex::new(r"(?i)\b1080[pi]\b").unwrap(), Quality::FullHd),
        (Regex::new(r"(?i)\b720p\b").unwrap(), Quality::Hd),
        (
            Regex::new(r"(?i)\b(hdcam|camrip|cam)\b").unwrap(),
            Quality::Cam,
        ),
        (
            Regex::new(r"(?i)\b(telesync|hdts|ts)\b").unwrap(),
            Quality::Ts,
        ),
        (
            Regex::new(r"(?i)\b(480p|dvdrip|webrip|web-?dl|bluray|bdrip|hdtv|sd)\b").unwrap(),
            Quality::Sd,
        ),
    ]
});

impl Quality {
    /// Best match wins; CAM/TS markers outrank resolution-less source tags.
    pub fn parse(release_name: &str) -> Quality {
        for (pattern, quality) in QUALITY_PATTERNS.iter() {
            if pattern.is_match(release_name) {
                return *quality;
            }
        }
        Quality::Unknown
    }
}

/// Dub/sub classification of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageKind {
    Dub,
    Sub,
    Unknown,
}

/// Language(s) parsed from a release name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLanguage {
    /// ISO-639-1 codes, multi-language releases carry several
    pub langs: Vec<String>,
    pub kind: LanguageKind,
}

impl ParsedLanguage {
    pub fn unknown() -> Self {
        Self {
            langs: vec![],
            kind: LanguageKind::Unknown,
        }
    }

    /// Scene-tag parsing: GERMAN/ENGLISH markers, `DL`/`MULTI` for
    /// dual-language, `SUBBED` flips dub → sub.
    pub fn parse(release_name: &str) -> Self {
        let upper = release_name.to_uppercase();
        let tokens: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |t: &str| tokens.contains(&t);

        let mut langs = Vec::new();
        if has("GERMAN") || has("DEUTSCH") {
            langs.push("de".to_string());
        }
        if has("ENGLISH") || has("ENG") {
            langs.push("en".to_string());
        }
        if (has("DL") || has("MULTI")) && !langs.is_empty() {
            // Dual-language releases carry the original track as well.
            if !langs.contains(&"en".to_string()) {
                langs.push("en".to_string());
            }
        }

        if langs.is_empty() {
            return Self::unknown();
        }

        let kind = if has("SUBBED") || has("SUBS") || has("OMU") {
            LanguageKind::Sub
        } else {
            LanguageKind::Dub
        };
        Self { langs, kind }
    }

    /// Keys used against the configured language score map (`de-dub`, …)
    pub fn score_keys(&self) -> Vec<String> {
        let suffix = match self.kind {
            LanguageKind::Dub => "dub",
            LanguageKind::Sub => "sub",
            LanguageKind::Unknown => return vec!["unknown".to_string()],
        };
        if self.langs.is_empty() {
            vec!["unknown".to_string()]
        } else {
            self.langs
                .iter()
                .map(|lang| format!("{lang}-{suffix}"))
                .collect()
        }
    }

    /// Best score over all parsed languages, falling back to `unknown`.
    pub fn score(&self, scores: &HashMap<String, i64>) -> i64 {
        let fallback = scores.get("unknown").copied().unwrap_or(0);
        self.score_keys()
            .iter()
            .filter_map(|key| scores.get(key).copied())
            .max()
            .unwrap_or(fallback)
    }
}

/// A resolved direct-play target with the headers playback requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub video_url: String,
    #[serde(default)]
    pub quality: Option<Quality>,
    /// Headers the player must send (typically `Referer`)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// A stream candidate after ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedStream {
    pub url: String,
    /// Hoster name derived from the URL's registrable domain
    pub hoster: String,
    pub title: String,
    pub quality: Quality,
    pub language: ParsedLanguage,
    /// Plugin the result came from
    pub plugin: String,
    /// Composite rank: language + quality·multiplier + hoster bonus
    pub score: i64,
    #[serde(default)]
    pub resolved: Option<ResolvedStream>,
}

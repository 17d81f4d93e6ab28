//! Plugin definition files
//!
//! A plugin unit is one YAML document describing the site and the search
//! recipe. Discovery peeks at the cheap metadata subset ([`PluginMeta`])
//! without validating the whole document; the full [`PluginDefinition`] is
//! parsed lazily on first use.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::config::duration_serde;
use crate::errors::PluginError;
use crate::models::AgeBucket;

use super::{PluginMode, Provides, valid_plugin_name};

/// Cheap metadata peek: enough for `list_names`, `get_mode` and
/// `get_languages` without a full load. Unknown keys are ignored here;
/// strict validation happens when the definition is actually loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginMeta {
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: PluginMode,
    pub provides: Provides,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub age_affinity: HashSet<AgeBucket>,
    pub base_url: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(with = "duration_serde::option_duration", default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

fn default_mode() -> PluginMode {
    PluginMode::FastHttp
}

impl PluginMeta {
    pub fn peek(path: &Path) -> Result<Self, PluginError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PluginError::InvalidDefinition {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        let meta: PluginMeta =
            serde_yaml::from_str(&raw).map_err(|e| PluginError::InvalidDefinition {
                name: path.display().to_string(),
                message: e.to_string(),
            })?;
        meta.validate(path)?;
        Ok(meta)
    }

    fn validate(&self, path: &Path) -> Result<(), PluginError> {
        if !valid_plugin_name(&self.name) {
            return Err(PluginError::InvalidDefinition {
                name: path.display().to_string(),
                message: format!("name '{}' is not lowercase kebab-case", self.name),
            });
        }
        if self.languages.is_empty() {
            return Err(PluginError::InvalidDefinition {
                name: self.name.clone(),
                message: "languages must list at least one entry".to_string(),
            });
        }
        if self.base_url.is_empty() {
            return Err(PluginError::InvalidDefinition {
                name: self.name.clone(),
                message: "base_url must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// How result rows are extracted from the fetched document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractKind {
    #[default]
    Json,
    Html,
}

/// JSON field mapping: dotted paths into each result object
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FieldMap {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub seeders: Option<String>,
    #[serde(default)]
    pub peers: Option<String>,
    #[serde(default)]
    pub release_name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    /// Array of link strings or `{url, hoster}` objects
    #[serde(default)]
    pub alternatives: Option<String>,
}

/// The search recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRecipe {
    /// Path + query template; `{query}`, `{season}`, `{episode}`,
    /// `{category_id}` and `{limit}` are substituted (query urlencoded)
    pub path: String,
    #[serde(default)]
    pub extract: ExtractKind,
    /// Dotted path to the result array (`json` extraction)
    #[serde(default)]
    pub results_path: Option<String>,
    #[serde(default)]
    pub fields: Option<FieldMap>,
    /// Regex with named groups `title`, `url`, optional `release_name`,
    /// `size` (`html` extraction); one match per result
    #[serde(default)]
    pub html_pattern: Option<String>,
}

/// Full plugin definition, strictly validated on load
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginDefinition {
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: PluginMode,
    pub provides: Provides,
    pub languages: Vec<String>,
    #[serde(default)]
    pub age_affinity: HashSet<AgeBucket>,
    pub base_url: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(with = "duration_serde::option_duration", default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Extra request headers (API keys and the like)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Newznab category id stamped on results lacking one
    #[serde(default = "default_category_id")]
    pub default_category: u32,
    pub search: SearchRecipe,
}

fn default_category_id() -> u32 {
    2000
}

impl PluginDefinition {
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let raw = std::fs::read_to_string(path).map_err(|e| PluginError::InvalidDefinition {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&raw, &path.display().to_string())
    }

    pub fn parse(raw: &str, origin: &str) -> Result<Self, PluginError> {
        let definition: PluginDefinition =
            serde_yaml::from_str(raw).map_err(|e| PluginError::InvalidDefinition {
                name: origin.to_string(),
                message: e.to_string(),
            })?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        let fail = |message: String| PluginError::InvalidDefinition {
            name: self.name.clone(),
            message,
        };
        if !valid_plugin_name(&self.name) {
            return Err(fail(format!(
                "name '{}' is not lowercase kebab-case",
                self.name
            )));
        }
        if self.languages.is_empty() {
            return Err(fail("languages must list at least one entry".to_string()));
        }
        if self.base_url.is_empty() {
            return Err(fail("base_url must not be empty".to_string()));
        }
        match self.search.extract {
            ExtractKind::Json => {
                if self.search.fields.is_none() {
                    return Err(fail("json extraction requires search.fields".to_string()));
                }
            }
            ExtractKind::Html => {
                if self.search.html_pattern.is_none() {
                    return Err(fail(
                        "html extraction requires search.html_pattern".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: scene-hub
provides: stream
languages: [de, en]
age_affinity: [current, y1_2]
base_url: https://scene-hub.example
search:
  path: "/api/search?q={query}&cat={category_id}"
  results_path: "data.items"
  fields:
    title: "name"
    url: "download_url"
    size: "size_bytes"
    release_name: "release"
    alternatives: "links"
"#;

    #[test]
    fn parses_full_definition() {
        let definition = PluginDefinition::parse(SAMPLE, "test").unwrap();
        assert_eq!(definition.name, "scene-hub");
        assert_eq!(definition.mode, PluginMode::FastHttp);
        assert_eq!(definition.languages, vec!["de", "en"]);
        assert_eq!(definition.default_category, 2000);
    }

    #[test]
    fn rejects_bad_name() {
        let raw = SAMPLE.replace("scene-hub", "Scene_Hub");
        assert!(matches!(
            PluginDefinition::parse(&raw, "test"),
            Err(PluginError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn rejects_missing_languages() {
        let raw = SAMPLE.replace("[de, en]", "[]");
        assert!(PluginDefinition::parse(&raw, "test").is_err());
    }

    #[test]
    fn rejects_unknown_keys_on_full_load() {
        let raw = format!("{SAMPLE}\nsurprise: true\n");
        assert!(PluginDefinition::parse(&raw, "test").is_err());
    }

    #[test]
    fn html_extraction_requires_pattern() {
        let raw = SAMPLE.replace("results_path: \"data.items\"", "extract: html");
        assert!(PluginDefinition::parse(&raw, "test").is_err());
    }
}

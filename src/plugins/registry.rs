//! Plugin registry: discovery, lazy loading, caching
//!
//! Discovery walks the definitions directory, peeks at each file's
//! metadata and indexes descriptors by name — nothing is fully parsed or
//! instantiated yet. The first `get(name)` loads and validates the full
//! definition, builds the engine and caches it. Configuration overrides
//! are folded into the descriptors once, at build time; a plugin disabled
//! by override never enters the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::config::{PluginOverride, PluginsConfig};
use crate::errors::PluginError;

use super::definition::{PluginDefinition, PluginMeta};
use super::engine::DefinedPlugin;
use super::{PluginDescriptor, PluginMode, ScrapePlugin};

enum PluginSource {
    /// Definition file, loaded lazily
    File(PathBuf),
    /// Instantiated directly by the composition root (tests, built-ins)
    Builtin(Arc<dyn ScrapePlugin>),
}

struct Entry {
    descriptor: PluginDescriptor,
    source: PluginSource,
    /// Cross-request cap from the `max_concurrent` override
    gate: Option<Arc<Semaphore>>,
}

impl Entry {
    fn new(descriptor: PluginDescriptor, source: PluginSource) -> Self {
        let gate = descriptor
            .max_concurrent
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            descriptor,
            source,
            gate,
        }
    }
}

pub struct PluginRegistry {
    entries: HashMap<String, Entry>,
    /// Registration order: sorted scan order, then built-ins
    order: Vec<String>,
    loaded: RwLock<HashMap<String, Arc<dyn ScrapePlugin>>>,
}

impl PluginRegistry {
    /// Scan the definitions directory and build the registry.
    pub fn discover(config: &PluginsConfig) -> Result<Self, PluginError> {
        let mut registry = Self {
            entries: HashMap::new(),
            order: Vec::new(),
            loaded: RwLock::new(HashMap::new()),
        };

        let mut files = Vec::new();
        if config.definitions_dir.is_dir() {
            collect_definition_files(&config.definitions_dir, &mut files);
        } else {
            warn!(
                "plugin definitions directory {} does not exist",
                config.definitions_dir.display()
            );
        }
        // Deterministic registration order regardless of filesystem order.
        files.sort();

        for path in files {
            let meta = match PluginMeta::peek(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("skipping plugin definition {}: {}", path.display(), e);
                    continue;
                }
            };

            let override_cfg = config.overrides.get(&meta.name);
            if let Some(o) = override_cfg
                && o.enabled == Some(false)
            {
                debug!("plugin '{}' disabled by configuration", meta.name);
                continue;
            }

            if let Some(existing) = registry.entries.get(&meta.name) {
                let first = match &existing.source {
                    PluginSource::File(p) => p.display().to_string(),
                    PluginSource::Builtin(_) => "<builtin>".to_string(),
                };
                return Err(PluginError::DuplicateName {
                    name: meta.name,
                    first,
                    second: path.display().to_string(),
                });
            }

            let descriptor = descriptor_from_meta(&meta, override_cfg);
            registry.order.push(meta.name.clone());
            registry.entries.insert(
                meta.name.clone(),
                Entry::new(descriptor, PluginSource::File(path)),
            );
        }

        info!("discovered {} plugins", registry.order.len());
        Ok(registry)
    }

    /// Register an already-instantiated plugin (composition root only).
    pub fn register_builtin(&mut self, plugin: Arc<dyn ScrapePlugin>) -> Result<(), PluginError> {
        let descriptor = plugin.descriptor().clone();
        if self.entries.contains_key(&descriptor.name) {
            return Err(PluginError::DuplicateName {
                name: descriptor.name.clone(),
                first: "<registry>".to_string(),
                second: "<builtin>".to_string(),
            });
        }
        self.order.push(descriptor.name.clone());
        self.entries.insert(
            descriptor.name.clone(),
            Entry::new(descriptor, PluginSource::Builtin(plugin)),
        );
        Ok(())
    }

    /// Per-plugin concurrency gate, present when an override caps it.
    /// Callers hold the permit for the duration of the plugin call.
    pub fn gate(&self, name: &str) -> Option<Arc<Semaphore>> {
        self.entries.get(name).and_then(|e| e.gate.clone())
    }

    /// Names in registration order
    pub fn list_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Descriptor lookup without forcing a load
    pub fn descriptor(&self, name: &str) -> Option<&PluginDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    pub fn mode(&self, name: &str) -> Option<PluginMode> {
        self.descriptor(name).map(|d| d.mode)
    }

    pub fn languages(&self, name: &str) -> Option<Vec<String>> {
        self.descriptor(name).map(|d| d.languages.clone())
    }

    /// All descriptors, registration order
    pub fn descriptors(&self) -> Vec<&PluginDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.descriptor(name))
            .collect()
    }

    /// Position in registration order, used as a stable tie-break
    pub fn registration_index(&self, name: &str) -> usize {
        self.order
            .iter()
            .position(|n| n == name)
            .unwrap_or(usize::MAX)
    }

    /// Fetch (and on first use load + validate + cache) a plugin.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn ScrapePlugin>, PluginError> {
        if let Some(plugin) = self.loaded.read().await.get(name) {
            return Ok(plugin.clone());
        }

        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| PluginError::Unknown(name.to_string()))?;

        let plugin: Arc<dyn ScrapePlugin> = match &entry.source {
            PluginSource::Builtin(plugin) => plugin.clone(),
            PluginSource::File(path) => {
                let definition = PluginDefinition::load(path)?;
                if definition.name != name {
                    return Err(PluginError::InvalidDefinition {
                        name: name.to_string(),
                        message: format!(
                            "definition file {} declares name '{}'",
                            path.display(),
                            definition.name
                        ),
                    });
                }
                debug!("loaded plugin definition '{}'", name);
                Arc::new(DefinedPlugin::new(definition, entry.descriptor.clone())?)
            }
        };

        // Double-checked under the write lock: a racing loader wins and
        // both callers share the same instance.
        let mut loaded = self.loaded.write().await;
        let plugin = loaded.entry(name.to_string()).or_insert(plugin).clone();
        Ok(plugin)
    }
}

fn descriptor_from_meta(meta: &PluginMeta, override_cfg: Option<&PluginOverride>) -> PluginDescriptor {
    PluginDescriptor {
        name: meta.name.clone(),
        mode: meta.mode,
        provides: meta.provides,
        languages: meta.languages.clone(),
        age_affinity: meta.age_affinity.clone(),
        base_url: meta.base_url.clone(),
        mirrors: meta.mirrors.clone(),
        timeout: override_cfg.and_then(|o| o.timeout).or(meta.timeout),
        max_concurrent: override_cfg.and_then(|o| o.max_concurrent),
        max_results: override_cfg
            .and_then(|o| o.max_results)
            .or(meta.max_results),
    }
}

fn collect_definition_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_definition_files(&path, out);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        ) {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_definition(dir: &Path, file: &str, name: &str) {
        let body = format!(
            r#"
name: {name}
provides: stream
languages: [de]
base_url: https://{name}.example
search:
  path: "/api?q={{query}}"
  results_path: "items"
  fields:
    title: "title"
    url: "url"
"#
        );
        let mut f = std::fs::File::create(dir.join(file)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn config_for(dir: &Path) -> PluginsConfig {
        PluginsConfig {
            definitions_dir: dir.to_path_buf(),
            overrides: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn discovery_indexes_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "beta.yml", "beta");
        write_definition(dir.path(), "alpha.yml", "alpha");

        let registry = PluginRegistry::discover(&config_for(dir.path())).unwrap();
        assert_eq!(registry.list_names(), vec!["alpha", "beta"]);
        assert_eq!(registry.mode("alpha"), Some(PluginMode::FastHttp));
        assert_eq!(registry.languages("beta"), Some(vec!["de".to_string()]));
        assert!(registry.loaded.try_read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_loads_validates_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "alpha.yml", "alpha");
        let registry = PluginRegistry::discover(&config_for(dir.path())).unwrap();

        let first = registry.get("alpha").await.unwrap();
        let second = registry.get("alpha").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            registry.get("missing").await,
            Err(PluginError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_names_fail_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "one.yml", "same-name");
        write_definition(dir.path(), "two.yml", "same-name");
        assert!(matches!(
            PluginRegistry::discover(&config_for(dir.path())),
            Err(PluginError::DuplicateName { .. })
        ));
    }

    #[tokio::test]
    async fn disabled_override_removes_plugin() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "alpha.yml", "alpha");
        let mut config = config_for(dir.path());
        config.overrides.insert(
            "alpha".to_string(),
            PluginOverride {
                enabled: Some(false),
                ..Default::default()
            },
        );
        let registry = PluginRegistry::discover(&config).unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn overrides_shape_the_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "alpha.yml", "alpha");
        let mut config = config_for(dir.path());
        config.overrides.insert(
            "alpha".to_string(),
            PluginOverride {
                enabled: None,
                timeout: Some(std::time::Duration::from_secs(7)),
                max_concurrent: Some(2),
                max_results: Some(10),
            },
        );
        let registry = PluginRegistry::discover(&config).unwrap();
        let descriptor = registry.descriptor("alpha").unwrap();
        assert_eq!(descriptor.timeout, Some(std::time::Duration::from_secs(7)));
        assert_eq!(descriptor.max_concurrent, Some(2));
        assert_eq!(descriptor.max_results, Some(10));
    }

    #[tokio::test]
    async fn nested_directories_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("de")).unwrap();
        write_definition(&dir.path().join("de"), "alpha.yml", "alpha");
        let registry = PluginRegistry::discover(&config_for(dir.path())).unwrap();
        assert!(registry.contains("alpha"));
    }
}

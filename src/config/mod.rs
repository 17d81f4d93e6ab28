//! Layered configuration
//!
//! Precedence is CLI > environment > YAML file > built-in defaults.
//! Figment provides the merge; CLI overrides are applied afterwards in
//! `main`. Every recognized section rejects unknown keys, and
//! [`Config::validate`] checks numeric ranges with field-path errors so a
//! typo fails startup instead of silently running with defaults.

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub kv: KvConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub probers: ProberConfig,
    #[serde(default)]
    pub resolve: ResolveConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Environment mode: controls how upstream failures surface on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentMode {
    #[default]
    Prod,
    Dev,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used in feed links and proxy URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub environment: EnvironmentMode,
    #[serde(default = "default_request_logging")]
    pub enable_request_logging: bool,
    #[serde(with = "duration", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            environment: EnvironmentMode::default(),
            enable_request_logging: default_request_logging(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// KV backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvBackendKind {
    /// Embedded single-process SQLite store
    #[default]
    Local,
    /// Networked KV shared across processes
    Remote,
    /// Volatile store, test and throwaway deployments only
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KvConfig {
    #[serde(default)]
    pub backend: KvBackendKind,
    /// SQLite database path for the local backend
    #[serde(default = "default_kv_path")]
    pub path: PathBuf,
    /// Base URL of the remote KV service (remote backend only)
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(with = "duration", default = "default_result_cache_ttl")]
    pub result_cache_ttl: Duration,
    #[serde(with = "duration", default = "default_job_ttl")]
    pub job_ttl: Duration,
    #[serde(with = "duration", default = "default_score_ttl")]
    pub score_ttl: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackendKind::default(),
            path: default_kv_path(),
            remote_url: None,
            result_cache_ttl: default_result_cache_ttl(),
            job_ttl: default_job_ttl(),
            score_ttl: default_score_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(with = "duration", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "duration", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Starting per-domain rate; adapted by AIMD feedback at runtime
    #[serde(default = "default_initial_rps")]
    pub initial_rps: f64,
    #[serde(default = "default_min_rps")]
    pub min_rps: f64,
    #[serde(default = "default_max_rps")]
    pub max_rps: f64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(with = "duration", default = "default_retry_base_backoff")]
    pub retry_base_backoff: Duration,
    #[serde(with = "duration", default = "default_retry_max_backoff")]
    pub retry_max_backoff: Duration,
    #[serde(with = "duration", default = "default_idle_bucket_ttl")]
    pub idle_bucket_ttl: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            initial_rps: default_initial_rps(),
            min_rps: default_min_rps(),
            max_rps: default_max_rps(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_backoff: default_retry_base_backoff(),
            retry_max_backoff: default_retry_max_backoff(),
            idle_bucket_ttl: default_idle_bucket_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// 0 = autotune from detected CPU count (≈ CPU×3, capped at 30)
    #[serde(default = "default_pool_slots")]
    pub fast_http_slots: usize,
    /// 0 = autotune from CPU and memory (≈ min(CPU, RAM_GB/0.15), capped at 10)
    #[serde(default = "default_pool_slots")]
    pub headless_slots: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            fast_http_slots: default_pool_slots(),
            headless_slots: default_pool_slots(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(with = "duration", default = "default_cooldown")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

/// Per-plugin override applied once at registry build time
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PluginOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(with = "duration_serde::option_duration", default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginsConfig {
    /// Directory tree scanned for plugin definition files (*.yml)
    #[serde(default = "default_definitions_dir")]
    pub definitions_dir: PathBuf,
    #[serde(default)]
    pub overrides: HashMap<String, PluginOverride>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            definitions_dir: default_definitions_dir(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringConfig {
    #[serde(default = "default_scoring_enabled")]
    pub enabled: bool,
    #[serde(with = "duration", default = "default_health_half_life")]
    pub health_half_life: Duration,
    #[serde(with = "duration", default = "default_search_half_life")]
    pub search_half_life: Duration,
    #[serde(default = "default_weight_health")]
    pub weight_health: f64,
    #[serde(default = "default_weight_search")]
    pub weight_search: f64,
    #[serde(with = "duration", default = "default_confidence_tau")]
    pub confidence_tau: Duration,
    /// Snapshots below this confidence are treated as cold
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Scored selection requires this fraction of candidates to have snapshots
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
    #[serde(default = "default_max_plugins_scored")]
    pub max_plugins_scored: usize,
    #[serde(default = "default_exploration_probability")]
    pub exploration_probability: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_scoring_enabled(),
            health_half_life: default_health_half_life(),
            search_half_life: default_search_half_life(),
            weight_health: default_weight_health(),
            weight_search: default_weight_search(),
            confidence_tau: default_confidence_tau(),
            min_confidence: default_min_confidence(),
            min_coverage: default_min_coverage(),
            max_plugins_scored: default_max_plugins_scored(),
            exploration_probability: default_exploration_probability(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProberConfig {
    #[serde(default = "default_probers_enabled")]
    pub enabled: bool,
    #[serde(with = "duration", default = "default_tick_interval")]
    pub tick_interval: Duration,
    #[serde(with = "duration", default = "default_health_interval")]
    pub health_interval: Duration,
    #[serde(default = "default_search_runs_per_week")]
    pub search_runs_per_week: u32,
    #[serde(default = "default_health_concurrency")]
    pub health_concurrency: usize,
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
    #[serde(with = "duration", default = "default_health_probe_timeout")]
    pub health_probe_timeout: Duration,
    #[serde(with = "duration", default = "default_search_probe_timeout")]
    pub search_probe_timeout: Duration,
    /// Remote query pool (JSON array of strings); bundled list used as fallback
    #[serde(default)]
    pub query_pool_url: Option<String>,
    #[serde(with = "duration", default = "default_query_pool_ttl")]
    pub query_pool_ttl: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            enabled: default_probers_enabled(),
            tick_interval: default_tick_interval(),
            health_interval: default_health_interval(),
            search_runs_per_week: default_search_runs_per_week(),
            health_concurrency: default_health_concurrency(),
            search_concurrency: default_search_concurrency(),
            health_probe_timeout: default_health_probe_timeout(),
            search_probe_timeout: default_search_probe_timeout(),
            query_pool_url: None,
            query_pool_ttl: default_query_pool_ttl(),
        }
    }
}

/// Declarative per-hoster parameters for the generic XFS resolver family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XfsHosterConfig {
    pub name: String,
    pub domains: Vec<String>,
    /// Regexes with one capture group extracting the file id from a URL
    #[serde(default)]
    pub file_id_patterns: Vec<String>,
    /// Embed URL template; `{id}` is replaced with the file id
    #[serde(default)]
    pub embed_url: Option<String>,
    /// Page markers that mean the file is gone
    #[serde(default)]
    pub offline_markers: Vec<String>,
    /// Page markers that mean a captcha wall
    #[serde(default)]
    pub captcha_markers: Vec<String>,
    /// Whether extracted URLs point at playable video (vs. archives)
    #[serde(default = "default_is_video")]
    pub is_video: bool,
    /// Ranking bonus for this hoster (1–5)
    #[serde(default = "default_hoster_bonus")]
    pub bonus: i64,
}

fn default_is_video() -> bool {
    true
}

fn default_hoster_bonus() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveConfig {
    #[serde(with = "duration", default = "default_resolve_cache_ttl")]
    pub cache_ttl: Duration,
    #[serde(with = "duration", default = "default_resolve_sweep_interval")]
    pub sweep_interval: Duration,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    /// HEAD unmatched URLs to detect already-direct video links
    #[serde(default = "default_content_type_probe")]
    pub content_type_probe: bool,
    #[serde(default)]
    pub hosters: Vec<XfsHosterConfig>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            cache_ttl: default_resolve_cache_ttl(),
            sweep_interval: default_resolve_sweep_interval(),
            max_redirects: default_max_redirects(),
            content_type_probe: default_content_type_probe(),
            hosters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    #[serde(with = "duration", default = "default_validate_timeout")]
    pub validate_timeout: Duration,
    /// 0 = autotune (fast slot count)
    #[serde(default = "default_validate_concurrency")]
    pub validate_concurrency: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(with = "duration", default = "default_indexer_cache_ttl")]
    pub cache_ttl: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            validate_timeout: default_validate_timeout(),
            validate_concurrency: default_validate_concurrency(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            cache_ttl: default_indexer_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    #[serde(with = "duration", default = "default_stream_deadline")]
    pub request_deadline: Duration,
    #[serde(with = "duration", default = "default_plugin_timeout")]
    pub plugin_timeout: Duration,
    #[serde(default = "default_min_title_score")]
    pub min_title_score: f64,
    #[serde(default = "default_quality_multiplier")]
    pub quality_multiplier: f64,
    /// Candidates handed to the resolver stage
    #[serde(default = "default_max_probe_count")]
    pub max_probe_count: usize,
    /// Early-stop once this many candidates produced a direct video URL
    #[serde(default = "default_resolve_target_count")]
    pub resolve_target_count: usize,
    #[serde(default = "default_resolve_concurrency")]
    pub resolve_concurrency: usize,
    /// Language rank scores keyed as `<lang>-dub` / `<lang>-sub` / `unknown`
    #[serde(default = "default_language_scores")]
    pub language_scores: HashMap<String, i64>,
    #[serde(with = "duration", default = "default_title_cache_ttl")]
    pub title_cache_ttl: Duration,
    /// TMDB API key for the title resolver; IMDb suggestions used without one
    #[serde(default)]
    pub tmdb_api_key: Option<String>,
}

pub fn default_language_scores() -> HashMap<String, i64> {
    HashMap::from([
        ("de-dub".to_string(), 1000),
        ("de-sub".to_string(), 500),
        ("en-sub".to_string(), 200),
        ("en-dub".to_string(), 150),
        ("unknown".to_string(), 100),
    ])
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            request_deadline: default_stream_deadline(),
            plugin_timeout: default_plugin_timeout(),
            min_title_score: default_min_title_score(),
            quality_multiplier: default_quality_multiplier(),
            max_probe_count: default_max_probe_count(),
            resolve_target_count: default_resolve_target_count(),
            resolve_concurrency: default_resolve_concurrency(),
            language_scores: default_language_scores(),
            title_cache_ttl: default_title_cache_ttl(),
            tmdb_api_key: None,
        }
    }
}

impl Config {
    /// Load configuration with precedence ENV > YAML > defaults.
    /// CLI overrides are applied by the caller after extraction.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if path.exists() {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("TRAWLARR_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks with field-path messages. Strict by design: a bad
    /// value fails startup instead of limping along.
    pub fn validate(&self) -> Result<()> {
        fn bail(field: &str, message: &str) -> Result<()> {
            anyhow::bail!("config: {field}: {message}")
        }

        if self.fetch.min_rps <= 0.0 {
            return bail("fetch.min_rps", "must be > 0");
        }
        if self.fetch.max_rps < self.fetch.min_rps {
            return bail("fetch.max_rps", "must be >= fetch.min_rps");
        }
        if self.fetch.initial_rps < self.fetch.min_rps
            || self.fetch.initial_rps > self.fetch.max_rps
        {
            return bail(
                "fetch.initial_rps",
                "must lie within [fetch.min_rps, fetch.max_rps]",
            );
        }
        if self.pool.fast_http_slots > 1000 {
            return bail("pool.fast_http_slots", "must be <= 1000");
        }
        if self.pool.headless_slots > 100 {
            return bail("pool.headless_slots", "must be <= 100");
        }
        if self.breaker.failure_threshold == 0 {
            return bail("breaker.failure_threshold", "must be >= 1");
        }
        for (field, value) in [
            ("scoring.weight_health", self.scoring.weight_health),
            ("scoring.weight_search", self.scoring.weight_search),
            ("scoring.min_confidence", self.scoring.min_confidence),
            ("scoring.min_coverage", self.scoring.min_coverage),
            (
                "scoring.exploration_probability",
                self.scoring.exploration_probability,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return bail(field, "must lie within [0, 1]");
            }
        }
        if self.probers.search_runs_per_week == 0 {
            return bail("probers.search_runs_per_week", "must be >= 1");
        }
        if self.indexer.max_limit < self.indexer.default_limit {
            return bail("indexer.max_limit", "must be >= indexer.default_limit");
        }
        if !(0.0..=1.0).contains(&self.stream.min_title_score) {
            return bail("stream.min_title_score", "must lie within [0, 1]");
        }
        if self.stream.resolve_target_count > self.stream.max_probe_count {
            return bail(
                "stream.resolve_target_count",
                "must be <= stream.max_probe_count",
            );
        }
        if self.kv.backend == KvBackendKind::Remote && self.kv.remote_url.is_none() {
            return bail("kv.remote_url", "required when kv.backend = remote");
        }
        for (i, hoster) in self.resolve.hosters.iter().enumerate() {
            if hoster.name.is_empty() {
                return bail(&format!("resolve.hosters[{i}].name"), "must not be empty");
            }
            if hoster.domains.is_empty() {
                return bail(
                    &format!("resolve.hosters[{i}].domains"),
                    "must list at least one domain",
                );
            }
            if !(1..=5).contains(&hoster.bonus) {
                return bail(
                    &format!("resolve.hosters[{i}].bonus"),
                    "must lie within [1, 5]",
                );
            }
        }
        Ok(())
    }

    /// Effective config as YAML with secrets masked, for `--print-config`
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut copy = self.clone();
        if copy.stream.tmdb_api_key.is_some() {
            copy.stream.tmdb_api_key = Some("********".to_string());
        }
        Ok(serde_yaml::to_string(&copy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_rps_bounds() {
        let mut config = Config::default();
        config.fetch.min_rps = 10.0;
        config.fetch.max_rps = 1.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("fetch.max_rps"), "got: {err}");
    }

    #[test]
    fn rejects_target_above_probe_count() {
        let mut config = Config::default();
        config.stream.max_probe_count = 10;
        config.stream.resolve_target_count = 20;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("stream.resolve_target_count"), "got: {err}");
    }

    #[test]
    fn remote_backend_requires_url() {
        let mut config = Config::default();
        config.kv.backend = KvBackendKind::Remote;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        let yaml = "server:\n  host: 127.0.0.1\n  bogus_key: 1\n";
        let result: Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn redacted_dump_masks_api_key() {
        let mut config = Config::default();
        config.stream.tmdb_api_key = Some("super-secret".to_string());
        let dump = config.to_redacted_yaml().unwrap();
        assert!(!dump.contains("super-secret"));
        assert!(dump.contains("********"));
    }
}

//! Default values for configuration sections
//!
//! Kept in one place so the serde `default = "..."` attributes and the
//! `Default` impls stay consistent.

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9117;

// server
pub fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

pub fn default_port() -> u16 {
    DEFAULT_PORT
}

pub fn default_base_url() -> String {
    format!("http://localhost:{DEFAULT_PORT}")
}

pub fn default_request_logging() -> bool {
    false
}

pub fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

// kv
pub fn default_kv_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./data/trawlarr.db")
}

pub fn default_result_cache_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

pub fn default_job_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

pub fn default_score_ttl() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

// fetch
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

pub fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

pub fn default_initial_rps() -> f64 {
    10.0
}

pub fn default_min_rps() -> f64 {
    0.5
}

pub fn default_max_rps() -> f64 {
    50.0
}

pub fn default_retry_max_attempts() -> u32 {
    2
}

pub fn default_retry_base_backoff() -> Duration {
    Duration::from_millis(500)
}

pub fn default_retry_max_backoff() -> Duration {
    Duration::from_secs(10)
}

pub fn default_idle_bucket_ttl() -> Duration {
    Duration::from_secs(10 * 60)
}

// pool: 0 means autotuned from detected resources
pub fn default_pool_slots() -> usize {
    0
}

// breaker
pub fn default_failure_threshold() -> u32 {
    5
}

pub fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

// plugins
pub fn default_definitions_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./plugins")
}

// scoring
pub fn default_scoring_enabled() -> bool {
    true
}

pub fn default_health_half_life() -> Duration {
    Duration::from_secs(2 * 24 * 60 * 60)
}

pub fn default_search_half_life() -> Duration {
    Duration::from_secs(14 * 24 * 60 * 60)
}

pub fn default_weight_health() -> f64 {
    0.4
}

pub fn default_weight_search() -> f64 {
    0.6
}

pub fn default_confidence_tau() -> Duration {
    Duration::from_secs(28 * 24 * 60 * 60)
}

pub fn default_min_confidence() -> f64 {
    0.1
}

pub fn default_min_coverage() -> f64 {
    0.5
}

pub fn default_max_plugins_scored() -> usize {
    8
}

pub fn default_exploration_probability() -> f64 {
    0.15
}

// probers
pub fn default_probers_enabled() -> bool {
    true
}

pub fn default_tick_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

pub fn default_health_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

pub fn default_search_runs_per_week() -> u32 {
    2
}

pub fn default_health_concurrency() -> usize {
    5
}

pub fn default_search_concurrency() -> usize {
    3
}

pub fn default_health_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

pub fn default_search_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

pub fn default_query_pool_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

// resolve
pub fn default_resolve_cache_ttl() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

pub fn default_resolve_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

pub fn default_max_redirects() -> u32 {
    3
}

pub fn default_content_type_probe() -> bool {
    true
}

// indexer
pub fn default_validate_timeout() -> Duration {
    Duration::from_secs(3)
}

pub fn default_validate_concurrency() -> usize {
    0
}

pub fn default_limit() -> usize {
    100
}

pub fn default_max_limit() -> usize {
    200
}

pub fn default_indexer_cache_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

// stream
pub fn default_stream_deadline() -> Duration {
    Duration::from_secs(30)
}

pub fn default_plugin_timeout() -> Duration {
    Duration::from_secs(15)
}

pub fn default_min_title_score() -> f64 {
    0.7
}

pub fn default_quality_multiplier() -> f64 {
    1.0
}

pub fn default_max_probe_count() -> usize {
    30
}

pub fn default_resolve_target_count() -> usize {
    15
}

pub fn default_resolve_concurrency() -> usize {
    8
}

pub fn default_title_cache_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

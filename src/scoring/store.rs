//! Score snapshot persistence
//!
//! Snapshots are keyed `score:{plugin}:{category}:{bucket}` in the KV
//! store with a 30-day TTL; an index blob lists all live snapshot keys so
//! the stats endpoint does not depend on backend `scan` support. Last-run
//! timestamps for the probers live under `lastrun:`.
//!
//! A missing snapshot is "cold": zero confidence, which halves its final
//! score and keeps unknown plugins out of scored selection until probes
//! accumulate.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::ScoringConfig;
use crate::errors::KvError;
use crate::kv::{KvStore, KvStoreExt};
use crate::models::{AgeBucket, Category};

use super::ewma::{
    self, EwmaState, HealthProbe, SearchProbe, final_score, health_observation, search_observation,
};

const INDEX_KEY: &str = "score:index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreKey {
    pub category: Category,
    pub bucket: AgeBucket,
}

/// Persisted per-(plugin, category, bucket) scoring state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub plugin: String,
    pub category: Category,
    pub bucket: AgeBucket,
    pub health: EwmaState,
    pub search: EwmaState,
    /// Derived values as of the last update
    pub final_score: f64,
    pub confidence: f64,
}

impl ScoreSnapshot {
    fn cold(plugin: &str, key: ScoreKey, now: i64) -> Self {
        Self {
            plugin: plugin.to_string(),
            category: key.category,
            bucket: key.bucket,
            health: EwmaState::cold(now),
            search: EwmaState::cold(now),
            final_score: 0.0,
            confidence: 0.0,
        }
    }

    fn age_secs(&self, now: i64) -> f64 {
        (now - self.health.last_ts.max(self.search.last_ts)).max(0) as f64
    }

    /// Recompute confidence and final score for the given instant
    pub fn evaluate(&self, config: &ScoringConfig, now: i64) -> (f64, f64) {
        let samples = self.health.samples.saturating_add(self.search.samples);
        let confidence = ewma::confidence(
            samples,
            self.age_secs(now),
            config.confidence_tau.as_secs_f64(),
        );
        let score = final_score(
            self.health.value,
            self.search.value,
            confidence,
            config.weight_health,
            config.weight_search,
        );
        (score, confidence)
    }
}

/// Which prober produced a last-run stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Health,
    Search,
}

impl ProbeKind {
    fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Health => "health",
            ProbeKind::Search => "search",
        }
    }
}

pub struct ScoreStore {
    kv: Arc<dyn KvStore>,
    config: ScoringConfig,
    ttl: std::time::Duration,
}

fn snapshot_key(plugin: &str, key: ScoreKey) -> String {
    format!("score:{}:{}:{}", plugin, key.category, key.bucket)
}

impl ScoreStore {
    pub fn new(kv: Arc<dyn KvStore>, config: ScoringConfig, ttl: std::time::Duration) -> Self {
        Self { kv, config, ttl }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub async fn load(&self, plugin: &str, key: ScoreKey) -> Option<ScoreSnapshot> {
        match self.kv.get_json(&snapshot_key(plugin, key)).await {
            Ok(snapshot) => Some(snapshot),
            Err(KvError::NotFound) => None,
            Err(e) => {
                debug!("score load failed for {plugin}: {e}");
                None
            }
        }
    }

    /// Fold a health probe into every (category, bucket) snapshot of the
    /// plugin — site health is a per-plugin property.
    pub async fn apply_health(&self, plugin: &str, probe: &HealthProbe, now: i64) {
        let observation = health_observation(probe);
        for category in Category::all() {
            for bucket in AgeBucket::all() {
                let key = ScoreKey { category, bucket };
                let mut snapshot = self
                    .load(plugin, key)
                    .await
                    .unwrap_or_else(|| ScoreSnapshot::cold(plugin, key, now));
                snapshot.health = ewma::update(
                    snapshot.health,
                    observation,
                    now,
                    self.config.health_half_life.as_secs_f64(),
                );
                self.persist(plugin, key, snapshot, now).await;
            }
        }
    }

    /// Fold a mini-search probe into one snapshot.
    pub async fn apply_search(
        &self,
        plugin: &str,
        key: ScoreKey,
        probe: &SearchProbe,
        now: i64,
    ) {
        let observation = search_observation(probe);
        let mut snapshot = self
            .load(plugin, key)
            .await
            .unwrap_or_else(|| ScoreSnapshot::cold(plugin, key, now));
        snapshot.search = ewma::update(
            snapshot.search,
            observation,
            now,
            self.config.search_half_life.as_secs_f64(),
        );
        self.persist(plugin, key, snapshot, now).await;
    }

    async fn persist(&self, plugin: &str, key: ScoreKey, mut snapshot: ScoreSnapshot, now: i64) {
        let (score, confidence) = snapshot.evaluate(&self.config, now);
        snapshot.final_score = score;
        snapshot.confidence = confidence;
        let storage_key = snapshot_key(plugin, key);
        self.kv
            .put_json_best_effort(&storage_key, &snapshot, self.ttl)
            .await;
        self.index_add(&storage_key).await;
    }

    async fn index_add(&self, storage_key: &str) {
        let mut index: Vec<String> = self.kv.get_json(INDEX_KEY).await.unwrap_or_default();
        if !index.iter().any(|k| k == storage_key) {
            index.push(storage_key.to_string());
            self.kv
                .put_json_best_effort(INDEX_KEY, &index, self.ttl)
                .await;
        }
    }

    /// All snapshots currently alive in the index
    pub async fn all_snapshots(&self) -> Vec<ScoreSnapshot> {
        let index: Vec<String> = self.kv.get_json(INDEX_KEY).await.unwrap_or_default();
        let mut snapshots = Vec::with_capacity(index.len());
        for key in index {
            if let Ok(snapshot) = self.kv.get_json::<ScoreSnapshot>(&key).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    fn lastrun_key(kind: ProbeKind, plugin: &str, key: Option<ScoreKey>) -> String {
        match key {
            Some(k) => format!("lastrun:{}:{}:{}:{}", kind.as_str(), plugin, k.category, k.bucket),
            None => format!("lastrun:{}:{}", kind.as_str(), plugin),
        }
    }

    pub async fn last_run(
        &self,
        kind: ProbeKind,
        plugin: &str,
        key: Option<ScoreKey>,
    ) -> Option<i64> {
        self.kv
            .get_json(&Self::lastrun_key(kind, plugin, key))
            .await
            .ok()
    }

    pub async fn record_run(&self, kind: ProbeKind, plugin: &str, key: Option<ScoreKey>, now: i64) {
        self.kv
            .put_json_best_effort(&Self::lastrun_key(kind, plugin, key), &now, self.ttl)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use std::time::Duration;

    fn store() -> ScoreStore {
        ScoreStore::new(
            Arc::new(MemoryKvStore::new()),
            ScoringConfig::default(),
            Duration::from_secs(30 * 24 * 3600),
        )
    }

    fn key() -> ScoreKey {
        ScoreKey {
            category: Category::Movies,
            bucket: AgeBucket::Current,
        }
    }

    #[tokio::test]
    async fn persist_and_load_preserves_ewma_fields() {
        let store = store();
        let now = 1_700_000_000i64;
        store
            .apply_search(
                "alpha",
                key(),
                &SearchProbe {
                    ok: true,
                    duration_ms: 900,
                    items_ratio: 0.8,
                    hoster_reachable_ratio: 1.0,
                    hoster_supported_ratio: 1.0,
                },
                now,
            )
            .await;

        let snapshot = store.load("alpha", key()).await.unwrap();
        assert_eq!(snapshot.search.samples, 1);
        assert_eq!(snapshot.search.last_ts, now);
        assert!(snapshot.search.value > 0.0);
        assert!((0.0..=1.0).contains(&snapshot.final_score));
        assert!((0.0..=1.0).contains(&snapshot.confidence));
    }

    #[tokio::test]
    async fn health_probe_updates_every_combination() {
        let store = store();
        let now = 1_700_000_000i64;
        store
            .apply_health(
                "alpha",
                &HealthProbe {
                    ok: true,
                    captcha: false,
                    duration_ms: 100,
                },
                now,
            )
            .await;

        for category in Category::all() {
            for bucket in AgeBucket::all() {
                let snapshot = store
                    .load("alpha", ScoreKey { category, bucket })
                    .await
                    .unwrap();
                assert_eq!(snapshot.health.samples, 1);
            }
        }
        assert_eq!(store.all_snapshots().await.len(), 6);
    }

    #[tokio::test]
    async fn missing_snapshot_is_cold() {
        let store = store();
        assert!(store.load("ghost", key()).await.is_none());
    }

    #[tokio::test]
    async fn last_run_stamps_round_trip() {
        let store = store();
        assert_eq!(store.last_run(ProbeKind::Health, "alpha", None).await, None);
        store
            .record_run(ProbeKind::Health, "alpha", None, 42)
            .await;
        assert_eq!(
            store.last_run(ProbeKind::Health, "alpha", None).await,
            Some(42)
        );
        store
            .record_run(ProbeKind::Search, "alpha", Some(key()), 99)
            .await;
        assert_eq!(
            store.last_run(ProbeKind::Search, "alpha", Some(key())).await,
            Some(99)
        );
    }
}

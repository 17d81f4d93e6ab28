//! Scored plugin selection
//!
//! When snapshot coverage over the candidate set is good enough, the
//! stream orchestrator fans out only to the top-N plugins by final score,
//! plus — with a small probability — one exploration pick from the
//! mid-field so newly healthy plugins can climb back in. With thin
//! coverage it degrades to "ask everyone".
//!
//! Determinism: the exploration RNG is seeded from a stable hash of the
//! request, so identical requests make identical picks.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::debug;

use crate::config::ScoringConfig;
use crate::scoring::{ScoreKey, ScoreStore};

/// Candidate with its evaluated score, as used for selection
#[derive(Debug, Clone)]
struct Scored {
    name: String,
    /// Registration order, the stable tie-break
    index: usize,
    score: f64,
    confidence: f64,
    has_snapshot: bool,
}

/// Pick the plugins to fan out to.
///
/// `candidates` come in registration order as `(name, registration_index)`.
pub async fn select_plugins(
    store: &Arc<ScoreStore>,
    config: &ScoringConfig,
    candidates: &[(String, usize)],
    key: ScoreKey,
    seed: u64,
) -> Vec<String> {
    if !config.enabled || candidates.len() <= config.max_plugins_scored {
        return candidates.iter().map(|(name, _)| name.clone()).collect();
    }

    let now = chrono::Utc::now().timestamp();
    let mut scored = Vec::with_capacity(candidates.len());
    for (name, index) in candidates {
        let snapshot = store.load(name, key).await;
        let (score, confidence, has_snapshot) = match &snapshot {
            Some(snapshot) => {
                let (score, confidence) = snapshot.evaluate(config, now);
                (score, confidence, true)
            }
            None => (0.0, 0.0, false),
        };
        scored.push(Scored {
            name: name.clone(),
            index: *index,
            score,
            confidence,
            has_snapshot,
        });
    }

    let covered = scored
        .iter()
        .filter(|s| s.has_snapshot && s.confidence >= config.min_confidence)
        .count();
    let coverage = covered as f64 / scored.len() as f64;
    if coverage <= config.min_coverage {
        debug!(
            "score coverage {:.0}% below threshold, falling back to all {} candidates",
            coverage * 100.0,
            scored.len()
        );
        return scored.into_iter().map(|s| s.name).collect();
    }

    // Best score first; ties keep registration order.
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });

    let top: Vec<Scored> = scored
        .iter()
        .take(config.max_plugins_scored)
        .cloned()
        .collect();
    let mut selected: Vec<String> = top.iter().map(|s| s.name.clone()).collect();

    // Exploration: sometimes add one mid-score plugin that has earned at
    // least minimal confidence, chosen uniformly.
    let mut rng = StdRng::seed_from_u64(seed);
    if rng.random::<f64>() < config.exploration_probability {
        let mid: Vec<&Scored> = scored
            .iter()
            .skip(config.max_plugins_scored)
            .filter(|s| s.confidence >= config.min_confidence)
            .collect();
        if !mid.is_empty() {
            let pick = mid[rng.random_range(0..mid.len())];
            debug!("exploration pick: '{}' (score {:.3})", pick.name, pick.score);
            selected.push(pick.name.clone());
        }
    }

    // Re-emit in registration order so downstream merge order is stable.
    let mut with_index: Vec<(usize, String)> = selected
        .into_iter()
        .map(|name| {
            let index = candidates
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, i)| *i)
                .unwrap_or(usize::MAX);
            (index, name)
        })
        .collect();
    with_index.sort();
    with_index.into_iter().map(|(_, name)| name).collect()
}

/// Stable request hash for the exploration seed
pub fn request_seed(parts: &[&str]) -> u64 {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("sha256 is long enough"))
}

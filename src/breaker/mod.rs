//! Per-plugin circuit breaker
//!
//! Finite-state machine `Closed → Open(until) → HalfOpen` with a
//! consecutive-failure threshold and a cooldown. The whole state lives in
//! one atomic word (2-bit tag plus payload), so the fast path is a load
//! and transitions are compare-exchange loops; no lock is held across any
//! await point. Transitions are monotone per timestamp: failures recorded
//! while already Open do not extend the cooldown.
//!
//! Exactly one probe is admitted per cooldown expiry: the caller whose CAS
//! flips `Open → HalfOpen` wins the probe, every other caller keeps seeing
//! the circuit as open until the probe reports back.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::BreakerConfig;

const TAG_MASK: u64 = 0b11;
const TAG_CLOSED: u64 = 0;
const TAG_OPEN: u64 = 1;
const TAG_HALF_OPEN: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of asking the breaker for permission to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Dispatch normally
    Allowed,
    /// Dispatch as the single half-open probe
    Probe,
    /// Do not dispatch; the plugin is omitted from this fan-out
    Rejected,
}

#[derive(Debug)]
pub struct PluginBreaker {
    /// Tag in the low 2 bits; payload is the consecutive-failure count
    /// (Closed) or the open-until timestamp in ms since `epoch` (Open).
    state: AtomicU64,
    epoch: Instant,
    failure_threshold: u32,
    cooldown: Duration,
}

fn closed_word(failures: u64) -> u64 {
    (failures << 2) | TAG_CLOSED
}

fn open_word(until_ms: u64) -> u64 {
    (until_ms << 2) | TAG_OPEN
}

impl PluginBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: AtomicU64::new(closed_word(0)),
            epoch: Instant::now(),
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown,
        }
    }

    fn now_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Open reads as open until a caller claims the probe slot, even
    /// past `until`; [`admit`](Self::admit) handles the flip.
    pub fn state(&self, _now: Instant) -> CircuitState {
        let word = self.state.load(Ordering::Acquire);
        match word & TAG_MASK {
            TAG_CLOSED => CircuitState::Closed,
            TAG_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    /// Ask permission to dispatch at time `now`.
    pub fn admit(&self, now: Instant) -> Admission {
        let mut word = self.state.load(Ordering::Acquire);
        loop {
            match word & TAG_MASK {
                TAG_CLOSED => return Admission::Allowed,
                TAG_HALF_OPEN => return Admission::Rejected,
                _ => {
                    let until_ms = word >> 2;
                    if self.now_ms(now) < until_ms {
                        return Admission::Rejected;
                    }
                    // Cooldown elapsed: race to become the probe.
                    match self.state.compare_exchange(
                        word,
                        TAG_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return Admission::Probe,
                        Err(actual) => word = actual,
                    }
                }
            }
        }
    }

    /// Successful call: resets the failure counter, closes a half-open
    /// circuit. Success while Open (stale in-flight call) is ignored.
    pub fn record_success(&self) {
        let mut word = self.state.load(Ordering::Acquire);
        loop {
            let next = match word & TAG_MASK {
                TAG_CLOSED | TAG_HALF_OPEN => closed_word(0),
                _ => return,
            };
            match self
                .state
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => word = actual,
            }
        }
    }

    /// Failed call (timeout, exception, captcha, empty probe). Trips the
    /// circuit after `failure_threshold` consecutive failures; a failed
    /// half-open probe re-opens immediately. Failures while Open do not
    /// reset the cooldown.
    pub fn record_failure(&self, now: Instant) {
        let mut word = self.state.load(Ordering::Acquire);
        loop {
            let next = match word & TAG_MASK {
                TAG_CLOSED => {
                    let failures = (word >> 2) + 1;
                    if failures >= self.failure_threshold as u64 {
                        open_word(self.now_ms(now) + self.cooldown.as_millis() as u64)
                    } else {
                        closed_word(failures)
                    }
                }
                TAG_HALF_OPEN => open_word(self.now_ms(now) + self.cooldown.as_millis() as u64),
                _ => return,
            };
            match self
                .state
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if next & TAG_MASK == TAG_OPEN {
                        warn!(
                            "circuit opened for {:?} (threshold {})",
                            self.cooldown, self.failure_threshold
                        );
                    }
                    return;
                }
                Err(actual) => word = actual,
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        let word = self.state.load(Ordering::Acquire);
        if word & TAG_MASK == TAG_CLOSED {
            (word >> 2) as u32
        } else {
            0
        }
    }
}

/// All plugin breakers, created lazily on first use
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<PluginBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn for_plugin(&self, name: &str) -> Arc<PluginBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("creating circuit breaker for plugin '{}'", name);
                Arc::new(PluginBreaker::new(&self.config))
            })
            .value()
            .clone()
    }

    pub fn snapshot(&self) -> HashMap<String, CircuitState> {
        let now = Instant::now();
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().state(now)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> PluginBreaker {
        PluginBreaker::new(&BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        })
    }

    #[test]
    fn trips_after_five_consecutive_failures() {
        let b = breaker();
        let now = Instant::now();
        for _ in 0..4 {
            b.record_failure(now);
            assert_eq!(b.state(now), CircuitState::Closed);
        }
        b.record_failure(now);
        assert_eq!(b.state(now), CircuitState::Open);
        assert_eq!(b.admit(now + Duration::from_secs(30)), Admission::Rejected);
    }

    #[test]
    fn success_resets_the_counter() {
        let b = breaker();
        let now = Instant::now();
        for _ in 0..4 {
            b.record_failure(now);
        }
        b.record_success();
        assert_eq!(b.consecutive_failures(), 0);
        for _ in 0..4 {
            b.record_failure(now);
        }
        assert_eq!(b.state(now), CircuitState::Closed);
    }

    #[test]
    fn single_probe_after_cooldown_then_close_on_success() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            b.record_failure(t0);
        }
        let t1 = t0 + Duration::from_secs(61);
        assert_eq!(b.admit(t1), Admission::Probe);
        // Second caller in the same window is rejected.
        assert_eq!(b.admit(t1), Admission::Rejected);
        b.record_success();
        assert_eq!(b.state(t1), CircuitState::Closed);
        assert_eq!(b.admit(t1), Admission::Allowed);
    }

    #[test]
    fn failed_probe_reopens_for_a_full_cooldown() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            b.record_failure(t0);
        }
        let t1 = t0 + Duration::from_secs(61);
        assert_eq!(b.admit(t1), Admission::Probe);
        b.record_failure(t1);
        assert_eq!(b.state(t1), CircuitState::Open);
        assert_eq!(b.admit(t1 + Duration::from_secs(59)), Admission::Rejected);
        assert_eq!(b.admit(t1 + Duration::from_secs(61)), Admission::Probe);
    }

    #[test]
    fn failures_while_open_do_not_extend_cooldown() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            b.record_failure(t0);
        }
        // Stale in-flight failures land mid-cooldown.
        b.record_failure(t0 + Duration::from_secs(30));
        b.record_failure(t0 + Duration::from_secs(45));
        assert_eq!(b.admit(t0 + Duration::from_secs(61)), Admission::Probe);
    }

    #[test]
    fn registry_hands_out_one_breaker_per_plugin() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a1 = registry.for_plugin("alpha");
        let a2 = registry.for_plugin("alpha");
        assert!(Arc::ptr_eq(&a1, &a2));
        let now = Instant::now();
        for _ in 0..5 {
            a1.record_failure(now);
        }
        assert_eq!(registry.for_plugin("beta").state(now), CircuitState::Closed);
        assert_eq!(registry.snapshot().get("alpha"), Some(&CircuitState::Open));
    }
}

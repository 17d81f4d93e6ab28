//! Per-domain token bucket with AIMD rate adaptation
//!
//! Each domain carries one bucket refilling at `current_rate` tokens per
//! second up to `capacity`. Feedback adapts the rate: success multiplies by
//! 1.1, a throttle response halves it, a timeout cuts it to 75%, all
//! clamped into `[min_rps, max_rps]`. Rate changes take effect on the next
//! refill. The mutex section is a handful of float operations; in-flight
//! requests to the same domain only serialize here, never on the wire.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::FetchConfig;

const SUCCESS_FACTOR: f64 = 1.1;
const THROTTLE_FACTOR: f64 = 0.5;
const TIMEOUT_FACTOR: f64 = 0.75;

#[derive(Debug, Clone, Copy)]
pub struct AimdLimits {
    pub initial_rps: f64,
    pub min_rps: f64,
    pub max_rps: f64,
}

impl From<&FetchConfig> for AimdLimits {
    fn from(config: &FetchConfig) -> Self {
        Self {
            initial_rps: config.initial_rps,
            min_rps: config.min_rps,
            max_rps: config.max_rps,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    rate: f64,
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// Snapshot of one bucket for the stats endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct BucketSnapshot {
    pub rate_rps: f64,
    pub tokens: f64,
    pub idle_secs: u64,
}

#[derive(Debug)]
pub struct TokenBucket {
    limits: AimdLimits,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(limits: AimdLimits) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(BucketState {
                rate: limits.initial_rps,
                // A fresh bucket starts full so the first request never waits.
                tokens: capacity_for(limits.initial_rps),
                last_refill: now,
                last_used: now,
            }),
            limits,
        }
    }

    /// Take one token, or report how long to wait for one to accrue.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().expect("bucket mutex poisoned");
        let now = Instant::now();
        refill(&mut state, now);
        state.last_used = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        let deficit = 1.0 - state.tokens;
        let wait_secs = deficit / state.rate.max(f64::EPSILON);
        Err(Duration::from_secs_f64(wait_secs))
    }

    /// 2xx/3xx response: additive-ish increase
    pub fn record_success(&self) {
        self.adjust(|rate, limits| (rate * SUCCESS_FACTOR).min(limits.max_rps));
    }

    /// 429/503 response: multiplicative decrease
    pub fn record_throttle(&self) {
        self.adjust(|rate, limits| (rate * THROTTLE_FACTOR).max(limits.min_rps));
    }

    /// Timed-out request: milder decrease
    pub fn record_timeout(&self) {
        self.adjust(|rate, limits| (rate * TIMEOUT_FACTOR).max(limits.min_rps));
    }

    fn adjust(&self, f: impl Fn(f64, &AimdLimits) -> f64) {
        let mut state = self.state.lock().expect("bucket mutex poisoned");
        state.rate = f(state.rate, &self.limits);
    }

    pub fn current_rate(&self) -> f64 {
        self.state.lock().expect("bucket mutex poisoned").rate
    }

    pub fn idle_for(&self) -> Duration {
        self.state
            .lock()
            .expect("bucket mutex poisoned")
            .last_used
            .elapsed()
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock().expect("bucket mutex poisoned");
        BucketSnapshot {
            rate_rps: state.rate,
            tokens: state.tokens,
            idle_secs: state.last_used.elapsed().as_secs(),
        }
    }
}

/// Burst capacity tracks the rate but never drops below one whole token,
/// otherwise a sub-1 RPS domain could never be acquired at all.
fn capacity_for(rate: f64) -> f64 {
    rate.max(1.0)
}

fn refill(state: &mut BucketState, now: Instant) {
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    if elapsed <= 0.0 {
        return;
    }
    let capacity = capacity_for(state.rate);
    state.tokens = (state.tokens + elapsed * state.rate).min(capacity);
    state.last_refill = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> AimdLimits {
        AimdLimits {
            initial_rps: 10.0,
            min_rps: 0.5,
            max_rps: 50.0,
        }
    }

    #[test]
    fn fresh_bucket_grants_burst_up_to_capacity() {
        let bucket = TokenBucket::new(limits());
        for _ in 0..10 {
            assert!(bucket.try_acquire().is_ok());
        }
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn success_feedback_converges_to_max() {
        let bucket = TokenBucket::new(limits());
        for _ in 0..30 {
            bucket.record_success();
        }
        assert!((bucket.current_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn throttle_halves_and_timeout_quarters() {
        let bucket = TokenBucket::new(limits());
        bucket.record_throttle();
        assert!((bucket.current_rate() - 5.0).abs() < 1e-9);
        bucket.record_throttle();
        assert!((bucket.current_rate() - 2.5).abs() < 1e-9);
        bucket.record_timeout();
        assert!((bucket.current_rate() - 1.875).abs() < 1e-9);
    }

    #[test]
    fn decrease_clamps_at_min_rate() {
        let bucket = TokenBucket::new(limits());
        for _ in 0..20 {
            bucket.record_throttle();
        }
        assert!((bucket.current_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn wait_hint_reflects_current_rate() {
        let bucket = TokenBucket::new(limits());
        while bucket.try_acquire().is_ok() {}
        let wait = bucket.try_acquire().unwrap_err();
        // 10 RPS → next token within ~100ms
        assert!(wait <= Duration::from_millis(110), "wait = {wait:?}");
    }
}

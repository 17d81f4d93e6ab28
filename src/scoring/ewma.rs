//! EWMA scoring primitives
//!
//! Pure, deterministic functions — no clocks, no I/O. Timestamps are
//! passed in as epoch seconds so probers, the live sample path and the
//! tests all agree on the arithmetic.
//!
//! The smoothing factor is derived from elapsed time and a half-life:
//! `α = 1 − 0.5^(Δt / half_life)`, so an observation half a half-life
//! away moves the value by `1 − 0.5^0.5 ≈ 0.293`.

use serde::{Deserialize, Serialize};

/// One exponentially-weighted moving average
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaState {
    /// Smoothed value in [0, 1]
    pub value: f64,
    /// Epoch seconds of the last update
    pub last_ts: i64,
    pub samples: u32,
}

impl EwmaState {
    pub fn cold(now: i64) -> Self {
        Self {
            value: 0.0,
            last_ts: now,
            samples: 0,
        }
    }
}

/// Smoothing factor for an observation `dt` seconds after the last one
pub fn alpha(dt_secs: f64, half_life_secs: f64) -> f64 {
    if half_life_secs <= 0.0 {
        return 1.0;
    }
    let dt = dt_secs.max(0.0);
    1.0 - 0.5_f64.powf(dt / half_life_secs)
}

/// Fold one observation into the state. Observations are clamped into
/// [0, 1] so updates can never widen the value bounds.
pub fn update(state: EwmaState, observation: f64, now: i64, half_life_secs: f64) -> EwmaState {
    let observation = observation.clamp(0.0, 1.0);
    let dt = (now - state.last_ts) as f64;
    let a = alpha(dt, half_life_secs);
    EwmaState {
        value: a * observation + (1.0 - a) * state.value,
        last_ts: now,
        samples: state.samples.saturating_add(1),
    }
}

/// Confidence in a snapshot: sample saturation × recency decay
///
/// `sample_sat = 1 − e^(−n/10)` approaches 1 after a couple dozen
/// samples; `recency = e^(−age/τ)` decays stale snapshots toward cold.
pub fn confidence(samples: u32, age_secs: f64, tau_secs: f64) -> f64 {
    let sample_sat = 1.0 - (-(samples as f64) / 10.0).exp();
    let recency = if tau_secs <= 0.0 {
        0.0
    } else {
        (-age_secs.max(0.0) / tau_secs).exp()
    };
    (sample_sat * recency).clamp(0.0, 1.0)
}

/// Health probe outcome, as observed by the prober
#[derive(Debug, Clone, Copy)]
pub struct HealthProbe {
    pub ok: bool,
    pub captcha: bool,
    pub duration_ms: u64,
}

/// Health observation: a captcha wall zeroes the probe; otherwise half
/// the weight is reachability, half is latency under 5 s.
pub fn health_observation(probe: &HealthProbe) -> f64 {
    if probe.captcha {
        return 0.0;
    }
    let ok = if probe.ok { 1.0 } else { 0.0 };
    let latency = (1.0 - probe.duration_ms as f64 / 5000.0).max(0.0);
    0.5 * ok + 0.5 * latency
}

/// Mini-search probe outcome
#[derive(Debug, Clone, Copy)]
pub struct SearchProbe {
    pub ok: bool,
    pub duration_ms: u64,
    /// Returned items relative to the expected count, in [0, 1]
    pub items_ratio: f64,
    /// Fraction of checked result links that answered
    pub hoster_reachable_ratio: f64,
    /// Fraction of result links on hosters the resolver registry knows
    pub hoster_supported_ratio: f64,
}

pub fn search_observation(probe: &SearchProbe) -> f64 {
    let ok = if probe.ok { 1.0 } else { 0.0 };
    let latency = 1.0 - (probe.duration_ms as f64 / 10_000.0).min(1.0);
    0.20 * ok
        + 0.15 * latency
        + 0.20 * probe.items_ratio.clamp(0.0, 1.0)
        + 0.20 * probe.hoster_reachable_ratio.clamp(0.0, 1.0)
        + 0.25 * probe.hoster_supported_ratio.clamp(0.0, 1.0)
}

/// Composite score: weighted mix, discounted down to 50% when cold
pub fn final_score(
    health: f64,
    search: f64,
    confidence: f64,
    weight_health: f64,
    weight_search: f64,
) -> f64 {
    let mixed = weight_health * health + weight_search * search;
    (mixed * (0.5 + 0.5 * confidence)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: f64 = 86_400.0;

    #[test]
    fn alpha_half_life_midpoint() {
        // One day into a two-day half-life: α = 1 − 0.5^0.5
        let a = alpha(DAY, 2.0 * DAY);
        assert!((a - 0.2928932).abs() < 1e-6);
        // At exactly one half-life the factor is one half.
        assert!((alpha(2.0 * DAY, 2.0 * DAY) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn cold_state_first_observation() {
        let t0 = 1_700_000_000i64;
        let state = EwmaState::cold(t0);
        let updated = update(state, 1.0, t0 + DAY as i64, 2.0 * DAY);
        assert!((updated.value - 0.2928932).abs() < 1e-6);
        assert_eq!(updated.samples, 1);
        assert_eq!(updated.last_ts, t0 + DAY as i64);
    }

    #[test]
    fn updates_stay_within_bounds() {
        let t0 = 0i64;
        let mut state = EwmaState::cold(t0);
        let observations = [1.5, -0.3, 0.9, 0.0, 1.0];
        for (i, obs) in observations.iter().enumerate() {
            state = update(state, *obs, t0 + ((i as i64 + 1) * DAY as i64), 2.0 * DAY);
            assert!((0.0..=1.0).contains(&state.value), "value {}", state.value);
        }
        assert_eq!(state.samples, 5);
    }

    #[test]
    fn zero_dt_leaves_value_unchanged() {
        let state = EwmaState {
            value: 0.6,
            last_ts: 100,
            samples: 3,
        };
        let updated = update(state, 1.0, 100, 2.0 * DAY);
        assert!((updated.value - 0.6).abs() < 1e-12);
        assert_eq!(updated.samples, 4);
    }

    #[test]
    fn confidence_saturates_and_decays() {
        let tau = 4.0 * 7.0 * DAY;
        // Fresh snapshot with many samples → near 1.
        assert!(confidence(50, 0.0, tau) > 0.99);
        // No samples → zero regardless of age.
        assert!(confidence(0, 0.0, tau) < 1e-12);
        // Old snapshots decay.
        let fresh = confidence(20, 0.0, tau);
        let stale = confidence(20, 8.0 * 7.0 * DAY, tau);
        assert!(stale < fresh * 0.2);
    }

    #[test]
    fn health_observation_weights() {
        let captcha = HealthProbe {
            ok: true,
            captcha: true,
            duration_ms: 10,
        };
        assert_eq!(health_observation(&captcha), 0.0);

        let fast_ok = HealthProbe {
            ok: true,
            captcha: false,
            duration_ms: 0,
        };
        assert!((health_observation(&fast_ok) - 1.0).abs() < 1e-12);

        let slow_ok = HealthProbe {
            ok: true,
            captcha: false,
            duration_ms: 5000,
        };
        assert!((health_observation(&slow_ok) - 0.5).abs() < 1e-12);

        // Latency term never goes negative, even past the 5 s budget.
        let glacial = HealthProbe {
            ok: false,
            captcha: false,
            duration_ms: 60_000,
        };
        assert_eq!(health_observation(&glacial), 0.0);
    }

    #[test]
    fn search_observation_weights() {
        let perfect = SearchProbe {
            ok: true,
            duration_ms: 0,
            items_ratio: 1.0,
            hoster_reachable_ratio: 1.0,
            hoster_supported_ratio: 1.0,
        };
        assert!((search_observation(&perfect) - 1.0).abs() < 1e-12);

        let dead = SearchProbe {
            ok: false,
            duration_ms: 20_000,
            items_ratio: 0.0,
            hoster_reachable_ratio: 0.0,
            hoster_supported_ratio: 0.0,
        };
        assert_eq!(search_observation(&dead), 0.0);
    }

    #[test]
    fn final_score_confidence_discount() {
        // Full confidence: plain weighted mix.
        assert!((final_score(1.0, 1.0, 1.0, 0.4, 0.6) - 1.0).abs() < 1e-12);
        // Cold snapshot: halved.
        assert!((final_score(1.0, 1.0, 0.0, 0.4, 0.6) - 0.5).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&final_score(0.8, 0.3, 0.7, 0.4, 0.6)));
    }
}

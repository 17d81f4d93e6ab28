//! Plugin health/search scoring
//!
//! [`ewma`] holds the pure math, [`store`] the KV-backed snapshots. The
//! prober scheduler feeds observations in; the stream orchestrator reads
//! scores out for top-N plugin selection.

pub mod ewma;
pub mod store;

pub use ewma::{EwmaState, HealthProbe, SearchProbe};
pub use store::{ProbeKind, ScoreKey, ScoreSnapshot, ScoreStore};

//! Application error types
//!
//! See [`types`] for the full hierarchy. The common import is
//! `use crate::errors::{AppError, AppResult}`.

pub mod types;

pub use types::{AppError, FetchError, KvError, PluginError, ResolveError};

/// Convenience alias used throughout the crate
pub type AppResult<T> = Result<T, AppError>;

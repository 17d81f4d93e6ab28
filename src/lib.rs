//! trawlarr — meta-search aggregator for scrape-based media indexers
//!
//! One query fans out over many scrape plugins under a hierarchical
//! concurrency budget, results are merged, ranked and deduped, and the
//! outcome is served as a Torznab RSS feed (automation clients) and a
//! Stremio addon (media players). Streaming-host embed URLs are
//! pre-resolved into direct video URLs.
//!
//! The object graph is assembled in [`app`]; everything else is a
//! library module with no global state.

pub mod app;
pub mod autotune;
pub mod breaker;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod indexer;
pub mod kv;
pub mod models;
pub mod plugins;
pub mod pool;
pub mod probers;
pub mod resolve;
pub mod scoring;
pub mod stream;
pub mod web;

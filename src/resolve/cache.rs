//! Resolution cache
//!
//! `(url → Option<ResolvedStream>)` with a TTL. Negative results are
//! cached too — a dead file stays dead for the TTL, which keeps the
//! early-stop resolver from re-fetching known-offline embeds. A periodic
//! sweep bounds memory.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::models::ResolvedStream;

pub struct ResolveCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

struct CacheEntry {
    value: Option<ResolvedStream>,
    expires_at: Instant,
}

impl ResolveCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// `None` = not cached; `Some(None)` = cached negative.
    pub fn get(&self, url: &str) -> Option<Option<ResolvedStream>> {
        let entry = self.entries.get(url)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(url);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, url: &str, value: Option<ResolvedStream>) {
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop expired entries; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! In-memory KV backend
//!
//! Volatile map used by tests and throwaway deployments. Matches the
//! lazy-expiry semantics of the durable backends.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::KvStore;
use crate::errors::KvError;

#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry count including not-yet-swept expired entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        if let Some(entry) = self.entries.get(key) {
            match entry.expires_at {
                Some(deadline) if deadline <= Instant::now() => {
                    drop(entry);
                    self.entries.remove(key);
                    Err(KvError::NotFound)
                }
                _ => Ok(entry.value.clone()),
            }
        } else {
            Err(KvError::NotFound)
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .filter(|e| e.value().expires_at.is_none_or(|d| d > now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

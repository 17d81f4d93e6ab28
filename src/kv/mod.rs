//! Pluggable KV storage
//!
//! Values are opaque bytes with a per-entry TTL; expiry is enforced lazily
//! at read time. Writes on the request path go through
//! [`put_best_effort`](KvStoreExt::put_best_effort) which logs and moves on
//! instead of failing the request.
//!
//! Backends: [`SqliteKvStore`] (embedded, single process),
//! [`RemoteKvStore`] (networked, shared across processes) and
//! [`MemoryKvStore`] (volatile).

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{KvBackendKind, KvConfig};
use crate::errors::KvError;

pub mod memory;
pub mod remote;
pub mod sqlite;

pub use memory::MemoryKvStore;
pub use remote::RemoteKvStore;
pub use sqlite::SqliteKvStore;

/// TTL value meaning "never expire"
pub const TTL_FOREVER: Duration = Duration::ZERO;

/// Binary blob store with per-entry TTL
///
/// Concurrent writes to the same key are last-writer-wins; no cross-key
/// atomicity is provided or required.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. `Err(KvError::NotFound)` covers both absent and
    /// expired entries.
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError>;

    /// Store a value. A zero `ttl` means the entry never expires.
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError>;

    /// Remove a value; removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// List keys with the given prefix (admin / index maintenance only).
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// Typed helpers layered over the byte-level trait
#[async_trait]
pub trait KvStoreExt: KvStore {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, KvError> {
        let bytes = self.get(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes, ttl).await
    }

    /// Best-effort write: failures are logged, never surfaced. The request
    /// path must not block on KV availability.
    async fn put_best_effort(&self, key: &str, value: &[u8], ttl: Duration) {
        if let Err(e) = self.put(key, value, ttl).await {
            warn!("kv write for '{}' failed: {}", key, e);
        }
    }

    async fn put_json_best_effort<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.put_best_effort(key, &bytes, ttl).await,
            Err(e) => warn!("kv encode for '{}' failed: {}", key, e),
        }
    }
}

impl<T: KvStore + ?Sized> KvStoreExt for T {}

/// Construct the configured backend
pub async fn open(config: &KvConfig) -> Result<Arc<dyn KvStore>, KvError> {
    match config.backend {
        KvBackendKind::Local => Ok(Arc::new(SqliteKvStore::open(&config.path).await?)),
        KvBackendKind::Remote => {
            let url = config.remote_url.as_deref().ok_or(KvError::Backend {
                message: "remote backend requires kv.remote_url".to_string(),
            })?;
            Ok(Arc::new(RemoteKvStore::new(url)?))
        }
        KvBackendKind::Memory => Ok(Arc::new(MemoryKvStore::new())),
    }
}

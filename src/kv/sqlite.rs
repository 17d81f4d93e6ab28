//! Embedded SQLite KV backend
//!
//! Single table of `(key, value, expires_at)` rows. Expiry is enforced at
//! read time; [`SqliteKvStore::sweep_expired`] reclaims dead rows in the
//! background so the file does not grow unbounded.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::KvStore;
use crate::errors::KvError;

const BOOTSTRAP_SQL: &str = "CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv (expires_at) WHERE expires_at IS NOT NULL;";

pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub async fn open(path: &Path) -> Result<Self, KvError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KvError::Backend {
                    message: format!("creating {}: {e}", parent.display()),
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(BOOTSTRAP_SQL).execute(&pool).await?;
        info!("KV store opened at {}", path.display());
        Ok(Self { pool })
    }

    /// Delete rows whose TTL elapsed; returns the number reclaimed.
    pub async fn sweep_expired(&self) -> Result<u64, KvError> {
        let result =
            sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_epoch())
                .execute(&self.pool)
                .await?;
        let swept = result.rows_affected();
        if swept > 0 {
            debug!("swept {} expired kv rows", swept);
        }
        Ok(swept)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        let row = sqlx::query("SELECT value, expires_at FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(KvError::NotFound);
        };

        let expires_at: Option<i64> = row.try_get("expires_at")?;
        if let Some(deadline) = expires_at
            && deadline <= now_epoch()
        {
            // Reclaim lazily; a failed delete only delays the sweep.
            let _ = sqlx::query("DELETE FROM kv WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await;
            return Err(KvError::NotFound);
        }

        Ok(row.try_get("value")?)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(now_epoch() + ttl.as_secs() as i64)
        };
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        // LIKE special characters in prefixes are escaped so scan("a_b")
        // does not match "axb".
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let rows = sqlx::query(
            "SELECT key FROM kv WHERE key LIKE ? ESCAPE '\\'
             AND (expires_at IS NULL OR expires_at > ?) ORDER BY key",
        )
        .bind(pattern)
        .bind(now_epoch())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.try_get::<String, _>("key"))
            .collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::TTL_FOREVER;

    async fn temp_store() -> (tempfile::TempDir, SqliteKvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteKvStore::open(&dir.path().join("kv.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrip_binary_value() {
        let (_dir, store) = temp_store().await;
        let blob = vec![0u8, 1, 2, 255, 254];
        store.put("bin", &blob, TTL_FOREVER).await.unwrap();
        assert_eq!(store.get("bin").await.unwrap(), blob);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let (_dir, store) = temp_store().await;
        assert!(matches!(store.get("nope").await, Err(KvError::NotFound)));
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let (_dir, store) = temp_store().await;
        store.put("k", b"first", TTL_FOREVER).await.unwrap();
        store.put("k", b"second", TTL_FOREVER).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_rows() {
        let (_dir, store) = temp_store().await;
        store.put("dead", b"x", Duration::from_secs(1)).await.unwrap();
        store.put("live", b"y", TTL_FOREVER).await.unwrap();
        // Backdate the expiry instead of sleeping.
        sqlx::query("UPDATE kv SET expires_at = ? WHERE key = 'dead'")
            .bind(now_epoch() - 10)
            .execute(&store.pool)
            .await
            .unwrap();
        assert_eq!(store.sweep_expired().await.unwrap(), 1);
        assert!(matches!(store.get("dead").await, Err(KvError::NotFound)));
        assert!(store.get("live").await.is_ok());
    }

    #[tokio::test]
    async fn scan_escapes_like_metacharacters() {
        let (_dir, store) = temp_store().await;
        store.put("a_b:1", b"1", TTL_FOREVER).await.unwrap();
        store.put("axb:1", b"2", TTL_FOREVER).await.unwrap();
        let keys = store.scan("a_b:").await.unwrap();
        assert_eq!(keys, vec!["a_b:1".to_string()]);
    }
}

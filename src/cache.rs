//! Content-addressed cache of generated summaries.
//!
//! [`SummaryCache`] maps a key derived from (target identity, summary type,
//! model) to a serialized [`Summary`]. Storage sits behind the
//! [`KeyValueStore`] trait so the medium is a configuration choice:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `memory` | [`MemoryKv`] | process-local, for tests and one-shot runs |
//! | `sqlite` | [`SqliteKv`] | `cache_entries` table in the corpus database |
//! | `files` | [`FileKv`] | one JSON file per key under `cache.dir` |
//!
//! Cache failures are never fatal: a read error is a miss and a write error
//! is logged. Error summaries are never stored.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CacheError;
use crate::models::{Summary, SummaryType};

/// Minimal string key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn backend(&self) -> &'static str;
}

#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// One file per key. Writes go to a temp file first and are renamed into
/// place, so readers never see a partial entry.
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{}.tmp", key));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, self.path_for(key)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "files"
    }
}

/// `cache_entries` table in the corpus database.
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM cache_entries WHERE cache_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(payload)
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (cache_key, payload, stored_at) VALUES (?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

/// Build the configured backend. `pool` is used by the `sqlite` backend.
pub fn open_store(config: &Config, pool: &SqlitePool) -> Result<Box<dyn KeyValueStore>> {
    match config.cache.backend.as_str() {
        "memory" => Ok(Box::new(MemoryKv::new())),
        "sqlite" => Ok(Box::new(SqliteKv::new(pool.clone()))),
        "files" => match &config.cache.dir {
            Some(dir) => Ok(Box::new(FileKv::new(dir))),
            None => bail!("cache.dir must be set when cache.backend is 'files'"),
        },
        other => bail!("Unknown cache backend: '{}'", other),
    }
}

/// Cache key: sha256 over the target identity, summary type, and model.
///
/// For threads the identity is the ordered member message ids, so the key
/// changes whenever membership grows.
pub fn cache_key(target_identity: &str, summary_type: SummaryType, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_identity.as_bytes());
    hasher.update([0u8]);
    hasher.update(summary_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SummaryCache {
    store: Box<dyn KeyValueStore>,
}

impl SummaryCache {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryKv::new()))
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Cached summary for `key`. Unreadable entries count as misses.
    pub async fn get(&self, key: &str) -> Option<Summary> {
        let payload = match self.store.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                warn!(backend = self.backend(), key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<Summary>(&payload) {
            Ok(summary) if !summary.is_error() => {
                debug!(key, "cache hit");
                Some(summary)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry; treating as miss");
                None
            }
        }
    }

    /// Store a successful summary. Error summaries are ignored.
    pub async fn put(&self, key: &str, summary: &Summary) {
        if summary.is_error() {
            return;
        }
        let payload = match serde_json::to_string(summary) {
            Ok(p) => p,
            Err(e) => {
                warn!(key, error = %e, "summary not serializable; not cached");
                return;
            }
        };
        if let Err(e) = self.store.put(key, &payload).await {
            warn!(backend = self.backend(), key, error = %e, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SummaryFields;
    use tempfile::TempDir;

    fn summary(error: Option<&str>) -> Summary {
        Summary {
            target: "t1".into(),
            summary_type: SummaryType::Thread,
            tldr: "short".into(),
            fields: SummaryFields {
                key_points: vec!["one".into()],
                ..Default::default()
            },
            model: "gemini-2.0-flash".into(),
            generated_at: "2024-10-18T00:00:00Z".into(),
            cache_key: "k".into(),
            error: error.map(str::to_string),
        }
    }

    struct BrokenKv;

    #[async_trait]
    impl KeyValueStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
        async fn put(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    #[test]
    fn test_cache_key_varies_by_each_input() {
        let base = cache_key("a@x b@x", SummaryType::Thread, "flash");
        assert_eq!(base.len(), 64);
        assert_eq!(base, cache_key("a@x b@x", SummaryType::Thread, "flash"));
        assert_ne!(base, cache_key("a@x b@x c@x", SummaryType::Thread, "flash"));
        assert_ne!(base, cache_key("a@x b@x", SummaryType::Email, "flash"));
        assert_ne!(base, cache_key("a@x b@x", SummaryType::Thread, "pro"));
    }

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let cache = SummaryCache::in_memory();
        assert!(cache.get("k").await.is_none());
        cache.put("k", &summary(None)).await;
        assert_eq!(cache.get("k").await, Some(summary(None)));
    }

    #[tokio::test]
    async fn test_error_summary_not_cached() {
        let cache = SummaryCache::in_memory();
        cache.put("k", &summary(Some("quota"))).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_file_backend() {
        let tmp = TempDir::new().unwrap();
        let cache = SummaryCache::new(Box::new(FileKv::new(tmp.path().join("cache"))));
        cache.put("abc", &summary(None)).await;
        assert!(tmp.path().join("cache/abc.json").exists());
        assert_eq!(cache.get("abc").await, Some(summary(None)));
    }

    #[tokio::test]
    async fn test_io_failure_is_a_miss() {
        let cache = SummaryCache::new(Box::new(BrokenKv));
        cache.put("k", &summary(None)).await;
        assert!(cache.get("k").await.is_none());
    }
}

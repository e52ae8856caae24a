//! TTL result cache keyed by query fingerprint.
//!
//! The cache is strictly best-effort: backend failures are logged and
//! treated as misses, never surfaced to the caller. The `remote` backend is
//! a shared SQLite database reachable by multiple processes; when it cannot
//! be opened the cache silently falls back to the in-memory backend.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;

use sift_core::config::{CacheBackendKind, CacheConfig};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

/// Storage behind [`QueryCache`].
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>>;

    fn put(&self, key: &str, value: String, ttl: Duration)
    -> BoxFuture<'_, Result<(), CacheError>>;

    fn invalidate_all(&self) -> BoxFuture<'_, Result<(), CacheError>>;
}

/// Fingerprint of a query plus the parameters that shape its result.
#[must_use]
pub fn fingerprint(query: &str, k_final: usize, max_tokens: usize) -> String {
    let input = format!("{query}\u{1f}{k_final}\u{1f}{max_tokens}");
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local backend; entries die on expiry-read or invalidation.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| CacheError::Poisoned(e.to_string()))?;
            match entries.get(&key) {
                Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
                Some(_) => {
                    entries.remove(&key);
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn put(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut entries = self
                .entries
                .write()
                .map_err(|e| CacheError::Poisoned(e.to_string()))?;
            entries.insert(
                key,
                MemoryEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn invalidate_all(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries
                .write()
                .map_err(|e| CacheError::Poisoned(e.to_string()))?
                .clear();
            Ok(())
        })
    }
}

/// Shared-file SQLite backend for cross-process caching.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect and create the cache table.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let pool = SqlitePool::connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS query_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

fn unix_now() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
    .unwrap_or(i64::MAX)
}

impl CacheBackend for SqliteBackend {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>> {
        let key = key.to_owned();
        Box::pin(async move {
            let row: Option<(String, i64)> =
                sqlx::query_as("SELECT value, expires_at FROM query_cache WHERE key = ?")
                    .bind(&key)
                    .fetch_optional(&self.pool)
                    .await?;
            match row {
                Some((value, expires_at)) if expires_at > unix_now() => Ok(Some(value)),
                Some(_) => {
                    sqlx::query("DELETE FROM query_cache WHERE key = ?")
                        .bind(&key)
                        .execute(&self.pool)
                        .await?;
                    Ok(None)
                }
                None => Ok(None),
            }
        })
    }

    fn put(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_owned();
        Box::pin(async move {
            let expires_at = unix_now().saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(0));
            sqlx::query(
                "INSERT OR REPLACE INTO query_cache (key, value, expires_at) VALUES (?, ?, ?)",
            )
            .bind(&key)
            .bind(&value)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn invalidate_all(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM query_cache").execute(&self.pool).await?;
            Ok(())
        })
    }
}

/// Pick a backend per configuration. A `remote` backend that cannot be
/// reached degrades to memory with a logged warning; callers never see the
/// failure.
pub async fn build_backend(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    match (config.backend, config.remote_url.as_deref()) {
        (CacheBackendKind::Remote, Some(url)) => match SqliteBackend::connect(url).await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                tracing::warn!("cache backend unavailable, using in-memory cache: {e}");
                Arc::new(MemoryBackend::new())
            }
        },
        _ => Arc::new(MemoryBackend::new()),
    }
}

/// TTL cache over formatted query results.
pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Lookup; backend failures count as misses.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("cache get failed: {e}");
                None
            }
        }
    }

    /// Populate; backend failures are logged and dropped.
    pub async fn put(&self, key: &str, value: String) {
        if let Err(e) = self.backend.put(key, value, self.ttl).await {
            tracing::warn!("cache put failed: {e}");
        }
    }

    /// Drop every entry, e.g. after the index changed.
    pub async fn invalidate_all(&self) {
        if let Err(e) = self.backend.invalidate_all().await {
            tracing::warn!("cache invalidation failed: {e}");
        }
    }
}

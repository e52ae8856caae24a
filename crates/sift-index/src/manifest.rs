//! Persistent path → content-hash manifest.
//!
//! The manifest is what makes change detection independent of modification
//! times: a path is only reprocessed when its content hash actually
//! changed, and diffing two snapshots yields the added/modified/deleted
//! delta between indexing runs.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::error::Result;

/// Content hash of `text`, hex-encoded.
#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Delta between a manifest snapshot and the current file set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ManifestDelta {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// SQLite-backed map of `path → content_hash`.
pub struct FileHashManifest {
    pool: SqlitePool,
}

impl FileHashManifest {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the manifest table.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL statement fails.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_manifest (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, path: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT content_hash FROM file_manifest WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(h,)| h))
    }

    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn set(&self, path: &str, hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_manifest (path, content_hash) VALUES (?, ?)
             ON CONFLICT(path) DO UPDATE SET content_hash = excluded.content_hash",
        )
        .bind(path)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn remove(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM file_manifest WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Full snapshot of the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn all(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT path, content_hash FROM file_manifest")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Diff the stored snapshot against `current` (path → content hash).
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot query fails.
    pub async fn diff(&self, current: &HashMap<String, String>) -> Result<ManifestDelta> {
        let stored = self.all().await?;
        let mut delta = ManifestDelta::default();

        for (path, hash) in current {
            match stored.get(path) {
                None => delta.added.push(path.clone()),
                Some(old) if old != hash => delta.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in stored.keys() {
            if !current.contains_key(path) {
                delta.deleted.push(path.clone());
            }
        }

        delta.added.sort();
        delta.modified.sort();
        delta.deleted.sort();
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manifest() -> FileHashManifest {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let manifest = FileHashManifest::new(pool);
        manifest.init().await.unwrap();
        manifest
    }

    #[test]
    fn content_hash_deterministic() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("x").len(), 64);
    }

    #[tokio::test]
    async fn set_get_remove() {
        let m = manifest().await;
        assert!(m.get("a.rs").await.unwrap().is_none());

        m.set("a.rs", "h1").await.unwrap();
        assert_eq!(m.get("a.rs").await.unwrap().as_deref(), Some("h1"));

        m.set("a.rs", "h2").await.unwrap();
        assert_eq!(m.get("a.rs").await.unwrap().as_deref(), Some("h2"));

        m.remove("a.rs").await.unwrap();
        assert!(m.get("a.rs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn diff_classifies_changes() {
        let m = manifest().await;
        m.set("same.rs", "s").await.unwrap();
        m.set("changed.rs", "old").await.unwrap();
        m.set("gone.rs", "g").await.unwrap();

        let current = HashMap::from([
            ("same.rs".to_owned(), "s".to_owned()),
            ("changed.rs".to_owned(), "new".to_owned()),
            ("fresh.rs".to_owned(), "f".to_owned()),
        ]);

        let delta = m.diff(&current).await.unwrap();
        assert_eq!(delta.added, vec!["fresh.rs"]);
        assert_eq!(delta.modified, vec!["changed.rs"]);
        assert_eq!(delta.deleted, vec!["gone.rs"]);
    }

    #[tokio::test]
    async fn diff_empty_both_ways() {
        let m = manifest().await;
        let delta = m.diff(&HashMap::new()).await.unwrap();
        assert_eq!(delta, ManifestDelta::default());
    }
}

//! Persistent vector storage for past review results.
//!
//! Entries are keyed by the SHA-256 fingerprint of the diff text and carry
//! the diff's embedding as a little-endian `f32` BLOB. Nearest-neighbour
//! lookup is a brute-force cosine scan in Rust, which is plenty for the few
//! thousand entries a developer's cache accumulates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use duckgate_core::{DuckgateError, EmbeddingVector, ReviewResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Best stored match for a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    /// Fingerprint of the stored entry.
    pub fingerprint: String,
    /// Review result recorded for that entry.
    pub result: ReviewResult,
    /// Cosine similarity between the query and the stored vector.
    pub similarity: f64,
}

/// Cache statistics.
///
/// # Examples
///
/// ```
/// use duckgate_cache::store::CacheStats;
///
/// let stats = CacheStats { entries: 10, hits: 7, misses: 3, size_bytes: 8192 };
/// assert!((stats.hit_rate() - 0.7).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Stored entries.
    pub entries: u64,
    /// Cumulative lookups answered from the cache.
    pub hits: u64,
    /// Cumulative lookups that fell through to review.
    pub misses: u64,
    /// Approximate database size on disk.
    pub size_bytes: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or `0.0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Storage behind the semantic cache.
pub trait VectorStore: Send + Sync {
    /// Most similar entry whose similarity is at least `threshold`.
    fn query(
        &self,
        vector: &EmbeddingVector,
        threshold: f64,
    ) -> Result<Option<StoredMatch>, DuckgateError>;

    /// Insert or replace the entry for `fingerprint`.
    ///
    /// Replacing keeps the hit count; it never creates a second row.
    fn upsert(
        &self,
        fingerprint: &str,
        vector: &EmbeddingVector,
        result: &ReviewResult,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DuckgateError>;

    /// Bump the hit count and last-access time of an entry.
    fn record_hit(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<(), DuckgateError>;

    /// Count a lookup that found nothing.
    fn record_miss(&self) -> Result<(), DuckgateError>;

    /// Delete every entry, returning how many were removed.
    fn clear(&self) -> Result<u64, DuckgateError>;

    /// Entry count plus cumulative hit/miss counters.
    fn stats(&self) -> Result<CacheStats, DuckgateError>;

    /// Persist anything still buffered.
    fn flush(&self) -> Result<(), DuckgateError> {
        Ok(())
    }
}

/// SQLite-backed [`VectorStore`].
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use duckgate_cache::store::{SqliteVectorStore, VectorStore};
/// use duckgate_core::{EmbeddingVector, ReviewResult};
///
/// let store = SqliteVectorStore::in_memory().unwrap();
/// let v = EmbeddingVector::new(vec![1.0, 0.0]);
/// store.upsert("abc", &v, &ReviewResult::passed(), Utc::now()).unwrap();
///
/// let hit = store.query(&v, 0.92).unwrap().unwrap();
/// assert_eq!(hit.fingerprint, "abc");
/// assert!(hit.result.is_passed());
/// ```
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

const DIMENSIONS_KEY: &str = "embedding_dimensions";
const HITS_KEY: &str = "hits";
const MISSES_KEY: &str = "misses";

impl SqliteVectorStore {
    /// Open or create a cache database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Database`] if the database cannot be opened
    /// or its schema created.
    pub fn open(path: &Path) -> Result<Self, DuckgateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DuckgateError::Database(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| DuckgateError::Database(format!("failed to open database: {e}")))?;
        // Parallel hook runs share one cache file.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| DuckgateError::Database(format!("failed to set busy timeout: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing and `--no-persist` runs).
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, DuckgateError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            DuckgateError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<(), DuckgateError> {
        self.conn
            .lock()
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS entries (
                    fingerprint TEXT PRIMARY KEY,
                    embedding BLOB NOT NULL,
                    result TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    hit_count INTEGER NOT NULL DEFAULT 0,
                    last_accessed TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| DuckgateError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Pin the embedding dimensions used by this cache.
    ///
    /// The first call records them; later calls must match.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Database`] if the cache was built with a
    /// different dimension count.
    pub fn set_dimensions(&self, dimensions: usize) -> Result<(), DuckgateError> {
        let conn = self.conn.lock();
        if let Some(stored) = get_metadata(&conn, DIMENSIONS_KEY)? {
            let stored_dims: usize = stored.parse().map_err(|_| {
                DuckgateError::Database(format!("corrupted dimension metadata in cache: '{stored}'"))
            })?;
            if stored_dims != dimensions {
                return Err(DuckgateError::Database(format!(
                    "cache was built with {stored_dims}-dimension embeddings but the embedder produces {dimensions}; \
                     run `duckgate cache clear` to rebuild"
                )));
            }
            return Ok(());
        }
        set_metadata(&conn, DIMENSIONS_KEY, &dimensions.to_string())
    }
}

impl VectorStore for SqliteVectorStore {
    fn query(
        &self,
        vector: &EmbeddingVector,
        threshold: f64,
    ) -> Result<Option<StoredMatch>, DuckgateError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT fingerprint, embedding FROM entries")
            .map_err(|e| DuckgateError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let fingerprint: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((fingerprint, bytes))
            })
            .map_err(|e| DuckgateError::Database(format!("failed to query entries: {e}")))?;

        let mut best: Option<(f64, String)> = None;
        for row in rows {
            let (fingerprint, bytes) =
                row.map_err(|e| DuckgateError::Database(format!("failed to read row: {e}")))?;
            let stored = EmbeddingVector::new(bytes_to_floats(&bytes));
            let similarity = vector.cosine_similarity(&stored);
            if best.as_ref().map_or(true, |(s, _)| similarity > *s) {
                best = Some((similarity, fingerprint));
            }
        }

        let Some((similarity, fingerprint)) = best else {
            return Ok(None);
        };
        if similarity < threshold {
            return Ok(None);
        }

        let raw: String = conn
            .query_row(
                "SELECT result FROM entries WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .map_err(|e| DuckgateError::Database(format!("failed to load result: {e}")))?;
        let result: ReviewResult = serde_json::from_str(&raw).map_err(|e| {
            DuckgateError::Database(format!("corrupt cached result for {fingerprint}: {e}"))
        })?;

        Ok(Some(StoredMatch {
            fingerprint,
            result,
            similarity,
        }))
    }

    fn upsert(
        &self,
        fingerprint: &str,
        vector: &EmbeddingVector,
        result: &ReviewResult,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DuckgateError> {
        let json = serde_json::to_string(result)?;
        let now = timestamp.to_rfc3339();
        self.conn
            .lock()
            .execute(
                "INSERT INTO entries (fingerprint, embedding, result, created_at, hit_count, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, 0, ?4)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    embedding = excluded.embedding,
                    result = excluded.result,
                    created_at = excluded.created_at",
                params![fingerprint, floats_to_bytes(vector.as_slice()), json, now],
            )
            .map_err(|e| DuckgateError::Database(format!("failed to store entry: {e}")))?;
        Ok(())
    }

    fn record_hit(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<(), DuckgateError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE entries SET hit_count = hit_count + 1, last_accessed = ?2 WHERE fingerprint = ?1",
            params![fingerprint, at.to_rfc3339()],
        )
        .map_err(|e| DuckgateError::Database(format!("failed to record hit: {e}")))?;
        bump_counter(&conn, HITS_KEY)
    }

    fn record_miss(&self) -> Result<(), DuckgateError> {
        bump_counter(&self.conn.lock(), MISSES_KEY)
    }

    fn clear(&self) -> Result<u64, DuckgateError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM entries", [])
            .map_err(|e| DuckgateError::Database(format!("failed to clear entries: {e}")))?;
        conn.execute(
            "DELETE FROM metadata WHERE key IN (?1, ?2, ?3)",
            params![DIMENSIONS_KEY, HITS_KEY, MISSES_KEY],
        )
        .map_err(|e| DuckgateError::Database(format!("failed to reset metadata: {e}")))?;
        Ok(removed as u64)
    }

    fn stats(&self) -> Result<CacheStats, DuckgateError> {
        let conn = self.conn.lock();
        let entries: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .map_err(|e| DuckgateError::Database(format!("failed to count entries: {e}")))?;

        let counter = |key: &str| -> Result<u64, DuckgateError> {
            Ok(get_metadata(&conn, key)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0))
        };

        // For in-memory databases, page_count returns a small number
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(CacheStats {
            entries: entries as u64,
            hits: counter(HITS_KEY)?,
            misses: counter(MISSES_KEY)?,
            size_bytes: (page_count * page_size) as u64,
        })
    }

    fn flush(&self) -> Result<(), DuckgateError> {
        self.conn
            .lock()
            .execute_batch("PRAGMA optimize;")
            .map_err(|e| DuckgateError::Database(format!("failed to flush cache: {e}")))
    }
}

fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>, DuckgateError> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| DuckgateError::Database(format!("failed to get metadata '{key}': {e}")))
}

fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<(), DuckgateError> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| DuckgateError::Database(format!("failed to set metadata '{key}': {e}")))?;
    Ok(())
}

fn bump_counter(conn: &Connection, key: &str) -> Result<(), DuckgateError> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, '1')
         ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)",
        params![key],
    )
    .map_err(|e| DuckgateError::Database(format!("failed to update '{key}': {e}")))?;
    Ok(())
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::{Category, Finding, Severity};

    fn v(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new(values.to_vec())
    }

    fn finding(message: &str) -> ReviewResult {
        ReviewResult::with_findings(vec![Finding {
            file: PathBuf::from("src/db.rs"),
            line: Some(3),
            severity: Severity::Warning,
            category: Category::Security,
            message: message.into(),
            suggestion: None,
        }])
    }

    fn hit_count(store: &SqliteVectorStore, fingerprint: &str) -> i64 {
        store
            .conn
            .lock()
            .query_row(
                "SELECT hit_count FROM entries WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn empty_store_misses() {
        let store = SqliteVectorStore::in_memory().unwrap();
        assert!(store.query(&v(&[1.0, 0.0]), 0.0).unwrap().is_none());
    }

    #[test]
    fn query_respects_threshold() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("a", &v(&[1.0, 0.0]), &finding("sql injection"), Utc::now())
            .unwrap();

        // cos = 0.6
        let needle = v(&[0.6, 0.8]);
        assert!(store.query(&needle, 0.92).unwrap().is_none());
        let hit = store.query(&needle, 0.5).unwrap().unwrap();
        assert!((hit.similarity - 0.6).abs() < 1e-6);
        assert_eq!(hit.result, finding("sql injection"));
    }

    #[test]
    fn query_returns_nearest_entry() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("far", &v(&[0.0, 1.0]), &finding("far"), Utc::now())
            .unwrap();
        store
            .upsert("near", &v(&[0.99, 0.1]), &finding("near"), Utc::now())
            .unwrap();
        let hit = store.query(&v(&[1.0, 0.0]), 0.9).unwrap().unwrap();
        assert_eq!(hit.fingerprint, "near");
    }

    #[test]
    fn upsert_replaces_without_duplicating() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("a", &v(&[1.0, 0.0]), &finding("old"), Utc::now())
            .unwrap();
        store.record_hit("a", Utc::now()).unwrap();
        store
            .upsert("a", &v(&[0.0, 1.0]), &finding("new"), Utc::now())
            .unwrap();

        assert_eq!(store.stats().unwrap().entries, 1);
        assert_eq!(hit_count(&store, "a"), 1);
        let hit = store.query(&v(&[0.0, 1.0]), 0.99).unwrap().unwrap();
        assert_eq!(hit.result, finding("new"));
        assert!(store.query(&v(&[1.0, 0.0]), 0.5).unwrap().is_none());
    }

    #[test]
    fn counters_accumulate_and_clear_resets() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("a", &v(&[1.0]), &ReviewResult::passed(), Utc::now())
            .unwrap();
        store
            .upsert("b", &v(&[-1.0]), &ReviewResult::passed(), Utc::now())
            .unwrap();
        store.record_hit("a", Utc::now()).unwrap();
        store.record_hit("a", Utc::now()).unwrap();
        store.record_miss().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(hit_count(&store, "a"), 2);

        assert_eq!(store.clear().unwrap(), 2);
        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn mismatched_dimensions_never_match() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("a", &v(&[1.0, 0.0, 0.0]), &ReviewResult::passed(), Utc::now())
            .unwrap();
        assert!(store.query(&v(&[1.0, 0.0]), 0.0).unwrap().is_none());
    }

    #[test]
    fn corrupt_result_is_an_error() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("a", &v(&[1.0, 0.0]), &ReviewResult::passed(), Utc::now())
            .unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE entries SET result = 'not json'", [])
            .unwrap();
        let err = store.query(&v(&[1.0, 0.0]), 0.5).unwrap_err();
        assert!(matches!(err, DuckgateError::Database(_)));
    }

    #[test]
    fn set_dimensions_stores_and_validates() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.set_dimensions(384).unwrap();
        store.set_dimensions(384).unwrap();
        let err = store.set_dimensions(1024).unwrap_err();
        assert!(err.to_string().contains("cache clear"));

        store.clear().unwrap();
        store.set_dimensions(1024).unwrap();
    }

    #[test]
    fn entries_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reviews.db");
        {
            let store = SqliteVectorStore::open(&path).unwrap();
            store
                .upsert("a", &v(&[0.3, 0.4]), &finding("kept"), Utc::now())
                .unwrap();
            store.flush().unwrap();
        }
        let store = SqliteVectorStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let hit = store.query(&v(&[0.3, 0.4]), 0.99).unwrap().unwrap();
        assert_eq!(hit.result, finding("kept"));
    }

    #[test]
    fn floats_bytes_roundtrip() {
        let original = vec![1.5f32, -2.25, 0.0, f32::MAX];
        assert_eq!(bytes_to_floats(&floats_to_bytes(&original)), original);
    }
}

//! Fail-open similarity cache in front of a [`VectorStore`].

use std::path::Path;

use chrono::Utc;
use duckgate_core::{CacheConfig, DuckgateError, EmbeddingVector, ReviewResult};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::store::{CacheStats, SqliteVectorStore, StoredMatch, VectorStore};

/// Cache handle opened at scan start and closed at scan end.
///
/// Store failures never abort a scan: a failed lookup is reported as a miss
/// and a failed write is logged. Both leave a diagnostic behind that the
/// caller collects with [`SemanticCache::take_diagnostics`].
///
/// # Examples
///
/// ```
/// use duckgate_cache::semantic::SemanticCache;
/// use duckgate_cache::store::SqliteVectorStore;
/// use duckgate_core::{EmbeddingVector, ReviewResult};
///
/// let cache = SemanticCache::new(Box::new(SqliteVectorStore::in_memory().unwrap()), 0.92);
/// let v = EmbeddingVector::new(vec![0.6, 0.8]);
///
/// assert!(cache.lookup(&v).is_none());
/// assert!(cache.store("fp", &v, &ReviewResult::passed()));
/// assert!(cache.lookup(&v).unwrap().result.is_passed());
/// ```
pub struct SemanticCache {
    store: Box<dyn VectorStore>,
    threshold: f64,
    diagnostics: Mutex<Vec<String>>,
}

impl std::fmt::Debug for SemanticCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticCache")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl SemanticCache {
    pub fn new(store: Box<dyn VectorStore>, threshold: f64) -> Self {
        Self {
            store,
            threshold,
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    /// Open the on-disk cache described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Config`] when no cache path can be resolved,
    /// or [`DuckgateError::Database`] when the database cannot be opened or
    /// was built with different embedding dimensions.
    pub fn open(config: &CacheConfig, threshold: f64, dimensions: usize) -> Result<Self, DuckgateError> {
        Self::open_at(&config.resolved_path()?, threshold, dimensions)
    }

    /// Open a cache database at an explicit path.
    ///
    /// # Errors
    ///
    /// Same as [`SemanticCache::open`].
    pub fn open_at(path: &Path, threshold: f64, dimensions: usize) -> Result<Self, DuckgateError> {
        let store = SqliteVectorStore::open(path)?;
        store.set_dimensions(dimensions)?;
        debug!(path = %path.display(), threshold, dimensions, "opened review cache");
        Ok(Self::new(Box::new(store), threshold))
    }

    /// Similarity threshold a stored vector must reach to count as a hit.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Stored result for the nearest vector at or above the threshold.
    ///
    /// Store errors are swallowed into a miss and a diagnostic.
    pub fn lookup(&self, vector: &EmbeddingVector) -> Option<StoredMatch> {
        match self.store.query(vector, self.threshold) {
            Ok(Some(found)) => {
                if let Err(e) = self.store.record_hit(&found.fingerprint, Utc::now()) {
                    warn!(error = %e, "failed to record cache hit");
                }
                debug!(
                    fingerprint = %found.fingerprint,
                    similarity = found.similarity,
                    "cache hit"
                );
                Some(found)
            }
            Ok(None) => {
                if let Err(e) = self.store.record_miss() {
                    warn!(error = %e, "failed to record cache miss");
                }
                None
            }
            Err(e) => {
                warn!(error = %e, "cache lookup failed, treating as miss");
                self.diagnostics
                    .lock()
                    .push(format!("cache unavailable, lookup treated as miss: {e}"));
                None
            }
        }
    }

    /// Write a reviewed result back. Returns whether the write landed.
    ///
    /// "Review unavailable" results are never cached.
    pub fn store(&self, fingerprint: &str, vector: &EmbeddingVector, result: &ReviewResult) -> bool {
        if result.is_unavailable() {
            debug!(fingerprint, "not caching unavailable result");
            return false;
        }
        match self.store.upsert(fingerprint, vector, result, Utc::now()) {
            Ok(()) => true,
            Err(e) => {
                warn!(fingerprint, error = %e, "failed to store review result");
                self.diagnostics
                    .lock()
                    .push(format!("failed to cache result for {fingerprint}: {e}"));
                false
            }
        }
    }

    /// # Errors
    ///
    /// Propagates store failures; unlike lookups, maintenance commands should
    /// report a broken cache.
    pub fn stats(&self) -> Result<CacheStats, DuckgateError> {
        self.store.stats()
    }

    /// Remove every entry and return how many were deleted.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn clear(&self) -> Result<u64, DuckgateError> {
        let removed = self.store.clear()?;
        debug!(removed, "cleared review cache");
        Ok(removed)
    }

    /// Flush the store at scan end. Failures become a diagnostic.
    pub fn close(&self) {
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "failed to flush review cache");
            self.diagnostics
                .lock()
                .push(format!("failed to flush cache: {e}"));
        }
    }

    /// Drain the diagnostics gathered since the last call.
    pub fn take_diagnostics(&self) -> Vec<String> {
        std::mem::take(&mut *self.diagnostics.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use duckgate_core::{Category, Finding, Severity};
    use std::path::PathBuf;

    struct BrokenStore;

    impl VectorStore for BrokenStore {
        fn query(&self, _: &EmbeddingVector, _: f64) -> Result<Option<StoredMatch>, DuckgateError> {
            Err(DuckgateError::Database("disk I/O error".into()))
        }

        fn upsert(
            &self,
            _: &str,
            _: &EmbeddingVector,
            _: &ReviewResult,
            _: DateTime<Utc>,
        ) -> Result<(), DuckgateError> {
            Err(DuckgateError::Database("database is locked".into()))
        }

        fn record_hit(&self, _: &str, _: DateTime<Utc>) -> Result<(), DuckgateError> {
            Ok(())
        }

        fn record_miss(&self) -> Result<(), DuckgateError> {
            Ok(())
        }

        fn clear(&self) -> Result<u64, DuckgateError> {
            Err(DuckgateError::Database("read-only".into()))
        }

        fn stats(&self) -> Result<CacheStats, DuckgateError> {
            Ok(CacheStats::default())
        }

        fn flush(&self) -> Result<(), DuckgateError> {
            Err(DuckgateError::Database("flush failed".into()))
        }
    }

    fn memory_cache(threshold: f64) -> SemanticCache {
        SemanticCache::new(Box::new(SqliteVectorStore::in_memory().unwrap()), threshold)
    }

    fn warning(message: &str) -> ReviewResult {
        ReviewResult::with_findings(vec![Finding {
            file: PathBuf::from("src/auth.rs"),
            line: Some(12),
            severity: Severity::Warning,
            category: Category::Security,
            message: message.into(),
            suggestion: Some("use a constant-time compare".into()),
        }])
    }

    // Unit vectors with a chosen cosine against [1, 0].
    fn at_cosine(c: f32) -> EmbeddingVector {
        EmbeddingVector::new(vec![c, (1.0 - c * c).sqrt()])
    }

    #[test]
    fn similar_vector_hits_and_distant_misses() {
        let cache = memory_cache(0.92);
        let a = EmbeddingVector::new(vec![1.0, 0.0]);
        assert!(cache.store("a", &a, &warning("timing attack")));

        let b = at_cosine(0.95);
        let c = at_cosine(0.40);

        let hit = cache.lookup(&b).unwrap();
        assert_eq!(hit.fingerprint, "a");
        assert_eq!(hit.result, warning("timing attack"));
        assert!(cache.lookup(&c).is_none());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(cache.take_diagnostics().is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let cache = memory_cache(0.6);
        cache.store("a", &EmbeddingVector::new(vec![1.0, 0.0]), &ReviewResult::passed());
        assert!(cache.lookup(&EmbeddingVector::new(vec![0.6, 0.8])).is_some());
    }

    #[test]
    fn restoring_replaces_in_place() {
        let cache = memory_cache(0.92);
        let v = EmbeddingVector::new(vec![0.0, 1.0]);
        cache.store("a", &v, &warning("first"));
        cache.store("a", &v, &warning("second"));

        assert_eq!(cache.stats().unwrap().entries, 1);
        assert_eq!(cache.lookup(&v).unwrap().result, warning("second"));
    }

    #[test]
    fn unavailable_results_are_not_cached() {
        let cache = memory_cache(0.92);
        let v = EmbeddingVector::new(vec![1.0]);
        assert!(!cache.store("a", &v, &ReviewResult::unavailable("timeout")));
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn broken_store_fails_open() {
        let cache = SemanticCache::new(Box::new(BrokenStore), 0.92);
        let v = EmbeddingVector::new(vec![1.0]);

        assert!(cache.lookup(&v).is_none());
        assert!(!cache.store("a", &v, &ReviewResult::passed()));
        cache.close();

        let diagnostics = cache.take_diagnostics();
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics[0].contains("treated as miss"));
        assert!(diagnostics[1].contains("database is locked"));
        assert!(cache.take_diagnostics().is_empty());
    }

    #[test]
    fn clear_propagates_errors() {
        let cache = SemanticCache::new(Box::new(BrokenStore), 0.92);
        assert!(cache.clear().is_err());
    }

    #[test]
    fn open_at_rejects_dimension_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.db");
        {
            let cache = SemanticCache::open_at(&path, 0.92, 384).unwrap();
            cache.store("a", &EmbeddingVector::new(vec![0.5; 384]), &ReviewResult::passed());
            cache.close();
        }
        assert!(SemanticCache::open_at(&path, 0.92, 384).is_ok());
        let err = SemanticCache::open_at(&path, 0.92, 1536).unwrap_err();
        assert!(matches!(err, DuckgateError::Database(_)));
    }
}

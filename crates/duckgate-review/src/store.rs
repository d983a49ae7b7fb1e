use duckgate_cache::semantic::SemanticCache;
use duckgate_core::{ReviewResult, ReviewUnit};
use tracing::{debug, info};

/// What a write-back pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteBack {
    pub written: usize,
    /// Unavailable results, which are never cached.
    pub unavailable: usize,
    /// Units whose embedding could not be computed.
    pub unembedded: usize,
    /// Writes the cache rejected.
    pub failed: usize,
}

/// Writes fresh review results back through the semantic cache.
///
/// Failures are counted and logged by the cache, never raised.
#[derive(Debug)]
pub struct ResultStore<'a> {
    cache: &'a SemanticCache,
}

impl<'a> ResultStore<'a> {
    pub fn new(cache: &'a SemanticCache) -> Self {
        Self { cache }
    }

    pub fn write_back<'u>(
        &self,
        reviewed: impl IntoIterator<Item = (&'u ReviewUnit, &'u ReviewResult)>,
    ) -> WriteBack {
        let mut summary = WriteBack::default();
        for (unit, result) in reviewed {
            if result.is_unavailable() {
                summary.unavailable += 1;
                continue;
            }
            let Some(embedding) = unit.embedding.as_ref() else {
                summary.unembedded += 1;
                continue;
            };
            if self.cache.store(&unit.fingerprint, embedding, result) {
                debug!(unit = %unit.label(), "wrote review result to cache");
                summary.written += 1;
            } else {
                summary.failed += 1;
            }
        }
        info!(
            written = summary.written,
            unavailable = summary.unavailable,
            failed = summary.failed,
            "cache write-back complete"
        );
        summary
    }
}

//! The scan pipeline: filter, embed, cache, dedup, rank, batch, review,
//! write back.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use duckgate_cache::embedding::{self, Embedder};
use duckgate_cache::semantic::SemanticCache;
use duckgate_core::{DuckgateConfig, DuckgateError, ReviewResult, ReviewUnit, UnitId};
use duckgate_difflens::filter::DiffFilter;
use duckgate_difflens::parser::{into_hunks, FileDiff};
use duckgate_difflens::risk::RiskRanker;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ReviewBackend;
use crate::batcher::Batcher;
use crate::dedup::Deduplicator;
use crate::llm::LlmBackend;
use crate::orchestrator::ReviewOrchestrator;
use crate::outcome::{ScanOutcome, ScanStats, UnitOutcome, UnitReport};
use crate::retry::RetryPolicy;
use crate::store::ResultStore;

/// Drives one scan from parsed file diffs to a [`ScanOutcome`].
///
/// The cache handle is optional: without it every unit is a miss and
/// nothing is written back.
pub struct ReviewPipeline {
    filter: DiffFilter,
    embedder: Box<dyn Embedder>,
    cache: Option<SemanticCache>,
    deduplicator: Deduplicator,
    ranker: RiskRanker,
    batcher: Batcher,
    orchestrator: ReviewOrchestrator,
    startup_diagnostics: Vec<String>,
}

impl std::fmt::Debug for ReviewPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewPipeline")
            .field("cached", &self.cache.is_some())
            .field("batcher", &self.batcher)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl ReviewPipeline {
    /// Assemble a pipeline from already-built parts.
    pub fn new(
        config: &DuckgateConfig,
        embedder: Box<dyn Embedder>,
        cache: Option<SemanticCache>,
        backends: Vec<Arc<dyn ReviewBackend>>,
    ) -> Self {
        let pipeline = &config.pipeline;
        Self {
            filter: DiffFilter::from_config(&config.filter),
            embedder,
            cache,
            deduplicator: Deduplicator::new(pipeline.dedup_threshold),
            ranker: RiskRanker,
            batcher: Batcher::new(pipeline.max_batch_tokens, pipeline.token_budget),
            orchestrator: ReviewOrchestrator::new(
                backends,
                RetryPolicy::new(&config.retry),
                pipeline.max_concurrent,
            ),
            startup_diagnostics: Vec::new(),
        }
    }

    /// Build the configured embedder, cache and backend chain.
    ///
    /// A cache that cannot be opened is reported as a diagnostic and the scan
    /// runs uncached.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Config`] for an invalid configuration, an
    /// unknown embedding provider, or a backend without credentials.
    pub fn from_config(config: &DuckgateConfig, use_cache: bool) -> Result<Self, DuckgateError> {
        config.validate()?;
        let embedder = embedding::from_config(&config.embedding)?;
        let categories = config.checks.enabled_categories();

        let backends = config
            .backends
            .iter()
            .map(|b| LlmBackend::new(b, &categories).map(|b| Arc::new(b) as Arc<dyn ReviewBackend>))
            .collect::<Result<Vec<_>, _>>()?;

        let mut diagnostics = Vec::new();
        let cache = if use_cache && config.cache.enabled {
            match SemanticCache::open(
                &config.cache,
                config.pipeline.cache_threshold,
                embedder.dimensions(),
            ) {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(error = %e, "review cache unavailable, scanning without it");
                    diagnostics.push(format!("cache unavailable, every unit treated as a miss: {e}"));
                    None
                }
            }
        } else {
            None
        };

        let mut pipeline = Self::new(config, embedder, cache, backends);
        pipeline.startup_diagnostics = diagnostics;
        Ok(pipeline)
    }

    pub fn cache(&self) -> Option<&SemanticCache> {
        self.cache.as_ref()
    }

    /// Run the full scan over `files`.
    ///
    /// # Errors
    ///
    /// Only scan-level failures surface: [`DuckgateError::AllBackendsExhausted`],
    /// [`DuckgateError::Cancelled`], and configuration errors. Nothing is
    /// written to the cache when an error is returned.
    pub async fn run(
        &self,
        files: Vec<FileDiff>,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome, DuckgateError> {
        let mut stats = ScanStats {
            files_seen: files.len(),
            ..ScanStats::default()
        };
        let mut diagnostics = self.startup_diagnostics.clone();

        let filtered = self.filter.filter(files);
        stats.files_filtered = filtered.skipped.len();
        info!(
            kept = filtered.kept.len(),
            skipped = filtered.skipped.len(),
            "filter complete"
        );

        let mut units: Vec<ReviewUnit> = into_hunks(filtered.kept)
            .into_iter()
            .enumerate()
            .map(|(i, hunk)| ReviewUnit::from_hunk(UnitId(i), hunk))
            .collect();
        for unit in &mut units {
            unit.risk = self.ranker.score(unit);
        }
        stats.units = units.len();

        let mut reports: Vec<Option<UnitReport>> = vec![None; units.len()];
        if units.is_empty() {
            return Ok(ScanOutcome {
                units: Vec::new(),
                filtered: filtered.skipped,
                stats,
                diagnostics,
            });
        }

        let units = self.embed(units, &mut diagnostics).await;

        let mut misses = Vec::new();
        for unit in units {
            let hit = match (&self.cache, &unit.embedding) {
                (Some(cache), Some(embedding)) => cache.lookup(embedding),
                _ => None,
            };
            match hit {
                Some(found) => {
                    stats.cache_hits += 1;
                    reports[unit.id.0] = Some(report(
                        &unit,
                        UnitOutcome::CacheHit {
                            result: rehome(found.result, &unit.path),
                            similarity: found.similarity,
                        },
                    ));
                }
                None => misses.push(unit),
            }
        }
        stats.cache_misses = misses.len();
        info!(hits = stats.cache_hits, misses = stats.cache_misses, "cache check complete");

        let groups = self.deduplicator.group(misses);
        stats.dedup_groups = groups.len();
        let mut members: HashMap<UnitId, Vec<ReviewUnit>> = HashMap::new();
        let mut representatives = Vec::with_capacity(groups.len());
        for group in groups {
            stats.duplicates += group.members.len();
            if !group.members.is_empty() {
                members.insert(group.representative.id, group.members);
            }
            representatives.push(group.representative);
        }

        let ranked = self.ranker.rank(representatives);
        let plan = self.batcher.pack(ranked);
        stats.batches = plan.batches.len();
        stats.tokens_scheduled = plan.total_tokens();

        for skipped in &plan.skipped {
            let outcome = UnitOutcome::Skipped {
                reason: skipped.reason.clone(),
            };
            let group = members.get(&skipped.unit.id).into_iter().flatten();
            for unit in std::iter::once(&skipped.unit).chain(group) {
                reports[unit.id.0] = Some(report(unit, outcome.clone()));
            }
        }

        let output = match self.orchestrator.review(plan.batches, cancel).await {
            Ok(output) => output,
            Err(e) => {
                // Nothing is written back, but hit counters still need flushing.
                if let Some(cache) = &self.cache {
                    cache.close();
                    for note in cache.take_diagnostics() {
                        warn!(note = %note, "cache diagnostic");
                    }
                }
                return Err(e);
            }
        };
        stats.backend_requests = output.stats.requests;
        stats.retries = output.stats.retries;
        stats.rotations = output.stats.rotations;
        for backend in &output.stats.degraded {
            diagnostics.push(format!("backend {backend} degraded after repeated rate limits"));
        }
        stats.degraded_backends = output.stats.degraded;

        // Fan out, then collect (unit, result) pairs for write-back.
        let mut fresh: Vec<(ReviewUnit, ReviewResult)> = Vec::new();
        for batch in output.batches {
            for (rep, result) in batch.units.into_iter().zip(batch.results) {
                let group = members.remove(&rep.id).unwrap_or_default();
                reports[rep.id.0] = Some(report(&rep, reviewed(&result, batch.backend.clone(), None)));

                for member in group {
                    let shared = rehome(result.clone(), &member.path);
                    reports[member.id.0] = Some(report(
                        &member,
                        reviewed(&shared, batch.backend.clone(), Some(rep.id)),
                    ));
                    fresh.push((member, shared));
                }
                fresh.push((rep, result));
            }
        }

        if let Some(cache) = &self.cache {
            let summary = ResultStore::new(cache).write_back(fresh.iter().map(|(u, r)| (u, r)));
            stats.cache_writes = summary.written;
            cache.close();
            diagnostics.extend(cache.take_diagnostics());
        }

        let units = reports
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    warn!(unit = i, "unit left the pipeline without an outcome");
                    UnitReport {
                        id: UnitId(i),
                        path: Default::default(),
                        range: duckgate_core::HunkRange {
                            old_start: 0,
                            old_lines: 0,
                            new_start: 0,
                            new_lines: 0,
                        },
                        risk: 0,
                        outcome: UnitOutcome::Unavailable {
                            reason: "no outcome recorded".into(),
                        },
                    }
                })
            })
            .collect();

        debug!(?stats, "scan complete");
        Ok(ScanOutcome {
            units,
            filtered: filtered.skipped,
            stats,
            diagnostics,
        })
    }

    /// Attach embeddings; on provider failure every unit goes on unembedded
    /// (no cache lookups, no deduplication) and a diagnostic is recorded.
    async fn embed(&self, units: Vec<ReviewUnit>, diagnostics: &mut Vec<String>) -> Vec<ReviewUnit> {
        let texts: Vec<String> = units.iter().map(|u| u.diff.clone()).collect();
        match self.embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == units.len() => {
                debug!(units = units.len(), dims = self.embedder.dimensions(), "embedded units");
                units
                    .into_iter()
                    .zip(vectors)
                    .map(|(unit, vector)| unit.with_embedding(vector))
                    .collect()
            }
            Ok(vectors) => {
                warn!(expected = units.len(), got = vectors.len(), "embedder returned wrong vector count");
                diagnostics.push(format!(
                    "embedding returned {} vectors for {} units; cache and deduplication skipped",
                    vectors.len(),
                    units.len()
                ));
                units
            }
            Err(e) => {
                warn!(error = %e, "embedding failed");
                diagnostics.push(format!("embedding failed, cache and deduplication skipped: {e}"));
                units
            }
        }
    }
}

fn report(unit: &ReviewUnit, outcome: UnitOutcome) -> UnitReport {
    UnitReport {
        id: unit.id,
        path: unit.path.clone(),
        range: unit.range,
        risk: unit.risk,
        outcome,
    }
}

fn reviewed(result: &ReviewResult, backend: Option<String>, duplicate_of: Option<UnitId>) -> UnitOutcome {
    match &result.unavailable {
        Some(reason) => UnitOutcome::Unavailable {
            reason: reason.clone(),
        },
        None => UnitOutcome::Reviewed {
            result: result.clone(),
            backend,
            duplicate_of,
        },
    }
}

/// Point every finding of a borrowed result at the unit that borrows it.
fn rehome(mut result: ReviewResult, path: &Path) -> ReviewResult {
    for finding in &mut result.findings {
        finding.file = path.to_path_buf();
    }
    result
}

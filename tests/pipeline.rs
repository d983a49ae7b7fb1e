use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use duckgate_cache::embedding::Embedder;
use duckgate_cache::semantic::SemanticCache;
use duckgate_core::{
    BlockOn, Category, DuckgateConfig, DuckgateError, EmbeddingVector, Finding, ReviewResult,
    ReviewUnit, Severity,
};
use duckgate_difflens::parser::parse_unified_diff;
use duckgate_review::backend::{BackendError, ReviewBackend};
use duckgate_review::outcome::{ScanOutcome, UnitOutcome};
use duckgate_review::pipeline::ReviewPipeline;
use tokio_util::sync::CancellationToken;

/// Vectors chosen so that cos(A, B) = 0.95 and cos(A, C) = 0.40.
struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, DuckgateError> {
        Ok(texts
            .iter()
            .map(|text| {
                let v = if text.contains("alpha") {
                    vec![1.0, 0.0]
                } else if text.contains("beta") {
                    vec![0.95, 0.312_25]
                } else {
                    vec![0.4, 0.916_5]
                };
                EmbeddingVector::new(v)
            })
            .collect())
    }
}

/// Reports a critical finding on every unit that touches `unsafe`.
#[derive(Default)]
struct Reviewer {
    calls: AtomicUsize,
    units: AtomicUsize,
}

#[async_trait]
impl ReviewBackend for Reviewer {
    fn name(&self) -> &str {
        "reviewer"
    }

    async fn submit(&self, units: &[ReviewUnit]) -> Result<Vec<ReviewResult>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.units.fetch_add(units.len(), Ordering::SeqCst);
        Ok(units
            .iter()
            .map(|u| {
                if u.diff.contains("unsafe") {
                    ReviewResult::with_findings(vec![Finding {
                        file: u.path.clone(),
                        line: Some(u.range.new_start),
                        severity: Severity::Critical,
                        category: Category::Security,
                        message: "unchecked pointer dereference".into(),
                        suggestion: Some("validate the pointer first".into()),
                    }])
                } else {
                    ReviewResult::passed()
                }
            })
            .collect())
    }
}

fn hunk(path: &str, body: &str) -> String {
    format!("--- a/{path}\n+++ b/{path}\n@@ -1,1 +1,2 @@\n fn main() {{\n+{body}\n")
}

fn diff(parts: &[(&str, &str)]) -> Vec<duckgate_difflens::parser::FileDiff> {
    let text: String = parts.iter().map(|(p, b)| hunk(p, b)).collect();
    parse_unified_diff(&text).unwrap()
}

fn pipeline(cache_path: &Path, backend: Arc<Reviewer>) -> ReviewPipeline {
    let cache = SemanticCache::open_at(cache_path, 0.92, 2).unwrap();
    ReviewPipeline::new(
        &DuckgateConfig::default(),
        Box::new(FixedEmbedder),
        Some(cache),
        vec![backend as Arc<dyn ReviewBackend>],
    )
}

fn findings(outcome: &ScanOutcome) -> Vec<Finding> {
    outcome.findings().cloned().collect()
}

#[tokio::test]
async fn warm_cache_survives_reopen_and_skips_backends() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("reviews.db");
    let files = || diff(&[("src/ffi.rs", "unsafe { alpha(ptr) }")]);

    let first_backend = Arc::new(Reviewer::default());
    let first = pipeline(&db, first_backend.clone())
        .run(files(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first_backend.calls.load(Ordering::SeqCst), 1);
    assert!(first.should_block(BlockOn::Critical));

    let second_backend = Arc::new(Reviewer::default());
    let second = pipeline(&db, second_backend.clone())
        .run(files(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second_backend.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second.count_kind("cached"), 1);
    assert_eq!(findings(&first), findings(&second));
    assert!(second.should_block(BlockOn::Critical));
}

#[tokio::test]
async fn near_match_hits_and_distant_change_is_reviewed() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("reviews.db");

    let seed = Arc::new(Reviewer::default());
    pipeline(&db, seed.clone())
        .run(diff(&[("src/a.rs", "alpha();")]), &CancellationToken::new())
        .await
        .unwrap();

    let backend = Arc::new(Reviewer::default());
    let outcome = pipeline(&db, backend.clone())
        .run(
            diff(&[("src/b.rs", "beta();"), ("src/c.rs", "gamma();")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.units.len(), 2);
    match &outcome.units[0].outcome {
        UnitOutcome::CacheHit { similarity, .. } => assert!((*similarity - 0.95).abs() < 1e-3),
        other => panic!("expected cache hit for B, got {other:?}"),
    }
    assert!(matches!(
        outcome.units[1].outcome,
        UnitOutcome::Reviewed { .. }
    ));
    assert_eq!(backend.units.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_unit_gets_exactly_one_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("reviews.db");
    let backend = Arc::new(Reviewer::default());

    let files = diff(&[
        ("src/a.rs", "alpha();"),
        ("src/a2.rs", "alpha();"),
        ("src/c.rs", "gamma();"),
        ("Cargo.lock", "checksum = \"00\""),
    ]);
    let outcome = pipeline(&db, backend.clone())
        .run(files, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.filtered.len(), 1);
    assert_eq!(outcome.units.len(), 3);
    let ids: Vec<usize> = outcome.units.iter().map(|u| u.id.0).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    let total: usize = ["cached", "reviewed", "skipped", "unavailable"]
        .iter()
        .map(|k| outcome.count_kind(k))
        .sum();
    assert_eq!(total, 3);
    // The two identical "alpha" hunks share one review.
    assert_eq!(backend.units.load(Ordering::SeqCst), 2);
    assert!(!outcome.should_block(BlockOn::All));
}

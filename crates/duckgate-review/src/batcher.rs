//! Token-bounded packing of ranked units into review requests.

use duckgate_core::ReviewUnit;
use tracing::debug;

/// Skip reason recorded for units past the scan-wide token budget.
pub const BUDGET_EXCEEDED: &str = "budget exceeded";

/// Units sent to a backend in one request.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Position in submission order.
    pub index: usize,
    /// Units in rank order.
    pub units: Vec<ReviewUnit>,
    /// Sum of the units' token estimates.
    pub tokens: usize,
}

impl Batch {
    fn open(index: usize) -> Self {
        Self {
            index,
            units: Vec::new(),
            tokens: 0,
        }
    }

    fn push(&mut self, unit: ReviewUnit) {
        self.tokens += unit.token_estimate;
        self.units.push(unit);
    }
}

/// A unit the batcher declined to schedule.
#[derive(Debug, Clone)]
pub struct SkippedUnit {
    pub unit: ReviewUnit,
    pub reason: String,
}

/// Batches plus skipped units, both in rank order.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    pub skipped: Vec<SkippedUnit>,
}

impl BatchPlan {
    /// Tokens scheduled across every batch.
    pub fn total_tokens(&self) -> usize {
        self.batches.iter().map(|b| b.tokens).sum()
    }
}

/// Packs ranked units into batches under two limits.
///
/// `max_batch_tokens` bounds a single request: a unit that would overflow
/// the open batch closes it, and a unit larger than the window travels
/// alone. `token_budget` bounds the whole scan: the first unit that would
/// push consumption past it is skipped together with every unit after it.
/// A budget of `0` is unlimited.
///
/// # Examples
///
/// ```
/// use duckgate_core::{ChangeType, DiffHunk, HunkRange, ReviewUnit, UnitId};
/// use duckgate_review::batcher::Batcher;
/// use std::path::PathBuf;
///
/// // 400 chars ≈ 100 tokens each
/// let unit = |id| ReviewUnit::from_hunk(UnitId(id), DiffHunk {
///     file_path: PathBuf::from("src/lib.rs"),
///     range: HunkRange { old_start: 1, old_lines: 1, new_start: 1, new_lines: 1 },
///     content: "x".repeat(400),
///     change_type: ChangeType::Modify,
///     new_file: false,
/// });
///
/// let plan = Batcher::new(250, 300).pack((0..5).map(unit).collect());
/// assert_eq!(plan.batches.len(), 2);
/// assert_eq!(plan.batches[0].units.len(), 2);
/// assert_eq!(plan.skipped.len(), 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_batch_tokens: usize,
    token_budget: usize,
}

impl Batcher {
    pub fn new(max_batch_tokens: usize, token_budget: usize) -> Self {
        Self {
            max_batch_tokens: max_batch_tokens.max(1),
            token_budget,
        }
    }

    pub fn pack(&self, ranked: Vec<ReviewUnit>) -> BatchPlan {
        let mut plan = BatchPlan::default();
        let mut current = Batch::open(0);
        let mut consumed = 0usize;
        let mut over_budget = false;

        for unit in ranked {
            let tokens = unit.token_estimate;

            if !over_budget && self.token_budget > 0 && consumed + tokens > self.token_budget {
                debug!(
                    unit = %unit.label(),
                    tokens,
                    consumed,
                    budget = self.token_budget,
                    "token budget reached"
                );
                over_budget = true;
            }
            if over_budget {
                plan.skipped.push(SkippedUnit {
                    unit,
                    reason: BUDGET_EXCEEDED.to_string(),
                });
                continue;
            }

            if tokens > self.max_batch_tokens {
                if !current.units.is_empty() {
                    let next = current.index + 1;
                    plan.batches.push(std::mem::replace(&mut current, Batch::open(next)));
                }
                let mut solo = Batch::open(current.index);
                solo.push(unit);
                plan.batches.push(solo);
                current.index += 1;
            } else {
                if current.tokens + tokens > self.max_batch_tokens && !current.units.is_empty() {
                    let next = current.index + 1;
                    plan.batches.push(std::mem::replace(&mut current, Batch::open(next)));
                }
                current.push(unit);
            }
            consumed += tokens;
        }

        if !current.units.is_empty() {
            plan.batches.push(current);
        }

        debug!(
            batches = plan.batches.len(),
            skipped = plan.skipped.len(),
            tokens = consumed,
            "packed batches"
        );
        plan
    }
}

use duckgate_core::ReviewUnit;
use tracing::debug;

/// One representative unit and the near-identical units it stands for.
#[derive(Debug, Clone)]
pub struct DeduplicationGroup {
    /// Unit sent to the reviewer.
    pub representative: ReviewUnit,
    /// Units that inherit the representative's result, in discovery order.
    pub members: Vec<ReviewUnit>,
}

impl DeduplicationGroup {
    fn new(representative: ReviewUnit) -> Self {
        Self {
            representative,
            members: Vec::new(),
        }
    }

    /// Representative plus members.
    pub fn len(&self) -> usize {
        1 + self.members.len()
    }

    /// Always `false`: a group has at least its representative.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Greedy in-scan grouping of near-identical units.
///
/// Units are visited in the order given. Each joins the first group whose
/// representative has cosine similarity `>= threshold` with it, otherwise it
/// founds a new group. A unit with no embedding always founds its own group.
///
/// # Examples
///
/// ```
/// use duckgate_core::{ChangeType, DiffHunk, EmbeddingVector, HunkRange, ReviewUnit, UnitId};
/// use duckgate_review::dedup::Deduplicator;
/// use std::path::PathBuf;
///
/// let unit = |id, v: Vec<f32>| {
///     ReviewUnit::from_hunk(UnitId(id), DiffHunk {
///         file_path: PathBuf::from(format!("src/m{id}.rs")),
///         range: HunkRange { old_start: 1, old_lines: 1, new_start: 1, new_lines: 1 },
///         content: format!("+line {id}\n"),
///         change_type: ChangeType::Modify,
///         new_file: false,
///     })
///     .with_embedding(EmbeddingVector::new(v))
/// };
///
/// let groups = Deduplicator::new(0.95).group(vec![
///     unit(0, vec![1.0, 0.0]),
///     unit(1, vec![0.0, 1.0]),
///     unit(2, vec![1.0, 0.01]),
/// ]);
/// assert_eq!(groups.len(), 2);
/// assert_eq!(groups[0].members[0].id, UnitId(2));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn group(&self, units: Vec<ReviewUnit>) -> Vec<DeduplicationGroup> {
        let total = units.len();
        let mut groups: Vec<DeduplicationGroup> = Vec::new();

        for unit in units {
            let target = unit.embedding.as_ref().and_then(|embedding| {
                groups.iter().position(|g| {
                    g.representative
                        .embedding
                        .as_ref()
                        .is_some_and(|rep| rep.cosine_similarity(embedding) >= self.threshold)
                })
            });

            match target {
                Some(index) => groups[index].members.push(unit),
                None => groups.push(DeduplicationGroup::new(unit)),
            }
        }

        debug!(
            units = total,
            groups = groups.len(),
            threshold = self.threshold,
            "deduplicated units"
        );
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::{ChangeType, DiffHunk, EmbeddingVector, HunkRange, UnitId};
    use std::path::PathBuf;

    fn unit(id: usize, embedding: Option<Vec<f32>>) -> ReviewUnit {
        let unit = ReviewUnit::from_hunk(
            UnitId(id),
            DiffHunk {
                file_path: PathBuf::from(format!("src/file{id}.rs")),
                range: HunkRange {
                    old_start: 1,
                    old_lines: 0,
                    new_start: 1,
                    new_lines: 1,
                },
                content: format!("+value {id}\n"),
                change_type: ChangeType::Add,
                new_file: false,
            },
        );
        match embedding {
            Some(v) => unit.with_embedding(EmbeddingVector::new(v)),
            None => unit,
        }
    }

    fn ids(group: &DeduplicationGroup) -> Vec<usize> {
        std::iter::once(group.representative.id.0)
            .chain(group.members.iter().map(|m| m.id.0))
            .collect()
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(Deduplicator::new(0.95).group(Vec::new()).is_empty());
    }

    #[test]
    fn identical_vectors_collapse() {
        let groups = Deduplicator::new(0.95).group(vec![
            unit(0, Some(vec![0.6, 0.8])),
            unit(1, Some(vec![0.6, 0.8])),
            unit(2, Some(vec![0.6, 0.8])),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(ids(&groups[0]), vec![0, 1, 2]);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn threshold_is_inclusive() {
        // cos = 0.6 exactly
        let groups = Deduplicator::new(0.6).group(vec![
            unit(0, Some(vec![1.0, 0.0])),
            unit(1, Some(vec![0.6, 0.8])),
        ]);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn compares_against_representative_only() {
        // b is close to a, c is close to b but not to a
        let a = vec![1.0, 0.0];
        let b = vec![0.97, 0.243];
        let c = vec![0.88, 0.475];
        let groups = Deduplicator::new(0.95).group(vec![
            unit(0, Some(a)),
            unit(1, Some(b)),
            unit(2, Some(c)),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0]), vec![0, 1]);
        assert_eq!(ids(&groups[1]), vec![2]);
    }

    #[test]
    fn joins_first_matching_group() {
        let groups = Deduplicator::new(0.5).group(vec![
            unit(0, Some(vec![1.0, 0.0])),
            unit(1, Some(vec![0.0, 1.0])),
            unit(2, Some(vec![0.7, 0.7])),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(ids(&groups[0]), vec![0, 2]);
    }

    #[test]
    fn units_without_embeddings_stay_alone() {
        let groups = Deduplicator::new(0.0).group(vec![
            unit(0, None),
            unit(1, None),
            unit(2, Some(vec![1.0])),
            unit(3, Some(vec![1.0])),
        ]);
        let all: Vec<Vec<usize>> = groups.iter().map(ids).collect();
        assert_eq!(all, vec![vec![0], vec![1], vec![2, 3]]);
    }

    #[test]
    fn grouping_is_deterministic() {
        let input = || {
            vec![
                unit(0, Some(vec![0.1, 0.9])),
                unit(1, Some(vec![0.9, 0.1])),
                unit(2, Some(vec![0.1, 0.91])),
                unit(3, Some(vec![0.91, 0.1])),
            ]
        };
        let first: Vec<Vec<usize>> = Deduplicator::new(0.95).group(input()).iter().map(ids).collect();
        let second: Vec<Vec<usize>> = Deduplicator::new(0.95).group(input()).iter().map(ids).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![vec![0, 2], vec![1, 3]]);
    }
}

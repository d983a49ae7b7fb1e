use duckgate_core::ReviewUnit;
use tracing::debug;

/// Path fragments that mark security- or data-sensitive code.
pub const HIGH_RISK_SEGMENTS: &[&str] = &[
    "auth",
    "secret",
    "crypto",
    "password",
    "credential",
    "token",
    "admin",
    "db",
    "database",
    "migrate",
    "env",
    "config",
    "permission",
    "rbac",
    "session",
    "oauth",
    "jwt",
    "key",
    "cert",
    "ssl",
    "tls",
];

const SEGMENT_WEIGHT: u32 = 10;
const NEW_FILE_WEIGHT: u32 = 5;

/// Orders review units so the riskiest are reviewed first.
///
/// Each [`HIGH_RISK_SEGMENTS`] entry found anywhere in the lowercased path
/// adds 10; a hunk of a newly created file adds 5. Ranking is a stable sort
/// by descending score, so equal scores keep discovery order.
///
/// # Examples
///
/// ```
/// use duckgate_core::{ChangeType, DiffHunk, HunkRange, ReviewUnit, UnitId};
/// use duckgate_difflens::risk::RiskRanker;
/// use std::path::PathBuf;
///
/// let unit = |id, path: &str| {
///     ReviewUnit::from_hunk(UnitId(id), DiffHunk {
///         file_path: PathBuf::from(path),
///         range: HunkRange { old_start: 1, old_lines: 1, new_start: 1, new_lines: 1 },
///         content: "+x\n".into(),
///         change_type: ChangeType::Modify,
///         new_file: false,
///     })
/// };
///
/// let ranked = RiskRanker::default().rank(vec![unit(0, "README.md"), unit(1, "src/auth/jwt.rs")]);
/// assert_eq!(ranked[0].path, PathBuf::from("src/auth/jwt.rs"));
/// assert_eq!(ranked[0].risk, 20);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskRanker;

impl RiskRanker {
    /// Static risk score for one unit.
    pub fn score(&self, unit: &ReviewUnit) -> u32 {
        let path = unit.path.to_string_lossy().to_lowercase();
        let segments = HIGH_RISK_SEGMENTS
            .iter()
            .filter(|segment| path.contains(*segment))
            .count() as u32;
        let mut score = segments * SEGMENT_WEIGHT;
        if unit.new_file {
            score += NEW_FILE_WEIGHT;
        }
        score
    }

    /// Assign each unit its score and stable-sort descending.
    pub fn rank(&self, mut units: Vec<ReviewUnit>) -> Vec<ReviewUnit> {
        for unit in &mut units {
            unit.risk = self.score(unit);
        }
        units.sort_by(|a, b| b.risk.cmp(&a.risk));
        debug!(
            units = units.len(),
            top = units.first().map(|u| u.risk).unwrap_or(0),
            "ranked units by risk"
        );
        units
    }
}

//! Per-unit scan results and their renderings.

use std::fmt;
use std::path::PathBuf;

use duckgate_core::{BlockOn, Finding, HunkRange, ReviewResult, Severity, UnitId};
use duckgate_difflens::filter::SkippedFile;
use serde::Serialize;

/// How one eligible unit left the scan. Exactly one per unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum UnitOutcome {
    /// Answered from the semantic cache.
    #[serde(rename_all = "camelCase")]
    CacheHit {
        result: ReviewResult,
        similarity: f64,
    },
    /// Reviewed in this scan, directly or through its group representative.
    #[serde(rename_all = "camelCase")]
    Reviewed {
        result: ReviewResult,
        backend: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duplicate_of: Option<UnitId>,
    },
    /// Not sent for review.
    Skipped { reason: String },
    /// Sent for review but no verdict could be obtained.
    Unavailable { reason: String },
}

impl UnitOutcome {
    /// The review result, for outcomes that carry one.
    pub fn result(&self) -> Option<&ReviewResult> {
        match self {
            UnitOutcome::CacheHit { result, .. } | UnitOutcome::Reviewed { result, .. } => {
                Some(result)
            }
            UnitOutcome::Skipped { .. } | UnitOutcome::Unavailable { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UnitOutcome::CacheHit { .. } => "cached",
            UnitOutcome::Reviewed { .. } => "reviewed",
            UnitOutcome::Skipped { .. } => "skipped",
            UnitOutcome::Unavailable { .. } => "unavailable",
        }
    }
}

/// Outcome of one unit plus its identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub id: UnitId,
    pub path: PathBuf,
    pub range: HunkRange,
    pub risk: u32,
    pub outcome: UnitOutcome,
}

/// Counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    /// Changed files seen before filtering.
    pub files_seen: usize,
    /// Files dropped by the filter.
    pub files_filtered: usize,
    /// Eligible units (hunks of kept files).
    pub units: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Write-backs that landed in the cache.
    pub cache_writes: usize,
    /// Deduplication groups among cache misses.
    pub dedup_groups: usize,
    /// Units answered through a group representative.
    pub duplicates: usize,
    pub batches: usize,
    /// Estimated tokens sent to backends.
    pub tokens_scheduled: usize,
    pub backend_requests: usize,
    pub retries: usize,
    pub rotations: usize,
    pub degraded_backends: Vec<String>,
}

/// Everything a scan produced.
///
/// # Examples
///
/// ```
/// use duckgate_core::BlockOn;
/// use duckgate_review::outcome::ScanOutcome;
///
/// let outcome = ScanOutcome::default();
/// assert!(!outcome.should_block(BlockOn::All));
/// assert_eq!(outcome.to_string().lines().next(), Some("duckgate: 0 units, no findings"));
/// ```
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    /// One report per eligible unit, in discovery order.
    pub units: Vec<UnitReport>,
    /// Files excluded before review.
    pub filtered: Vec<SkippedFile>,
    pub stats: ScanStats,
    /// Non-fatal problems worth showing the user.
    pub diagnostics: Vec<String>,
}

impl ScanOutcome {
    /// Every finding from cached and reviewed units.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.units
            .iter()
            .filter_map(|u| u.outcome.result())
            .flat_map(|r| r.findings.iter())
    }

    /// Whether the commit should be rejected under `block_on`.
    ///
    /// Skipped and unavailable units never block.
    pub fn should_block(&self, block_on: BlockOn) -> bool {
        self.findings().any(|f| block_on.blocks(f.severity))
    }

    pub fn count_severity(&self, severity: Severity) -> usize {
        self.findings().filter(|f| f.severity == severity).count()
    }

    /// Units with the given outcome kind (`"cached"`, `"reviewed"`, ...).
    pub fn count_kind(&self, kind: &str) -> usize {
        self.units.iter().filter(|u| u.outcome.kind() == kind).count()
    }

    fn headline(&self) -> String {
        let findings = self.findings().count();
        if findings == 0 {
            format!("duckgate: {} units, no findings", self.units.len())
        } else {
            format!(
                "duckgate: {} units, {findings} findings ({} critical, {} warning, {} info)",
                self.units.len(),
                self.count_severity(Severity::Critical),
                self.count_severity(Severity::Warning),
                self.count_severity(Severity::Info),
            )
        }
    }

    /// Render as a markdown report.
    pub fn to_markdown(&self) -> String {
        let mut md = String::from("# duckgate review\n\n");
        md.push_str(&format!("{}\n\n", self.headline()));

        md.push_str("| outcome | units |\n|---|---|\n");
        for kind in ["cached", "reviewed", "skipped", "unavailable"] {
            md.push_str(&format!("| {kind} | {} |\n", self.count_kind(kind)));
        }
        md.push('\n');

        let mut findings: Vec<&Finding> = self.findings().collect();
        if !findings.is_empty() {
            findings.sort_by_key(|f| severity_order(f.severity));
            md.push_str("## Findings\n\n");
            for f in findings {
                md.push_str(&format!(
                    "- **{}** `{}{}` ({}): {}\n",
                    f.severity,
                    f.file.display(),
                    f.line.map(|l| format!(":{l}")).unwrap_or_default(),
                    f.category.label(),
                    f.message
                ));
                if let Some(s) = &f.suggestion {
                    md.push_str(&format!("  - suggestion: {s}\n"));
                }
            }
            md.push('\n');
        }

        let not_reviewed: Vec<&UnitReport> = self
            .units
            .iter()
            .filter(|u| matches!(u.outcome, UnitOutcome::Skipped { .. } | UnitOutcome::Unavailable { .. }))
            .collect();
        if !not_reviewed.is_empty() {
            md.push_str("## Not reviewed\n\n");
            for u in not_reviewed {
                let reason = match &u.outcome {
                    UnitOutcome::Skipped { reason } | UnitOutcome::Unavailable { reason } => reason,
                    _ => continue,
                };
                md.push_str(&format!(
                    "- `{} {}` {}: {reason}\n",
                    u.path.display(),
                    u.range,
                    u.outcome.kind()
                ));
            }
            md.push('\n');
        }

        if !self.filtered.is_empty() {
            md.push_str("## Filtered files\n\n");
            for f in &self.filtered {
                md.push_str(&format!("- `{}`: {}\n", f.path.display(), f.reason));
            }
            md.push('\n');
        }

        if !self.diagnostics.is_empty() {
            md.push_str("## Diagnostics\n\n");
            for d in &self.diagnostics {
                md.push_str(&format!("- {d}\n"));
            }
        }
        md
    }
}

fn severity_order(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.headline())?;
        writeln!(
            f,
            "  {} cached, {} reviewed, {} skipped, {} unavailable, {} files filtered",
            self.count_kind("cached"),
            self.count_kind("reviewed"),
            self.count_kind("skipped"),
            self.count_kind("unavailable"),
            self.filtered.len()
        )?;

        for unit in &self.units {
            match &unit.outcome {
                UnitOutcome::CacheHit { result, .. } | UnitOutcome::Reviewed { result, .. } => {
                    for finding in &result.findings {
                        let location = match finding.line {
                            Some(line) => format!("{}:{line}", finding.file.display()),
                            None => finding.file.display().to_string(),
                        };
                        writeln!(
                            f,
                            "[{}] {location} ({}) {}",
                            finding.severity.to_string().to_uppercase(),
                            finding.category,
                            finding.message
                        )?;
                        if let Some(s) = &finding.suggestion {
                            writeln!(f, "    fix: {s}")?;
                        }
                    }
                }
                UnitOutcome::Skipped { reason } => {
                    writeln!(f, "[SKIPPED] {} {}: {reason}", unit.path.display(), unit.range)?;
                }
                UnitOutcome::Unavailable { reason } => {
                    writeln!(
                        f,
                        "[UNAVAILABLE] {} {}: {reason}",
                        unit.path.display(),
                        unit.range
                    )?;
                }
            }
        }

        for d in &self.diagnostics {
            writeln!(f, "note: {d}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::Category;

    fn range() -> HunkRange {
        HunkRange {
            old_start: 1,
            old_lines: 2,
            new_start: 1,
            new_lines: 3,
        }
    }

    fn finding(severity: Severity) -> Finding {
        Finding {
            file: PathBuf::from("src/auth.rs"),
            line: Some(7),
            severity,
            category: Category::Security,
            message: format!("{severity} issue"),
            suggestion: Some("fix it".into()),
        }
    }

    fn report(id: usize, outcome: UnitOutcome) -> UnitReport {
        UnitReport {
            id: UnitId(id),
            path: PathBuf::from(format!("src/f{id}.rs")),
            range: range(),
            risk: 0,
            outcome,
        }
    }

    fn sample() -> ScanOutcome {
        ScanOutcome {
            units: vec![
                report(
                    0,
                    UnitOutcome::CacheHit {
                        result: ReviewResult::with_findings(vec![finding(Severity::Warning)]),
                        similarity: 0.97,
                    },
                ),
                report(
                    1,
                    UnitOutcome::Reviewed {
                        result: ReviewResult::with_findings(vec![finding(Severity::Info)]),
                        backend: Some("openai".into()),
                        duplicate_of: None,
                    },
                ),
                report(
                    2,
                    UnitOutcome::Skipped {
                        reason: "budget exceeded".into(),
                    },
                ),
                report(
                    3,
                    UnitOutcome::Unavailable {
                        reason: "openai: 401".into(),
                    },
                ),
            ],
            filtered: Vec::new(),
            stats: ScanStats::default(),
            diagnostics: vec!["cache unavailable".into()],
        }
    }

    #[test]
    fn blocking_follows_block_on() {
        let outcome = sample();
        assert!(!outcome.should_block(BlockOn::Critical));
        assert!(outcome.should_block(BlockOn::Warning));
        assert!(outcome.should_block(BlockOn::All));
        assert!(!outcome.should_block(BlockOn::None));
    }

    #[test]
    fn critical_blocks_by_default() {
        let mut outcome = sample();
        outcome.units[1].outcome = UnitOutcome::Reviewed {
            result: ReviewResult::with_findings(vec![finding(Severity::Critical)]),
            backend: None,
            duplicate_of: Some(UnitId(0)),
        };
        assert!(outcome.should_block(BlockOn::default()));
    }

    #[test]
    fn counts_by_kind() {
        let outcome = sample();
        assert_eq!(outcome.count_kind("cached"), 1);
        assert_eq!(outcome.count_kind("reviewed"), 1);
        assert_eq!(outcome.count_kind("skipped"), 1);
        assert_eq!(outcome.count_kind("unavailable"), 1);
        assert_eq!(outcome.findings().count(), 2);
    }

    #[test]
    fn text_report_mentions_everything() {
        let text = sample().to_string();
        assert!(text.starts_with("duckgate: 4 units, 2 findings (0 critical, 1 warning, 1 info)"));
        assert!(text.contains("[WARNING] src/auth.rs:7 (security) warning issue"));
        assert!(text.contains("[SKIPPED] src/f2.rs @@ -1,2 +1,3 @@: budget exceeded"));
        assert!(text.contains("[UNAVAILABLE] src/f3.rs"));
        assert!(text.contains("note: cache unavailable"));
    }

    #[test]
    fn markdown_report_sections() {
        let md = sample().to_markdown();
        assert!(md.starts_with("# duckgate review"));
        assert!(md.contains("| cached | 1 |"));
        let warning = md.find("**warning**").unwrap();
        let info = md.find("**info**").unwrap();
        assert!(warning < info);
        assert!(md.contains("## Not reviewed"));
        assert!(md.contains("## Diagnostics"));
        assert!(!md.contains("## Filtered files"));
    }

    #[test]
    fn json_tags_outcome_kind() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["units"][0]["outcome"]["kind"], "cacheHit");
        assert_eq!(json["units"][1]["outcome"]["backend"], "openai");
        assert!(json["units"][1]["outcome"].get("duplicateOf").is_none());
        assert_eq!(json["units"][2]["outcome"]["reason"], "budget exceeded");
    }
}

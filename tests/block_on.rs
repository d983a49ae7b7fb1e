use std::path::PathBuf;

use duckgate_core::{BlockOn, Category, Finding, HunkRange, ReviewResult, Severity, UnitId};
use duckgate_review::outcome::{ScanOutcome, UnitOutcome, UnitReport};

fn report(id: usize, outcome: UnitOutcome) -> UnitReport {
    UnitReport {
        id: UnitId(id),
        path: PathBuf::from("src/lib.rs"),
        range: HunkRange {
            old_start: 1,
            old_lines: 1,
            new_start: 1,
            new_lines: 2,
        },
        risk: 0,
        outcome,
    }
}

fn reviewed(id: usize, severity: Severity) -> UnitReport {
    report(
        id,
        UnitOutcome::Reviewed {
            result: ReviewResult::with_findings(vec![Finding {
                file: PathBuf::from("src/lib.rs"),
                line: Some(2),
                severity,
                category: Category::CodeQuality,
                message: "issue".into(),
                suggestion: None,
            }]),
            backend: Some("openai".into()),
            duplicate_of: None,
        },
    )
}

fn outcome(units: Vec<UnitReport>) -> ScanOutcome {
    ScanOutcome {
        units,
        ..ScanOutcome::default()
    }
}

#[test]
fn warning_does_not_block_on_critical() {
    let scan = outcome(vec![reviewed(0, Severity::Warning), reviewed(1, Severity::Info)]);
    assert!(!scan.should_block(BlockOn::Critical));
    assert!(scan.should_block(BlockOn::Warning));
    assert!(scan.should_block(BlockOn::All));
    assert!(!scan.should_block(BlockOn::None));
}

#[test]
fn cached_critical_blocks() {
    let scan = outcome(vec![report(
        0,
        UnitOutcome::CacheHit {
            result: ReviewResult::with_findings(vec![Finding {
                file: PathBuf::from("src/lib.rs"),
                line: None,
                severity: Severity::Critical,
                category: Category::Security,
                message: "hardcoded secret".into(),
                suggestion: None,
            }]),
            similarity: 0.97,
        },
    )]);
    assert!(scan.should_block(BlockOn::Critical));
}

#[test]
fn skipped_and_unavailable_never_block() {
    let scan = outcome(vec![
        report(
            0,
            UnitOutcome::Skipped {
                reason: "budget exceeded".into(),
            },
        ),
        report(
            1,
            UnitOutcome::Unavailable {
                reason: "openai: 500 Internal Server Error".into(),
            },
        ),
    ]);
    assert!(!scan.should_block(BlockOn::All));
    assert_eq!(scan.findings().count(), 0);
}

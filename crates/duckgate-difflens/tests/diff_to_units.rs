use std::path::PathBuf;

use duckgate_core::{ReviewUnit, UnitId};
use duckgate_difflens::filter::{DiffFilter, SkipReason};
use duckgate_difflens::parser::into_hunks;
use duckgate_difflens::risk::RiskRanker;
use duckgate_difflens::source::{DiffSource, UnifiedDiffSource};

const STAGED: &str = "\
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1,2 +1,3 @@
 # demo
+More words.
 end
diff --git a/Cargo.lock b/Cargo.lock
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -1 +1 @@
-version = 1
+version = 2
diff --git a/src/auth/session.rs b/src/auth/session.rs
new file mode 100644
--- /dev/null
+++ b/src/auth/session.rs
@@ -0,0 +1,2 @@
+pub fn check(token: &str) -> bool {
+    token == \"hunter2\" }
diff --git a/src/ui.rs b/src/ui.rs
--- a/src/ui.rs
+++ b/src/ui.rs
@@ -3,1 +3,1 @@
-draw();
+redraw();
@@ -20,1 +20,1 @@
-paint();
+repaint();
";

#[test]
fn staged_diff_becomes_ranked_units() {
    let files = UnifiedDiffSource::new("stdin", STAGED).file_diffs().unwrap();
    assert_eq!(files.len(), 4);

    let filtered = DiffFilter::default_filter().filter(files);
    assert_eq!(filtered.skipped.len(), 1);
    assert_eq!(filtered.skipped[0].path, PathBuf::from("Cargo.lock"));
    assert_eq!(filtered.skipped[0].reason, SkipReason::LockFile);

    let units: Vec<ReviewUnit> = into_hunks(filtered.kept)
        .into_iter()
        .enumerate()
        .map(|(i, h)| ReviewUnit::from_hunk(UnitId(i), h))
        .collect();
    assert_eq!(units.len(), 4);

    let ranked = RiskRanker.rank(units);
    assert_eq!(ranked[0].path, PathBuf::from("src/auth/session.rs"));
    // auth + session + new file
    assert_eq!(ranked[0].risk, 25);
    // the rest tie at zero and keep discovery order
    let rest: Vec<usize> = ranked[1..].iter().map(|u| u.id.0).collect();
    assert_eq!(rest, vec![0, 2, 3]);
}

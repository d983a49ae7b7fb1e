use std::fmt;
use std::path::PathBuf;

use duckgate_core::{ChangeType, DiffHunk, DuckgateError, HunkRange};

/// A complete diff for a single file, containing one or more hunks.
///
/// # Examples
///
/// ```
/// use duckgate_difflens::parser::{parse_unified_diff, FileDiff};
///
/// let diff = "diff --git a/hello.rs b/hello.rs\n\
///             --- a/hello.rs\n\
///             +++ b/hello.rs\n\
///             @@ -1,3 +1,4 @@\n\
///              fn main() {\n\
///             +    println!(\"hello\");\n\
///              }\n";
/// let files = parse_unified_diff(diff).unwrap();
/// assert_eq!(files.len(), 1);
/// assert_eq!(files[0].hunks.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct FileDiff {
    /// Path in the old version.
    pub old_path: PathBuf,
    /// Path in the new version.
    pub new_path: PathBuf,
    /// Parsed hunks for this file.
    pub hunks: Vec<DiffHunk>,
    /// Whether this is a newly created file.
    pub is_new_file: bool,
    /// Whether this file was deleted.
    pub is_deleted_file: bool,
    /// Whether this file was renamed.
    pub is_rename: bool,
}

impl FileDiff {
    fn empty() -> Self {
        Self {
            old_path: PathBuf::new(),
            new_path: PathBuf::new(),
            hunks: Vec::new(),
            is_new_file: false,
            is_deleted_file: false,
            is_rename: false,
        }
    }

    /// Path the file is known by after the change.
    ///
    /// Deleted files report their old path.
    pub fn path(&self) -> &PathBuf {
        if self.is_deleted_file {
            &self.old_path
        } else {
            &self.new_path
        }
    }

    /// Number of added plus removed lines across all hunks.
    pub fn changed_lines(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| h.content.lines())
            .filter(|l| l.starts_with('+') || l.starts_with('-'))
            .count()
    }
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} hunks)", self.path().display(), self.hunks.len())
    }
}

/// Parse a unified diff string (as produced by `git diff`) into structured [`FileDiff`] entries.
///
/// Handles standard unified diff format including new files, deleted files,
/// renamed files, and binary files (which are dropped).
///
/// # Errors
///
/// Returns [`DuckgateError::Parse`] if a hunk header is malformed.
///
/// # Examples
///
/// ```
/// use duckgate_difflens::parser::parse_unified_diff;
///
/// let files = parse_unified_diff("").unwrap();
/// assert!(files.is_empty());
/// ```
pub fn parse_unified_diff(input: &str) -> Result<Vec<FileDiff>, DuckgateError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut current_hunk: Option<DiffHunk> = None;
    // Lines still expected on the (old, new) side of the open hunk.
    let mut remaining = (0u32, 0u32);
    let mut is_binary = false;

    for line in input.lines() {
        if line.starts_with("diff --git ") {
            flush_hunk(&mut current, &mut current_hunk);
            flush_file(&mut files, &mut current, is_binary);
            is_binary = false;
            current = Some(FileDiff::empty());
            continue;
        }

        if line == "\\ No newline at end of file" {
            continue;
        }

        if let Some(hunk) = current_hunk.as_mut() {
            let (old_left, new_left) = &mut remaining;
            let counted = match line.as_bytes().first() {
                Some(b'+') => {
                    *new_left = new_left.saturating_sub(1);
                    true
                }
                Some(b'-') => {
                    *old_left = old_left.saturating_sub(1);
                    true
                }
                // Some tools strip the leading space from blank context lines.
                Some(b' ') | None => {
                    *old_left = old_left.saturating_sub(1);
                    *new_left = new_left.saturating_sub(1);
                    true
                }
                _ => false,
            };
            if counted {
                if line.is_empty() {
                    hunk.content.push(' ');
                } else {
                    hunk.content.push_str(line);
                }
                hunk.content.push('\n');
                if remaining == (0, 0) {
                    flush_hunk(&mut current, &mut current_hunk);
                }
                continue;
            }
            flush_hunk(&mut current, &mut current_hunk);
        }

        // Plain patches have no "diff --git" line; the "---" header starts the file.
        if line.starts_with("--- ") {
            let needs_file = current.as_ref().map_or(true, |f| {
                !f.hunks.is_empty() || !f.old_path.as_os_str().is_empty()
            });
            if needs_file {
                flush_file(&mut files, &mut current, is_binary);
                is_binary = false;
                current = Some(FileDiff::empty());
            }
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if (line.starts_with("Binary files ") && line.ends_with(" differ"))
            || line.starts_with("GIT binary patch")
        {
            is_binary = true;
            continue;
        }

        if line.starts_with("new file mode") {
            file.is_new_file = true;
            continue;
        }

        if line.starts_with("deleted file mode") {
            file.is_deleted_file = true;
            continue;
        }

        if line.starts_with("rename from ") || line.starts_with("rename to ") {
            file.is_rename = true;
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            file.old_path = parse_path(path);
            if path == "/dev/null" {
                file.is_new_file = true;
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            file.new_path = parse_path(path);
            if path == "/dev/null" {
                file.is_deleted_file = true;
            }
            continue;
        }

        if line.starts_with("@@ ") {
            let range = parse_hunk_header(line)?;
            let change_type = if file.is_new_file || range.old_lines == 0 {
                ChangeType::Add
            } else if file.is_deleted_file || range.new_lines == 0 {
                ChangeType::Delete
            } else {
                ChangeType::Modify
            };
            remaining = (range.old_lines, range.new_lines);
            current_hunk = Some(DiffHunk {
                file_path: file.path().clone(),
                range,
                content: String::new(),
                change_type,
                new_file: file.is_new_file,
            });
        }
    }

    flush_hunk(&mut current, &mut current_hunk);
    flush_file(&mut files, &mut current, is_binary);

    Ok(files)
}

/// Flatten parsed files into their hunks, preserving discovery order.
pub fn into_hunks(files: Vec<FileDiff>) -> Vec<DiffHunk> {
    files.into_iter().flat_map(|f| f.hunks).collect()
}

fn flush_hunk(current: &mut Option<FileDiff>, hunk: &mut Option<DiffHunk>) {
    if let Some(h) = hunk.take() {
        if let Some(file) = current.as_mut() {
            file.hunks.push(h);
        }
    }
}

fn flush_file(files: &mut Vec<FileDiff>, current: &mut Option<FileDiff>, is_binary: bool) {
    if let Some(file) = current.take() {
        if !is_binary {
            files.push(file);
        }
    }
}

fn parse_path(raw: &str) -> PathBuf {
    // git appends a tab and timestamp in some modes
    let raw = raw.split('\t').next().unwrap_or(raw);
    let normalized = raw.trim_matches('"');

    if normalized == "/dev/null" {
        return PathBuf::from("/dev/null");
    }

    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);

    PathBuf::from(stripped)
}

fn parse_hunk_header(line: &str) -> Result<HunkRange, DuckgateError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| DuckgateError::Parse(format!("invalid hunk header: {line}")))?;

    let (old, new) = inner
        .split_once(' ')
        .ok_or_else(|| DuckgateError::Parse(format!("invalid hunk header: {line}")))?;

    let old = old
        .strip_prefix('-')
        .ok_or_else(|| DuckgateError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = new
        .strip_prefix('+')
        .ok_or_else(|| DuckgateError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok(HunkRange {
        old_start,
        old_lines,
        new_start,
        new_lines,
    })
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), DuckgateError> {
    let number = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| DuckgateError::Parse(format!("invalid range in: {context}")))
    };
    match range.split_once(',') {
        Some((start, count)) => Ok((number(start)?, number(count)?)),
        None => Ok((number(range)?, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff_returns_empty_vec() {
        let files = parse_unified_diff("").unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn single_file_single_hunk() {
        let diff = "\
diff --git a/src/main.rs b/src/main.rs
index abc1234..def5678 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@
 fn main() {
+    println!(\"hello\");
     let x = 1;
 }
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].new_path, PathBuf::from("src/main.rs"));
        let hunk = &files[0].hunks[0];
        assert_eq!(
            hunk.range,
            HunkRange {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 4
            }
        );
        assert_eq!(hunk.change_type, ChangeType::Modify);
        assert!(!hunk.new_file);
        assert!(hunk.content.contains("+    println!"));
    }

    #[test]
    fn hunk_header_with_function_context() {
        let diff = "\
diff --git a/lib.rs b/lib.rs
--- a/lib.rs
+++ b/lib.rs
@@ -10,3 +11,4 @@ fn baz() {
 fn baz() {
+    qux();
 }
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files[0].hunks[0].range.old_start, 10);
        assert_eq!(files[0].hunks[0].range.new_start, 11);
    }

    #[test]
    fn multiple_files_keep_order() {
        let diff = "\
diff --git a/a.rs b/a.rs
--- a/a.rs
+++ b/a.rs
@@ -1 +1,2 @@
 line1
+line2
diff --git a/b.rs b/b.rs
--- a/b.rs
+++ b/b.rs
@@ -1 +1,2 @@
 line1
+line2
@@ -9 +10,2 @@
 line9
+line10
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files.len(), 2);
        let hunks = into_hunks(files);
        let paths: Vec<_> = hunks.iter().map(|h| h.file_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("a.rs"),
                PathBuf::from("b.rs"),
                PathBuf::from("b.rs")
            ]
        );
    }

    #[test]
    fn new_file_marks_hunks() {
        let diff = "\
diff --git a/new.rs b/new.rs
new file mode 100644
--- /dev/null
+++ b/new.rs
@@ -0,0 +1,3 @@
+fn hello() {
+    println!(\"new\");
+}
";
        let files = parse_unified_diff(diff).unwrap();
        assert!(files[0].is_new_file);
        assert_eq!(files[0].new_path, PathBuf::from("new.rs"));
        assert_eq!(files[0].hunks[0].change_type, ChangeType::Add);
        assert!(files[0].hunks[0].new_file);
    }

    #[test]
    fn deleted_file_uses_old_path() {
        let diff = "\
diff --git a/old.rs b/old.rs
deleted file mode 100644
--- a/old.rs
+++ /dev/null
@@ -1,3 +0,0 @@
-fn goodbye() {
-    println!(\"old\");
-}
";
        let files = parse_unified_diff(diff).unwrap();
        assert!(files[0].is_deleted_file);
        assert_eq!(files[0].hunks[0].change_type, ChangeType::Delete);
        assert_eq!(files[0].hunks[0].file_path, PathBuf::from("old.rs"));
    }

    #[test]
    fn renamed_file() {
        let diff = "\
diff --git a/old_name.rs b/new_name.rs
similarity index 100%
rename from old_name.rs
rename to new_name.rs
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].is_rename);
        assert!(files[0].hunks.is_empty());
    }

    #[test]
    fn binary_files_dropped() {
        let diff = "\
diff --git a/image.png b/image.png
Binary files a/image.png and b/image.png differ
diff --git a/code.rs b/code.rs
--- a/code.rs
+++ b/code.rs
@@ -1 +1,2 @@
 line1
+line2
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].new_path, PathBuf::from("code.rs"));
    }

    #[test]
    fn no_newline_marker_is_not_content() {
        let diff = "\
diff --git a/f.rs b/f.rs
--- a/f.rs
+++ b/f.rs
@@ -1 +1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let files = parse_unified_diff(diff).unwrap();
        let content = &files[0].hunks[0].content;
        assert!(!content.contains("No newline"));
        assert!(content.contains("-old"));
        assert!(content.contains("+new"));
    }

    #[test]
    fn removed_line_starting_with_dashes_stays_in_hunk() {
        let diff = "\
diff --git a/notes.md b/notes.md
--- a/notes.md
+++ b/notes.md
@@ -1,2 +1,1 @@
--- old separator
 keep
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].hunks[0].content.contains("--- old separator"));
    }

    #[test]
    fn patch_without_git_header() {
        let diff = "\
--- /dev/null
+++ b/demo/bad_code.rs
@@ -0,0 +1,3 @@
+fn main() {
+    println!(\"hello\");
+}
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].new_path, PathBuf::from("demo/bad_code.rs"));
        assert!(files[0].is_new_file);
    }

    #[test]
    fn quoted_paths_are_parsed() {
        let diff = r#"--- "a/src/my file.rs"
+++ "b/src/my file.rs"
@@ -1 +1,2 @@
 old
+new
"#;
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files[0].old_path, PathBuf::from("src/my file.rs"));
        assert_eq!(files[0].hunks[0].file_path, PathBuf::from("src/my file.rs"));
    }

    #[test]
    fn malformed_hunk_header_errors() {
        let diff = "\
--- a/x.rs
+++ b/x.rs
@@ -a,b +c,d @@
";
        assert!(matches!(
            parse_unified_diff(diff),
            Err(DuckgateError::Parse(_))
        ));
    }

    #[test]
    fn changed_lines_counts_additions_and_removals() {
        let diff = "\
--- a/x.rs
+++ b/x.rs
@@ -1,3 +1,3 @@
 a
-b
+c
";
        let files = parse_unified_diff(diff).unwrap();
        assert_eq!(files[0].changed_lines(), 2);
    }
}

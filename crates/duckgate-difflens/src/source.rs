//! Where a scan's diff comes from.
//!
//! [`GitDiffSource`] reads the repository through git2; [`UnifiedDiffSource`]
//! wraps text that is already in unified format (stdin, a patch file).

use std::path::{Path, PathBuf};

use duckgate_core::DuckgateError;
use git2::{DiffFormat, DiffOptions, Repository};
use tracing::debug;

use crate::parser::{parse_unified_diff, FileDiff};

/// Yields the changed files of the current scan, in discovery order.
pub trait DiffSource {
    /// Short label for logs and reports.
    fn describe(&self) -> String;

    /// Read and parse the diff.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Git`] when the repository cannot be read and
    /// [`DuckgateError::Parse`] when the diff text is malformed.
    fn file_diffs(&self) -> Result<Vec<FileDiff>, DuckgateError>;
}

/// Which changes a git scan covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Index against HEAD: what the next commit would contain.
    #[default]
    Staged,
    /// Index and working tree against HEAD: every tracked change.
    AllTracked,
}

/// Diff extraction from a git repository.
///
/// An unborn HEAD (no commits yet) diffs against the empty tree, so the
/// first commit of a repository is reviewable.
///
/// # Examples
///
/// ```no_run
/// use duckgate_difflens::source::{DiffSource, GitDiffSource, ScanMode};
///
/// let source = GitDiffSource::new(".", ScanMode::Staged);
/// let files = source.file_diffs().unwrap();
/// println!("{} staged files", files.len());
/// ```
#[derive(Debug, Clone)]
pub struct GitDiffSource {
    repo_path: PathBuf,
    mode: ScanMode,
}

impl GitDiffSource {
    /// Source rooted at `repo_path` (any directory inside the work tree).
    pub fn new(repo_path: impl Into<PathBuf>, mode: ScanMode) -> Self {
        Self {
            repo_path: repo_path.into(),
            mode,
        }
    }

    /// Render the selected changes as unified diff text.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Git`] on any git2 failure.
    pub fn diff_text(&self) -> Result<String, DuckgateError> {
        let repo = Repository::discover(&self.repo_path)
            .map_err(|e| DuckgateError::Git(format!("failed to open repository: {e}")))?;

        let head_tree = match repo.head() {
            Ok(head) => Some(
                head.peel_to_tree()
                    .map_err(|e| DuckgateError::Git(format!("failed to resolve HEAD tree: {e}")))?,
            ),
            Err(e)
                if e.code() == git2::ErrorCode::UnbornBranch
                    || e.code() == git2::ErrorCode::NotFound =>
            {
                None
            }
            Err(e) => return Err(DuckgateError::Git(format!("failed to read HEAD: {e}"))),
        };

        let mut opts = DiffOptions::new();
        opts.context_lines(3);

        let diff = match self.mode {
            ScanMode::Staged => {
                let index = repo
                    .index()
                    .map_err(|e| DuckgateError::Git(format!("failed to read index: {e}")))?;
                repo.diff_tree_to_index(head_tree.as_ref(), Some(&index), Some(&mut opts))
            }
            ScanMode::AllTracked => {
                repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
            }
        }
        .map_err(|e| DuckgateError::Git(format!("failed to compute diff: {e}")))?;

        let mut text = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            let origin = line.origin();
            match origin {
                '+' | '-' | ' ' => text.push(origin),
                // End-of-file newline markers carry no reviewable content.
                '=' | '>' | '<' => return true,
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            if !text.ends_with('\n') {
                text.push('\n');
            }
            true
        })
        .map_err(|e| DuckgateError::Git(format!("failed to render diff: {e}")))?;

        debug!(
            repo = %self.repo_path.display(),
            mode = ?self.mode,
            bytes = text.len(),
            "extracted diff"
        );
        Ok(text)
    }

    /// Repository root this source was created for.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

impl DiffSource for GitDiffSource {
    fn describe(&self) -> String {
        match self.mode {
            ScanMode::Staged => format!("staged changes in {}", self.repo_path.display()),
            ScanMode::AllTracked => format!("tracked changes in {}", self.repo_path.display()),
        }
    }

    fn file_diffs(&self) -> Result<Vec<FileDiff>, DuckgateError> {
        parse_unified_diff(&self.diff_text()?)
    }
}

/// Unified diff text supplied directly, e.g. piped on stdin.
///
/// # Examples
///
/// ```
/// use duckgate_difflens::source::{DiffSource, UnifiedDiffSource};
///
/// let source = UnifiedDiffSource::new("stdin", "--- a/x.rs\n+++ b/x.rs\n@@ -1 +1 @@\n-a\n+b\n");
/// assert_eq!(source.file_diffs().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct UnifiedDiffSource {
    label: String,
    text: String,
}

impl UnifiedDiffSource {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

impl DiffSource for UnifiedDiffSource {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn file_diffs(&self) -> Result<Vec<FileDiff>, DuckgateError> {
        parse_unified_diff(&self.text)
    }
}

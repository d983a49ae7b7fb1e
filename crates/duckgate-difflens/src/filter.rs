//! Pre-review file filtering.
//!
//! Drops lock files, binary assets, generated code, vendored dependencies,
//! minified bundles, oversized diffs and anything matching user patterns
//! before embedding, so none of it costs a cache lookup or a backend call.

use std::fmt;
use std::path::{Path, PathBuf};

use duckgate_core::FilterConfig;
use serde::Serialize;
use tracing::{debug, warn};

use crate::parser::FileDiff;

/// Files and patterns to skip before review.
///
/// # Examples
///
/// ```
/// use duckgate_difflens::filter::DiffFilter;
///
/// let filter = DiffFilter::default_filter();
/// assert!(filter.should_skip("package-lock.json"));
/// assert!(filter.should_skip("assets/logo.PNG"));
/// assert!(!filter.should_skip("src/main.rs"));
/// ```
pub struct DiffFilter {
    skip_patterns: Vec<glob::Pattern>,
    skip_extensions: Vec<String>,
    max_changed_lines: usize,
}

impl DiffFilter {
    /// Create a filter with only the built-in rules.
    pub fn default_filter() -> Self {
        Self::from_config(&FilterConfig::default())
    }

    /// Create a filter from the `[filter]` configuration section.
    ///
    /// Invalid glob patterns are logged and ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use duckgate_core::FilterConfig;
    /// use duckgate_difflens::filter::DiffFilter;
    ///
    /// let config = FilterConfig {
    ///     skip_extensions: vec!["snap".into()],
    ///     ..FilterConfig::default()
    /// };
    /// let filter = DiffFilter::from_config(&config);
    /// assert!(filter.should_skip("ui/__snapshots__/button.snap"));
    /// assert!(filter.should_skip("Cargo.lock"));
    /// ```
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut skip_patterns = Vec::new();
        for pat in &config.skip_patterns {
            match glob::Pattern::new(pat) {
                Ok(p) => skip_patterns.push(p),
                Err(e) => warn!(pattern = %pat, error = %e, "ignoring invalid skip pattern"),
            }
        }

        Self {
            skip_patterns,
            skip_extensions: config
                .skip_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_changed_lines: config.max_changed_lines,
        }
    }

    /// Check if a single file path should be skipped on name alone.
    pub fn should_skip(&self, path: &str) -> bool {
        self.check_skip(Path::new(path), "", 0).is_some()
    }

    /// Split `diffs` into reviewable files and skipped files with reasons.
    ///
    /// Relative order of kept files is preserved.
    ///
    /// # Examples
    ///
    /// ```
    /// use duckgate_difflens::filter::DiffFilter;
    /// use duckgate_difflens::parser::parse_unified_diff;
    ///
    /// let diff = "diff --git a/src/main.rs b/src/main.rs\n\
    ///             --- a/src/main.rs\n\
    ///             +++ b/src/main.rs\n\
    ///             @@ -1,1 +1,2 @@\n\
    ///              line\n\
    ///             +new\n";
    /// let diffs = parse_unified_diff(diff).unwrap();
    /// let result = DiffFilter::default_filter().filter(diffs);
    /// assert_eq!(result.kept.len(), 1);
    /// assert!(result.skipped.is_empty());
    /// ```
    pub fn filter(&self, diffs: Vec<FileDiff>) -> FilterResult {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for diff in diffs {
            let path = diff.path().clone();
            let content: String = diff.hunks.iter().map(|h| h.content.as_str()).collect();

            match self.check_skip(&path, &content, diff.changed_lines()) {
                Some(reason) => {
                    debug!(path = %path.display(), %reason, "filtered out");
                    skipped.push(SkippedFile { path, reason });
                }
                None if diff.hunks.is_empty() => {
                    debug!(path = %path.display(), "no hunks to review");
                }
                None => kept.push(diff),
            }
        }

        FilterResult { kept, skipped }
    }

    fn check_skip(&self, path: &Path, content: &str, changed_lines: usize) -> Option<SkipReason> {
        let path_str = path.to_string_lossy();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let lower_name = file_name.to_lowercase();

        if is_lock_file(&file_name) {
            return Some(SkipReason::LockFile);
        }

        if OS_JUNK.contains(&file_name.as_str()) {
            return Some(SkipReason::OsMetadata);
        }

        if is_vendored(&path_str) {
            return Some(SkipReason::VendoredCode);
        }

        if is_minified(&lower_name, content) {
            return Some(SkipReason::MinifiedFile);
        }

        if let Some(ext) = SKIP_EXTENSIONS.iter().find(|ext| lower_name.ends_with(*ext)) {
            return Some(SkipReason::ExcludedExtension((*ext).to_string()));
        }

        if is_generated_by_name(&file_name) || is_generated_by_content(content) {
            return Some(SkipReason::GeneratedFile);
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_lowercase();
            if self.skip_extensions.contains(&ext) {
                return Some(SkipReason::PatternMatch(format!("*.{ext}")));
            }
        }

        if let Some(pat) = self.skip_patterns.iter().find(|p| p.matches(&path_str)) {
            return Some(SkipReason::PatternMatch(pat.to_string()));
        }

        if changed_lines > self.max_changed_lines {
            return Some(SkipReason::TooLarge(changed_lines));
        }

        None
    }
}

/// Result of filtering diffs.
#[derive(Debug)]
pub struct FilterResult {
    /// Diffs that passed the filter.
    pub kept: Vec<FileDiff>,
    /// Files that were skipped with reasons.
    pub skipped: Vec<SkippedFile>,
}

/// A file excluded from review.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use duckgate_difflens::filter::{SkippedFile, SkipReason};
///
/// let skipped = SkippedFile {
///     path: PathBuf::from("package-lock.json"),
///     reason: SkipReason::LockFile,
/// };
/// assert_eq!(skipped.reason.to_string(), "lock file");
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    /// Path of the skipped file.
    pub path: PathBuf,
    /// Why the file was skipped.
    pub reason: SkipReason,
}

/// Reason a file was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum SkipReason {
    /// Package manager lock file.
    LockFile,
    /// Finder/Explorer metadata.
    OsMetadata,
    /// Image, font, archive, source map or compiled artifact.
    ExcludedExtension(String),
    /// Auto-generated code.
    GeneratedFile,
    /// Third-party vendored code.
    VendoredCode,
    /// Minified or bundled file.
    MinifiedFile,
    /// More changed lines than the configured maximum.
    TooLarge(usize),
    /// Matched a custom skip pattern or extension.
    PatternMatch(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LockFile => write!(f, "lock file"),
            SkipReason::OsMetadata => write!(f, "OS metadata"),
            SkipReason::ExcludedExtension(ext) => write!(f, "excluded extension ({ext})"),
            SkipReason::GeneratedFile => write!(f, "generated file"),
            SkipReason::VendoredCode => write!(f, "vendored code"),
            SkipReason::MinifiedFile => write!(f, "minified file"),
            SkipReason::TooLarge(lines) => write!(f, "too large ({lines} changed lines)"),
            SkipReason::PatternMatch(pat) => write!(f, "pattern: {pat}"),
        }
    }
}

const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Pipfile.lock",
    "poetry.lock",
    "uv.lock",
    "Cargo.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

const OS_JUNK: &[&str] = &[".DS_Store", "Thumbs.db"];

// Matched as lowercase suffixes of the file name.
const SKIP_EXTENSIONS: &[&str] = &[
    ".lock", ".svg", ".png", ".jpg", ".jpeg", ".gif", ".ico", ".webp", ".bmp", ".woff",
    ".woff2", ".ttf", ".eot", ".otf", ".map", ".pyc", ".pyo", ".so", ".dylib", ".dll", ".exe",
    ".jar", ".war", ".zip", ".tar", ".gz", ".br",
];

fn is_lock_file(file_name: &str) -> bool {
    LOCK_FILES.contains(&file_name)
}

fn is_vendored(path: &str) -> bool {
    path.split('/')
        .any(|part| matches!(part, "vendor" | "third_party" | "node_modules"))
}

fn is_minified(lower_name: &str, content: &str) -> bool {
    if lower_name.ends_with(".min.js") || lower_name.ends_with(".min.css") {
        return true;
    }
    // Any line longer than 500 chars suggests a bundle.
    content.lines().any(|line| line.len() > 500)
}

fn is_generated_by_name(file_name: &str) -> bool {
    file_name.contains(".generated.")
        || file_name.ends_with(".g.dart")
        || file_name.ends_with(".pb.go")
        || file_name.ends_with(".pb.rs")
}

fn is_generated_by_content(content: &str) -> bool {
    content
        .lines()
        .take(5)
        .map(|line| match line.chars().next() {
            Some('+' | '-' | ' ') => &line[1..],
            _ => line,
        })
        .any(|line| {
            line.contains("// Code generated")
                || line.contains("# AUTO-GENERATED")
                || line.contains("@generated")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unified_diff;

    fn make_diff(path: &str, content: &str) -> Vec<FileDiff> {
        let diff = format!(
            "diff --git a/{path} b/{path}\n\
             --- a/{path}\n\
             +++ b/{path}\n\
             @@ -1,1 +1,2 @@\n\
             {content}\n"
        );
        parse_unified_diff(&diff).unwrap()
    }

    fn skip_reason(filter: &DiffFilter, path: &str, content: &str) -> Option<SkipReason> {
        let result = filter.filter(make_diff(path, content));
        result.skipped.first().map(|s| s.reason.clone())
    }

    #[test]
    fn lock_files_skipped() {
        let filter = DiffFilter::default_filter();
        for name in LOCK_FILES {
            assert_eq!(
                skip_reason(&filter, name, "+new line"),
                Some(SkipReason::LockFile),
                "expected {name} to be skipped"
            );
        }
    }

    #[test]
    fn nested_lock_files_skipped() {
        let filter = DiffFilter::default_filter();
        assert_eq!(
            skip_reason(&filter, "web/package-lock.json", "+x"),
            Some(SkipReason::LockFile)
        );
    }

    #[test]
    fn os_junk_skipped() {
        let filter = DiffFilter::default_filter();
        assert_eq!(
            skip_reason(&filter, "docs/.DS_Store", "+x"),
            Some(SkipReason::OsMetadata)
        );
        assert_eq!(
            skip_reason(&filter, "Thumbs.db", "+x"),
            Some(SkipReason::OsMetadata)
        );
    }

    #[test]
    fn excluded_extensions_skipped_case_insensitively() {
        let filter = DiffFilter::default_filter();
        for path in ["img/Logo.PNG", "fonts/a.woff2", "dist/app.js.map", "lib/x.so"] {
            assert!(
                matches!(
                    skip_reason(&filter, path, "+x"),
                    Some(SkipReason::ExcludedExtension(_))
                ),
                "expected {path} to be skipped"
            );
        }
    }

    #[test]
    fn generated_files_skipped_by_name() {
        let filter = DiffFilter::default_filter();
        for name in ["api.generated.ts", "model.g.dart", "proto.pb.go", "msg.pb.rs"] {
            assert_eq!(
                skip_reason(&filter, name, "+new line"),
                Some(SkipReason::GeneratedFile),
                "expected {name} to be skipped"
            );
        }
    }

    #[test]
    fn generated_files_skipped_by_header() {
        let filter = DiffFilter::default_filter();
        assert_eq!(
            skip_reason(&filter, "gen.go", "+// Code generated by protoc. DO NOT EDIT."),
            Some(SkipReason::GeneratedFile)
        );
    }

    #[test]
    fn minified_files_skipped() {
        let filter = DiffFilter::default_filter();
        assert_eq!(
            skip_reason(&filter, "app.min.js", "+var x=1;"),
            Some(SkipReason::MinifiedFile)
        );

        let long_line = format!("+{}", "x".repeat(501));
        assert_eq!(
            skip_reason(&filter, "bundle.js", &long_line),
            Some(SkipReason::MinifiedFile)
        );
    }

    #[test]
    fn vendored_code_skipped() {
        let filter = DiffFilter::default_filter();
        for path in ["vendor/lib.go", "third_party/dep.rs", "node_modules/pkg/index.js"] {
            assert_eq!(
                skip_reason(&filter, path, "+line"),
                Some(SkipReason::VendoredCode),
                "expected {path} to be skipped"
            );
        }
    }

    #[test]
    fn normal_source_files_kept() {
        let filter = DiffFilter::default_filter();
        let result = filter.filter(make_diff("src/main.rs", "+let x = 1;"));
        assert_eq!(result.kept.len(), 1);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn custom_patterns_from_config() {
        let config = FilterConfig {
            skip_patterns: vec!["*.test.ts".into(), "fixtures/**".into(), "[".into()],
            ..FilterConfig::default()
        };
        let filter = DiffFilter::from_config(&config);

        assert!(matches!(
            skip_reason(&filter, "auth.test.ts", "+test line"),
            Some(SkipReason::PatternMatch(_))
        ));
        assert!(matches!(
            skip_reason(&filter, "fixtures/data/a.json", "+{}"),
            Some(SkipReason::PatternMatch(_))
        ));
        assert_eq!(skip_reason(&filter, "src/auth.ts", "+real code"), None);
    }

    #[test]
    fn custom_extensions_accept_leading_dot() {
        let config = FilterConfig {
            skip_extensions: vec![".snap".into()],
            ..FilterConfig::default()
        };
        let filter = DiffFilter::from_config(&config);
        assert_eq!(
            skip_reason(&filter, "component.test.snap", "+snapshot content"),
            Some(SkipReason::PatternMatch("*.snap".into()))
        );
    }

    #[test]
    fn too_large_files_skipped() {
        let filter = DiffFilter::default_filter();
        let mut lines = String::new();
        for i in 0..1002 {
            lines.push_str(&format!("+line {i}\n"));
        }
        let diff = format!(
            "diff --git a/big.rs b/big.rs\n\
             --- a/big.rs\n\
             +++ b/big.rs\n\
             @@ -1,0 +1,1002 @@\n\
             {lines}"
        );
        let result = filter.filter(parse_unified_diff(&diff).unwrap());
        assert!(result.kept.is_empty());
        assert_eq!(result.skipped[0].reason, SkipReason::TooLarge(1002));
    }

    #[test]
    fn hunkless_renames_are_dropped_silently() {
        let diff = "\
diff --git a/old.rs b/new.rs
similarity index 100%
rename from old.rs
rename to new.rs
";
        let result = DiffFilter::default_filter().filter(parse_unified_diff(diff).unwrap());
        assert!(result.kept.is_empty());
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn empty_input_returns_empty_result() {
        let result = DiffFilter::default_filter().filter(Vec::new());
        assert!(result.kept.is_empty());
        assert!(result.skipped.is_empty());
    }
}

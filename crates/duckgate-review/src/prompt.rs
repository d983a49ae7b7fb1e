use std::path::{Path, PathBuf};

use duckgate_core::{Category, Finding, ReviewResult, ReviewUnit, Severity};
use serde::Deserialize;
use tracing::warn;

const SYSTEM_PROMPT_HEAD: &str = "\
You are a senior code reviewer performing an automated pre-commit review.
Analyze the provided git diff hunks and find issues in these categories:
";

const SYSTEM_PROMPT_TAIL: &str = "
For each issue found, respond with a JSON array of objects. Each object must have:
  \"file\": string (file path exactly as given in the section header),
  \"line\": number or null (line number in the new file, if identifiable),
  \"severity\": \"critical\" | \"warning\" | \"info\",
  \"category\": one of the category identifiers in parentheses above,
  \"message\": string (concise description of the issue),
  \"suggestion\": string (how to fix it, or empty string)

If no issues are found, respond with an empty JSON array: []
Respond ONLY with the JSON array, no markdown fences and no explanation.";

/// Build the system prompt for the enabled check categories.
///
/// # Examples
///
/// ```
/// use duckgate_core::Category;
/// use duckgate_review::prompt::build_system_prompt;
///
/// let prompt = build_system_prompt(&[Category::Security, Category::Performance]);
/// assert!(prompt.contains("- Security (security)"));
/// assert!(prompt.contains("- Performance (performance)"));
/// assert!(!prompt.contains("Accessibility"));
/// ```
pub fn build_system_prompt(categories: &[Category]) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT_HEAD);
    for category in categories {
        prompt.push_str(&format!("- {} ({})\n", category.label(), category.id()));
    }
    prompt.push_str(SYSTEM_PROMPT_TAIL);
    prompt
}

/// Build the user prompt: one `=== path (hunk) ===` section per unit.
///
/// # Examples
///
/// ```
/// use duckgate_core::{ChangeType, DiffHunk, HunkRange, ReviewUnit, UnitId};
/// use duckgate_review::prompt::build_review_prompt;
/// use std::path::PathBuf;
///
/// let unit = ReviewUnit::from_hunk(UnitId(0), DiffHunk {
///     file_path: PathBuf::from("src/auth.rs"),
///     range: HunkRange { old_start: 3, old_lines: 1, new_start: 3, new_lines: 2 },
///     content: "+let ok = a == b;\n".into(),
///     change_type: ChangeType::Modify,
///     new_file: false,
/// });
/// let prompt = build_review_prompt(&[unit]);
/// assert!(prompt.starts_with("=== src/auth.rs (@@ -3,1 +3,2 @@) ==="));
/// ```
pub fn build_review_prompt(units: &[ReviewUnit]) -> String {
    units
        .iter()
        .map(|u| format!("=== {} ({}) ===\n{}", u.path.display(), u.range, u.diff.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResponse {
    List(Vec<serde_json::Value>),
    Wrapped { findings: Vec<serde_json::Value> },
}

#[derive(Deserialize)]
struct RawFinding {
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<serde_json::Value>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Parse a reviewer response into findings.
///
/// Accepts a bare JSON array or an object with a `findings` array, with or
/// without markdown code fences. Unparseable responses yield no findings;
/// individual malformed entries are dropped.
///
/// # Examples
///
/// ```
/// use duckgate_core::Severity;
/// use duckgate_review::prompt::parse_review_response;
///
/// let raw = r#"[{"file":"a.rs","line":4,"severity":"critical","category":"security","message":"hardcoded key"}]"#;
/// let findings = parse_review_response(raw);
/// assert_eq!(findings.len(), 1);
/// assert_eq!(findings[0].severity, Severity::Critical);
///
/// assert!(parse_review_response("[]").is_empty());
/// ```
pub fn parse_review_response(raw: &str) -> Vec<Finding> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Vec::new();
    }

    let items = match serde_json::from_str::<RawResponse>(cleaned) {
        Ok(RawResponse::List(items)) | Ok(RawResponse::Wrapped { findings: items }) => items,
        Err(e) => {
            let preview: String = raw.chars().take(200).collect();
            warn!(error = %e, raw = %preview, "failed to parse reviewer response");
            return Vec::new();
        }
    };

    items.into_iter().filter_map(convert_finding).collect()
}

fn convert_finding(value: serde_json::Value) -> Option<Finding> {
    let raw: RawFinding = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "skipping malformed finding");
            return None;
        }
    };

    let severity = match raw.severity.as_deref() {
        None => Severity::Info,
        Some(s) => match s.parse() {
            Ok(severity) => severity,
            Err(_) => {
                warn!(severity = s, "skipping finding with unknown severity");
                return None;
            }
        },
    };
    let category = match raw.category.as_deref() {
        None => Category::CodeQuality,
        Some(c) => match c.parse() {
            Ok(category) => category,
            Err(_) => {
                warn!(category = c, "skipping finding with unknown category");
                return None;
            }
        },
    };
    let line = match raw.line {
        Some(serde_json::Value::Number(n)) => n.as_u64().filter(|l| *l > 0).map(|l| l as u32),
        _ => None,
    };

    Some(Finding {
        file: PathBuf::from(raw.file.unwrap_or_else(|| "unknown".into())),
        line,
        severity,
        category,
        message: raw.message.unwrap_or_default(),
        suggestion: raw.suggestion.filter(|s| !s.trim().is_empty()),
    })
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Distribute a batch's findings back to the units they belong to.
///
/// A finding goes to the unit with the same path whose hunk contains its
/// line, else the first unit with that path. Findings naming a path outside
/// the batch go to the first unit so they are never lost. The returned
/// vector is parallel to `units`.
pub fn split_findings(units: &[ReviewUnit], findings: Vec<Finding>) -> Vec<ReviewResult> {
    let mut buckets: Vec<Vec<Finding>> = vec![Vec::new(); units.len()];
    if units.is_empty() {
        return Vec::new();
    }

    for finding in findings {
        let same_file: Vec<usize> = units
            .iter()
            .enumerate()
            .filter(|(_, u)| paths_match(&u.path, &finding.file))
            .map(|(i, _)| i)
            .collect();

        let target = finding
            .line
            .and_then(|line| {
                same_file
                    .iter()
                    .copied()
                    .find(|&i| units[i].range.contains_new_line(line))
            })
            .or_else(|| same_file.first().copied())
            .unwrap_or_else(|| {
                warn!(file = %finding.file.display(), "finding names a file outside the batch");
                0
            });
        buckets[target].push(finding);
    }

    buckets.into_iter().map(ReviewResult::with_findings).collect()
}

fn paths_match(unit_path: &Path, reported: &Path) -> bool {
    unit_path == reported || reported.ends_with(unit_path) || unit_path.ends_with(reported)
}

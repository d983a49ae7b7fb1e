use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Approximate characters per token, conservative for most models.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of `text` from its character count.
///
/// # Examples
///
/// ```
/// use duckgate_core::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcdefgh"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Line ranges of a single hunk, as found in its `@@` header.
///
/// # Examples
///
/// ```
/// use duckgate_core::HunkRange;
///
/// let range = HunkRange { old_start: 10, old_lines: 5, new_start: 12, new_lines: 8 };
/// assert!(range.contains_new_line(12));
/// assert!(range.contains_new_line(19));
/// assert!(!range.contains_new_line(20));
/// assert_eq!(range.to_string(), "@@ -10,5 +12,8 @@");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunkRange {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
}

impl HunkRange {
    /// Returns `true` if `line` (new-file numbering) falls inside this hunk.
    pub fn contains_new_line(&self, line: u32) -> bool {
        let end = self.new_start.saturating_add(self.new_lines.max(1));
        line >= self.new_start && line < end
    }
}

impl fmt::Display for HunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }
}

/// A single hunk from a unified diff.
///
/// # Examples
///
/// ```
/// use duckgate_core::{DiffHunk, ChangeType, HunkRange};
/// use std::path::PathBuf;
///
/// let hunk = DiffHunk {
///     file_path: PathBuf::from("src/lib.rs"),
///     range: HunkRange { old_start: 10, old_lines: 5, new_start: 10, new_lines: 8 },
///     content: "+ new line\n- old line".into(),
///     change_type: ChangeType::Modify,
///     new_file: false,
/// };
/// assert_eq!(hunk.range.old_lines, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffHunk {
    /// Path to the affected file.
    pub file_path: PathBuf,
    /// Line ranges from the hunk header.
    pub range: HunkRange,
    /// Raw diff content for this hunk.
    pub content: String,
    /// Classification of the change.
    pub change_type: ChangeType,
    /// Whether the hunk belongs to a newly created file.
    #[serde(default)]
    pub new_file: bool,
}

/// Classification of a diff hunk.
///
/// # Examples
///
/// ```
/// use duckgate_core::ChangeType;
///
/// let ct = ChangeType::Add;
/// assert_eq!(format!("{ct}"), "add");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// New file or code added.
    Add,
    /// Existing file or code removed.
    Delete,
    /// Existing code modified in place.
    Modify,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Add => write!(f, "add"),
            ChangeType::Delete => write!(f, "delete"),
            ChangeType::Modify => write!(f, "modify"),
        }
    }
}

/// Position of a unit in scan discovery order.
///
/// Doubles as the index of the unit's result slot in the scan outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub usize);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One reviewable slice of a diff: a single changed hunk of one file.
///
/// Units are built once per scan from the filtered hunks. The embedding is
/// attached after the embedder runs and the risk score is assigned by the
/// ranker; nothing else changes afterwards.
///
/// # Examples
///
/// ```
/// use duckgate_core::{ChangeType, DiffHunk, HunkRange, ReviewUnit, UnitId};
/// use std::path::PathBuf;
///
/// let hunk = DiffHunk {
///     file_path: PathBuf::from("src/auth.rs"),
///     range: HunkRange { old_start: 1, old_lines: 1, new_start: 1, new_lines: 2 },
///     content: "+let token = read_token();\n".into(),
///     change_type: ChangeType::Modify,
///     new_file: false,
/// };
/// let unit = ReviewUnit::from_hunk(UnitId(0), hunk);
/// assert_eq!(unit.fingerprint.len(), 64);
/// assert!(unit.embedding.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUnit {
    /// Discovery-order identity.
    pub id: UnitId,
    /// File the hunk belongs to.
    pub path: PathBuf,
    /// Hunk line ranges.
    pub range: HunkRange,
    /// Diff text of the hunk.
    pub diff: String,
    /// Classification of the change.
    pub change_type: ChangeType,
    /// Whether the hunk belongs to a newly created file.
    pub new_file: bool,
    /// Estimated backend token cost.
    pub token_estimate: usize,
    /// SHA-256 of the diff text, used as the cache key.
    pub fingerprint: String,
    /// Static risk score; higher is reviewed first.
    pub risk: u32,
    /// Embedding of the diff text, once computed.
    #[serde(skip)]
    pub embedding: Option<EmbeddingVector>,
}

impl ReviewUnit {
    /// Build a unit from a parsed hunk.
    pub fn from_hunk(id: UnitId, hunk: DiffHunk) -> Self {
        let fingerprint = fingerprint(&hunk.content);
        let token_estimate = estimate_tokens(&hunk.content);
        Self {
            id,
            path: hunk.file_path,
            range: hunk.range,
            diff: hunk.content,
            change_type: hunk.change_type,
            new_file: hunk.new_file,
            token_estimate,
            fingerprint,
            risk: 0,
            embedding: None,
        }
    }

    /// Attach the computed embedding.
    pub fn with_embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Human-readable identity: `path @@ -a,b +c,d @@`.
    pub fn label(&self) -> String {
        format!("{} {}", self.path.display(), self.range)
    }
}

fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fixed-dimension embedding of a piece of diff text.
///
/// # Examples
///
/// ```
/// use duckgate_core::EmbeddingVector;
///
/// let a = EmbeddingVector::new(vec![1.0, 0.0]);
/// let b = EmbeddingVector::new(vec![1.0, 0.0]);
/// assert!((a.cosine_similarity(&b) - 1.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    /// Wrap raw components.
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// Number of components.
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Borrow the raw components.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Consume into the raw components.
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Cosine similarity in `[-1, 1]`.
    ///
    /// Mismatched dimensions, empty vectors and zero vectors yield `0.0`.
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> f64 {
        cosine_similarity(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

/// Issue severity level for findings.
///
/// # Examples
///
/// ```
/// use duckgate_core::Severity;
///
/// let s: Severity = serde_json::from_str("\"critical\"").unwrap();
/// assert_eq!(s, Severity::Critical);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Must be fixed before committing.
    Critical,
    /// Likely problem worth a look.
    Warning,
    /// Informational observation.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl Severity {
    /// Returns `true` if `self` is at least as severe as `threshold`.
    ///
    /// Severity order: Critical > Warning > Info.
    ///
    /// # Examples
    ///
    /// ```
    /// use duckgate_core::Severity;
    ///
    /// assert!(Severity::Critical.meets_threshold(Severity::Warning));
    /// assert!(Severity::Warning.meets_threshold(Severity::Warning));
    /// assert!(!Severity::Info.meets_threshold(Severity::Warning));
    /// ```
    pub fn meets_threshold(self, threshold: Severity) -> bool {
        self.rank() <= threshold.rank()
    }

    pub(crate) fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
        }
    }
}

/// Check categories the reviewer is asked to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    CodeQuality,
    Security,
    CodeSmell,
    License,
    Documentation,
    TestCoverage,
    Performance,
    Accessibility,
    LlmSpecific,
}

impl Category {
    /// Every category, in prompt order.
    pub const ALL: [Category; 9] = [
        Category::CodeQuality,
        Category::Security,
        Category::CodeSmell,
        Category::License,
        Category::Documentation,
        Category::TestCoverage,
        Category::Performance,
        Category::Accessibility,
        Category::LlmSpecific,
    ];

    /// Display label used in prompts and reports.
    pub fn label(self) -> &'static str {
        match self {
            Category::CodeQuality => "Code Quality",
            Category::Security => "Security",
            Category::CodeSmell => "Code Smell",
            Category::License => "License & Compliance",
            Category::Documentation => "Documentation",
            Category::TestCoverage => "Test Coverage",
            Category::Performance => "Performance",
            Category::Accessibility => "Accessibility",
            Category::LlmSpecific => "AI/LLM-Specific",
        }
    }

    /// Wire identifier (`codeQuality`, `security`, ...).
    pub fn id(self) -> &'static str {
        match self {
            Category::CodeQuality => "codeQuality",
            Category::Security => "security",
            Category::CodeSmell => "codeSmell",
            Category::License => "license",
            Category::Documentation => "documentation",
            Category::TestCoverage => "testCoverage",
            Category::Performance => "performance",
            Category::Accessibility => "accessibility",
            Category::LlmSpecific => "llmSpecific",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A single issue reported by a reviewer backend.
///
/// # Examples
///
/// ```
/// use duckgate_core::{Category, Finding, Severity};
/// use std::path::PathBuf;
///
/// let finding = Finding {
///     file: PathBuf::from("src/auth.rs"),
///     line: Some(42),
///     severity: Severity::Critical,
///     category: Category::Security,
///     message: "Token compared with ==".into(),
///     suggestion: Some("Use a constant-time comparison".into()),
/// };
/// assert_eq!(finding.severity, Severity::Critical);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// File the finding points at.
    pub file: PathBuf,
    /// Line in the new version of the file, when identifiable.
    pub line: Option<u32>,
    /// Severity of the finding.
    pub severity: Severity,
    /// Check category.
    pub category: Category,
    /// Explanation of the issue.
    pub message: String,
    /// Optional fix suggestion.
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// Review verdict for one unit.
///
/// A result is either *passed* (no findings), *populated*, or the synthetic
/// *unavailable* result produced when the backend chain could not review the
/// unit. Unavailable results are never written back to the cache.
///
/// # Examples
///
/// ```
/// use duckgate_core::ReviewResult;
///
/// assert!(ReviewResult::passed().is_passed());
/// let down = ReviewResult::unavailable("401 unauthorized");
/// assert!(down.is_unavailable());
/// assert!(!down.is_passed());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    /// Findings in backend order.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Failure reason when no review could be obtained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl ReviewResult {
    /// A clean review.
    pub fn passed() -> Self {
        Self::default()
    }

    /// A review carrying `findings`.
    pub fn with_findings(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            unavailable: None,
        }
    }

    /// The synthetic "review unavailable" result.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            findings: Vec::new(),
            unavailable: Some(reason.into()),
        }
    }

    /// No findings and not unavailable.
    pub fn is_passed(&self) -> bool {
        self.findings.is_empty() && self.unavailable.is_none()
    }

    /// Whether this is the synthetic unavailable result.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.is_some()
    }

    /// Most severe finding, if any.
    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings
            .iter()
            .map(|f| f.severity)
            .min_by_key(|s| s.rank())
    }
}

/// Which findings block the commit.
///
/// # Examples
///
/// ```
/// use duckgate_core::{BlockOn, Severity};
///
/// let block: BlockOn = "warning".parse().unwrap();
/// assert!(block.blocks(Severity::Critical));
/// assert!(block.blocks(Severity::Warning));
/// assert!(!block.blocks(Severity::Info));
/// assert!(!BlockOn::None.blocks(Severity::Critical));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockOn {
    /// Block on critical findings only.
    #[default]
    Critical,
    /// Block on warnings and above.
    Warning,
    /// Block on any finding.
    All,
    /// Never block.
    None,
}

impl BlockOn {
    /// Whether a finding of `severity` blocks the commit.
    pub fn blocks(self, severity: Severity) -> bool {
        match self {
            BlockOn::Critical => severity.meets_threshold(Severity::Critical),
            BlockOn::Warning => severity.meets_threshold(Severity::Warning),
            BlockOn::All => true,
            BlockOn::None => false,
        }
    }
}

impl fmt::Display for BlockOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOn::Critical => write!(f, "critical"),
            BlockOn::Warning => write!(f, "warning"),
            BlockOn::All => write!(f, "all"),
            BlockOn::None => write!(f, "none"),
        }
    }
}

impl FromStr for BlockOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(BlockOn::Critical),
            "warning" => Ok(BlockOn::Warning),
            "all" => Ok(BlockOn::All),
            "none" => Ok(BlockOn::None),
            other => Err(format!("unknown block-on level: {other}")),
        }
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use duckgate_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

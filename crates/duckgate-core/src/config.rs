use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DuckgateError;
use crate::types::{BlockOn, Category};

/// File name looked up in the working directory and its parents.
pub const CONFIG_FILENAME: &str = ".duckgate.toml";

/// Top-level configuration loaded from `.duckgate.toml`.
///
/// Every section and field is defaulted, so an empty file is a valid
/// configuration with a single OpenAI backend.
///
/// # Examples
///
/// ```
/// use duckgate_core::DuckgateConfig;
///
/// let config = DuckgateConfig::default();
/// assert_eq!(config.pipeline.max_concurrent, 3);
/// assert_eq!(config.backends.len(), 1);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckgateConfig {
    /// Budgets, thresholds and the commit gate.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retry and failover tuning.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Semantic cache location.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Embedding provider used for cache lookups and deduplication.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Check categories sent to the reviewer.
    #[serde(default)]
    pub checks: ChecksConfig,
    /// Extra exclusion rules on top of the built-in ones.
    #[serde(default)]
    pub filter: FilterConfig,
    /// Ordered backend chain; the first entry is the primary.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig::default()]
}

impl Default for DuckgateConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            checks: ChecksConfig::default(),
            filter: FilterConfig::default(),
            backends: default_backends(),
        }
    }
}

impl DuckgateConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Io`] if the file cannot be read, or
    /// [`DuckgateError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use duckgate_core::DuckgateConfig;
    /// use std::path::Path;
    ///
    /// let config = DuckgateConfig::from_file(Path::new(".duckgate.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, DuckgateError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use duckgate_core::DuckgateConfig;
    ///
    /// let toml = r#"
    /// [pipeline]
    /// token_budget = 8000
    /// "#;
    /// let config = DuckgateConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.pipeline.token_budget, 8000);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, DuckgateError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve and validate the configuration for a run.
    ///
    /// An explicit `path` must exist. Without one, the nearest
    /// [`CONFIG_FILENAME`] above `start_dir` is used, falling back to
    /// defaults when none is found.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::FileNotFound`] for a missing explicit path,
    /// parse errors from [`from_file`](Self::from_file), and
    /// [`DuckgateError::Config`] when validation fails.
    pub fn load(path: Option<&Path>, start_dir: &Path) -> Result<Self, DuckgateError> {
        let config = match path {
            Some(p) if !p.exists() => return Err(DuckgateError::FileNotFound(p.to_path_buf())),
            Some(p) => Self::from_file(p)?,
            None => match find_config_file(start_dir) {
                Some(found) => Self::from_file(&found)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Config`] naming the first offending field.
    ///
    /// # Examples
    ///
    /// ```
    /// use duckgate_core::DuckgateConfig;
    ///
    /// let mut config = DuckgateConfig::default();
    /// config.pipeline.dedup_threshold = 0.5;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), DuckgateError> {
        let p = &self.pipeline;
        if p.max_batch_tokens == 0 {
            return Err(DuckgateError::Config(
                "pipeline.max_batch_tokens must be at least 1".into(),
            ));
        }
        if p.max_concurrent == 0 {
            return Err(DuckgateError::Config(
                "pipeline.max_concurrent must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("cache_threshold", p.cache_threshold),
            ("dedup_threshold", p.dedup_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DuckgateError::Config(format!(
                    "pipeline.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if p.dedup_threshold < p.cache_threshold {
            return Err(DuckgateError::Config(format!(
                "pipeline.dedup_threshold ({}) must not be below pipeline.cache_threshold ({})",
                p.dedup_threshold, p.cache_threshold
            )));
        }

        let r = &self.retry;
        if r.max_attempts == 0 {
            return Err(DuckgateError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if r.rotate_after == 0 {
            return Err(DuckgateError::Config(
                "retry.rotate_after must be at least 1".into(),
            ));
        }
        if r.multiplier < 1.0 {
            return Err(DuckgateError::Config(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&r.jitter) {
            return Err(DuckgateError::Config(
                "retry.jitter must be within [0, 1]".into(),
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(DuckgateError::Config(
                "embedding.dimensions must be at least 1".into(),
            ));
        }

        if self.backends.is_empty() {
            return Err(DuckgateError::Config(
                "at least one [[backends]] entry is required".into(),
            ));
        }
        for (i, backend) in self.backends.iter().enumerate() {
            if backend.provider.trim().is_empty() {
                return Err(DuckgateError::Config(format!(
                    "backends[{i}].provider must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Walk up from `start` looking for [`CONFIG_FILENAME`].
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILENAME))
        .find(|candidate| candidate.is_file())
}

/// Pipeline budgets, similarity thresholds and gate policy.
///
/// # Examples
///
/// ```
/// use duckgate_core::{BlockOn, PipelineConfig};
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.token_budget, 50_000);
/// assert_eq!(config.max_batch_tokens, 12_000);
/// assert_eq!(config.cache_threshold, 0.92);
/// assert_eq!(config.dedup_threshold, 0.95);
/// assert_eq!(config.block_on, BlockOn::Critical);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Scan-wide token budget; `0` means unlimited.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Per-request context window for one batch.
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,
    /// Minimum cosine similarity for a cache hit.
    #[serde(default = "default_cache_threshold")]
    pub cache_threshold: f64,
    /// Minimum cosine similarity for two units to share one review.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    /// Ceiling on batches in flight across all backends.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Which findings fail the commit.
    #[serde(default)]
    pub block_on: BlockOn,
}

fn default_token_budget() -> usize {
    50_000
}

fn default_max_batch_tokens() -> usize {
    12_000
}

fn default_cache_threshold() -> f64 {
    0.92
}

fn default_dedup_threshold() -> f64 {
    0.95
}

fn default_max_concurrent() -> usize {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            max_batch_tokens: default_max_batch_tokens(),
            cache_threshold: default_cache_threshold(),
            dedup_threshold: default_dedup_threshold(),
            max_concurrent: default_max_concurrent(),
            block_on: BlockOn::default(),
        }
    }
}

/// Retry, backoff and rotation tuning for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per batch on one backend, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on any computed backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential growth factor between retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction of it.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Consecutive rate limits before a backend is marked degraded.
    #[serde(default = "default_rotate_after")]
    pub rotate_after: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_rotate_after() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            rotate_after: default_rotate_after(),
        }
    }
}

/// Semantic cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Set to `false` to review every unit regardless of history.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Database location; defaults to `~/.duckgate/cache/reviews.db`.
    pub path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    /// Effective database path.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Config`] when no path is configured and the
    /// home directory cannot be determined.
    pub fn resolved_path(&self) -> Result<PathBuf, DuckgateError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(".duckgate").join("cache").join("reviews.db"))
            .ok_or_else(|| {
                DuckgateError::Config(
                    "cannot determine home directory; set [cache] path explicitly".into(),
                )
            })
    }
}

/// Configuration for the embedding provider.
///
/// `local` hashes diff tokens into a fixed-size vector and needs no network;
/// `openai` calls an OpenAI-compatible `/embeddings` endpoint.
///
/// # Examples
///
/// ```
/// use duckgate_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "local");
/// assert_eq!(config.dimensions, 384);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider (default: `"local"`).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model name for remote providers.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding dimensions (default: 384).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// API key for remote providers; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// Custom base URL for remote providers.
    pub base_url: Option<String>,
}

fn default_embedding_provider() -> String {
    "local".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dimensions() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Toggles for the check categories requested from the reviewer.
///
/// # Examples
///
/// ```
/// use duckgate_core::{Category, ChecksConfig};
///
/// let checks = ChecksConfig::default();
/// let enabled = checks.enabled_categories();
/// assert!(enabled.contains(&Category::Security));
/// assert!(!enabled.contains(&Category::Performance));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksConfig {
    #[serde(default = "default_true")]
    pub code_quality: bool,
    #[serde(default = "default_true")]
    pub security: bool,
    #[serde(default = "default_true")]
    pub code_smell: bool,
    #[serde(default)]
    pub license: bool,
    #[serde(default = "default_true")]
    pub documentation: bool,
    #[serde(default)]
    pub test_coverage: bool,
    #[serde(default)]
    pub performance: bool,
    #[serde(default)]
    pub accessibility: bool,
    #[serde(default)]
    pub llm_specific: bool,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            code_quality: true,
            security: true,
            code_smell: true,
            license: false,
            documentation: true,
            test_coverage: false,
            performance: false,
            accessibility: false,
            llm_specific: false,
        }
    }
}

impl ChecksConfig {
    /// Enabled categories in prompt order.
    pub fn enabled_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    /// Whether `category` is switched on.
    pub fn is_enabled(&self, category: Category) -> bool {
        match category {
            Category::CodeQuality => self.code_quality,
            Category::Security => self.security,
            Category::CodeSmell => self.code_smell,
            Category::License => self.license,
            Category::Documentation => self.documentation,
            Category::TestCoverage => self.test_coverage,
            Category::Performance => self.performance,
            Category::Accessibility => self.accessibility,
            Category::LlmSpecific => self.llm_specific,
        }
    }
}

/// User-supplied exclusions, applied after the built-in filter rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Additional glob patterns to skip before review.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Additional file extensions to skip before review.
    #[serde(default)]
    pub skip_extensions: Vec<String>,
    /// Files with more changed lines than this are skipped (default: 1000).
    #[serde(default = "default_max_changed_lines")]
    pub max_changed_lines: usize,
}

fn default_max_changed_lines() -> usize {
    1000
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            skip_patterns: Vec::new(),
            skip_extensions: Vec::new(),
            max_changed_lines: default_max_changed_lines(),
        }
    }
}

/// One reviewer backend in the failover chain.
///
/// # Examples
///
/// ```
/// use duckgate_core::BackendConfig;
///
/// let config = BackendConfig::default();
/// assert_eq!(config.provider, "openai");
/// assert_eq!(config.display_name(), "openai");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Label used in logs and diagnostics; defaults to the provider.
    pub name: Option<String>,
    /// Provider preset (`openai`, `anthropic`, `ollama`, ...).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier; the provider default when unset.
    pub model: Option<String>,
    /// Inline API key. Prefer `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: None,
            provider: default_provider(),
            model: None,
            api_key: None,
            api_key_env: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Name shown in logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.provider)
    }
}

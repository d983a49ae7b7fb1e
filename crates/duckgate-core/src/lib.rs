//! Core types, configuration, and error handling for duckgate.
//!
//! Everything the pipeline stages pass between each other lives here:
//! [`DuckgateError`], the [`DuckgateConfig`] read from `.duckgate.toml`, and
//! the unit and result types [`DiffHunk`], [`ReviewUnit`], [`EmbeddingVector`],
//! [`Finding`], [`ReviewResult`], [`Severity`], [`Category`] and [`BlockOn`].

mod config;
mod error;
mod types;

pub use config::{
    find_config_file, BackendConfig, CacheConfig, ChecksConfig, DuckgateConfig, EmbeddingConfig,
    FilterConfig, PipelineConfig, RetryConfig, CONFIG_FILENAME,
};
pub use error::DuckgateError;
pub use types::{
    estimate_tokens, BlockOn, Category, ChangeType, DiffHunk, EmbeddingVector, Finding, HunkRange,
    OutputFormat, ReviewResult, ReviewUnit, Severity, UnitId, CHARS_PER_TOKEN,
};

/// A convenience `Result` type for duckgate operations.
pub type Result<T> = std::result::Result<T, DuckgateError>;

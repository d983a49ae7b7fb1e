use std::path::PathBuf;

/// Errors that can occur across duckgate.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate renders it through `miette` at the boundary.
///
/// Per-unit review failures never show up here: they degrade to an
/// "unavailable" [`ReviewResult`](crate::ReviewResult) instead. Only
/// configuration problems, exhaustion of the whole backend chain, and
/// cancellation abort a scan.
///
/// # Examples
///
/// ```
/// use duckgate_core::DuckgateError;
///
/// let err = DuckgateError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum DuckgateError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(duckgate::config),
        help("run `duckgate init` for a commented default .duckgate.toml")
    )]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    #[diagnostic(code(duckgate::git))]
    Git(String),

    /// Diff parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Reviewer backend error that could not be degraded to a per-unit result.
    #[error("backend error: {0}")]
    Backend(String),

    /// Embedding provider failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector store failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Every backend in the configured chain is degraded or unusable.
    #[error("all review backends exhausted ({pending} batches unreviewed): {reason}")]
    #[diagnostic(
        code(duckgate::backends_exhausted),
        help("add a fallback entry under [[backends]] or retry once the provider recovers")
    )]
    AllBackendsExhausted {
        /// Batches that could not be dispatched anywhere.
        pending: usize,
        /// Last failure seen on the final backend.
        reason: String,
    },

    /// The scan was aborted before completion.
    #[error("scan cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: DuckgateError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = DuckgateError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = DuckgateError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert!(err.to_string().contains("/tmp/missing.toml"));
    }

    #[test]
    fn exhausted_reports_pending_batches() {
        let err = DuckgateError::AllBackendsExhausted {
            pending: 3,
            reason: "rate limited".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 batches"));
        assert!(msg.contains("rate limited"));
    }
}

//! The seam between the orchestrator and whatever performs a review.

use std::time::Duration;

use async_trait::async_trait;
use duckgate_core::{ReviewResult, ReviewUnit};

/// Why a backend call failed, classified by what the caller should do next.
///
/// # Examples
///
/// ```
/// use duckgate_review::backend::BackendError;
/// use std::time::Duration;
///
/// let err = BackendError::RateLimited { retry_after: Some(Duration::from_secs(3)) };
/// assert!(err.is_retryable());
/// assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
/// assert!(!BackendError::Fatal("401 Unauthorized".into()).is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Timeout, connection failure, or server error. Retry on the same backend.
    #[error("transient backend failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The provider throttled us. Retry, then rotate to a fallback.
    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    /// Authentication or malformed request. Terminal for the batch.
    #[error("{0}")]
    Fatal(String),
}

impl BackendError {
    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::Transient { retry_after, .. }
            | BackendError::RateLimited { retry_after } => *retry_after,
            BackendError::Fatal(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Fatal(_))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        BackendError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }
}

/// A reviewer that accepts a batch of units.
///
/// On success the returned vector holds exactly one result per input unit,
/// in input order.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    /// Label used in logs, diagnostics, and batch assignments.
    fn name(&self) -> &str;

    async fn submit(&self, units: &[ReviewUnit]) -> Result<Vec<ReviewResult>, BackendError>;
}

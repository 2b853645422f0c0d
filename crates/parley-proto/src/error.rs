//! Errors reported by language-model backends.

use std::time::Duration;

/// A failed backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The call did not finish within its time limit.
    #[error("backend call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The call failed in a way that may succeed on retry.
    #[error("backend call failed: {0}")]
    Transient(String),

    /// The backend cannot be reached at all (missing executable, bad credentials).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether the call site should try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(BackendError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(BackendError::Transient("exit 1".into()).is_retryable());
        assert!(!BackendError::Unavailable("not found".into()).is_retryable());
    }

    #[test]
    fn test_timeout_message_reports_seconds() {
        let err = BackendError::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "backend call timed out after 300s");
    }
}

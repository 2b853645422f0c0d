//! The opaque language-model call.

use crate::BackendError;
use async_trait::async_trait;
use std::time::Duration;

/// Per-call options passed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Model selector understood by the backend, if any.
    pub model: Option<String>,
    pub timeout: Duration,
}

/// A language-model backend: prompt in, text out.
///
/// Implementations should honor `options.timeout`. The caller enforces it as
/// well, after a short grace period for the backend to clean up.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str, options: &InvokeOptions) -> Result<String, BackendError>;
}

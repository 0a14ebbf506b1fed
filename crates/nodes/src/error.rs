//! Node-level error type.

use thiserror::Error;

/// Errors returned by a step executor.
///
/// The worker uses the variant to decide what it reports back:
/// - `Retryable` — the step is failed and may be retried by the control plane.
/// - `Fatal`     — the step is failed and retries are skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the step may be re-tried.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

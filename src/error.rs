//! Error taxonomy for the ingestion and versioning pipeline.
//!
//! Four failure classes with distinct handling:
//! - [`PipelineError::Validation`] — malformed input document; fatal for that
//!   document only, never aborts a batch.
//! - [`PipelineError::TransientStore`] — timeout or connection failure;
//!   retryable by the caller. The pipeline never retries silently, to avoid
//!   masking partial multi-store writes.
//! - [`PipelineError::Consistency`] — stores disagree; reported, not
//!   auto-corrected.
//! - [`PipelineError::StateMachine`] — a version lifecycle precondition was
//!   violated; rejected before any side effect.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid document: {0}")]
    Validation(String),

    #[error("transient {system} failure: {message}")]
    TransientStore { system: String, message: String },

    #[error("consistency mismatch: {0}")]
    Consistency(String),

    #[error("state machine violation: {0}")]
    StateMachine(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Validation(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        PipelineError::StateMachine(msg.into())
    }

    /// Whether the caller may retry without changing any data.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientStore { .. })
    }
}

/// Classify a reqwest failure: timeouts and connection errors are transient.
pub fn is_transient_http(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

//! Error types for the analysis pipeline.

use thiserror::Error;

/// Failure reported by the completion capability.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Completion service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Completion API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Completion returned unparseable output: {0}")]
    Malformed(String),
}

/// Failure turning a chunk into a typed stage result.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{stage} dispatch failed: {source}")]
    Completion {
        stage: &'static str,
        #[source]
        source: CompletionError,
    },

    #[error("{stage} returned a malformed payload: {reason}")]
    MalformedPayload { stage: &'static str, reason: String },
}

impl DispatchError {
    /// True when the completion capability itself failed (as opposed to
    /// returning something we could not interpret).
    pub fn is_transport(&self) -> bool {
        matches!(self, DispatchError::Completion { .. })
    }
}

/// Failure of an enclosing pipeline stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: DispatchError,
    },
}

impl PipelineError {
    pub fn stage(stage: &'static str, source: DispatchError) -> Self {
        PipelineError::Stage { stage, source }
    }
}

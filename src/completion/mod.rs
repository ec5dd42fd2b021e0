//! The external text-completion capability.
//!
//! The pipeline only depends on [`CompletionProvider`]; the Ollama client is
//! one implementation of it.

pub mod ollama;

#[cfg(test)]
pub mod scripted;

use crate::error::CompletionError;
use async_trait::async_trait;
use serde_json::Value;

pub use ollama::{OllamaConfig, OllamaProvider};

/// A structured completion result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Parsed JSON payload returned by the model.
    pub payload: Value,
    /// Model that produced the payload.
    pub model: String,
    /// Prompt plus completion tokens, as reported by the service.
    pub tokens_used: u64,
}

/// Contract for the completion capability.
///
/// Implementations may fail, time out, or be entirely unavailable; callers
/// must not assume any ordering or timing beyond eventual resolution.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Model identifier used for reporting.
    fn model(&self) -> &str;

    /// Send `prompt` and return the structured payload. `schema_hint`
    /// describes the JSON shape the caller expects back.
    async fn complete(&self, prompt: &str, schema_hint: &str) -> Result<Completion, CompletionError>;
}

//! Scripted completion provider for tests.

use super::{Completion, CompletionProvider};
use crate::error::CompletionError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Answers each prompt with the first rule whose needle occurs in it.
pub struct ScriptedProvider {
    rules: Vec<(String, Result<Value, CompletionError>)>,
    fallback: Result<Value, CompletionError>,
    tokens_per_call: u64,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Provider that answers every prompt with `fallback`.
    pub fn new(fallback: Result<Value, CompletionError>) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
            tokens_per_call: 100,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Add a rule matched by substring.
    pub fn on(mut self, needle: &str, response: Result<Value, CompletionError>) -> Self {
        self.rules.push((needle.to_string(), response));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, prompt: &str, _schema_hint: &str) -> Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let response = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response)
            .unwrap_or(&self.fallback);

        response.clone().map(|payload| Completion {
            payload,
            model: "scripted-model".to_string(),
            tokens_used: self.tokens_per_call,
        })
    }
}

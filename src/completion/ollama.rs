//! Ollama chat API client.
//!
//! Sends one non-streaming chat request per completion with JSON output
//! mode enabled, then parses the assistant message as the payload.

use super::{Completion, CompletionProvider};
use crate::error::CompletionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Configuration for the Ollama client.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
        }
    }
}

impl From<&crate::config::ModelConfig> for OllamaConfig {
    fn from(model: &crate::config::ModelConfig) -> Self {
        Self {
            ollama_url: model.ollama_url.clone(),
            model_name: model.name.clone(),
            temperature: model.temperature,
            timeout_seconds: model.timeout_seconds,
        }
    }
}

/// Message in the chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

/// Completion provider backed by a local or remote Ollama server.
pub struct OllamaProvider {
    config: OllamaConfig,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new client.
    pub fn new(config: OllamaConfig) -> Result<Self, CompletionError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| CompletionError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, http_client })
    }

    fn map_send_error(&self, e: reqwest::Error) -> CompletionError {
        self.send_failure(e.is_timeout(), e.is_connect(), &e)
    }

    fn send_failure(&self, timed_out: bool, unreachable: bool, detail: &dyn std::fmt::Display) -> CompletionError {
        if timed_out {
            CompletionError::Timeout(self.config.timeout_seconds)
        } else if unreachable {
            CompletionError::Unavailable(format!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.config.ollama_url
            ))
        } else {
            CompletionError::Unavailable(format!("Failed to send request: {}", detail))
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn model(&self) -> &str {
        &self.config.model_name
    }

    async fn complete(&self, prompt: &str, schema_hint: &str) -> Result<Completion, CompletionError> {
        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));

        let request = OllamaChatRequest {
            model: &self.config.model_name,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!("{}\n\nRespond with JSON matching:\n{}", SYSTEM_PROMPT, schema_hint),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        debug!("Sending completion request ({} prompt chars)", prompt.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(format!("Failed to parse Ollama response: {}", e)))?;

        let payload = parse_json_content(&chat_response.message.content)?;

        Ok(Completion {
            payload,
            model: chat_response
                .model
                .unwrap_or_else(|| self.config.model_name.clone()),
            tokens_used: chat_response.prompt_eval_count + chat_response.eval_count,
        })
    }
}

/// Parse the assistant content as JSON, tolerating a surrounding code fence.
fn parse_json_content(content: &str) -> Result<Value, CompletionError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(unfenced).map_err(|e| CompletionError::Malformed(e.to_string()))
}

/// System prompt shared by every request.
const SYSTEM_PROMPT: &str = r#"You are a careful relationship-safety analyst.
You read anonymized dating-app conversations and answer ONLY with a single JSON object.
Do not add explanations, markdown, or text outside the JSON object."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_config_default() {
        let config = OllamaConfig::default();
        assert_eq!(config.model_name, "llama3.2:latest");
        assert_eq!(config.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn test_parse_json_content() {
        let value = parse_json_content("{\"risk_level\": \"red\"}").unwrap();
        assert_eq!(value["risk_level"], "red");

        let fenced = parse_json_content("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(fenced["a"], 1);

        assert!(matches!(
            parse_json_content("not json"),
            Err(CompletionError::Malformed(_))
        ));
    }

    #[test]
    fn test_send_failures_are_classified() {
        let provider = OllamaProvider::new(OllamaConfig {
            ollama_url: "http://ollama.internal:11434".to_string(),
            timeout_seconds: 42,
            ..OllamaConfig::default()
        })
        .unwrap();

        assert!(matches!(
            provider.send_failure(true, false, &"deadline"),
            CompletionError::Timeout(42)
        ));

        match provider.send_failure(false, true, &"refused") {
            CompletionError::Unavailable(message) => {
                assert!(message.contains("http://ollama.internal:11434"))
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let builder_error = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        match provider.map_send_error(builder_error) {
            CompletionError::Unavailable(message) => {
                assert!(message.starts_with("Failed to send request"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

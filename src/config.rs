//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.matchlens.toml` files.

use crate::escalation::EscalationConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".matchlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub sampling: SamplingSettings,

    #[serde(default)]
    pub chunking: ChunkingSettings,

    #[serde(default)]
    pub escalation: EscalationConfig,

    #[serde(default)]
    pub significance: SignificanceSettings,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "matchlens_report.md".to_string()
}

/// Completion model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Estimated price per 1000 tokens, used for budget tracking.
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            cost_per_1k_tokens: 0.0,
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

/// Recency sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    pub horizon_days: i64,
    pub total_budget: usize,
    pub recent_weight: f64,
    pub max_conversations: usize,
    pub max_messages_per_conversation: usize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            horizon_days: 90,
            total_budget: 400,
            recent_weight: 0.7,
            max_conversations: 20,
            max_messages_per_conversation: 50,
        }
    }
}

/// Token chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens_per_chunk: usize,
    pub chars_per_token: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 6000,
            chars_per_token: 4,
        }
    }
}

/// Significance scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceSettings {
    pub min_messages: usize,
    pub sample_size: usize,
    pub batch_size: usize,
    pub pacing_ms: u64,
    pub fallback_floor: usize,
    pub fallback_multiplier: f64,
    pub fallback_score: u8,
}

impl Default for SignificanceSettings {
    fn default() -> Self {
        Self {
            min_messages: 3,
            sample_size: 5,
            batch_size: 5,
            pacing_ms: 1000,
            fallback_floor: 20,
            fallback_multiplier: 2.0,
            fallback_score: 50,
        }
    }
}

/// Cost budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Spending limit in USD for one run. Zero means unlimited.
    pub limit_usd: f64,

    /// Skip conditional evaluators once the limit is exceeded.
    pub enforce: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_usd: 0.0,
            enforce: false,
        }
    }
}

impl BudgetConfig {
    /// Limit as used by the cost tracker.
    pub fn effective_limit(&self) -> f64 {
        if self.limit_usd > 0.0 {
            self.limit_usd
        } else {
            f64::INFINITY
        }
    }
}

/// Stage sequencing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run deep analysis for every user instead of only on escalation.
    pub always_run_deep_analysis: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            always_run_deep_analysis: true,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.matchlens.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE);

        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings. Optional
    /// arguments only override when given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if let Some(days) = args.horizon_days {
            self.sampling.horizon_days = days;
        }
        if let Some(max_tokens) = args.max_tokens_per_chunk {
            self.chunking.max_tokens_per_chunk = max_tokens;
        }
        if let Some(batch_size) = args.batch_size {
            self.significance.batch_size = batch_size;
        }

        if let Some(limit) = args.budget {
            self.budget.limit_usd = limit;
            self.budget.enforce = true;
        }
        if args.conditional_deep {
            self.pipeline.always_run_deep_analysis = false;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Log level for this run. `--quiet` wins over a verbose config.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

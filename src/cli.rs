//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::RiskLevel;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;

/// MatchLens - layered risk and insight reports for dating-app conversations
///
/// Samples a user's conversation history, runs it through a local model in
/// escalating analysis stages, and writes a Markdown or JSON report.
///
/// Examples:
///   matchlens --input export.json
///   matchlens --input export.json --significance --format json
///   matchlens --input export.json --fail-on orange
///   matchlens --input export.json --dry-run
///   matchlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Normalized conversation dataset (JSON)
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub input: Option<PathBuf>,

    /// Ollama model to use for analysis
    ///
    /// Can also be set via MATCHLENS_MODEL or .matchlens.toml.
    #[arg(short, long, env = "MATCHLENS_MODEL")]
    pub model: Option<String>,

    /// Output file path for the report
    ///
    /// Defaults to the config file's general.output.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .matchlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Temperature for model responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Ignore messages older than this many days
    #[arg(long, value_name = "DAYS")]
    pub horizon_days: Option<i64>,

    /// Token budget per chunk sent to the model
    #[arg(long, value_name = "TOKENS")]
    pub max_tokens_per_chunk: Option<usize>,

    /// Conversations scored concurrently per significance batch
    #[arg(long, value_name = "NUM")]
    pub batch_size: Option<usize>,

    /// Spending limit in USD (> 0); conditional evaluators are skipped once exceeded
    #[arg(long, value_name = "USD")]
    pub budget: Option<f64>,

    /// Only run deep analysis when the safety stage escalates
    #[arg(long)]
    pub conditional_deep: bool,

    /// Also score every conversation for significance
    #[arg(long, conflicts_with = "significance_only")]
    pub significance: bool,

    /// Only score conversations for significance
    #[arg(long)]
    pub significance_only: bool,

    /// Reference time for recency sampling (RFC 3339); defaults to now
    #[arg(long, value_name = "TIME")]
    pub as_of: Option<DateTime<Utc>>,

    /// Fail if the overall risk is at or above this level
    ///
    /// Useful for automated review. Exit code 2 when the threshold is met.
    /// Values: green, yellow, orange, red
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<RiskLevel>,

    /// Dry run: group, sample and chunk without calling the model
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .matchlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Which pipelines a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Staged,
    StagedWithSignificance,
    SignificanceOnly,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn run_mode(&self) -> RunMode {
        if self.significance_only {
            RunMode::SignificanceOnly
        } else if self.significance {
            RunMode::StagedWithSignificance
        } else {
            RunMode::Staged
        }
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref input) = self.input {
            if !input.is_file() {
                return Err(format!("Input file does not exist: {}", input.display()));
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !self.dry_run && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.batch_size == Some(0) {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.max_tokens_per_chunk == Some(0) {
            return Err("Chunk token budget must be at least 1".to_string());
        }

        if let Some(days) = self.horizon_days {
            if days <= 0 {
                return Err("Horizon must be at least 1 day".to_string());
            }
        }

        if let Some(budget) = self.budget {
            if !budget.is_finite() || budget <= 0.0 {
                return Err("Budget must be greater than zero".to_string());
            }
        }

        Ok(())
    }
}

//! MatchLens - layered risk and insight reports for dating-app conversations
//!
//! A CLI tool that runs a user's conversation history through a local
//! Ollama model in escalating analysis stages and writes a report.
//!
//! Exit codes:
//!   0 - Success (overall risk below threshold, or no --fail-on set)
//!   1 - Runtime error (dataset, config, model connection, etc.)
//!   2 - Overall risk at or above the --fail-on level

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use matchlens::analysis::StageRunner;
use matchlens::chunker::TokenChunker;
use matchlens::cli::{Args, OutputFormat, RunMode};
use matchlens::completion::{OllamaConfig, OllamaProvider};
use matchlens::config::{Config, CONFIG_FILE};
use matchlens::cost::{CostTracker, Pricing};
use matchlens::dispatch::Dispatcher;
use matchlens::escalation::EscalationEngine;
use matchlens::grouping::group_conversations;
use matchlens::models::{Conversation, Dataset};
use matchlens::orchestrator::{OrchestratorConfig, StageOrchestrator};
use matchlens::prompts::DefaultPrompts;
use matchlens::report::{self, Report, ReportMetadata};
use matchlens::sampling::{segment_by_recency, Sampler, SamplingConfig};
use matchlens::significance::{SignificanceConfig, SignificanceScorer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let config = match load_config(&args) {
        Ok(mut config) => {
            config.merge_with_args(&args);
            config
        }
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(config.log_level(args.quiet));

    info!("MatchLens v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .matchlens.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the model, sampling, escalation thresholds, and budget.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the configured pipelines. Returns exit code (0 or 2).
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let input = args
        .input
        .clone()
        .context("--input is required")?;
    let dataset = Dataset::load(&input)?;
    let now = args.as_of.unwrap_or_else(Utc::now);

    println!("📥 Loaded {} messages for user {}", dataset.messages.len(), dataset.user_id);
    let conversations = group_conversations(&dataset.messages, &dataset.user_id);
    info!("Grouped into {} conversations", conversations.len());

    if args.dry_run {
        return handle_dry_run(&config, &conversations, now);
    }

    println!("🤖 Connecting to model...");
    println!("   Model: {}", config.model.name);
    println!("   Ollama: {}", config.model.ollama_url);
    println!("   Timeout: {}s", config.model.timeout_seconds);

    let provider = OllamaProvider::new(OllamaConfig::from(&config.model))?;
    let costs = Arc::new(CostTracker::new(config.budget.effective_limit()));
    let dispatcher = Dispatcher::new(
        Arc::new(provider),
        Arc::new(DefaultPrompts),
        Pricing::new(config.model.cost_per_1k_tokens),
        costs.clone(),
    );

    let mode = args.run_mode();

    let analysis = if mode == RunMode::SignificanceOnly {
        None
    } else {
        println!("\n🔬 Running staged analysis...");
        let runner = StageRunner::new(
            dispatcher.clone(),
            TokenChunker::from(&config.chunking),
            EscalationEngine::new(config.escalation.clone()),
        );
        let orchestrator = StageOrchestrator::new(
            runner,
            Sampler::new(SamplingConfig::from(&config.sampling)),
            OrchestratorConfig::from(&config),
        );
        Some(
            orchestrator
                .run_conversations(&dataset.user_id, &conversations, now)
                .await?,
        )
    };

    let significance = if mode == RunMode::Staged {
        None
    } else {
        println!("\n💬 Scoring conversation significance...");
        let mut scorer =
            SignificanceScorer::new(dispatcher.clone(), SignificanceConfig::from(&config.significance));
        if !args.quiet {
            scorer = scorer.with_progress(progress_bar(conversations.len() as u64));
        }
        Some(scorer.score(&conversations).await)
    };

    println!("\n📝 Generating report...");
    let duration = start_time.elapsed().as_secs_f64();
    let report = Report {
        metadata: ReportMetadata {
            dataset: input.display().to_string(),
            user_id: dataset.user_id.clone(),
            generated_at: Utc::now(),
            model_used: config.model.name.clone(),
            duration_seconds: duration,
        },
        analysis,
        significance,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = PathBuf::from(&config.general.output);
    report::write_report(&output, &output_path)?;

    print_summary(&report, costs.total_cost());
    println!("\n✅ Analysis complete! Report saved to: {}", output_path.display());

    if let (Some(threshold), Some(analysis)) = (args.fail_on, report.analysis.as_ref()) {
        if analysis.overall_risk >= threshold {
            eprintln!(
                "\n⛔ Overall risk {} is at or above {}. Failing (exit code 2).",
                analysis.overall_risk, threshold
            );
            return Ok(2);
        }
    }

    Ok(0)
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn print_summary(report: &Report, total_cost: f64) {
    println!("\n📊 Analysis Summary:");
    if let Some(ref analysis) = report.analysis {
        println!(
            "   Overall risk: {} {}",
            analysis.overall_risk.emoji(),
            analysis.overall_risk
        );
        println!(
            "   Escalated: {}",
            if analysis.escalated { "yes" } else { "no" }
        );
        println!(
            "   Sampled: {} messages from {} conversations",
            analysis.sample.sampled_messages, analysis.sample.sampled_conversations
        );
        if let Some(ref deep) = analysis.deep {
            for signal in &deep.signals {
                println!("   ↳ {}", signal.reason());
            }
            if !deep.skipped.is_empty() {
                warn!("{} evaluator(s) skipped over budget", deep.skipped.len());
            }
        }
    }
    if let Some(ref significance) = report.significance {
        let stats = &significance.statistics;
        println!(
            "   Significant conversations: {}/{} ({:.1}%)",
            stats.total_significant, stats.total_conversations, stats.percentage_significant
        );
    }
    println!("   Estimated cost: ${:.4}", total_cost);
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

/// Handle --dry-run: show what would be sent, without calling the model.
fn handle_dry_run(
    config: &Config,
    conversations: &[Conversation],
    now: chrono::DateTime<Utc>,
) -> Result<i32> {
    println!("\n🔍 Dry run: sampling and chunking (no model calls)...\n");

    let sampler = Sampler::new(SamplingConfig::from(&config.sampling));
    let sample = sampler.sample(conversations, now);
    let chunker = TokenChunker::from(&config.chunking);

    println!(
        "   {} conversations, {} messages sampled ({} outside the {}-day window)",
        sample.conversations.len(),
        sample.message_count,
        sample.excluded_by_window,
        config.sampling.horizon_days
    );

    if sample.is_empty() {
        println!("   Nothing to analyze.");
    } else {
        for conversation in &sample.conversations {
            println!(
                "     💬 {} ({} messages, ~{} tokens)",
                conversation.counterparty_id,
                conversation.len(),
                chunker.unit_tokens(conversation)
            );
        }

        let chunks = chunker.chunk(sample.conversations.clone());
        let segments = segment_by_recency(&sample.chronological_messages(), now);
        let segment_chunks = chunker.chunk(segments.clone());
        println!(
            "\n   Conversation stages: {} chunk(s) each (budget {} tokens)",
            chunks.len(),
            chunker.max_tokens_per_chunk
        );
        println!(
            "   Temporal stages: {} segment(s) in {} chunk(s)",
            segments.len(),
            segment_chunks.len()
        );
    }

    let eligible = conversations
        .iter()
        .filter(|c| c.len() >= config.significance.min_messages)
        .count();
    println!(
        "   Significance: {} of {} conversations eligible",
        eligible,
        conversations.len()
    );

    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is initialized, since the file can set the log level.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}. Using defaults.", CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}

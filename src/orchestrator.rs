//! Stage orchestrator.
//!
//! Sequences the foundation (safety) stage and the deep-analysis stage,
//! threads per-stage cost and duration through, and assembles the final
//! [`OrchestratorResult`]. All completion calls go through the
//! [`StageRunner`]; the orchestrator only composes.

use crate::analysis::{
    AnyStageOutput, AttachmentOutput, ChronologyOutput, CrisisOutput, GrowthOutput, PatternOutput,
    RiskOutput, SafetyOutput, StageKind, StageRunner,
};
use crate::error::PipelineError;
use crate::escalation::EscalationSignal;
use crate::grouping::group_conversations;
use crate::models::{Conversation, Dataset, RiskLevel, Severity};
use crate::sampling::{segment_by_recency, Sample, Sampler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// Policy switches for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Run the deep-analysis stage for every user, not only when the
    /// safety stage escalated.
    pub always_run_deep_analysis: bool,
    /// Skip conditional evaluators once the cost budget is exceeded.
    pub enforce_budget: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            always_run_deep_analysis: true,
            enforce_budget: false,
        }
    }
}

impl From<&crate::config::Config> for OrchestratorConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            always_run_deep_analysis: config.pipeline.always_run_deep_analysis,
            enforce_budget: config.budget.enforce,
        }
    }
}

/// Cost and timing of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetric {
    pub stage: StageKind,
    pub duration_ms: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub escalate: bool,
}

impl StageMetric {
    fn of(output: AnyStageOutput<'_>) -> Self {
        let metadata = output.metadata();
        Self {
            stage: output.kind(),
            duration_ms: metadata.duration_ms,
            tokens_used: metadata.tokens_used,
            cost_usd: metadata.cost_usd,
            escalate: output.escalate(),
        }
    }
}

/// What was analyzed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSummary {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub sampled_conversations: usize,
    pub sampled_messages: usize,
    pub excluded_by_window: usize,
    pub span_days: i64,
}

/// Foundation stage report.
#[derive(Debug, Clone, Serialize)]
pub struct FoundationReport {
    pub safety: SafetyOutput,
    pub signal: Option<EscalationSignal>,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

/// Deep-analysis stage report.
#[derive(Debug, Clone, Serialize)]
pub struct DeepAnalysisReport {
    pub pattern: PatternOutput,
    pub chronology: ChronologyOutput,
    pub risk: RiskOutput,
    pub attachment: Option<AttachmentOutput>,
    pub growth: Option<GrowthOutput>,
    pub crisis: Option<CrisisOutput>,
    /// Signals raised inside the deep stage, in evaluation order.
    pub signals: Vec<EscalationSignal>,
    /// Evaluators whose predicate fired but which were not run.
    pub skipped: Vec<StageKind>,
    pub duration_ms: u64,
    pub cost_usd: f64,
}

impl DeepAnalysisReport {
    fn outputs(&self) -> Vec<AnyStageOutput<'_>> {
        let mut outputs = vec![
            AnyStageOutput::Pattern(&self.pattern),
            AnyStageOutput::Chronology(&self.chronology),
            AnyStageOutput::Risk(&self.risk),
        ];
        outputs.extend(self.attachment.as_ref().map(AnyStageOutput::Attachment));
        outputs.extend(self.growth.as_ref().map(AnyStageOutput::Growth));
        outputs.extend(self.crisis.as_ref().map(AnyStageOutput::Crisis));
        outputs
    }
}

/// Final record of one analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResult {
    pub user_id: String,
    pub sample: SampleSummary,
    pub foundation: FoundationReport,
    /// `None` only when deep analysis is conditional and safety did not escalate.
    pub deep: Option<DeepAnalysisReport>,
    pub stages: Vec<StageMetric>,
    pub total_duration_ms: u64,
    pub total_cost_usd: f64,
    pub escalated: bool,
    pub escalation_reason: String,
    pub overall_risk: RiskLevel,
    pub completed_at: DateTime<Utc>,
}

impl OrchestratorResult {
    /// Every stage output in run order.
    pub fn outputs(&self) -> Vec<AnyStageOutput<'_>> {
        let mut outputs = vec![AnyStageOutput::Safety(&self.foundation.safety)];
        if let Some(deep) = &self.deep {
            outputs.extend(deep.outputs());
        }
        outputs
    }
}

/// Runs the full analysis for one user.
pub struct StageOrchestrator {
    runner: StageRunner,
    sampler: Sampler,
    config: OrchestratorConfig,
}

impl StageOrchestrator {
    pub fn new(runner: StageRunner, sampler: Sampler, config: OrchestratorConfig) -> Self {
        Self {
            runner,
            sampler,
            config,
        }
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    /// Group, sample and analyze a dataset relative to `now`.
    pub async fn run(&self, dataset: &Dataset, now: DateTime<Utc>) -> Result<OrchestratorResult, PipelineError> {
        let conversations = group_conversations(&dataset.messages, &dataset.user_id);
        self.run_conversations(&dataset.user_id, &conversations, now).await
    }

    /// Analyze already-grouped conversations.
    pub async fn run_conversations(
        &self,
        user_id: &str,
        conversations: &[Conversation],
        now: DateTime<Utc>,
    ) -> Result<OrchestratorResult, PipelineError> {
        let started = Instant::now();
        let sample = self.sampler.sample(conversations, now);
        let summary = SampleSummary {
            total_conversations: conversations.len(),
            total_messages: conversations.iter().map(Conversation::len).sum(),
            sampled_conversations: sample.conversations.len(),
            sampled_messages: sample.message_count,
            excluded_by_window: sample.excluded_by_window,
            span_days: sample.span_days(),
        };
        info!(
            "Analyzing {} messages from {} conversations for {}",
            summary.sampled_messages, summary.sampled_conversations, user_id
        );

        let foundation = self.run_foundation(&sample).await?;
        let escalated = foundation.safety.escalate;
        let escalation_reason = match &foundation.signal {
            Some(signal) => signal.reason(),
            None => format!(
                "Safety risk level {} is below the escalation threshold ({}) with no critical flags",
                foundation.safety.payload.risk_level,
                self.runner.escalation().config().risk_threshold
            ),
        };

        let deep = if self.config.always_run_deep_analysis || escalated {
            Some(self.run_deep(&sample, &foundation.safety, now).await?)
        } else {
            info!("Safety stage did not escalate; skipping deep analysis");
            None
        };

        let overall_risk = overall_risk(&foundation, deep.as_ref());
        let mut stages = vec![StageMetric::of(AnyStageOutput::Safety(&foundation.safety))];
        if let Some(deep) = &deep {
            stages.extend(deep.outputs().into_iter().map(StageMetric::of));
        }
        let total_cost_usd = foundation.cost_usd + deep.as_ref().map_or(0.0, |d| d.cost_usd);

        info!(
            "Analysis complete: overall risk {}, cost ${:.4}",
            overall_risk, total_cost_usd
        );

        Ok(OrchestratorResult {
            user_id: user_id.to_string(),
            sample: summary,
            foundation,
            deep,
            stages,
            total_duration_ms: started.elapsed().as_millis() as u64,
            total_cost_usd,
            escalated,
            escalation_reason,
            overall_risk,
            completed_at: Utc::now(),
        })
    }

    async fn run_foundation(&self, sample: &Sample) -> Result<FoundationReport, PipelineError> {
        let started = Instant::now();
        let safety = self.runner.safety(sample).await?;
        let signal = self.runner.escalation().evaluate_safety(&safety);
        let cost_usd = safety.metadata.cost_usd;
        Ok(FoundationReport {
            safety,
            signal,
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd,
        })
    }

    async fn run_deep(
        &self,
        sample: &Sample,
        safety: &SafetyOutput,
        now: DateTime<Utc>,
    ) -> Result<DeepAnalysisReport, PipelineError> {
        let started = Instant::now();
        let engine = self.runner.escalation();
        let segments = segment_by_recency(&sample.chronological_messages(), now);

        let (pattern, chronology) = futures::try_join!(
            self.runner.pattern(sample),
            self.runner.chronology(&segments, sample.span_days()),
        )?;
        let risk = self.runner.risk(sample, safety).await?;

        let mut signals = Vec::new();
        let mut skipped = Vec::new();

        let attachment = match engine.evaluate_pattern(&pattern) {
            Some(signal) => {
                signals.push(signal);
                if self.over_budget(StageKind::Attachment) {
                    skipped.push(StageKind::Attachment);
                    None
                } else {
                    Some(self.runner.attachment(sample, &pattern).await?)
                }
            }
            None => None,
        };

        let growth = match engine.evaluate_chronology(&chronology) {
            Some(signal) => {
                signals.push(signal);
                if self.over_budget(StageKind::Growth) {
                    skipped.push(StageKind::Growth);
                    None
                } else {
                    Some(self.runner.growth(&segments, &chronology).await?)
                }
            }
            None => None,
        };

        let crisis = match engine.evaluate_risk(&risk) {
            Some(signal) => {
                signals.push(signal);
                if self.over_budget(StageKind::Crisis) {
                    skipped.push(StageKind::Crisis);
                    None
                } else {
                    Some(self.runner.crisis(sample, &risk).await?)
                }
            }
            None => None,
        };

        let mut report = DeepAnalysisReport {
            pattern,
            chronology,
            risk,
            attachment,
            growth,
            crisis,
            signals,
            skipped,
            duration_ms: 0,
            cost_usd: 0.0,
        };
        report.cost_usd = report.outputs().iter().map(|o| o.metadata().cost_usd).sum();
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    fn over_budget(&self, kind: StageKind) -> bool {
        let costs = self.runner.dispatcher().costs();
        if self.config.enforce_budget && costs.is_budget_exceeded() {
            warn!(
                "Budget of ${:.2} exceeded (${:.4} spent); skipping {} evaluator",
                costs.budget(),
                costs.total_cost(),
                kind
            );
            true
        } else {
            false
        }
    }
}

/// Worst of the safety level and the crisis urgency, when a crisis
/// evaluation ran.
fn overall_risk(foundation: &FoundationReport, deep: Option<&DeepAnalysisReport>) -> RiskLevel {
    let crisis = deep
        .and_then(|d| d.crisis.as_ref())
        .map(|c| match c.payload.urgency {
            Severity::Low => RiskLevel::Green,
            Severity::Medium => RiskLevel::Yellow,
            Severity::High => RiskLevel::Orange,
            Severity::Critical => RiskLevel::Red,
        })
        .unwrap_or_default();
    foundation.safety.payload.risk_level.max(crisis)
}

//! Stage analyzers.
//!
//! [`StageRunner`] turns a sample into one aggregated output per stage:
//! chunk the units, dispatch each chunk, merge the chunk results, then let
//! the escalation engine record its verdict on the merged output.

use super::aggregator::{aggregate_outputs, Aggregate};
use super::stages::*;
use crate::chunker::{ChunkUnit, TokenChunker};
use crate::dispatch::Dispatcher;
use crate::error::PipelineError;
use crate::escalation::EscalationEngine;
use crate::models::{Conversation, TimeSegment};
use crate::sampling::Sample;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

const EMPTY_SUMMARY: &str = "No messages fell inside the analysis window.";

/// A payload the runner can dispatch, merge and neutralize.
pub trait Findings: Aggregate + DeserializeOwned + Send {
    fn summary_mut(&mut self) -> &mut String;
}

macro_rules! impl_findings {
    ($($ty:ty),+) => {
        $(impl Findings for $ty {
            fn summary_mut(&mut self) -> &mut String {
                &mut self.summary
            }
        })+
    };
}

impl_findings!(
    SafetyFindings,
    PatternFindings,
    ChronologyFindings,
    RiskFindings,
    AttachmentFindings,
    GrowthFindings,
    CrisisFindings
);

/// Runs individual stages against the completion dispatcher.
#[derive(Clone)]
pub struct StageRunner {
    dispatcher: Dispatcher,
    chunker: TokenChunker,
    escalation: EscalationEngine,
}

impl StageRunner {
    pub fn new(dispatcher: Dispatcher, chunker: TokenChunker, escalation: EscalationEngine) -> Self {
        Self {
            dispatcher,
            chunker,
            escalation,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn escalation(&self) -> &EscalationEngine {
        &self.escalation
    }

    pub fn chunker(&self) -> &TokenChunker {
        &self.chunker
    }

    /// Foundation: overall safety assessment of the sampled conversations.
    pub async fn safety(&self, sample: &Sample) -> Result<SafetyOutput, PipelineError> {
        let output: SafetyOutput = self
            .run_stage(
                StageKind::Safety,
                sample.conversations.clone(),
                Conversation::transcript,
                None,
            )
            .await?;
        let escalate = self.escalation.should_escalate_safety(&output);
        Ok(output.with_escalation(escalate))
    }

    /// Foundation: communication patterns across conversations.
    pub async fn pattern(&self, sample: &Sample) -> Result<PatternOutput, PipelineError> {
        let output: PatternOutput = self
            .run_stage(
                StageKind::Pattern,
                sample.conversations.clone(),
                Conversation::transcript,
                None,
            )
            .await?;
        let escalate = self.escalation.should_escalate_pattern(&output);
        Ok(output.with_escalation(escalate))
    }

    /// Foundation: change over time, analyzed over recency segments.
    ///
    /// `span_days` comes from the sample; whatever the completion reports
    /// for it is overwritten.
    pub async fn chronology(
        &self,
        segments: &[TimeSegment],
        span_days: i64,
    ) -> Result<ChronologyOutput, PipelineError> {
        let output: ChronologyOutput = self
            .run_stage(
                StageKind::Chronology,
                segments.to_vec(),
                TimeSegment::render,
                None,
            )
            .await?;
        let output = StageOutput::new(
            ChronologyFindings {
                span_days,
                ..output.payload
            },
            output.metadata,
        );
        let escalate = self.escalation.should_escalate_chronology(&output);
        Ok(output.with_escalation(escalate))
    }

    /// Evaluator: manipulation and coercive-control assessment, run with
    /// the safety findings as context.
    pub async fn risk(&self, sample: &Sample, safety: &SafetyOutput) -> Result<RiskOutput, PipelineError> {
        let context = safety_context(safety);
        let output: RiskOutput = self
            .run_stage(
                StageKind::Risk,
                sample.conversations.clone(),
                Conversation::transcript,
                Some(&context),
            )
            .await?;
        let output = StageOutput::new(
            RiskFindings {
                originating_risk: safety.payload.risk_level,
                ..output.payload
            },
            output.metadata,
        );
        let escalate = self.escalation.should_escalate_risk(&output);
        Ok(output.with_escalation(escalate))
    }

    /// Evaluator: attachment style, run when the pattern stage escalates.
    pub async fn attachment(
        &self,
        sample: &Sample,
        pattern: &PatternOutput,
    ) -> Result<AttachmentOutput, PipelineError> {
        let context = pattern_context(pattern);
        self.run_stage(
            StageKind::Attachment,
            sample.conversations.clone(),
            Conversation::transcript,
            Some(&context),
        )
        .await
    }

    /// Evaluator: growth trajectory, run when the chronology stage escalates.
    pub async fn growth(
        &self,
        segments: &[TimeSegment],
        chronology: &ChronologyOutput,
    ) -> Result<GrowthOutput, PipelineError> {
        let context = chronology_context(chronology);
        self.run_stage(
            StageKind::Growth,
            segments.to_vec(),
            TimeSegment::render,
            Some(&context),
        )
        .await
    }

    /// Evaluator: crisis assessment, run when the risk evaluator escalates.
    pub async fn crisis(&self, sample: &Sample, risk: &RiskOutput) -> Result<CrisisOutput, PipelineError> {
        let context = risk_context(risk);
        self.run_stage(
            StageKind::Crisis,
            sample.conversations.clone(),
            Conversation::transcript,
            Some(&context),
        )
        .await
    }

    async fn run_stage<P, U>(
        &self,
        kind: StageKind,
        units: Vec<U>,
        render: fn(&U) -> String,
        context: Option<&str>,
    ) -> Result<StageOutput<P>, PipelineError>
    where
        P: Findings,
        U: ChunkUnit,
    {
        if units.is_empty() {
            debug!("{} stage has no input, returning neutral output", kind);
            return Ok(self.neutral());
        }

        let chunks = self.chunker.chunk(units);
        let total = chunks.len();
        info!("Running {} stage over {} chunk(s)", kind, total);

        let mut outputs = Vec::with_capacity(total);
        for chunk in chunks {
            debug!(
                "{} chunk {}/{} (~{} tokens, {} units)",
                kind,
                chunk.index + 1,
                total,
                chunk.estimated_tokens,
                chunk.units.len()
            );
            let content = chunk.units.iter().map(render).collect::<Vec<_>>().join("\n");
            let output = self
                .dispatcher
                .dispatch::<P>(kind, &content, context)
                .await
                .map_err(|e| PipelineError::stage(kind.name(), e))?;
            outputs.push(output);
        }

        Ok(aggregate_outputs(outputs).unwrap_or_else(|| self.neutral()))
    }

    fn neutral<P: Findings>(&self) -> StageOutput<P> {
        let mut payload = P::default();
        *payload.summary_mut() = EMPTY_SUMMARY.to_string();
        StageOutput::new(payload, StageMetadata::empty(self.dispatcher.model(), Utc::now()))
    }
}

fn safety_context(safety: &SafetyOutput) -> String {
    let mut context = format!("Safety risk level: {}\n", safety.payload.risk_level);
    for flag in &safety.payload.flags {
        context.push_str(&format!(
            "- [{}] {}: {}\n",
            flag.severity, flag.category, flag.description
        ));
    }
    if !safety.payload.summary.is_empty() {
        context.push_str(&format!("Summary: {}\n", safety.payload.summary));
    }
    context
}

fn pattern_context(pattern: &PatternOutput) -> String {
    let findings = &pattern.payload;
    let mut context = format!(
        "Communication style: {}\nConsistency: {:?}\nComplexity score: {}\n",
        findings.communication_style,
        findings.consistency,
        findings.complexity_score()
    );
    if !findings.anxiety_markers.is_empty() {
        context.push_str(&format!("Anxiety markers: {}\n", findings.anxiety_markers.join(", ")));
    }
    if !findings.avoidance_markers.is_empty() {
        context.push_str(&format!(
            "Avoidance markers: {}\n",
            findings.avoidance_markers.join(", ")
        ));
    }
    context
}

fn chronology_context(chronology: &ChronologyOutput) -> String {
    let findings = &chronology.payload;
    let mut context = format!(
        "Span: {} days\nGrowth direction: {}\n",
        findings.span_days, findings.growth_direction
    );
    if !findings.growth_areas.is_empty() {
        context.push_str(&format!("Growth areas: {}\n", findings.growth_areas.join(", ")));
    }
    if !findings.summary.is_empty() {
        context.push_str(&format!("Summary: {}\n", findings.summary));
    }
    context
}

fn risk_context(risk: &RiskOutput) -> String {
    let findings = &risk.payload;
    let mut context = format!("Originating safety risk: {}\n", findings.originating_risk);
    if let Some(severity) = findings.coercive_control {
        context.push_str(&format!("Coercive control: {}\n", severity));
    }
    for finding in &findings.manipulation {
        context.push_str(&format!(
            "- {} ({}, {:?}): {}\n",
            finding.tactic, finding.severity, finding.frequency, finding.description
        ));
    }
    context
}

//! Prompt templates.
//!
//! Wording lives behind [`PromptLibrary`] so it can be swapped without
//! touching the pipeline. [`DefaultPrompts`] ships the built-in templates.

use crate::analysis::StageKind;

/// Source of prompt text and response schema hints.
pub trait PromptLibrary: Send + Sync {
    /// Prompt for one chunk of a stage. `context` carries findings from an
    /// earlier stage, when the stage depends on one.
    fn stage_prompt(&self, kind: StageKind, content: &str, context: Option<&str>) -> String;

    /// JSON shape the stage expects back.
    fn stage_schema(&self, kind: StageKind) -> &str;

    /// Prompt for a single-conversation significance check.
    fn significance_prompt(&self, sample: &str) -> String;

    fn significance_schema(&self) -> &str;
}

/// Built-in templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrompts;

impl PromptLibrary for DefaultPrompts {
    fn stage_prompt(&self, kind: StageKind, content: &str, context: Option<&str>) -> String {
        let mut prompt = String::new();
        prompt.push_str(stage_instructions(kind));
        prompt.push_str("\n\n");

        if let Some(context) = context {
            prompt.push_str("=== EARLIER FINDINGS ===\n\n");
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }

        prompt.push_str("=== CONVERSATIONS TO ANALYZE ===\n\n");
        prompt.push_str(content);
        prompt.push_str("\n=== END OF CONVERSATIONS ===\n\n");
        prompt.push_str("Now respond with the JSON object only.");
        prompt
    }

    fn stage_schema(&self, kind: StageKind) -> &str {
        match kind {
            StageKind::Safety => SAFETY_SCHEMA,
            StageKind::Pattern => PATTERN_SCHEMA,
            StageKind::Chronology => CHRONOLOGY_SCHEMA,
            StageKind::Risk => RISK_SCHEMA,
            StageKind::Attachment => ATTACHMENT_SCHEMA,
            StageKind::Growth => GROWTH_SCHEMA,
            StageKind::Crisis => CRISIS_SCHEMA,
        }
    }

    fn significance_prompt(&self, sample: &str) -> String {
        format!(
            "Decide whether this dating-app conversation was significant. A conversation is \
             significant if it led to a date or plans to meet, the two people exchanged contact \
             details, it was unusually long, or it reached real emotional depth.\n\n\
             === CONVERSATION SAMPLE ===\n\n{}\n=== END OF SAMPLE ===\n\n\
             Now respond with the JSON object only.",
            sample
        )
    }

    fn significance_schema(&self) -> &str {
        SIGNIFICANCE_SCHEMA
    }
}

fn stage_instructions(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Safety => {
            "Assess the conversations below for safety concerns: pressure to move off-app, \
             requests for money, threats, harassment, inconsistent identity claims. Rate the \
             overall risk as green, yellow, orange or red and list each concern as a flag."
        }
        StageKind::Pattern => {
            "Describe the user's communication patterns across these conversations: style, \
             consistency between conversations, recurring behaviors, and any markers of \
             anxiety (reassurance seeking, double texting) or avoidance (deflection, withdrawal)."
        }
        StageKind::Chronology => {
            "The messages below are grouped into recency segments, each with a weight. \
             Describe how the user's dating communication changed over time, whether growth \
             is visible, its direction, and the specific areas that changed."
        }
        StageKind::Risk => {
            "Perform a detailed risk evaluation. Identify manipulation tactics (love bombing, \
             guilt tripping, gaslighting, isolation), rate each by severity and by how often it \
             occurs, and rate any coercive-control indicators as low, medium, high or critical \
             (use null for coercive_control when there are none)."
        }
        StageKind::Attachment => {
            "Evaluate the attachment style suggested by the user's messages. Give a primary \
             style, a secondary style (secure, anxious, avoidant or disorganized, or null \
             when there is none), your confidence between 0 and 1, and the \
             indicators you relied on."
        }
        StageKind::Growth => {
            "Evaluate the user's personal growth across the segments below: overall \
             trajectory, concrete milestones, and the areas where growth shows."
        }
        StageKind::Crisis => {
            "The earlier findings indicate a possible crisis. Rate the urgency, list the \
             immediate concerns, suggest support resources, and outline a short safety plan."
        }
    }
}

const SAFETY_SCHEMA: &str = r#"{"risk_level": "green|yellow|orange|red", "flags": [{"category": "string", "description": "string", "severity": "low|medium|high|critical", "evidence": ["string"]}], "summary": "string", "recommendations": ["string"]}"#;

const PATTERN_SCHEMA: &str = r#"{"communication_style": "string", "consistency": "consistent|mixed|inconsistent", "patterns": [{"name": "string", "description": "string", "frequency": "isolated|occasional|frequent|consistent"}], "anxiety_markers": ["string"], "avoidance_markers": ["string"], "summary": "string"}"#;

const CHRONOLOGY_SCHEMA: &str = r#"{"growth_detected": true, "growth_direction": "improving|stable|declining|unclear", "growth_areas": ["string"], "phases": [{"label": "string", "summary": "string"}], "summary": "string"}"#;

const RISK_SCHEMA: &str = r#"{"manipulation": [{"tactic": "string", "description": "string", "severity": "low|medium|high|critical", "frequency": "isolated|occasional|frequent|consistent", "evidence": ["string"]}], "coercive_control": null, "protective_factors": ["string"], "summary": "string", "recommendations": ["string"]}"#;

const ATTACHMENT_SCHEMA: &str = r#"{"primary_style": "secure|anxious|avoidant|disorganized|unclear", "secondary_style": null, "confidence": 0.0, "indicators": ["string"], "summary": "string"}"#;

const GROWTH_SCHEMA: &str = r#"{"trajectory": "improving|stable|declining|unclear", "milestones": ["string"], "areas": [{"area": "string", "description": "string"}], "summary": "string"}"#;

const CRISIS_SCHEMA: &str = r#"{"urgency": "low|medium|high|critical", "immediate_concerns": ["string"], "resources": ["string"], "safety_plan": ["string"], "summary": "string"}"#;

const SIGNIFICANCE_SCHEMA: &str = r#"{"isSignificant": true, "score": 0, "flags": {"ledToDate": false, "contactExchange": false, "unusualLength": false, "emotionalDepth": false}, "highlights": ["string"], "reasoning": "string"}"#;

//! Stage output types.
//!
//! Every stage produces a [`StageOutput`] wrapping a stage-specific payload.
//! Payload fields missing from a completion response fall back to their
//! neutral defaults (lowest risk, empty lists).

use crate::models::{
    optional_label, AttachmentStyle, Consistency, Frequency, GrowthDirection, RiskLevel,
    Severity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an analysis stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Safety,
    Pattern,
    Chronology,
    Risk,
    Attachment,
    Growth,
    Crisis,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Safety => "safety",
            StageKind::Pattern => "pattern",
            StageKind::Chronology => "chronology",
            StageKind::Risk => "risk",
            StageKind::Attachment => "attachment",
            StageKind::Growth => "growth",
            StageKind::Crisis => "crisis",
        }
    }

    /// Foundation stages always run; the others are evaluators.
    pub fn is_foundation(&self) -> bool {
        matches!(
            self,
            StageKind::Safety | StageKind::Pattern | StageKind::Chronology
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Bookkeeping attached to every stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetadata {
    pub analyzed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub model: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
}

impl StageMetadata {
    /// Metadata for a stage that made no completion calls.
    pub fn empty(model: &str, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            analyzed_at,
            duration_ms: 0,
            model: model.to_string(),
            tokens_used: 0,
            cost_usd: 0.0,
        }
    }
}

/// A stage's payload plus metadata and escalation verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput<P> {
    pub payload: P,
    pub metadata: StageMetadata,
    /// Set by the escalation engine after aggregation.
    pub escalate: bool,
}

impl<P> StageOutput<P> {
    pub fn new(payload: P, metadata: StageMetadata) -> Self {
        Self {
            payload,
            metadata,
            escalate: false,
        }
    }

    /// Same output with the escalation verdict recorded.
    pub fn with_escalation(self, escalate: bool) -> Self {
        Self { escalate, ..self }
    }
}

pub type SafetyOutput = StageOutput<SafetyFindings>;
pub type PatternOutput = StageOutput<PatternFindings>;
pub type ChronologyOutput = StageOutput<ChronologyFindings>;
pub type RiskOutput = StageOutput<RiskFindings>;
pub type AttachmentOutput = StageOutput<AttachmentFindings>;
pub type GrowthOutput = StageOutput<GrowthFindings>;
pub type CrisisOutput = StageOutput<CrisisFindings>;

/// Borrowed view over any stage output.
#[derive(Debug, Clone, Copy)]
pub enum AnyStageOutput<'a> {
    Safety(&'a SafetyOutput),
    Pattern(&'a PatternOutput),
    Chronology(&'a ChronologyOutput),
    Risk(&'a RiskOutput),
    Attachment(&'a AttachmentOutput),
    Growth(&'a GrowthOutput),
    Crisis(&'a CrisisOutput),
}

impl<'a> AnyStageOutput<'a> {
    pub fn kind(&self) -> StageKind {
        match self {
            AnyStageOutput::Safety(_) => StageKind::Safety,
            AnyStageOutput::Pattern(_) => StageKind::Pattern,
            AnyStageOutput::Chronology(_) => StageKind::Chronology,
            AnyStageOutput::Risk(_) => StageKind::Risk,
            AnyStageOutput::Attachment(_) => StageKind::Attachment,
            AnyStageOutput::Growth(_) => StageKind::Growth,
            AnyStageOutput::Crisis(_) => StageKind::Crisis,
        }
    }

    pub fn metadata(&self) -> &'a StageMetadata {
        match self {
            AnyStageOutput::Safety(o) => &o.metadata,
            AnyStageOutput::Pattern(o) => &o.metadata,
            AnyStageOutput::Chronology(o) => &o.metadata,
            AnyStageOutput::Risk(o) => &o.metadata,
            AnyStageOutput::Attachment(o) => &o.metadata,
            AnyStageOutput::Growth(o) => &o.metadata,
            AnyStageOutput::Crisis(o) => &o.metadata,
        }
    }

    pub fn escalate(&self) -> bool {
        match self {
            AnyStageOutput::Safety(o) => o.escalate,
            AnyStageOutput::Pattern(o) => o.escalate,
            AnyStageOutput::Chronology(o) => o.escalate,
            AnyStageOutput::Risk(o) => o.escalate,
            AnyStageOutput::Attachment(o) => o.escalate,
            AnyStageOutput::Growth(o) => o.escalate,
            AnyStageOutput::Crisis(o) => o.escalate,
        }
    }

    pub fn summary(&self) -> &'a str {
        match self {
            AnyStageOutput::Safety(o) => &o.payload.summary,
            AnyStageOutput::Pattern(o) => &o.payload.summary,
            AnyStageOutput::Chronology(o) => &o.payload.summary,
            AnyStageOutput::Risk(o) => &o.payload.summary,
            AnyStageOutput::Attachment(o) => &o.payload.summary,
            AnyStageOutput::Growth(o) => &o.payload.summary,
            AnyStageOutput::Crisis(o) => &o.payload.summary,
        }
    }
}

// ── Safety ──────────────────────────────────────────────────

/// A single safety concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyFlag {
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyFindings {
    pub risk_level: RiskLevel,
    pub flags: Vec<SafetyFlag>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

// ── Pattern ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservedPattern {
    pub name: String,
    pub description: String,
    pub frequency: Frequency,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternFindings {
    pub communication_style: String,
    pub consistency: Consistency,
    pub patterns: Vec<ObservedPattern>,
    pub anxiety_markers: Vec<String>,
    pub avoidance_markers: Vec<String>,
    pub summary: String,
}

impl PatternFindings {
    /// Complexity of the observed communication, 0 to 100.
    ///
    /// Each distinct pattern adds 15, each attachment marker 10, and mixed or
    /// inconsistent communication adds 15 or 30.
    pub fn complexity_score(&self) -> u32 {
        let patterns = self.patterns.len() as u32 * 15;
        let markers = (self.anxiety_markers.len() + self.avoidance_markers.len()) as u32 * 10;
        let consistency = match self.consistency {
            Consistency::Consistent => 0,
            Consistency::Mixed => 15,
            Consistency::Inconsistent => 30,
        };
        (patterns + markers + consistency).min(100)
    }

    /// Both anxiety-type and avoidance-type markers are present.
    pub fn has_mixed_attachment_signals(&self) -> bool {
        !self.anxiety_markers.is_empty() && !self.avoidance_markers.is_empty()
    }
}

// ── Chronology ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronologyPhase {
    pub label: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronologyFindings {
    /// Days covered by the analyzed messages (computed from the sample).
    pub span_days: i64,
    pub growth_detected: bool,
    pub growth_direction: GrowthDirection,
    pub growth_areas: Vec<String>,
    pub phases: Vec<ChronologyPhase>,
    pub summary: String,
}

// ── Risk ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManipulationFinding {
    pub tactic: String,
    pub description: String,
    pub severity: Severity,
    pub frequency: Frequency,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskFindings {
    /// Overall level reported by the safety stage that triggered this one.
    pub originating_risk: RiskLevel,
    pub manipulation: Vec<ManipulationFinding>,
    /// Severity of coercive-control indicators, if any were detected.
    #[serde(deserialize_with = "optional_label")]
    pub coercive_control: Option<Severity>,
    pub protective_factors: Vec<String>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

// ── Attachment ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentFindings {
    pub primary_style: AttachmentStyle,
    #[serde(deserialize_with = "optional_label")]
    pub secondary_style: Option<AttachmentStyle>,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub summary: String,
}

// ── Growth ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthArea {
    pub area: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthFindings {
    pub trajectory: GrowthDirection,
    pub milestones: Vec<String>,
    pub areas: Vec<GrowthArea>,
    pub summary: String,
}

// ── Crisis ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrisisFindings {
    pub urgency: Severity,
    pub immediate_concerns: Vec<String>,
    pub resources: Vec<String>,
    pub safety_plan: Vec<String>,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_default_to_neutral() {
        let findings: SafetyFindings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(findings.risk_level, RiskLevel::Green);
        assert!(findings.flags.is_empty());

        let risk: RiskFindings =
            serde_json::from_value(json!({"manipulation": [{"tactic": "guilt"}]})).unwrap();
        assert_eq!(risk.coercive_control, None);
        assert_eq!(risk.manipulation[0].severity, Severity::Low);
        assert_eq!(risk.manipulation[0].frequency, Frequency::Isolated);
    }

    #[test]
    fn test_complexity_score() {
        let findings = PatternFindings {
            consistency: Consistency::Inconsistent,
            patterns: vec![ObservedPattern::default(); 3],
            anxiety_markers: vec!["double texting".to_string()],
            ..PatternFindings::default()
        };
        assert_eq!(findings.complexity_score(), 45 + 10 + 30);

        let crowded = PatternFindings {
            patterns: vec![ObservedPattern::default(); 10],
            ..PatternFindings::default()
        };
        assert_eq!(crowded.complexity_score(), 100);
    }

    #[test]
    fn test_stage_kind_foundation() {
        assert!(StageKind::Safety.is_foundation());
        assert!(StageKind::Chronology.is_foundation());
        assert!(!StageKind::Crisis.is_foundation());
    }
}

//! Escalation engine.
//!
//! One pure predicate per foundation/evaluator boundary. Each inspects only
//! the already-aggregated output of its own stage and returns an
//! [`EscalationSignal`] describing why the next tier should run, or `None`.

use crate::analysis::{
    ChronologyOutput, PatternOutput, RiskOutput, SafetyOutput, StageKind,
};
use crate::models::{Consistency, GrowthDirection, RiskLevel, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Thresholds used by the predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Safety risk at or above this level escalates to the risk evaluator.
    pub risk_threshold: RiskLevel,
    /// Pattern complexity above this score escalates to the attachment evaluator.
    pub complexity_threshold: u32,
    /// Minimum analyzed span before growth can escalate.
    pub min_growth_span_days: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            risk_threshold: RiskLevel::Orange,
            complexity_threshold: 60,
            min_growth_span_days: 30,
        }
    }
}

/// Why the crisis evaluator was triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrisisReason {
    ElevatedSafetyRisk { level: RiskLevel },
    CriticalManipulation { tactic: String },
    CoerciveControl { severity: Severity },
    RecurringManipulation { count: usize },
}

impl fmt::Display for CrisisReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrisisReason::ElevatedSafetyRisk { level } => {
                write!(f, "safety risk was already {}", level)
            }
            CrisisReason::CriticalManipulation { tactic } => {
                write!(f, "critical-severity manipulation ({})", tactic)
            }
            CrisisReason::CoerciveControl { severity } => {
                write!(f, "coercive control rated {}", severity)
            }
            CrisisReason::RecurringManipulation { count } => {
                write!(f, "{} manipulation tactics occur as recurring patterns", count)
            }
        }
    }
}

/// Evidence that a stage should advance to its evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum EscalationSignal {
    /// Safety → risk evaluator.
    Risk {
        risk_level: RiskLevel,
        threshold: RiskLevel,
        critical_flags: Vec<String>,
    },
    /// Pattern → attachment evaluator.
    Attachment {
        complexity_score: u32,
        consistency: Consistency,
        mixed_attachment_signals: bool,
    },
    /// Chronology → growth evaluator.
    Growth {
        span_days: i64,
        direction: GrowthDirection,
        areas: Vec<String>,
    },
    /// Risk → crisis evaluator.
    Crisis { reasons: Vec<CrisisReason> },
}

impl EscalationSignal {
    /// The stage this signal advances to.
    pub fn target(&self) -> StageKind {
        match self {
            EscalationSignal::Risk { .. } => StageKind::Risk,
            EscalationSignal::Attachment { .. } => StageKind::Attachment,
            EscalationSignal::Growth { .. } => StageKind::Growth,
            EscalationSignal::Crisis { .. } => StageKind::Crisis,
        }
    }

    /// Human-readable explanation.
    pub fn reason(&self) -> String {
        match self {
            EscalationSignal::Risk {
                risk_level,
                threshold,
                critical_flags,
            } => {
                let mut parts = Vec::new();
                if risk_level >= threshold {
                    parts.push(format!(
                        "Safety risk level {} meets the escalation threshold ({})",
                        risk_level, threshold
                    ));
                } else {
                    parts.push(format!("Safety risk level {} is below the threshold ({})", risk_level, threshold));
                }
                if !critical_flags.is_empty() {
                    parts.push(format!(
                        "{} critical-severity flag(s): {}",
                        critical_flags.len(),
                        critical_flags.join("; ")
                    ));
                }
                parts.join("; ")
            }
            EscalationSignal::Attachment {
                complexity_score,
                consistency,
                mixed_attachment_signals,
            } => {
                let mut parts = vec![format!("complexity score {}", complexity_score)];
                if *consistency != Consistency::Consistent {
                    parts.push(format!("{:?} communication consistency", consistency).to_lowercase());
                }
                if *mixed_attachment_signals {
                    parts.push("both anxiety and avoidance markers present".to_string());
                }
                format!("Communication patterns warrant attachment evaluation: {}", parts.join(", "))
            }
            EscalationSignal::Growth {
                span_days,
                direction,
                areas,
            } => {
                if areas.is_empty() {
                    format!("Growth trending {} over {} days", direction, span_days)
                } else {
                    format!(
                        "Growth trending {} over {} days in: {}",
                        direction,
                        span_days,
                        areas.join(", ")
                    )
                }
            }
            EscalationSignal::Crisis { reasons } => format!(
                "Crisis evaluation triggered: {}",
                reasons
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        }
    }
}

/// Holds the thresholds and evaluates every predicate.
#[derive(Debug, Clone, Default)]
pub struct EscalationEngine {
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Safety → risk: overall level at or above the threshold, or any flag
    /// at the highest severity regardless of the overall level.
    pub fn evaluate_safety(&self, output: &SafetyOutput) -> Option<EscalationSignal> {
        let findings = &output.payload;
        let critical_flags: Vec<String> = findings
            .flags
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .map(|f| f.description.clone())
            .collect();

        if findings.risk_level >= self.config.risk_threshold || !critical_flags.is_empty() {
            Some(EscalationSignal::Risk {
                risk_level: findings.risk_level,
                threshold: self.config.risk_threshold,
                critical_flags,
            })
        } else {
            None
        }
    }

    /// Pattern → attachment: complexity above threshold, mixed or
    /// inconsistent communication, or simultaneous anxiety and avoidance
    /// markers.
    pub fn evaluate_pattern(&self, output: &PatternOutput) -> Option<EscalationSignal> {
        let findings = &output.payload;
        let complexity_score = findings.complexity_score();
        let inconsistent = findings.consistency != Consistency::Consistent;
        let mixed = findings.has_mixed_attachment_signals();

        if complexity_score > self.config.complexity_threshold || inconsistent || mixed {
            Some(EscalationSignal::Attachment {
                complexity_score,
                consistency: findings.consistency,
                mixed_attachment_signals: mixed,
            })
        } else {
            None
        }
    }

    /// Chronology → growth: long enough span AND growth detected AND
    /// (improving OR at least one named area).
    pub fn evaluate_chronology(&self, output: &ChronologyOutput) -> Option<EscalationSignal> {
        let findings = &output.payload;
        let long_enough = findings.span_days >= self.config.min_growth_span_days;
        let substantive = findings.growth_direction == GrowthDirection::Improving
            || !findings.growth_areas.is_empty();

        if long_enough && findings.growth_detected && substantive {
            Some(EscalationSignal::Growth {
                span_days: findings.span_days,
                direction: findings.growth_direction,
                areas: findings.growth_areas.clone(),
            })
        } else {
            None
        }
    }

    /// Risk → crisis: originating safety risk in the top two levels, any
    /// critical manipulation finding, coercive control rated high or
    /// critical, or two or more manipulation findings that recur.
    pub fn evaluate_risk(&self, output: &RiskOutput) -> Option<EscalationSignal> {
        let findings = &output.payload;
        let mut reasons = Vec::new();

        if findings.originating_risk.is_elevated() {
            reasons.push(CrisisReason::ElevatedSafetyRisk {
                level: findings.originating_risk,
            });
        }

        if let Some(finding) = findings
            .manipulation
            .iter()
            .find(|m| m.severity == Severity::Critical)
        {
            reasons.push(CrisisReason::CriticalManipulation {
                tactic: finding.tactic.clone(),
            });
        }

        if let Some(severity) = findings.coercive_control.filter(|s| *s >= Severity::High) {
            reasons.push(CrisisReason::CoerciveControl { severity });
        }

        let recurring = findings
            .manipulation
            .iter()
            .filter(|m| m.frequency.is_pattern())
            .count();
        if recurring >= 2 {
            reasons.push(CrisisReason::RecurringManipulation { count: recurring });
        }

        if reasons.is_empty() {
            None
        } else {
            Some(EscalationSignal::Crisis { reasons })
        }
    }

    pub fn should_escalate_safety(&self, output: &SafetyOutput) -> bool {
        self.evaluate_safety(output).is_some()
    }

    pub fn should_escalate_pattern(&self, output: &PatternOutput) -> bool {
        self.evaluate_pattern(output).is_some()
    }

    pub fn should_escalate_chronology(&self, output: &ChronologyOutput) -> bool {
        self.evaluate_chronology(output).is_some()
    }

    pub fn should_escalate_risk(&self, output: &RiskOutput) -> bool {
        self.evaluate_risk(output).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        ChronologyFindings, ManipulationFinding, ObservedPattern, PatternFindings, RiskFindings,
        SafetyFindings, SafetyFlag, StageMetadata, StageOutput,
    };
    use crate::models::Frequency;
    use chrono::Utc;

    fn wrap<P>(payload: P) -> StageOutput<P> {
        StageOutput::new(payload, StageMetadata::empty("test", Utc::now()))
    }

    fn safety(level: RiskLevel, severities: &[Severity]) -> SafetyOutput {
        wrap(SafetyFindings {
            risk_level: level,
            flags: severities
                .iter()
                .enumerate()
                .map(|(i, s)| SafetyFlag {
                    description: format!("flag {}", i),
                    severity: *s,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    }

    fn manipulation(severity: Severity, frequency: Frequency) -> ManipulationFinding {
        ManipulationFinding {
            tactic: format!("{:?}-{:?}", severity, frequency),
            severity,
            frequency,
            ..Default::default()
        }
    }

    #[test]
    fn test_safety_second_highest_level_escalates() {
        let engine = EscalationEngine::default();
        assert!(engine.should_escalate_safety(&safety(RiskLevel::Orange, &[])));
        assert!(engine.should_escalate_safety(&safety(RiskLevel::Red, &[])));
    }

    #[test]
    fn test_safety_lowest_level_with_low_flags_does_not_escalate() {
        let engine = EscalationEngine::default();
        assert!(!engine.should_escalate_safety(&safety(
            RiskLevel::Green,
            &[Severity::Low, Severity::Low]
        )));
        assert!(!engine.should_escalate_safety(&safety(RiskLevel::Yellow, &[Severity::High])));
    }

    #[test]
    fn test_safety_critical_flag_escalates_regardless_of_level() {
        let engine = EscalationEngine::default();
        let signal = engine
            .evaluate_safety(&safety(RiskLevel::Green, &[Severity::Critical]))
            .unwrap();
        assert_eq!(signal.target(), StageKind::Risk);
        assert!(signal.reason().contains("critical-severity flag"));
    }

    #[test]
    fn test_safety_reason_names_level() {
        let engine = EscalationEngine::default();
        let signal = engine.evaluate_safety(&safety(RiskLevel::Orange, &[])).unwrap();
        assert!(signal.reason().to_lowercase().contains("orange"));
    }

    #[test]
    fn test_pattern_predicate() {
        let engine = EscalationEngine::default();

        let calm = wrap(PatternFindings::default());
        assert!(!engine.should_escalate_pattern(&calm));

        let mixed_consistency = wrap(PatternFindings {
            consistency: Consistency::Mixed,
            ..Default::default()
        });
        assert!(engine.should_escalate_pattern(&mixed_consistency));

        let mixed_markers = wrap(PatternFindings {
            anxiety_markers: vec!["reassurance".to_string()],
            avoidance_markers: vec!["ghosting".to_string()],
            ..Default::default()
        });
        assert!(engine.should_escalate_pattern(&mixed_markers));

        let complex = wrap(PatternFindings {
            patterns: vec![ObservedPattern::default(); 5],
            ..Default::default()
        });
        assert_eq!(complex.payload.complexity_score(), 75);
        assert!(engine.should_escalate_pattern(&complex));

        let at_threshold = wrap(PatternFindings {
            patterns: vec![ObservedPattern::default(); 4],
            ..Default::default()
        });
        assert!(!engine.should_escalate_pattern(&at_threshold));
    }

    #[test]
    fn test_chronology_predicate() {
        let engine = EscalationEngine::default();
        let base = ChronologyFindings {
            span_days: 45,
            growth_detected: true,
            growth_direction: GrowthDirection::Improving,
            ..Default::default()
        };
        assert!(engine.should_escalate_chronology(&wrap(base.clone())));

        let too_short = ChronologyFindings {
            span_days: 10,
            ..base.clone()
        };
        assert!(!engine.should_escalate_chronology(&wrap(too_short)));

        let not_detected = ChronologyFindings {
            growth_detected: false,
            ..base.clone()
        };
        assert!(!engine.should_escalate_chronology(&wrap(not_detected)));

        let stable_with_area = ChronologyFindings {
            growth_direction: GrowthDirection::Stable,
            growth_areas: vec!["boundaries".to_string()],
            ..base.clone()
        };
        assert!(engine.should_escalate_chronology(&wrap(stable_with_area)));

        let stable_without_area = ChronologyFindings {
            growth_direction: GrowthDirection::Stable,
            ..base
        };
        assert!(!engine.should_escalate_chronology(&wrap(stable_without_area)));
    }

    #[test]
    fn test_risk_predicate() {
        let engine = EscalationEngine::default();

        assert!(!engine.should_escalate_risk(&wrap(RiskFindings::default())));

        let elevated = wrap(RiskFindings {
            originating_risk: RiskLevel::Orange,
            ..Default::default()
        });
        assert!(engine.should_escalate_risk(&elevated));

        let critical = wrap(RiskFindings {
            manipulation: vec![manipulation(Severity::Critical, Frequency::Isolated)],
            ..Default::default()
        });
        assert!(engine.should_escalate_risk(&critical));

        let coercive = wrap(RiskFindings {
            coercive_control: Some(Severity::High),
            ..Default::default()
        });
        assert!(engine.should_escalate_risk(&coercive));

        let mild_coercive = wrap(RiskFindings {
            coercive_control: Some(Severity::Medium),
            ..Default::default()
        });
        assert!(!engine.should_escalate_risk(&mild_coercive));

        let one_recurring = wrap(RiskFindings {
            manipulation: vec![
                manipulation(Severity::Medium, Frequency::Frequent),
                manipulation(Severity::Medium, Frequency::Occasional),
            ],
            ..Default::default()
        });
        assert!(!engine.should_escalate_risk(&one_recurring));

        let two_recurring = wrap(RiskFindings {
            manipulation: vec![
                manipulation(Severity::Medium, Frequency::Frequent),
                manipulation(Severity::Low, Frequency::Consistent),
            ],
            ..Default::default()
        });
        let signal = engine.evaluate_risk(&two_recurring).unwrap();
        assert_eq!(
            signal,
            EscalationSignal::Crisis {
                reasons: vec![CrisisReason::RecurringManipulation { count: 2 }]
            }
        );
    }

    #[test]
    fn test_predicates_are_deterministic() {
        let engine = EscalationEngine::default();
        let output = safety(RiskLevel::Yellow, &[Severity::Critical]);
        assert_eq!(engine.evaluate_safety(&output), engine.evaluate_safety(&output));
    }
}

//! Markdown and JSON report generation.
//!
//! This module renders the staged analysis result and the significance
//! result into a single report.

use crate::analysis::{
    AttachmentOutput, ChronologyOutput, CrisisOutput, GrowthOutput, PatternOutput, RiskOutput,
    SafetyOutput,
};
use crate::orchestrator::{DeepAnalysisReport, OrchestratorResult, StageMetric};
use crate::significance::SignificanceAnalysisResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// Metadata about the run that produced a report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub dataset: String,
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub duration_seconds: f64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub analysis: Option<OrchestratorResult>,
    pub significance: Option<SignificanceAnalysisResult>,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# MatchLens Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_table_of_contents(report));

    if let Some(ref analysis) = report.analysis {
        output.push_str(&generate_overview_section(analysis));
        output.push_str(&generate_safety_section(&analysis.foundation.safety));
        match analysis.deep {
            Some(ref deep) => output.push_str(&generate_deep_section(deep)),
            None => output.push_str(
                "## Deep Analysis\n\nSkipped: the safety stage did not escalate.\n\n",
            ),
        }
        output.push_str(&generate_cost_section(&analysis.stages, analysis.total_cost_usd));
    }

    if let Some(ref significance) = report.significance {
        output.push_str(&generate_significance_section(significance));
    }

    output.push_str(&generate_footer());
    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Dataset:** {}\n", metadata.dataset));
    section.push_str(&format!("- **User:** `{}`\n", metadata.user_id));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!("- **Duration:** {:.1}s\n\n", metadata.duration_seconds));

    section
}

fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    if report.analysis.is_some() {
        toc.push_str("- [Overview](#overview)\n");
        toc.push_str("- [Safety](#safety)\n");
        toc.push_str("- [Deep Analysis](#deep-analysis)\n");
        toc.push_str("- [Stage Costs](#stage-costs)\n");
    }
    if report.significance.is_some() {
        toc.push_str("- [Significant Conversations](#significant-conversations)\n");
    }
    toc.push('\n');

    toc
}

fn generate_overview_section(analysis: &OrchestratorResult) -> String {
    let mut section = String::new();
    let sample = &analysis.sample;

    section.push_str("## Overview\n\n");
    section.push_str(&format!(
        "**Overall risk:** {} {}\n\n",
        analysis.overall_risk.emoji(),
        analysis.overall_risk
    ));
    section.push_str(&format!(
        "**Escalated:** {}. {}\n\n",
        if analysis.escalated { "yes" } else { "no" },
        analysis.escalation_reason
    ));
    section.push_str("| Conversations | Messages | Sampled conversations | Sampled messages | Outside window | Span (days) |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} |\n\n",
        sample.total_conversations,
        sample.total_messages,
        sample.sampled_conversations,
        sample.sampled_messages,
        sample.excluded_by_window,
        sample.span_days
    ));

    section
}

fn generate_safety_section(safety: &SafetyOutput) -> String {
    let findings = &safety.payload;
    let mut section = String::new();

    section.push_str("## Safety\n\n");
    section.push_str(&format!(
        "**Risk level:** {} {}\n\n",
        findings.risk_level.emoji(),
        findings.risk_level
    ));
    push_summary(&mut section, &findings.summary);

    if !findings.flags.is_empty() {
        let mut flags = findings.flags.clone();
        flags.sort_by(|a, b| b.severity.cmp(&a.severity));

        section.push_str("| Severity | Category | Description |\n");
        section.push_str("|:---|:---|:---|\n");
        for flag in &flags {
            section.push_str(&format!(
                "| {} {} | {} | {} |\n",
                flag.severity.emoji(),
                flag.severity,
                flag.category,
                flag.description
            ));
        }
        section.push('\n');
    }

    push_list(&mut section, "Recommendations", &findings.recommendations);
    section
}

fn generate_deep_section(deep: &DeepAnalysisReport) -> String {
    let mut section = String::new();

    section.push_str("## Deep Analysis\n\n");
    section.push_str(&generate_pattern_block(&deep.pattern));
    section.push_str(&generate_chronology_block(&deep.chronology));
    section.push_str(&generate_risk_block(&deep.risk));
    if let Some(ref attachment) = deep.attachment {
        section.push_str(&generate_attachment_block(attachment));
    }
    if let Some(ref growth) = deep.growth {
        section.push_str(&generate_growth_block(growth));
    }
    if let Some(ref crisis) = deep.crisis {
        section.push_str(&generate_crisis_block(crisis));
    }

    if !deep.signals.is_empty() {
        section.push_str("### Escalation Signals\n\n");
        for signal in &deep.signals {
            section.push_str(&format!("- **{}:** {}\n", signal.target(), signal.reason()));
        }
        section.push('\n');
    }

    if !deep.skipped.is_empty() {
        let skipped: Vec<String> = deep.skipped.iter().map(ToString::to_string).collect();
        section.push_str(&format!(
            "> Skipped over budget: {}\n\n",
            skipped.join(", ")
        ));
    }

    section
}

fn generate_pattern_block(pattern: &PatternOutput) -> String {
    let findings = &pattern.payload;
    let mut block = String::new();

    block.push_str("### Communication Patterns\n\n");
    block.push_str(&format!(
        "*Style: {} | Consistency: {:?} | Complexity: {}*\n\n",
        if findings.communication_style.is_empty() {
            "n/a"
        } else {
            findings.communication_style.as_str()
        },
        findings.consistency,
        findings.complexity_score()
    ));
    push_summary(&mut block, &findings.summary);
    for pattern in &findings.patterns {
        block.push_str(&format!(
            "- **{}** ({:?}): {}\n",
            pattern.name, pattern.frequency, pattern.description
        ));
    }
    if !findings.patterns.is_empty() {
        block.push('\n');
    }
    push_list(&mut block, "Anxiety markers", &findings.anxiety_markers);
    push_list(&mut block, "Avoidance markers", &findings.avoidance_markers);

    block
}

fn generate_chronology_block(chronology: &ChronologyOutput) -> String {
    let findings = &chronology.payload;
    let mut block = String::new();

    block.push_str("### Chronology\n\n");
    block.push_str(&format!(
        "*Span: {} days | Growth detected: {} | Direction: {}*\n\n",
        findings.span_days,
        if findings.growth_detected { "yes" } else { "no" },
        findings.growth_direction
    ));
    push_summary(&mut block, &findings.summary);
    for phase in &findings.phases {
        block.push_str(&format!("- **{}:** {}\n", phase.label, phase.summary));
    }
    if !findings.phases.is_empty() {
        block.push('\n');
    }
    push_list(&mut block, "Growth areas", &findings.growth_areas);

    block
}

fn generate_risk_block(risk: &RiskOutput) -> String {
    let findings = &risk.payload;
    let mut block = String::new();

    block.push_str("### Risk Evaluation\n\n");
    if let Some(severity) = findings.coercive_control {
        block.push_str(&format!(
            "**Coercive control:** {} {}\n\n",
            severity.emoji(),
            severity
        ));
    }
    push_summary(&mut block, &findings.summary);

    if !findings.manipulation.is_empty() {
        block.push_str("| Tactic | Severity | Frequency | Description |\n");
        block.push_str("|:---|:---|:---|:---|\n");
        for finding in &findings.manipulation {
            block.push_str(&format!(
                "| {} | {} {} | {:?} | {} |\n",
                finding.tactic,
                finding.severity.emoji(),
                finding.severity,
                finding.frequency,
                finding.description
            ));
        }
        block.push('\n');
    }

    push_list(&mut block, "Protective factors", &findings.protective_factors);
    push_list(&mut block, "Recommendations", &findings.recommendations);
    block
}

fn generate_attachment_block(attachment: &AttachmentOutput) -> String {
    let findings = &attachment.payload;
    let mut block = String::new();

    block.push_str("### Attachment\n\n");
    let secondary = findings
        .secondary_style
        .map(|s| format!(", secondary {}", s))
        .unwrap_or_default();
    block.push_str(&format!(
        "**Style:** {}{} (confidence {:.0}%)\n\n",
        findings.primary_style,
        secondary,
        findings.confidence * 100.0
    ));
    push_summary(&mut block, &findings.summary);
    push_list(&mut block, "Indicators", &findings.indicators);

    block
}

fn generate_growth_block(growth: &GrowthOutput) -> String {
    let findings = &growth.payload;
    let mut block = String::new();

    block.push_str("### Growth\n\n");
    block.push_str(&format!("**Trajectory:** {}\n\n", findings.trajectory));
    push_summary(&mut block, &findings.summary);
    for area in &findings.areas {
        block.push_str(&format!("- **{}:** {}\n", area.area, area.description));
    }
    if !findings.areas.is_empty() {
        block.push('\n');
    }
    push_list(&mut block, "Milestones", &findings.milestones);

    block
}

fn generate_crisis_block(crisis: &CrisisOutput) -> String {
    let findings = &crisis.payload;
    let mut block = String::new();

    block.push_str("### Crisis Assessment\n\n");
    block.push_str(&format!(
        "**Urgency:** {} {}\n\n",
        findings.urgency.emoji(),
        findings.urgency
    ));
    push_summary(&mut block, &findings.summary);
    push_list(&mut block, "Immediate concerns", &findings.immediate_concerns);
    push_list(&mut block, "Safety plan", &findings.safety_plan);
    push_list(&mut block, "Resources", &findings.resources);

    block
}

fn generate_cost_section(stages: &[StageMetric], total_cost_usd: f64) -> String {
    let mut section = String::new();

    section.push_str("## Stage Costs\n\n");
    section.push_str("| Stage | Duration | Tokens | Cost | Escalate |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|\n");
    for stage in stages {
        section.push_str(&format!(
            "| {} | {}ms | {} | ${:.4} | {} |\n",
            stage.stage,
            stage.duration_ms,
            stage.tokens_used,
            stage.cost_usd,
            if stage.escalate { "yes" } else { "no" }
        ));
    }
    section.push_str(&format!("\n**Total cost:** ${:.4}\n\n", total_cost_usd));

    section
}

fn generate_significance_section(result: &SignificanceAnalysisResult) -> String {
    let stats = &result.statistics;
    let mut section = String::new();

    section.push_str("## Significant Conversations\n\n");
    section.push_str(&format!(
        "**{}** of {} conversations ({:.1}%) were significant; {} were long enough to check.\n\n",
        stats.total_significant,
        stats.total_conversations,
        stats.percentage_significant,
        stats.total_analyzed
    ));
    section.push_str("| Led to date | Contact exchange | Unusual length | Emotional depth |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} |\n\n",
        stats.breakdown.led_to_date,
        stats.breakdown.contact_exchange,
        stats.breakdown.unusual_length,
        stats.breakdown.emotional_depth
    ));
    section.push_str(&format!(
        "*Average messages: {:.1} significant, {:.1} overall*\n\n",
        stats.avg_messages_significant, stats.avg_messages_all
    ));
    if stats.fallback_count > 0 {
        section.push_str(&format!(
            "> {} check(s) failed and were decided by conversation length.\n\n",
            stats.fallback_count
        ));
    }

    let mut records = result.significant_conversations.clone();
    records.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.match_id.cmp(&b.match_id)));

    for record in &records {
        section.push_str(&format!(
            "### {} (score {})\n\n",
            record.counterparty_id, record.score
        ));
        section.push_str(&format!(
            "*{} messages over {} days, {} to {}*\n\n",
            record.message_count,
            record.duration.days,
            record.duration.first_message.format("%Y-%m-%d"),
            record.duration.last_message.format("%Y-%m-%d")
        ));
        if !record.reasoning.is_empty() {
            section.push_str(&format!("{}\n\n", record.reasoning));
        }
        push_list(&mut section, "Highlights", &record.highlights);
    }

    section
}

fn push_summary(out: &mut String, summary: &str) {
    if !summary.is_empty() {
        out.push_str(summary);
        out.push_str("\n\n");
    }
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("**{}:**\n\n", title));
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
    out.push('\n');
}

fn generate_footer() -> String {
    "---\n\n*Report generated by MatchLens*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        CrisisFindings, ManipulationFinding, RiskFindings, SafetyFindings, SafetyFlag,
        StageKind, StageMetadata, StageOutput,
    };
    use crate::escalation::EscalationSignal;
    use crate::models::{Frequency, RiskLevel, Severity};
    use crate::orchestrator::{FoundationReport, SampleSummary};
    use crate::significance::{
        ConversationDuration, SignificanceFlags, SignificanceStatistics,
        SignificantConversationRecord,
    };

    fn wrap<P>(payload: P) -> StageOutput<P> {
        StageOutput::new(payload, StageMetadata::empty("test-model", Utc::now()))
    }

    fn create_test_report() -> Report {
        let safety = wrap(SafetyFindings {
            risk_level: RiskLevel::Orange,
            flags: vec![
                SafetyFlag {
                    category: "pressure".to_string(),
                    description: "Insists on meeting at home".to_string(),
                    severity: Severity::Medium,
                    ..Default::default()
                },
                SafetyFlag {
                    category: "financial".to_string(),
                    description: "Asked for a gift card".to_string(),
                    severity: Severity::High,
                    ..Default::default()
                },
            ],
            summary: "Some pressure tactics.".to_string(),
            recommendations: vec!["Meet in public places".to_string()],
        })
        .with_escalation(true);

        let deep = DeepAnalysisReport {
            pattern: wrap(Default::default()),
            chronology: wrap(Default::default()),
            risk: wrap(RiskFindings {
                originating_risk: RiskLevel::Orange,
                manipulation: vec![ManipulationFinding {
                    tactic: "love bombing".to_string(),
                    severity: Severity::Medium,
                    frequency: Frequency::Frequent,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            attachment: None,
            growth: None,
            crisis: Some(wrap(CrisisFindings {
                urgency: Severity::High,
                safety_plan: vec!["Share date plans with a friend".to_string()],
                ..Default::default()
            })),
            signals: vec![],
            skipped: vec![StageKind::Attachment],
            duration_ms: 10,
            cost_usd: 0.0,
        };

        let analysis = OrchestratorResult {
            user_id: "me".to_string(),
            sample: SampleSummary::default(),
            foundation: FoundationReport {
                safety,
                signal: Some(EscalationSignal::Risk {
                    risk_level: RiskLevel::Orange,
                    threshold: RiskLevel::Orange,
                    critical_flags: vec![],
                }),
                duration_ms: 5,
                cost_usd: 0.0,
            },
            deep: Some(deep),
            stages: vec![],
            total_duration_ms: 15,
            total_cost_usd: 0.0125,
            escalated: true,
            escalation_reason: "Safety risk level ORANGE meets the escalation threshold (ORANGE)"
                .to_string(),
            overall_risk: RiskLevel::Orange,
            completed_at: Utc::now(),
        };

        let first = Utc::now();
        let significance = SignificanceAnalysisResult {
            significant_conversations: vec![SignificantConversationRecord {
                match_id: "m1".to_string(),
                counterparty_id: "jo".to_string(),
                message_count: 3,
                duration: ConversationDuration {
                    days: 0,
                    first_message: first,
                    last_message: first,
                },
                flags: SignificanceFlags {
                    led_to_date: true,
                    ..Default::default()
                },
                score: 80,
                highlights: vec!["coffee on saturday".to_string()],
                reasoning: "They agreed to meet.".to_string(),
                via_fallback: false,
            }],
            statistics: SignificanceStatistics {
                total_conversations: 1,
                total_analyzed: 1,
                total_significant: 1,
                percentage_significant: 100.0,
                ..Default::default()
            },
            total_cost_usd: 0.0,
            duration_ms: 1,
            completed_at: Utc::now(),
        };

        Report {
            metadata: ReportMetadata {
                dataset: "export.json".to_string(),
                user_id: "me".to_string(),
                generated_at: Utc::now(),
                model_used: "test-model".to_string(),
                duration_seconds: 1.5,
            },
            analysis: Some(analysis),
            significance: Some(significance),
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&create_test_report());

        assert!(markdown.contains("# MatchLens Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("**Overall risk:** 🟠 ORANGE"));
        assert!(markdown.contains("### Crisis Assessment"));
        assert!(markdown.contains("Share date plans with a friend"));
        assert!(markdown.contains("Skipped over budget: attachment"));
        assert!(markdown.contains("### jo (score 80)"));
        assert!(markdown.contains("coffee on saturday"));
    }

    #[test]
    fn test_safety_flags_sorted_by_severity() {
        let report = create_test_report();
        let section = generate_safety_section(&report.analysis.unwrap().foundation.safety);

        let high = section.find("gift card").unwrap();
        let medium = section.find("meeting at home").unwrap();
        assert!(high < medium);
        assert!(section.contains("Meet in public places"));
    }

    #[test]
    fn test_conditional_deep_analysis_note() {
        let mut report = create_test_report();
        if let Some(ref mut analysis) = report.analysis {
            analysis.deep = None;
        }
        report.significance = None;

        let markdown = generate_markdown_report(&report);
        assert!(markdown.contains("Skipped: the safety stage did not escalate."));
        assert!(!markdown.contains("## Significant Conversations"));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_report()).unwrap();

        assert!(json.contains("\"escalation_reason\""));
        assert!(json.contains("\"totalSignificant\": 1"));
        assert!(json.contains("\"ledToDate\": true"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.md");
        write_report("# hello\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# hello\n");
    }
}

//! Multi-chunk aggregation.
//!
//! Merges per-chunk stage outputs of the same type into one new output.
//! Ordinal fields take the worst value, lists are concatenated and
//! deduplicated (first occurrence wins), and summaries are combined in
//! chunk order.

use super::stages::*;
use crate::models::GrowthDirection;
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

/// A payload that can be merged from several chunk results.
pub trait Aggregate: Sized + Default {
    /// Merge two or more parts. Callers never pass fewer than two.
    fn merge(parts: Vec<Self>) -> Self;
}

/// Merge per-chunk outputs into one.
///
/// Returns `None` for an empty list; a single output passes through
/// unchanged.
pub fn aggregate_outputs<P: Aggregate>(mut outputs: Vec<StageOutput<P>>) -> Option<StageOutput<P>> {
    match outputs.len() {
        0 => None,
        1 => outputs.pop(),
        _ => {
            let metadata = merge_metadata(outputs.iter().map(|o| &o.metadata));
            let payload = P::merge(outputs.into_iter().map(|o| o.payload).collect());
            Some(StageOutput::new(payload, metadata))
        }
    }
}

fn merge_metadata<'a>(parts: impl Iterator<Item = &'a StageMetadata>) -> StageMetadata {
    let mut merged: Option<StageMetadata> = None;
    for part in parts {
        merged = Some(match merged {
            None => part.clone(),
            Some(acc) => StageMetadata {
                analyzed_at: acc.analyzed_at.max(part.analyzed_at),
                duration_ms: acc.duration_ms + part.duration_ms,
                model: acc.model,
                tokens_used: acc.tokens_used + part.tokens_used,
                cost_usd: acc.cost_usd + part.cost_usd,
            },
        });
    }
    merged.unwrap_or_else(|| StageMetadata::empty("", chrono::DateTime::<chrono::Utc>::MIN_UTC))
}

/// Combine chunk summaries.
///
/// One summary passes through unchanged; several are prefixed with the
/// batch count and concatenated in order.
pub fn combine_summaries(summaries: &[String]) -> String {
    match summaries {
        [] => String::new(),
        [only] => only.clone(),
        many => {
            let mut combined = format!("Combined analysis of {} batches.", many.len());
            for (i, summary) in many.iter().enumerate() {
                combined.push_str(&format!("\n\nBatch {}: {}", i + 1, summary.trim()));
            }
            combined
        }
    }
}

/// Keep the first item for each key.
pub fn dedup_by_key<T, K, F>(items: impl IntoIterator<Item = T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(key(item)))
        .collect()
}

/// Normalized text used as a deduplication key.
pub fn semantic_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn dedup_strings(items: impl IntoIterator<Item = String>) -> Vec<String> {
    dedup_by_key(items, |s| semantic_key(s))
}

fn summaries<P>(parts: &[P], summary: impl Fn(&P) -> &String) -> String {
    let collected: Vec<String> = parts.iter().map(|p| summary(p).clone()).collect();
    combine_summaries(&collected)
}

/// Merge growth directions without regard to order.
pub fn merge_directions(directions: impl IntoIterator<Item = GrowthDirection>) -> GrowthDirection {
    let distinct: BTreeSet<GrowthDirection> = directions
        .into_iter()
        .filter(|d| *d != GrowthDirection::Unclear)
        .collect();
    match distinct.len() {
        0 => GrowthDirection::Unclear,
        1 => distinct.into_iter().next().unwrap_or_default(),
        _ => GrowthDirection::Mixed,
    }
}

impl Aggregate for SafetyFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);
        let risk_level = parts.iter().map(|p| p.risk_level).max().unwrap_or_default();
        let mut flags = Vec::new();
        let mut recommendations = Vec::new();
        for part in parts {
            flags.extend(part.flags);
            recommendations.extend(part.recommendations);
        }
        Self {
            risk_level,
            flags: dedup_by_key(flags, |f| semantic_key(&f.description)),
            summary,
            recommendations: dedup_strings(recommendations),
        }
    }
}

impl Aggregate for PatternFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);
        let consistency = parts.iter().map(|p| p.consistency).max().unwrap_or_default();
        let communication_style = dedup_strings(
            parts
                .iter()
                .map(|p| p.communication_style.clone())
                .filter(|s| !s.trim().is_empty()),
        )
        .join("; ");

        let mut patterns = Vec::new();
        let mut anxiety = Vec::new();
        let mut avoidance = Vec::new();
        for part in parts {
            patterns.extend(part.patterns);
            anxiety.extend(part.anxiety_markers);
            avoidance.extend(part.avoidance_markers);
        }

        Self {
            communication_style,
            consistency,
            patterns: dedup_by_key(patterns, |p| semantic_key(&p.name)),
            anxiety_markers: dedup_strings(anxiety),
            avoidance_markers: dedup_strings(avoidance),
            summary,
        }
    }
}

impl Aggregate for ChronologyFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);
        let span_days = parts.iter().map(|p| p.span_days).max().unwrap_or(0);
        let growth_detected = parts.iter().any(|p| p.growth_detected);
        let growth_direction = merge_directions(parts.iter().map(|p| p.growth_direction));

        let mut areas = Vec::new();
        let mut phases = Vec::new();
        for part in parts {
            areas.extend(part.growth_areas);
            phases.extend(part.phases);
        }

        Self {
            span_days,
            growth_detected,
            growth_direction,
            growth_areas: dedup_strings(areas),
            phases: dedup_by_key(phases, |p| {
                (semantic_key(&p.label), semantic_key(&p.summary))
            }),
            summary,
        }
    }
}

impl Aggregate for RiskFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);
        let originating_risk = parts.iter().map(|p| p.originating_risk).max().unwrap_or_default();
        let coercive_control = parts.iter().filter_map(|p| p.coercive_control).max();

        let mut manipulation = Vec::new();
        let mut protective = Vec::new();
        let mut recommendations = Vec::new();
        for part in parts {
            manipulation.extend(part.manipulation);
            protective.extend(part.protective_factors);
            recommendations.extend(part.recommendations);
        }

        Self {
            originating_risk,
            manipulation: dedup_by_key(manipulation, |m| semantic_key(&m.tactic)),
            coercive_control,
            protective_factors: dedup_strings(protective),
            summary,
            recommendations: dedup_strings(recommendations),
        }
    }
}

impl Aggregate for AttachmentFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);

        // Most confident part wins; ties go to the lowest style ordinal.
        let leader = parts
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.primary_style.cmp(&a.primary_style))
            })
            .map(|p| (p.primary_style, p.secondary_style, p.confidence))
            .unwrap_or_default();

        let indicators = dedup_strings(parts.into_iter().flat_map(|p| p.indicators));

        Self {
            primary_style: leader.0,
            secondary_style: leader.1,
            confidence: leader.2,
            indicators,
            summary,
        }
    }
}

impl Aggregate for GrowthFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);
        let trajectory = merge_directions(parts.iter().map(|p| p.trajectory));

        let mut milestones = Vec::new();
        let mut areas = Vec::new();
        for part in parts {
            milestones.extend(part.milestones);
            areas.extend(part.areas);
        }

        Self {
            trajectory,
            milestones: dedup_strings(milestones),
            areas: dedup_by_key(areas, |a| semantic_key(&a.area)),
            summary,
        }
    }
}

impl Aggregate for CrisisFindings {
    fn merge(parts: Vec<Self>) -> Self {
        let summary = summaries(&parts, |p| &p.summary);
        let urgency = parts.iter().map(|p| p.urgency).max().unwrap_or_default();

        let mut concerns = Vec::new();
        let mut resources = Vec::new();
        let mut plan = Vec::new();
        for part in parts {
            concerns.extend(part.immediate_concerns);
            resources.extend(part.resources);
            plan.extend(part.safety_plan);
        }

        Self {
            urgency,
            immediate_concerns: dedup_strings(concerns),
            resources: dedup_strings(resources),
            safety_plan: dedup_strings(plan),
            summary,
        }
    }
}

//! Recency-weighted sampling.
//!
//! Bounds the amount of conversation data sent for analysis while keeping
//! recent activity dominant: a hard recency window, a per-conversation cap,
//! and a weighted take over whatever survives.

use crate::models::{Conversation, MessageUnit, TimeSegment};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Anything with a send time.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for MessageUnit {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Configuration for sampling.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Messages older than this many days are never analyzed.
    pub horizon_days: i64,
    /// Maximum number of messages across the whole sample.
    pub total_budget: usize,
    /// Share of the budget reserved for the most recent messages.
    pub recent_weight: f64,
    /// Maximum number of conversations kept.
    pub max_conversations: usize,
    /// Maximum number of messages kept per conversation.
    pub max_messages_per_conversation: usize,
}

impl Default for SamplingConfig {
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

impl From<&crate::config::SamplingSettings> for SamplingConfig {
    fn from(settings: &crate::config::SamplingSettings) -> Self {
        Self {
            horizon_days: settings.horizon_days,
            total_budget: settings.total_budget,
            recent_weight: settings.recent_weight,
            max_conversations: settings.max_conversations,
            max_messages_per_conversation: settings.max_messages_per_conversation,
        }
    }
}

/// Drop every item older than `horizon_days` before `now`.
pub fn window_filter<T: Timestamped + Clone>(
    items: &[T],
    now: DateTime<Utc>,
    horizon_days: i64,
) -> Vec<T> {
    let cutoff = now - Duration::days(horizon_days);
    items
        .iter()
        .filter(|item| item.timestamp() >= cutoff)
        .cloned()
        .collect()
}

/// Take at most `total_budget` items, newest first.
///
/// `floor(total_budget * recent_weight)` items come from the newest end;
/// the remainder is spread evenly over the older items. Inputs that already
/// fit the budget are returned unchanged.
pub fn weighted_take<T: Timestamped + Clone>(
    items: &[T],
    total_budget: usize,
    recent_weight: f64,
) -> Vec<T> {
    if items.len() <= total_budget {
        return items.to_vec();
    }

    let mut ordered: Vec<&T> = items.iter().collect();
    ordered.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));

    let weight = if recent_weight.is_finite() {
        recent_weight.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let recent_count = ((total_budget as f64 * weight).floor() as usize).min(total_budget);
    let (recent, older) = ordered.split_at(recent_count);

    let mut taken: Vec<T> = recent.iter().map(|item| (*item).clone()).collect();
    taken.extend(
        stride_pick(older, total_budget - recent_count)
            .into_iter()
            .cloned(),
    );
    taken
}

fn stride_pick<'a, T>(items: &[&'a T], count: usize) -> Vec<&'a T> {
    if count == 0 || items.is_empty() {
        return Vec::new();
    }
    if count >= items.len() {
        return items.to_vec();
    }
    (0..count).map(|i| items[i * items.len() / count]).collect()
}

/// Keep the `max_conversations` most recently active conversations and the
/// last `max_messages` messages of each.
pub fn cap_conversations(
    conversations: &[Conversation],
    max_conversations: usize,
    max_messages: usize,
) -> Vec<Conversation> {
    let mut ranked: Vec<&Conversation> = conversations.iter().collect();
    ranked.sort_by(|a, b| b.last_message_at().cmp(&a.last_message_at()));

    ranked
        .into_iter()
        .take(max_conversations)
        .map(|conv| {
            let skip = conv.len().saturating_sub(max_messages);
            conv.with_messages(conv.messages[skip..].to_vec())
        })
        .collect()
}

/// Bounded, recency-weighted subset of a dataset.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub conversations: Vec<Conversation>,
    /// Messages in the sample.
    pub message_count: usize,
    /// Messages dropped because they fell outside the recency window.
    pub excluded_by_window: usize,
}

impl Sample {
    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Every sampled message, ascending by send time.
    pub fn chronological_messages(&self) -> Vec<MessageUnit> {
        let mut all: Vec<MessageUnit> = self
            .conversations
            .iter()
            .flat_map(|c| c.messages.iter().cloned())
            .collect();
        all.sort_by_key(|m| m.timestamp);
        all
    }

    /// Whole days between the oldest and newest sampled message.
    pub fn span_days(&self) -> i64 {
        let first = self.conversations.iter().filter_map(|c| c.first_message_at()).min();
        let last = self.conversations.iter().filter_map(|c| c.last_message_at()).max();
        match (first, last) {
            (Some(first), Some(last)) => (last - first).num_days(),
            _ => 0,
        }
    }
}

/// Applies the window filter, conversation cap and weighted take in order.
#[derive(Debug, Clone, Default)]
pub struct Sampler {
    config: SamplingConfig,
}

#[derive(Clone)]
struct Slot {
    conversation: usize,
    position: usize,
    timestamp: DateTime<Utc>,
}

impl Timestamped for Slot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// Build the analysis sample relative to `now`.
    pub fn sample(&self, conversations: &[Conversation], now: DateTime<Utc>) -> Sample {
        let total_before: usize = conversations.iter().map(Conversation::len).sum();

        let windowed: Vec<Conversation> = conversations
            .iter()
            .map(|c| c.with_messages(window_filter(&c.messages, now, self.config.horizon_days)))
            .filter(|c| !c.is_empty())
            .collect();
        let total_windowed: usize = windowed.iter().map(Conversation::len).sum();

        let capped = cap_conversations(
            &windowed,
            self.config.max_conversations,
            self.config.max_messages_per_conversation,
        );

        let slots: Vec<Slot> = capped
            .iter()
            .enumerate()
            .flat_map(|(ci, conv)| {
                conv.messages.iter().enumerate().map(move |(mi, m)| Slot {
                    conversation: ci,
                    position: mi,
                    timestamp: m.timestamp,
                })
            })
            .collect();

        let kept = weighted_take(&slots, self.config.total_budget, self.config.recent_weight);

        let mut selected: Vec<Vec<usize>> = vec![Vec::new(); capped.len()];
        for slot in &kept {
            selected[slot.conversation].push(slot.position);
        }

        let conversations: Vec<Conversation> = capped
            .iter()
            .zip(selected)
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(conv, mut positions)| {
                positions.sort_unstable();
                conv.with_messages(positions.into_iter().map(|p| conv.messages[p].clone()).collect())
            })
            .collect();

        let message_count = conversations.iter().map(Conversation::len).sum();

        debug!(
            "Sampled {} of {} messages across {} conversations ({} outside window)",
            message_count,
            total_before,
            conversations.len(),
            total_before - total_windowed
        );

        Sample {
            conversations,
            message_count,
            excluded_by_window: total_before - total_windowed,
        }
    }
}

/// Recency buckets: label, upper age bound in days (exclusive), weight.
const SEGMENT_BUCKETS: [(&str, Option<i64>, f64); 4] = [
    ("last_7_days", Some(7), 1.0),
    ("last_30_days", Some(30), 0.7),
    ("last_90_days", Some(90), 0.4),
    ("older", None, 0.1),
];

/// Partition messages into non-overlapping recency segments, oldest first.
///
/// Empty buckets are omitted. Messages dated after `now` count as newest.
pub fn segment_by_recency(messages: &[MessageUnit], now: DateTime<Utc>) -> Vec<TimeSegment> {
    let mut buckets: Vec<Vec<MessageUnit>> = vec![Vec::new(); SEGMENT_BUCKETS.len()];

    for message in messages {
        let age_days = (now - message.timestamp).num_days();
        let slot = SEGMENT_BUCKETS
            .iter()
            .position(|(_, upper, _)| upper.map_or(true, |upper| age_days < upper))
            .unwrap_or(SEGMENT_BUCKETS.len() - 1);
        buckets[slot].push(message.clone());
    }

    let mut segments = Vec::new();
    let mut lower_days = 0;
    for ((label, upper, weight), mut bucket) in SEGMENT_BUCKETS.iter().zip(buckets) {
        let end = now - Duration::days(lower_days);
        if let Some(upper) = upper {
            lower_days = *upper;
        }
        if bucket.is_empty() {
            continue;
        }
        bucket.sort_by_key(|m| m.timestamp);
        let start = match upper {
            Some(upper) => now - Duration::days(*upper),
            None => bucket[0].timestamp,
        };
        segments.push(TimeSegment {
            label: label.to_string(),
            start,
            end,
            weight: *weight,
            messages: bucket,
        });
    }

    segments.reverse();
    segments
}

//! Significance batch scorer.
//!
//! Scores every conversation with at least three messages for
//! "significance" (led to a date, contact exchange, unusual length,
//! emotional depth). Conversations are sent in fixed-size concurrent
//! batches with a pacing delay between batches. When a single check fails,
//! a length-based fallback decides instead.

use crate::dispatch::{parse_payload, Dispatcher};
use crate::error::DispatchError;
use crate::grouping::{average_length, group_conversations};
use crate::models::{Conversation, Dataset, MessageUnit};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for significance scoring.
#[derive(Debug, Clone)]
pub struct SignificanceConfig {
    /// Conversations shorter than this are never significant.
    pub min_messages: usize,
    /// Messages taken from each of the start, middle and end.
    pub sample_size: usize,
    /// Conversations dispatched concurrently per batch.
    pub batch_size: usize,
    /// Delay between batches.
    pub pacing_ms: u64,
    /// Fallback: minimum message count to count as unusually long.
    pub fallback_floor: usize,
    /// Fallback: multiple of the average length to count as unusually long.
    pub fallback_multiplier: f64,
    /// Fallback: score assigned to unusually long conversations.
    pub fallback_score: u8,
}

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            min_messages: 3,
            sample_size: 5,
            batch_size: 5,
            pacing_ms: 1000,
            fallback_floor: 20,
            fallback_multiplier: 2.0,
            fallback_score: 50,
        }
    }
}

impl From<&crate::config::SignificanceSettings> for SignificanceConfig {
    fn from(settings: &crate::config::SignificanceSettings) -> Self {
        Self {
            min_messages: settings.min_messages,
            sample_size: settings.sample_size,
            batch_size: settings.batch_size,
            pacing_ms: settings.pacing_ms,
            fallback_floor: settings.fallback_floor,
            fallback_multiplier: settings.fallback_multiplier,
            fallback_score: settings.fallback_score,
        }
    }
}

/// Which significance criteria a conversation met.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignificanceFlags {
    pub led_to_date: bool,
    pub contact_exchange: bool,
    pub unusual_length: bool,
    pub emotional_depth: bool,
}

impl SignificanceFlags {
    pub fn any(&self) -> bool {
        self.led_to_date || self.contact_exchange || self.unusual_length || self.emotional_depth
    }
}

/// Structured answer expected from the completion capability.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SignificanceVerdict {
    is_significant: bool,
    score: f64,
    flags: SignificanceFlags,
    highlights: Vec<String>,
    reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDuration {
    pub days: i64,
    pub first_message: DateTime<Utc>,
    pub last_message: DateTime<Utc>,
}

/// A conversation judged significant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificantConversationRecord {
    pub match_id: String,
    pub counterparty_id: String,
    pub message_count: usize,
    pub duration: ConversationDuration,
    pub flags: SignificanceFlags,
    /// 0 to 100.
    pub score: u8,
    pub highlights: Vec<String>,
    pub reasoning: String,
    /// Decided by the length heuristic after a failed check.
    pub via_fallback: bool,
}

/// Count of significant conversations per flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagBreakdown {
    pub led_to_date: usize,
    pub contact_exchange: usize,
    pub unusual_length: usize,
    pub emotional_depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificanceStatistics {
    pub total_conversations: usize,
    /// Conversations long enough to be checked.
    pub total_analyzed: usize,
    pub total_significant: usize,
    /// Share of all conversations, 0 to 100.
    pub percentage_significant: f64,
    pub breakdown: FlagBreakdown,
    pub avg_messages_significant: f64,
    pub avg_messages_all: f64,
    /// Checks decided by the length heuristic.
    pub fallback_count: usize,
}

impl SignificanceStatistics {
    /// Reduce per-conversation records into summary statistics.
    pub fn from_records(
        conversations: &[Conversation],
        total_analyzed: usize,
        fallback_count: usize,
        records: &[SignificantConversationRecord],
    ) -> Self {
        let total_conversations = conversations.len();
        let total_significant = records.len();

        let breakdown = records.iter().fold(FlagBreakdown::default(), |mut acc, r| {
            acc.led_to_date += r.flags.led_to_date as usize;
            acc.contact_exchange += r.flags.contact_exchange as usize;
            acc.unusual_length += r.flags.unusual_length as usize;
            acc.emotional_depth += r.flags.emotional_depth as usize;
            acc
        });

        let percentage_significant = if total_conversations == 0 {
            0.0
        } else {
            round1(total_significant as f64 * 100.0 / total_conversations as f64)
        };

        let avg_messages_significant = if records.is_empty() {
            0.0
        } else {
            round1(records.iter().map(|r| r.message_count).sum::<usize>() as f64 / records.len() as f64)
        };

        Self {
            total_conversations,
            total_analyzed,
            total_significant,
            percentage_significant,
            breakdown,
            avg_messages_significant,
            avg_messages_all: round1(average_length(conversations)),
            fallback_count,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Outcome of a significance run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificanceAnalysisResult {
    pub significant_conversations: Vec<SignificantConversationRecord>,
    pub statistics: SignificanceStatistics,
    pub total_cost_usd: f64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

struct Outcome {
    record: Option<SignificantConversationRecord>,
    via_fallback: bool,
}

/// Scores conversations in paced batches.
pub struct SignificanceScorer {
    dispatcher: Dispatcher,
    config: SignificanceConfig,
    progress: Option<ProgressBar>,
}

impl SignificanceScorer {
    pub fn new(dispatcher: Dispatcher, config: SignificanceConfig) -> Self {
        Self {
            dispatcher,
            config,
            progress: None,
        }
    }

    /// Tick `progress` once per conversation.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &SignificanceConfig {
        &self.config
    }

    /// Group a dataset and score every conversation.
    pub async fn score_dataset(&self, dataset: &Dataset) -> SignificanceAnalysisResult {
        let conversations = group_conversations(&dataset.messages, &dataset.user_id);
        self.score(&conversations).await
    }

    /// Score already-grouped conversations.
    pub async fn score(&self, conversations: &[Conversation]) -> SignificanceAnalysisResult {
        let started = Instant::now();
        let cost_before = self.dispatcher.costs().total_cost();
        let average = average_length(conversations);

        if let Some(pb) = &self.progress {
            pb.set_length(conversations.len() as u64);
        }

        let (eligible, too_short): (Vec<&Conversation>, Vec<&Conversation>) = conversations
            .iter()
            .partition(|c| c.len() >= self.config.min_messages);
        debug!(
            "{} conversations eligible for significance scoring, {} too short",
            eligible.len(),
            too_short.len()
        );
        if let Some(pb) = &self.progress {
            pb.inc(too_short.len() as u64);
        }

        let batches: Vec<&[&Conversation]> = eligible.chunks(self.config.batch_size.max(1)).collect();
        let mut outcomes = Vec::with_capacity(eligible.len());

        for (i, batch) in batches.iter().enumerate() {
            debug!("Significance batch {}/{} ({} conversations)", i + 1, batches.len(), batch.len());
            let results = join_all(batch.iter().map(|c| self.score_one(c, average))).await;
            outcomes.extend(results);

            if i + 1 < batches.len() && self.config.pacing_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;
            }
        }

        let fallback_count = outcomes.iter().filter(|o| o.via_fallback).count();
        let records: Vec<SignificantConversationRecord> =
            outcomes.into_iter().filter_map(|o| o.record).collect();
        let statistics =
            SignificanceStatistics::from_records(conversations, eligible.len(), fallback_count, &records);

        if let Some(pb) = &self.progress {
            pb.finish_with_message("Significance scoring complete");
        }

        info!(
            "{} of {} conversations significant ({:.1}%)",
            statistics.total_significant, statistics.total_conversations, statistics.percentage_significant
        );

        SignificanceAnalysisResult {
            significant_conversations: records,
            statistics,
            total_cost_usd: self.dispatcher.costs().total_cost() - cost_before,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    async fn score_one(&self, conversation: &Conversation, average: f64) -> Outcome {
        let outcome = match self.check(conversation).await {
            Ok(verdict) => Outcome {
                record: build_record(conversation, verdict, false),
                via_fallback: false,
            },
            Err(e) => {
                warn!(
                    "Significance check failed for {}, using length heuristic: {}",
                    conversation.match_id, e
                );
                Outcome {
                    record: self.fallback(conversation, average),
                    via_fallback: true,
                }
            }
        };

        if let Some(pb) = &self.progress {
            pb.inc(1);
        }
        outcome
    }

    async fn check(&self, conversation: &Conversation) -> Result<SignificanceVerdict, DispatchError> {
        let sample = render_sample(conversation, self.config.sample_size);
        let prompts = self.dispatcher.prompts();
        let prompt = prompts.significance_prompt(&sample);
        let dispatched = self
            .dispatcher
            .send("significance", &prompt, prompts.significance_schema())
            .await?;
        parse_payload("significance", dispatched.payload)
    }

    /// Unusually long conversations count as significant when the check
    /// itself could not be completed.
    fn fallback(&self, conversation: &Conversation, average: f64) -> Option<SignificantConversationRecord> {
        let count = conversation.len();
        let long = count as f64 >= self.config.fallback_multiplier * average
            && count >= self.config.fallback_floor;
        if !long {
            return None;
        }

        let verdict = SignificanceVerdict {
            is_significant: true,
            score: f64::from(self.config.fallback_score),
            flags: SignificanceFlags {
                unusual_length: true,
                ..Default::default()
            },
            highlights: Vec::new(),
            reasoning: format!(
                "Conversation has {} messages, at least {:.0}x the average of {:.1}",
                count, self.config.fallback_multiplier, average
            ),
        };
        build_record(conversation, verdict, true)
    }
}

fn build_record(
    conversation: &Conversation,
    verdict: SignificanceVerdict,
    via_fallback: bool,
) -> Option<SignificantConversationRecord> {
    if !verdict.is_significant {
        return None;
    }
    let first_message = conversation.first_message_at()?;
    let last_message = conversation.last_message_at()?;

    Some(SignificantConversationRecord {
        match_id: conversation.match_id.clone(),
        counterparty_id: conversation.counterparty_id.clone(),
        message_count: conversation.len(),
        duration: ConversationDuration {
            days: conversation.duration_days(),
            first_message,
            last_message,
        },
        flags: verdict.flags,
        score: verdict.score.round().clamp(0.0, 100.0) as u8,
        highlights: verdict.highlights,
        reasoning: verdict.reasoning,
        via_fallback,
    })
}

/// First, middle and last `k` messages; everything when the conversation
/// has at most `3k` messages.
pub fn representative_sample(messages: &[MessageUnit], k: usize) -> Vec<&[MessageUnit]> {
    let len = messages.len();
    if k == 0 || len <= 3 * k {
        return vec![messages];
    }
    let middle_start = (len / 2).saturating_sub(k / 2).max(k);
    let middle_end = (middle_start + k).min(len - k);
    vec![
        &messages[..k],
        &messages[middle_start..middle_end],
        &messages[len - k..],
    ]
}

fn render_sample(conversation: &Conversation, k: usize) -> String {
    let mut out = format!(
        "Total messages: {}\nDuration: {} days\n\n",
        conversation.len(),
        conversation.duration_days()
    );
    let parts = representative_sample(&conversation.messages, k);
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str("[...]\n");
        }
        for message in part.iter() {
            out.push_str(&message.to_line());
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedProvider;
    use crate::completion::{Completion, CompletionProvider};
    use crate::cost::{CostTracker, Pricing};
    use crate::error::CompletionError;
    use crate::models::{RawMessage, Sender};
    use crate::prompts::DefaultPrompts;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn scorer(provider: Arc<ScriptedProvider>) -> SignificanceScorer {
        let dispatcher = Dispatcher::new(
            provider,
            Arc::new(DefaultPrompts),
            Pricing::default(),
            Arc::new(CostTracker::default()),
        );
        SignificanceScorer::new(
            dispatcher,
            SignificanceConfig {
                pacing_ms: 0,
                ..Default::default()
            },
        )
    }

    fn conversation(id: &str, count: usize) -> Conversation {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        Conversation {
            match_id: id.to_string(),
            counterparty_id: format!("cp-{}", id),
            messages: (0..count)
                .map(|i| MessageUnit {
                    sender: if i % 2 == 0 { Sender::User } else { Sender::Counterparty },
                    timestamp: start + ChronoDuration::hours(i as i64),
                    text: format!("{} message {}", id, i),
                })
                .collect(),
        }
    }

    /// Provider that takes a fixed time per call and records concurrency.
    struct SlowProvider {
        delay: Duration,
        started: tokio::time::Instant,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        start_offsets: Mutex<Vec<Duration>>,
    }

    impl SlowProvider {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                started: tokio::time::Instant::now(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                start_offsets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for SlowProvider {
        fn model(&self) -> &str {
            "slow-model"
        }

        async fn complete(&self, _prompt: &str, _schema_hint: &str) -> Result<Completion, CompletionError> {
            self.start_offsets.lock().unwrap().push(self.started.elapsed());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Completion {
                payload: json!({"isSignificant": false, "score": 10}),
                model: "slow-model".to_string(),
                tokens_used: 10,
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_bounded_and_paced() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(50)));
        let dispatcher = Dispatcher::new(
            provider.clone(),
            Arc::new(DefaultPrompts),
            Pricing::default(),
            Arc::new(CostTracker::default()),
        );
        let scorer = SignificanceScorer::new(
            dispatcher,
            SignificanceConfig {
                batch_size: 5,
                pacing_ms: 100,
                ..Default::default()
            },
        );
        let conversations: Vec<Conversation> =
            (0..12).map(|i| conversation(&format!("c{}", i), 4)).collect();

        let started = tokio::time::Instant::now();
        let result = scorer.score(&conversations).await;
        let elapsed = started.elapsed();

        assert_eq!(result.statistics.total_analyzed, 12);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 5);

        // Three batches: each starts after the previous one finished plus the pause.
        let offsets = provider.start_offsets.lock().unwrap().clone();
        assert_eq!(offsets.len(), 12);
        let ms: Vec<u128> = offsets.iter().map(|d| d.as_millis()).collect();
        assert!(ms[..5].iter().all(|&t| t < 5));
        assert!(ms[5..10].iter().all(|&t| (150..155).contains(&t)));
        assert!(ms[10..].iter().all(|&t| (300..310).contains(&t)));

        // 3 x 50ms of work plus 2 pauses; no pause after the last batch.
        assert!(elapsed >= Duration::from_millis(350));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_short_conversation_is_never_significant() {
        let provider = Arc::new(ScriptedProvider::new(Ok(json!({
            "isSignificant": true,
            "score": 90,
            "flags": {"ledToDate": true}
        }))));
        let scorer = scorer(provider.clone());

        let result = scorer.score(&[conversation("short", 2)]).await;

        assert_eq!(provider.calls(), 0);
        assert_eq!(result.statistics.total_significant, 0);
        assert_eq!(result.statistics.total_analyzed, 0);
        assert_eq!(result.statistics.total_conversations, 1);
    }

    #[tokio::test]
    async fn test_long_conversation_falls_back_on_failure() {
        let provider = Arc::new(ScriptedProvider::new(Err(CompletionError::Unavailable(
            "connection refused".to_string(),
        ))));
        let scorer = scorer(provider);
        let conversations = vec![
            conversation("long", 50),
            conversation("a", 5),
            conversation("b", 5),
            conversation("c", 5),
        ];

        let result = scorer.score(&conversations).await;

        assert_eq!(result.significant_conversations.len(), 1);
        let record = &result.significant_conversations[0];
        assert_eq!(record.match_id, "long");
        assert_eq!(record.score, 50);
        assert!(record.via_fallback);
        assert_eq!(
            record.flags,
            SignificanceFlags {
                unusual_length: true,
                ..Default::default()
            }
        );
        assert_eq!(result.statistics.fallback_count, 4);
        assert_eq!(result.statistics.breakdown.unusual_length, 1);
    }

    #[tokio::test]
    async fn test_malformed_answer_uses_fallback() {
        let provider = Arc::new(ScriptedProvider::new(Ok(json!(["yes"]))));
        let scorer = scorer(provider);

        let result = scorer.score(&[conversation("a", 4)]).await;

        assert_eq!(result.statistics.total_significant, 0);
        assert_eq!(result.statistics.fallback_count, 1);
    }

    #[tokio::test]
    async fn test_coffee_date_end_to_end() {
        let start = Utc.with_ymd_and_hms(2026, 4, 10, 18, 0, 0).unwrap();
        let dataset = Dataset {
            user_id: "me".to_string(),
            messages: [
                ("me", "hi! loved your hiking photos"),
                ("jo", "thanks! want to grab coffee saturday?"),
                ("me", "yes, coffee at 10 sounds great"),
            ]
            .iter()
            .enumerate()
            .map(|(i, (sender, text))| RawMessage {
                match_id: "match-1".to_string(),
                sender_id: sender.to_string(),
                sent_at: start + ChronoDuration::minutes(i as i64 * 5),
                text: text.to_string(),
            })
            .collect(),
        };
        let provider = Arc::new(ScriptedProvider::new(Ok(json!({
            "isSignificant": true,
            "score": 80,
            "flags": {"ledToDate": true},
            "highlights": ["planned coffee on saturday"],
            "reasoning": "They agreed to meet."
        }))));
        let scorer = scorer(provider.clone());

        let result = scorer.score_dataset(&dataset).await;

        assert!(provider.prompts()[0].contains("coffee at 10"));
        let stats = &result.statistics;
        assert_eq!(stats.total_significant, 1);
        assert_eq!(stats.breakdown.led_to_date, 1);
        assert_eq!(stats.percentage_significant, 100.0);
        assert_eq!(result.significant_conversations[0].counterparty_id, "jo");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["statistics"]["totalSignificant"], 1);
        assert_eq!(json["statistics"]["breakdown"]["ledToDate"], 1);
    }

    #[tokio::test]
    async fn test_batches_cover_every_conversation() {
        let provider = Arc::new(ScriptedProvider::new(Ok(json!({"isSignificant": false}))));
        let scorer = scorer(provider.clone());
        let conversations: Vec<Conversation> =
            (0..12).map(|i| conversation(&format!("c{}", i), 4)).collect();

        let result = scorer.score(&conversations).await;

        assert_eq!(provider.calls(), 12);
        assert_eq!(result.statistics.total_analyzed, 12);
        assert_eq!(result.statistics.percentage_significant, 0.0);
    }

    #[test]
    fn test_short_conversations_need_no_dispatch() {
        let provider = Arc::new(ScriptedProvider::new(Err(CompletionError::Timeout(1))));
        let scorer = scorer(provider.clone());

        let result = tokio_test::block_on(scorer.score(&[conversation("a", 1), conversation("b", 2)]));

        assert_eq!(provider.calls(), 0);
        assert_eq!(result.statistics.fallback_count, 0);
        assert_eq!(result.statistics.avg_messages_all, 1.5);
        assert_eq!(result.statistics.avg_messages_significant, 0.0);
    }

    #[test]
    fn test_score_is_clamped() {
        let conv = conversation("a", 4);
        let verdict = SignificanceVerdict {
            is_significant: true,
            score: 250.0,
            ..Default::default()
        };
        assert_eq!(build_record(&conv, verdict, false).unwrap().score, 100);
    }

    #[test]
    fn test_representative_sample() {
        let conv = conversation("a", 40);
        let parts = representative_sample(&conv.messages, 5);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.len() == 5));
        assert_eq!(parts[0][0].text, "a message 0");
        assert_eq!(parts[2][4].text, "a message 39");

        let short = conversation("b", 15);
        let parts = representative_sample(&short.messages, 5);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 15);
    }
}

//! Data models for conversation analysis.
//!
//! This module contains the inbound dataset records, the grouped
//! conversation shapes consumed by the pipeline, and the ordinal scales
//! shared by every analysis stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single message as delivered by the import layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Conversation / match identifier.
    pub match_id: String,
    /// Identifier of the participant who sent the message.
    pub sender_id: String,
    /// Send time.
    pub sent_at: DateTime<Utc>,
    /// Message body (already anonymized upstream).
    pub text: String,
}

/// A user's normalized message history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Identifier of the user the report is produced for.
    pub user_id: String,
    /// Flat message list in any order.
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

impl Dataset {
    /// Load a dataset from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse dataset: {}", path.display()))
    }
}

/// Who sent a message, relative to the analyzed user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Counterparty,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "User"),
            Sender::Counterparty => write!(f, "Match"),
        }
    }
}

/// A message as consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUnit {
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl MessageUnit {
    /// Render as a single transcript line.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M"),
            self.sender,
            self.text
        )
    }
}

/// All messages exchanged with one counterparty, ascending by send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub match_id: String,
    pub counterparty_id: String,
    pub messages: Vec<MessageUnit>,
}

impl Conversation {
    /// Number of messages in the conversation.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first_message_at(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.timestamp)
    }

    pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.timestamp)
    }

    /// Whole days between the first and last message.
    pub fn duration_days(&self) -> i64 {
        match (self.first_message_at(), self.last_message_at()) {
            (Some(first), Some(last)) => (last - first).num_days(),
            _ => 0,
        }
    }

    /// Render the conversation as a transcript block.
    pub fn transcript(&self) -> String {
        let mut out = format!("### Conversation {} (match {})\n", self.counterparty_id, self.match_id);
        for message in &self.messages {
            out.push_str(&message.to_line());
            out.push('\n');
        }
        out
    }

    /// Build a copy holding only the given messages.
    pub fn with_messages(&self, messages: Vec<MessageUnit>) -> Self {
        Self {
            match_id: self.match_id.clone(),
            counterparty_id: self.counterparty_id.clone(),
            messages,
        }
    }
}

/// A recency bucket of messages used by temporal analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSegment {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Relative importance in (0, 1].
    pub weight: f64,
    pub messages: Vec<MessageUnit>,
}

impl TimeSegment {
    /// Render the segment as a prompt block.
    pub fn render(&self) -> String {
        let mut out = format!(
            "### Segment {} ({} to {}, weight {:.1})\n",
            self.label,
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d"),
            self.weight
        );
        for message in &self.messages {
            out.push_str(&message.to_line());
            out.push('\n');
        }
        out
    }
}

/// Error returned when parsing an ordinal scale value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {scale} value: {value}")]
pub struct ScaleParseError {
    pub scale: &'static str,
    pub value: String,
}

/// Implements case-insensitive `FromStr` and a lenient `Deserialize`
/// for a label enum.
macro_rules! lenient_enum {
    ($name:ident, $scale:literal, { $($text:literal => $variant:ident),+ $(,)? }) => {
        impl FromStr for $name {
            type Err = ScaleParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(ScaleParseError {
                        scale: $scale,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Deserializes an optional label, reading JSON `null` and the strings
/// `"null"`, `"none"` and `""` as `None`.
pub fn optional_label<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "" | "null" | "none" => Ok(None),
            _ => raw.parse().map(Some).map_err(serde::de::Error::custom),
        },
    }
}

/// Overall risk level of a safety assessment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Green,
    Yellow,
    Orange,
    Red,
}

lenient_enum!(RiskLevel, "risk level", {
    "green" => Green,
    "low" => Green,
    "yellow" => Yellow,
    "moderate" => Yellow,
    "orange" => Orange,
    "high" => Orange,
    "red" => Red,
    "critical" => Red,
});

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Green => write!(f, "GREEN"),
            RiskLevel::Yellow => write!(f, "YELLOW"),
            RiskLevel::Orange => write!(f, "ORANGE"),
            RiskLevel::Red => write!(f, "RED"),
        }
    }
}

impl RiskLevel {
    /// Returns an emoji representation of the level.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Green => "🟢",
            RiskLevel::Yellow => "🟡",
            RiskLevel::Orange => "🟠",
            RiskLevel::Red => "🔴",
        }
    }

    /// True for the two highest levels.
    pub fn is_elevated(&self) -> bool {
        *self >= RiskLevel::Orange
    }
}

/// Severity of an individual finding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

lenient_enum!(Severity, "severity", {
    "low" => Low,
    "medium" => Medium,
    "moderate" => Medium,
    "high" => High,
    "severe" => High,
    "critical" => Critical,
});

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

/// How often a behavior was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Isolated,
    Occasional,
    Frequent,
    Consistent,
}

lenient_enum!(Frequency, "frequency", {
    "isolated" => Isolated,
    "once" => Isolated,
    "occasional" => Occasional,
    "frequent" => Frequent,
    "consistent" => Consistent,
    "pattern" => Consistent,
});

impl Frequency {
    /// True when the behavior forms a pattern rather than an isolated incident.
    pub fn is_pattern(&self) -> bool {
        *self >= Frequency::Frequent
    }
}

/// How consistent a communication style is across conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    #[default]
    Consistent,
    Mixed,
    Inconsistent,
}

lenient_enum!(Consistency, "consistency", {
    "consistent" => Consistent,
    "stable" => Consistent,
    "mixed" => Mixed,
    "inconsistent" => Inconsistent,
    "erratic" => Inconsistent,
});

/// Direction of change over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthDirection {
    #[default]
    Unclear,
    Stable,
    Improving,
    Declining,
    Mixed,
}

lenient_enum!(GrowthDirection, "growth direction", {
    "unclear" => Unclear,
    "unknown" => Unclear,
    "stable" => Stable,
    "improving" => Improving,
    "positive" => Improving,
    "declining" => Declining,
    "negative" => Declining,
    "mixed" => Mixed,
});

impl fmt::Display for GrowthDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrowthDirection::Unclear => write!(f, "unclear"),
            GrowthDirection::Stable => write!(f, "stable"),
            GrowthDirection::Improving => write!(f, "improving"),
            GrowthDirection::Declining => write!(f, "declining"),
            GrowthDirection::Mixed => write!(f, "mixed"),
        }
    }
}

/// Attachment style inferred from communication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStyle {
    Secure,
    Anxious,
    Avoidant,
    Disorganized,
    #[default]
    Unclear,
}

lenient_enum!(AttachmentStyle, "attachment style", {
    "secure" => Secure,
    "anxious" => Anxious,
    "anxious-preoccupied" => Anxious,
    "avoidant" => Avoidant,
    "dismissive-avoidant" => Avoidant,
    "disorganized" => Disorganized,
    "fearful-avoidant" => Disorganized,
    "unclear" => Unclear,
    "unknown" => Unclear,
});

impl fmt::Display for AttachmentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentStyle::Secure => write!(f, "secure"),
            AttachmentStyle::Anxious => write!(f, "anxious"),
            AttachmentStyle::Avoidant => write!(f, "avoidant"),
            AttachmentStyle::Disorganized => write!(f, "disorganized"),
            AttachmentStyle::Unclear => write!(f, "unclear"),
        }
    }
}

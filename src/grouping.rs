//! Conversation grouping.
//!
//! Partitions the flat message list into one conversation per match and
//! identifies the counterparty of each.

use crate::models::{Conversation, MessageUnit, RawMessage, Sender};
use std::collections::HashMap;
use tracing::debug;

/// Group messages by match identifier.
///
/// Conversations are returned in order of first appearance of their match
/// id; messages inside each conversation are sorted ascending by send time
/// (stable for equal timestamps). The counterparty is the first sender in
/// the group who is not the user, falling back to `unknown-<match_id>`.
pub fn group_conversations(messages: &[RawMessage], user_id: &str) -> Vec<Conversation> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&RawMessage>)> = Vec::new();

    for message in messages {
        let slot = *index.entry(message.match_id.as_str()).or_insert_with(|| {
            groups.push((message.match_id.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(message);
    }

    let conversations: Vec<Conversation> = groups
        .into_iter()
        .map(|(match_id, group)| build_conversation(match_id, group, user_id))
        .collect();

    debug!(
        "Grouped {} messages into {} conversations",
        messages.len(),
        conversations.len()
    );

    conversations
}

fn build_conversation(match_id: &str, group: Vec<&RawMessage>, user_id: &str) -> Conversation {
    let counterparty_id = group
        .iter()
        .find(|m| m.sender_id != user_id)
        .map(|m| m.sender_id.clone())
        .unwrap_or_else(|| format!("unknown-{}", match_id));

    let mut messages: Vec<MessageUnit> = group
        .into_iter()
        .map(|m| MessageUnit {
            sender: if m.sender_id == user_id {
                Sender::User
            } else {
                Sender::Counterparty
            },
            timestamp: m.sent_at,
            text: m.text.clone(),
        })
        .collect();
    messages.sort_by_key(|m| m.timestamp);

    Conversation {
        match_id: match_id.to_string(),
        counterparty_id,
        messages,
    }
}

/// Average number of messages per conversation (0 for an empty list).
pub fn average_length(conversations: &[Conversation]) -> f64 {
    if conversations.is_empty() {
        return 0.0;
    }
    let total: usize = conversations.iter().map(Conversation::len).sum();
    total as f64 / conversations.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn raw(match_id: &str, sender: &str, minute: u32, text: &str) -> RawMessage {
        RawMessage {
            match_id: match_id.to_string(),
            sender_id: sender.to_string(),
            sent_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, minute, 0).unwrap(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(group_conversations(&[], "me").is_empty());
        assert_eq!(average_length(&[]), 0.0);
    }

    #[test]
    fn test_groups_by_match_and_sorts() {
        let messages = vec![
            raw("m1", "me", 5, "second"),
            raw("m2", "sam", 1, "hello from sam"),
            raw("m1", "alex", 2, "first"),
            raw("m1", "me", 9, "third"),
        ];

        let conversations = group_conversations(&messages, "me");

        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].match_id, "m1");
        assert_eq!(conversations[0].counterparty_id, "alex");
        let texts: Vec<_> = conversations[0].messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert_eq!(conversations[0].messages[0].sender, Sender::Counterparty);
        assert_eq!(conversations[1].counterparty_id, "sam");
    }

    #[test]
    fn test_user_only_conversation_gets_synthetic_id() {
        let messages = vec![raw("m9", "me", 1, "anyone there?")];
        let conversations = group_conversations(&messages, "me");
        assert_eq!(conversations[0].counterparty_id, "unknown-m9");
    }

    #[test]
    fn test_average_length() {
        let messages = vec![
            raw("a", "me", 1, "x"),
            raw("a", "p", 2, "y"),
            raw("a", "me", 3, "z"),
            raw("b", "q", 1, "w"),
        ];
        let conversations = group_conversations(&messages, "me");
        assert_eq!(average_length(&conversations), 2.0);
    }
}

//! Conversation history
//!
//! Append-only, ordered record of chat turns for one session. The reasoning
//! loop consumes a recent window of it; the learning pipeline reads the same
//! window for fact and preference extraction.

use crate::llm::{ChatMessage, ChatRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single stored turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: ChatMessage,
    /// Approximate token count for context window management
    pub token_count: usize,
}

impl ConversationEntry {
    pub fn new(message: ChatMessage) -> Self {
        let token_count = (message.content.len() + 3) / 4;

        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message,
            token_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    entries: Vec<ConversationEntry>,
    total_tokens: usize,
}

impl ConversationHistory {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            entries: Vec::new(),
            total_tokens: 0,
        }
    }

    pub fn append(&mut self, message: ChatMessage) {
        let entry = ConversationEntry::new(message);
        self.total_tokens += entry.token_count;
        self.entries.push(entry);
        self.updated_at = Utc::now();
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// The `count` most recent messages, oldest first
    pub fn recent(&self, count: usize) -> Vec<ChatMessage> {
        let start = self.entries.len().saturating_sub(count);
        self.entries[start..]
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Plain-text transcript used in extraction prompts
pub fn format_transcript(messages: &[ChatMessage]) -> String {
    let mut text = String::new();

    for msg in messages {
        let role_str = match msg.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
            ChatRole::System => "System",
            ChatRole::Tool => "Tool",
        };

        text.push_str(&format!("{}: {}\n", role_str, msg.content));
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_history() {
        let mut history = ConversationHistory::new(Uuid::new_v4());

        history.append(ChatMessage::user("Which invoices are overdue?"));
        history.append(ChatMessage::assistant("INV-1042 is 12 days overdue."));

        assert_eq!(history.len(), 2);
        assert!(history.total_tokens() > 0);
        assert_eq!(history.messages()[0].role, ChatRole::User);
    }

    #[test]
    fn test_recent_window_is_chronological() {
        let mut history = ConversationHistory::new(Uuid::new_v4());
        for i in 0..10 {
            history.append(ChatMessage::user(format!("Question {}", i)));
        }

        let recent = history.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "Question 7");
        assert_eq!(recent[2].content, "Question 9");

        assert_eq!(history.recent(50).len(), 10);
    }

    #[test]
    fn test_format_transcript() {
        let messages = vec![
            ChatMessage::user("I like weekly reports"),
            ChatMessage::assistant("Noted."),
        ];

        let formatted = format_transcript(&messages);
        assert!(formatted.contains("User: I like weekly reports"));
        assert!(formatted.contains("Assistant: Noted."));
    }
}

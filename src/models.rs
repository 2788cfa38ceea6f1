//! Core data models for the agent's memory and reasoning transcript

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

//
// ================= Memory =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Preference,
    Conversation,
    Task,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::Conversation => "conversation",
            MemoryType::Task => "task",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "fact" => Some(MemoryType::Fact),
            "preference" => Some(MemoryType::Preference),
            "conversation" => Some(MemoryType::Conversation),
            "task" => Some(MemoryType::Task),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored, embedded unit of knowledge.
///
/// `id`, `content`, `embedding` and `created_at` never change after creation.
/// Vectors are not serialized: memories leave the process as text only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing)]
    pub embedding: Vec<f32>,
    pub memory_type: MemoryType,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

impl Memory {
    pub fn new(
        content: impl Into<String>,
        memory_type: MemoryType,
        embedding: Vec<f32>,
        importance: f32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            embedding,
            memory_type,
            importance: clamp_unit(importance),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    /// Record a recall hit
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = at;
    }

    pub fn set_importance(&mut self, importance: f32) {
        self.importance = clamp_unit(importance);
    }
}

/// A recalled memory with its similarity to the query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

//
// ================= Preferences =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreference {
    pub key: String,
    pub value: String,
    pub confidence: f32,
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    pub fn new(key: impl Into<String>, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            confidence: clamp_unit(confidence),
            updated_at: Utc::now(),
        }
    }
}

//
// ================= Stats =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStats {
    pub count: usize,
    pub by_type: BTreeMap<MemoryType, usize>,
    pub avg_importance: f32,
    pub avg_access_count: f32,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub preference_count: usize,
    pub dimensions: usize,
}

//
// ================= Reasoning transcript =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningStage {
    Planning,
    Acting,
    Validating,
    Answering,
}

impl fmt::Display for ReasoningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasoningStage::Planning => "PLAN",
            ReasoningStage::Acting => "ACT",
            ReasoningStage::Validating => "VALIDATE",
            ReasoningStage::Answering => "ANSWER",
        };
        write!(f, "{}", s)
    }
}

/// One tool invocation, owned by the step that made it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolCallRecord {
    pub fn failed(
        tool: impl Into<String>,
        input: serde_json::Value,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool: tool.into(),
            input,
            output: serde_json::Value::Null,
            success: false,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub stage: ReasoningStage,
    pub description: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// False when the step timed out or its checks failed
    pub succeeded: bool,
    pub created_at: DateTime<Utc>,
}

impl ReasoningStep {
    pub fn new(stage: ReasoningStage, description: impl Into<String>) -> Self {
        Self {
            stage,
            description: description.into(),
            tool_calls: Vec::new(),
            succeeded: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn failed(mut self) -> Self {
        self.succeeded = false;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model declared it had enough information and validation passed
    Sufficient,
    /// `max_iterations` was reached
    BudgetExhausted,
    /// A proposed tool needs user approval before it may run
    PendingConfirmation,
}

/// A tool call held back until the user approves it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingConfirmation {
    pub tool: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub final_answer: String,
    pub steps: Vec<ReasoningStep>,
    pub tools_used: BTreeSet<String>,
    pub iteration_count: u32,
    pub confidence: f32,
    pub sources: BTreeSet<String>,
    pub stop_reason: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_confirmation: Option<PendingConfirmation>,
}

/// Clamp to [0, 1]; NaN becomes 0
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_importance_clamped() {
        let memory = Memory::new("x", MemoryType::Fact, vec![1.0], 1.7);
        assert_eq!(memory.importance, 1.0);

        let mut memory = Memory::new("y", MemoryType::Task, vec![1.0], -0.2);
        assert_eq!(memory.importance, 0.0);
        memory.set_importance(f32::NAN);
        assert_eq!(memory.importance, 0.0);
    }

    #[test]
    fn test_touch_increments_access() {
        let mut memory = Memory::new("z", MemoryType::Conversation, vec![1.0], 0.5);
        let later = memory.created_at + chrono::Duration::seconds(5);
        memory.touch(later);
        assert_eq!(memory.access_count, 1);
        assert_eq!(memory.last_accessed_at, later);
    }

    #[test]
    fn test_memory_type_round_trip_names() {
        for t in [
            MemoryType::Fact,
            MemoryType::Preference,
            MemoryType::Conversation,
            MemoryType::Task,
        ] {
            assert_eq!(MemoryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MemoryType::parse("gossip"), None);
    }

    #[test]
    fn test_embedding_not_serialized() {
        let memory = Memory::new("secret vector", MemoryType::Fact, vec![0.1, 0.2], 0.5);
        let json = serde_json::to_string(&memory).unwrap();
        assert!(!json.contains("embedding"));
        assert!(json.contains("\"memory_type\":\"fact\""));
    }
}
